use serde::{Deserialize, Serialize};

use crate::protocol::encoding::Encoding;
use crate::protocol::error::{MeshError, Result};
use crate::protocol::identity::ApiName;

/// How a method is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Fire-and-forget: one request argument, no response.
    Send,
    /// Request/response: one request argument, one response.
    Call,
    /// Several request arguments, one response.
    Multi,
}

impl CallKind {
    pub fn expects_response(self) -> bool {
        !matches!(self, CallKind::Send)
    }
}

/// Immutable description of one invocable function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: u16,
    pub api_name: String,
    pub service: String,
    pub method: String,
    pub kind: CallKind,
    pub encoding: Encoding,
}

impl FunctionDescriptor {
    /// Builds a descriptor from a `Service.Method` name.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::InvalidApiName` if the name is not `Service.Method`.
    pub fn new(id: u16, api_name: &str, kind: CallKind, encoding: Encoding) -> Result<Self> {
        let parsed = ApiName::parse(api_name)?;
        if parsed.node.is_some() {
            return Err(MeshError::InvalidApiName(api_name.to_string()));
        }
        Ok(Self {
            id,
            api_name: parsed.qualified(),
            service: parsed.service,
            method: parsed.method,
            kind,
            encoding,
        })
    }
}
