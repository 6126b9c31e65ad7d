//! Built-in function table
//!
//! Requests with a function id below the reserved threshold never reach the
//! service dispatcher. The few ids a regular node understands are answered
//! here; everything else in the reserved range is either a failure or, for the
//! directory's own ids, not found.

use std::sync::Arc;

use meshrpc_common::protocol::builtin::{
    ApiConnections, FunctionList, BUILTIN_MAX, DIAL_REGISTER, PING, PONG, PUSH_FUNCTIONS,
    PUSH_NODE_CONNECTIONS, PUSH_SERVER_STATE, PUSH_WATCHERS,
};
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::NodeIdentity;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::registry::FunctionRegistry;

/// Answers built-in requests against the node's registry.
pub struct Builtins {
    registry: Arc<FunctionRegistry>,
    local_uuid: String,
}

impl Builtins {
    pub fn new(registry: Arc<FunctionRegistry>, local_uuid: impl Into<String>) -> Self {
        Self {
            registry,
            local_uuid: local_uuid.into(),
        }
    }

    /// Runs built-in `function_id`.
    ///
    /// `origin` is the connection the request came in on; HTTP requests have
    /// none. Returns `None` for ids this table does not know, which callers
    /// answer as not found.
    pub async fn handle(
        &self,
        function_id: u16,
        payload: &[u8],
        origin: Option<&Arc<Connection>>,
    ) -> Option<Result<Vec<u8>>> {
        let result = match function_id {
            PING => Ok(PONG.to_vec()),
            DIAL_REGISTER => self.dial_register(payload, origin).await,
            PUSH_FUNCTIONS => self.push_functions(payload),
            PUSH_NODE_CONNECTIONS => self.push_node_connections(payload),
            PUSH_SERVER_STATE | PUSH_WATCHERS => {
                debug!("Acknowledged built-in push {}", function_id);
                Ok(Vec::new())
            }
            id if id < BUILTIN_MAX => Err(MeshError::Handler(format!(
                "unsupported built-in function {}",
                id
            ))),
            _ => return None,
        };
        Some(result)
    }

    /// Records the dialing peer. Its advertised host is replaced by the
    /// socket's peer address when it is empty or loopback.
    async fn dial_register(&self, payload: &[u8], origin: Option<&Arc<Connection>>) -> Result<Vec<u8>> {
        let mut identity: NodeIdentity = serde_json::from_slice(payload)?;
        if identity.uuid.is_empty() {
            return Err(MeshError::Decode("dial registration without uuid".to_string()));
        }
        if identity.uuid == self.local_uuid {
            return Ok(Vec::new());
        }

        match origin {
            Some(connection) => {
                if identity.has_placeholder_host() {
                    if let Some(addr) = connection.remote_addr() {
                        identity.host = addr.ip().to_string();
                    }
                }
                connection.set_peer(identity.clone());
                if let Some(replaced) = self.registry.record_node_connection(&identity, connection.clone()) {
                    replaced.close().await;
                }
                info!("Registered peer {} via {}", identity.uuid, connection.network());
            }
            None => self.registry.record_node(&identity),
        }
        Ok(Vec::new())
    }

    fn push_functions(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let list: FunctionList = serde_json::from_slice(payload)?;
        let mut accepted = 0;
        for descriptor in list.functions {
            let name = descriptor.api_name.clone();
            match self.registry.register(descriptor) {
                Ok(_) => accepted += 1,
                Err(e) => warn!("Rejected pushed function {}: {}", name, e),
            }
        }
        debug!("Accepted {} pushed functions", accepted);
        Ok(Vec::new())
    }

    fn push_node_connections(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let push: ApiConnections = serde_json::from_slice(payload)?;
        let entry = match push.function {
            Some(descriptor) => Some(self.registry.register(descriptor)?),
            None => None,
        };
        for node in push.nodes.iter().filter(|n| n.uuid != self.local_uuid) {
            self.registry.record_node(node);
            if let Some(entry) = &entry {
                entry.add_node(&node.uuid);
            }
        }
        Ok(Vec::new())
    }
}
