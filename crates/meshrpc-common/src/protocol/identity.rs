//! Node identities and api names

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::error::{MeshError, Result};

/// Stable identity of one process.
///
/// A port of zero means the transport is not offered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub uuid: String,
    pub name: String,
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub http_port: u16,
    pub pid: u32,
    pub version: String,
}

impl NodeIdentity {
    /// Derives a node uuid from `host:pid`.
    ///
    /// # Example
    ///
    /// ```
    /// use meshrpc_common::protocol::NodeIdentity;
    ///
    /// let uuid = NodeIdentity::derive_uuid("10.0.0.4", 4242);
    /// assert_eq!(uuid.len(), 16);
    /// assert_eq!(uuid, NodeIdentity::derive_uuid("10.0.0.4", 4242));
    /// ```
    pub fn derive_uuid(host: &str, pid: u32) -> String {
        let digest = Sha256::digest(format!("{}:{}", host, pid).as_bytes());
        let encoded = hex::encode(digest);
        encoded[8..24].to_string()
    }

    pub fn tcp_addr(&self) -> Option<String> {
        (self.tcp_port != 0).then(|| format!("{}:{}", self.host, self.tcp_port))
    }

    pub fn udp_addr(&self) -> Option<String> {
        (self.udp_port != 0).then(|| format!("{}:{}", self.host, self.udp_port))
    }

    pub fn http_url(&self) -> Option<String> {
        (self.http_port != 0).then(|| format!("http://{}:{}", self.host, self.http_port))
    }

    /// True when `qualifier` names this node by uuid or by node name.
    pub fn answers_to(&self, qualifier: &str) -> bool {
        self.uuid == qualifier || (!self.name.is_empty() && self.name == qualifier)
    }

    /// Whether the host is unusable for dialing back and should be replaced with
    /// the address the peer was seen from.
    pub fn has_placeholder_host(&self) -> bool {
        matches!(self.host.as_str(), "" | "127.0.0.1" | "0.0.0.0" | "localhost")
    }
}

/// Parsed form of `Service.Method` or `node.Service.Method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiName {
    pub node: Option<String>,
    pub service: String,
    pub method: String,
}

impl ApiName {
    /// Splits an api name into its parts.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::InvalidApiName` when the name does not have two or three
    /// non-empty dot-separated parts.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(MeshError::InvalidApiName(name.to_string()));
        }
        match parts.as_slice() {
            [service, method] => Ok(Self {
                node: None,
                service: service.to_string(),
                method: method.to_string(),
            }),
            [node, service, method] => Ok(Self {
                node: Some(node.to_string()),
                service: service.to_string(),
                method: method.to_string(),
            }),
            _ => Err(MeshError::InvalidApiName(name.to_string())),
        }
    }

    /// `Service.Method`, without any node qualifier.
    pub fn qualified(&self) -> String {
        qualify(&self.service, &self.method)
    }
}

pub fn qualify(service: &str, method: &str) -> String {
    format!("{}.{}", service, method)
}

/// Exported names start with an uppercase ASCII letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_name_forms() {
        let plain = ApiName::parse("Tsv.Add").unwrap();
        assert_eq!(plain.node, None);
        assert_eq!(plain.qualified(), "Tsv.Add");

        let pinned = ApiName::parse("worker-1.Tsv.Add").unwrap();
        assert_eq!(pinned.node.as_deref(), Some("worker-1"));
        assert_eq!(pinned.service, "Tsv");
        assert_eq!(pinned.method, "Add");

        assert!(ApiName::parse("Add").is_err());
        assert!(ApiName::parse("a.b.c.d").is_err());
        assert!(ApiName::parse("Tsv.").is_err());
    }

    #[test]
    fn test_identity_addresses() {
        let node = NodeIdentity {
            host: "10.1.1.1".into(),
            tcp_port: 9000,
            http_port: 8080,
            ..Default::default()
        };
        assert_eq!(node.tcp_addr().as_deref(), Some("10.1.1.1:9000"));
        assert_eq!(node.udp_addr(), None);
        assert_eq!(node.http_url().as_deref(), Some("http://10.1.1.1:8080"));
    }

    #[test]
    fn test_uuid_differs_per_pid() {
        assert_ne!(
            NodeIdentity::derive_uuid("10.0.0.1", 1),
            NodeIdentity::derive_uuid("10.0.0.1", 2)
        );
    }

    #[test]
    fn test_exported_names() {
        assert!(is_exported("Add"));
        assert!(!is_exported("add"));
        assert!(!is_exported(""));
    }
}
