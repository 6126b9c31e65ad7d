//! Built-in function ids and payload shapes
//!
//! Function ids below [`BUILTIN_MAX`] never reach a registered service; they are
//! handled by the node itself. Ids below [`RESERVED_MAX`] are reserved for the
//! directory role. Built-in payloads are always JSON.

use serde::{Deserialize, Serialize};

use crate::protocol::descriptor::FunctionDescriptor;
use crate::protocol::identity::NodeIdentity;

/// Upper bound (exclusive) of ids handled by the node's built-in table.
pub const BUILTIN_MAX: u16 = 30;

/// Upper bound (exclusive) of ids reserved for built-in and directory functions.
/// Also the first correlation id handed out to ordinary calls.
pub const RESERVED_MAX: u16 = 100;

/// Reply body of a successful ping.
pub const PONG: &[u8] = b"PONG";

/// Message carried by not-found responses.
pub const NOT_FOUND_MESSAGE: &str = "not found this server api by function id";

// ============================================================================
// Node Built-ins
// ============================================================================

pub const PING: u16 = 1;
pub const DIAL_REGISTER: u16 = 2;
pub const PUSH_FUNCTIONS: u16 = 11;
pub const PUSH_NODE_CONNECTIONS: u16 = 12;
pub const PUSH_SERVER_STATE: u16 = 13;
pub const PUSH_WATCHERS: u16 = 14;

// ============================================================================
// Directory Functions
// ============================================================================

pub const WATCH_REGISTER: u16 = 80;
pub const WATCH_HEARTBEAT: u16 = 81;
pub const WATCH_NODE: u16 = 82;
pub const WATCH_FUNCTION: u16 = 83;
pub const WATCH_API_CONNECTIONS: u16 = 85;

/// Node name used by directory processes.
pub const WATCHER_NODE_NAME: &str = "WATCHER";

/// JSON envelope accepted by the HTTP `/builtin` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinEnvelope {
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub num: u32,
    pub fid: u16,
}

/// Lookup key for directory queries: by id when non-zero, otherwise by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionQuery {
    pub function_id: u16,
    pub api_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeQuery {
    pub uuid: String,
    pub name: String,
}

/// Directory answer to a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub functions: Vec<FunctionDescriptor>,
    pub watchers: Vec<NodeIdentity>,
}

/// Nodes currently known to serve one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConnections {
    pub function: Option<FunctionDescriptor>,
    pub nodes: Vec<NodeIdentity>,
}

/// Push of function descriptors from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionList {
    pub functions: Vec<FunctionDescriptor>,
}

/// What a node sends when registering with the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub node: NodeIdentity,
    pub functions: Vec<FunctionDescriptor>,
}
