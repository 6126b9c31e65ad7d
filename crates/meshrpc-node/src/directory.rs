//! Directory client
//!
//! The directory ("watcher") knows which nodes exist and which functions they
//! serve. Nodes register with it on start, heartbeat periodically and ask it
//! when their own registry cannot resolve a function or has no live
//! connection for one.
//!
//! [`WatcherDirectory`] talks to real watchers with built-in calls carrying
//! JSON. [`StaticDirectory`] answers from memory for tests and single-host
//! setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshrpc_common::protocol::builtin::{
    ApiConnections, FunctionQuery, NodeQuery, RegisterReply, Registration, WATCHER_NODE_NAME,
    WATCH_API_CONNECTIONS, WATCH_FUNCTION, WATCH_HEARTBEAT, WATCH_NODE, WATCH_REGISTER,
};
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::{FunctionDescriptor, NodeIdentity};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionContext};

/// Node and function discovery.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Announces this node and its functions. The reply carries the function
    /// ids the directory already knows and the current watcher list.
    async fn register(&self, registration: &Registration) -> Result<RegisterReply>;

    async fn heartbeat(&self, identity: &NodeIdentity) -> Result<()>;

    /// Looks a function up by id (when non-zero) or api name.
    async fn function(&self, query: &FunctionQuery) -> Result<FunctionDescriptor>;

    /// Nodes currently serving a function.
    async fn connections(&self, query: &FunctionQuery) -> Result<Vec<NodeIdentity>>;

    /// Looks a node up by uuid (when non-empty) or name.
    async fn node(&self, query: &NodeQuery) -> Result<NodeIdentity>;
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Default)]
struct StaticState {
    functions: HashMap<String, FunctionDescriptor>,
    nodes: HashMap<String, NodeIdentity>,
    serving: HashMap<String, Vec<String>>,
    heartbeats: HashMap<String, usize>,
}

impl StaticState {
    fn find_function(&self, query: &FunctionQuery) -> Option<&FunctionDescriptor> {
        if query.function_id != 0 {
            self.functions.values().find(|f| f.id == query.function_id)
        } else {
            self.functions.get(&query.api_name)
        }
    }
}

/// Directory held in memory. Shared between nodes in one process, it behaves
/// like a single watcher that never loses state.
#[derive(Default)]
pub struct StaticDirectory {
    state: RwLock<StaticState>,
    lookups: AtomicUsize,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publishes `node` as serving `functions` without a registration call.
    pub fn publish(&self, node: NodeIdentity, functions: &[FunctionDescriptor]) {
        let mut state = self.state.write();
        for function in functions {
            state
                .functions
                .entry(function.api_name.clone())
                .or_insert_with(|| function.clone());
            let serving = state.serving.entry(function.api_name.clone()).or_default();
            if !serving.contains(&node.uuid) {
                serving.push(node.uuid.clone());
            }
        }
        state.nodes.insert(node.uuid.clone(), node);
    }

    /// Stops listing `uuid` as serving anything.
    pub fn withdraw(&self, uuid: &str) {
        let mut state = self.state.write();
        state.nodes.remove(uuid);
        for serving in state.serving.values_mut() {
            serving.retain(|u| u != uuid);
        }
    }

    /// How many times `connections` has been asked.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self, uuid: &str) -> usize {
        self.state.read().heartbeats.get(uuid).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn register(&self, registration: &Registration) -> Result<RegisterReply> {
        self.publish(registration.node.clone(), &registration.functions);
        let state = self.state.read();
        Ok(RegisterReply {
            functions: state.functions.values().cloned().collect(),
            watchers: Vec::new(),
        })
    }

    async fn heartbeat(&self, identity: &NodeIdentity) -> Result<()> {
        *self
            .state
            .write()
            .heartbeats
            .entry(identity.uuid.clone())
            .or_default() += 1;
        Ok(())
    }

    async fn function(&self, query: &FunctionQuery) -> Result<FunctionDescriptor> {
        self.state
            .read()
            .find_function(query)
            .cloned()
            .ok_or_else(|| MeshError::UnknownApi(describe_query(query)))
    }

    async fn connections(&self, query: &FunctionQuery) -> Result<Vec<NodeIdentity>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read();
        let function = state
            .find_function(query)
            .ok_or_else(|| MeshError::UnknownApi(describe_query(query)))?;
        Ok(state
            .serving
            .get(&function.api_name)
            .map(|uuids| uuids.iter().filter_map(|u| state.nodes.get(u)).cloned().collect())
            .unwrap_or_default())
    }

    async fn node(&self, query: &NodeQuery) -> Result<NodeIdentity> {
        let state = self.state.read();
        let found = if query.uuid.is_empty() {
            state.nodes.values().find(|n| n.name == query.name)
        } else {
            state.nodes.get(&query.uuid)
        };
        found
            .cloned()
            .ok_or_else(|| MeshError::Directory(format!("unknown node {}{}", query.uuid, query.name)))
    }
}

fn describe_query(query: &FunctionQuery) -> String {
    if query.function_id != 0 {
        format!("fid {}", query.function_id)
    } else {
        query.api_name.clone()
    }
}

// ============================================================================
// Watcher client
// ============================================================================

/// Client for watcher nodes, asking the master first and the slaves in order
/// when it cannot be reached.
pub struct WatcherDirectory {
    ctx: ConnectionContext,
    watchers: RwLock<Vec<NodeIdentity>>,
    links: Mutex<HashMap<String, Arc<Connection>>>,
    timeout: Duration,
}

impl WatcherDirectory {
    /// Builds a client for watchers at `host:port` TCP addresses. See
    /// [`parse_watchers`].
    pub fn new(ctx: ConnectionContext, addresses: &[String], timeout: Duration) -> Result<Self> {
        Ok(Self::with_watchers(ctx, parse_watchers(addresses)?, timeout))
    }

    pub fn with_watchers(ctx: ConnectionContext, watchers: Vec<NodeIdentity>, timeout: Duration) -> Self {
        Self {
            ctx,
            watchers: RwLock::new(watchers),
            links: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn watchers(&self) -> Vec<NodeIdentity> {
        self.watchers.read().clone()
    }

    async fn link(&self, watcher: &NodeIdentity) -> Result<Arc<Connection>> {
        let key = watcher_key(watcher);
        let cached = self.links.lock().get(&key).filter(|c| c.is_usable()).cloned();
        if let Some(link) = cached {
            return Ok(link);
        }
        let link = Connection::connect(watcher.clone(), &self.ctx).await?;
        let replaced = self.links.lock().insert(key, link.clone());
        if let Some(old) = replaced {
            old.close().await;
        }
        Ok(link)
    }

    /// Calls `function_id` on the master watcher, falling back to the slaves.
    async fn master_call<Req, Rsp>(&self, function_id: u16, request: &Req) -> Result<Rsp>
    where
        Req: Serialize + ?Sized + Sync,
        Rsp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let deadline = Instant::now() + self.timeout;
        let mut last = MeshError::Directory("no watcher reachable".to_string());

        for watcher in self.watchers() {
            let link = match self.link(&watcher).await {
                Ok(link) => link,
                Err(e) => {
                    debug!("Watcher {}:{} unreachable: {}", watcher.host, watcher.tcp_port, e);
                    last = e;
                    continue;
                }
            };
            match link.call(function_id, WATCHER_NODE_NAME, &payload, deadline).await {
                Ok(body) if body.is_empty() => return Ok(serde_json::from_slice(b"null")?),
                Ok(body) => return Ok(serde_json::from_slice(&body)?),
                Err(e) if e.is_transport() => {
                    warn!("Watcher {} failed, trying next: {}", link.describe(), e);
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(MeshError::Directory(format!("request watchers wrong: {}", last)))
    }
}

#[async_trait]
impl Directory for WatcherDirectory {
    async fn register(&self, registration: &Registration) -> Result<RegisterReply> {
        let reply: RegisterReply = self.master_call(WATCH_REGISTER, registration).await?;
        if !reply.watchers.is_empty() {
            info!("Directory lists {} watchers", reply.watchers.len());
            *self.watchers.write() = reply.watchers.clone();
        }
        Ok(reply)
    }

    async fn heartbeat(&self, identity: &NodeIdentity) -> Result<()> {
        let _: Option<serde_json::Value> = self.master_call(WATCH_HEARTBEAT, identity).await?;
        Ok(())
    }

    async fn function(&self, query: &FunctionQuery) -> Result<FunctionDescriptor> {
        let found: Option<FunctionDescriptor> = self.master_call(WATCH_FUNCTION, query).await?;
        found.ok_or_else(|| MeshError::UnknownApi(describe_query(query)))
    }

    async fn connections(&self, query: &FunctionQuery) -> Result<Vec<NodeIdentity>> {
        let found: Option<ApiConnections> = self.master_call(WATCH_API_CONNECTIONS, query).await?;
        Ok(found.map(|c| c.nodes).unwrap_or_default())
    }

    async fn node(&self, query: &NodeQuery) -> Result<NodeIdentity> {
        let found: Option<NodeIdentity> = self.master_call(WATCH_NODE, query).await?;
        found.ok_or_else(|| MeshError::Directory(format!("unknown node {}{}", query.uuid, query.name)))
    }
}

/// Parses watcher `host:port` addresses, master first.
///
/// # Errors
///
/// Returns `MeshError::Directory` for an empty list or an address without a
/// valid port.
pub fn parse_watchers(addresses: &[String]) -> Result<Vec<NodeIdentity>> {
    if addresses.is_empty() {
        return Err(MeshError::Directory("no watcher addresses".to_string()));
    }
    addresses.iter().map(String::as_str).map(watcher_identity).collect()
}

fn watcher_identity(addr: &str) -> Result<NodeIdentity> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| MeshError::Directory(format!("watcher address {} has no port", addr)))?;
    let tcp_port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| MeshError::Directory(format!("watcher address {} has a bad port", addr)))?;
    Ok(NodeIdentity {
        name: WATCHER_NODE_NAME.to_string(),
        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        tcp_port,
        ..Default::default()
    })
}

fn watcher_key(watcher: &NodeIdentity) -> String {
    format!("{}:{}:{}:{}", watcher.host, watcher.tcp_port, watcher.udp_port, watcher.http_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrpc_common::protocol::{CallKind, Encoding};

    fn node(uuid: &str, name: &str) -> NodeIdentity {
        NodeIdentity {
            uuid: uuid.into(),
            name: name.into(),
            host: "127.0.0.1".into(),
            tcp_port: 7100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_static_directory_registration() {
        let directory = StaticDirectory::new();
        let echo = FunctionDescriptor::new(900, "Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        let reply = directory
            .register(&Registration {
                node: node("a", "alpha"),
                functions: vec![echo.clone()],
            })
            .await
            .unwrap();
        assert_eq!(reply.functions, vec![echo.clone()]);

        // A second node keeps the first node's id for the same name.
        let renumbered = FunctionDescriptor::new(901, "Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        directory.publish(node("b", "beta"), &[renumbered]);

        let by_name = FunctionQuery {
            function_id: 0,
            api_name: "Echo.Say".into(),
        };
        assert_eq!(directory.function(&by_name).await.unwrap().id, 900);
        let nodes = directory.connections(&by_name).await.unwrap();
        assert_eq!(nodes.iter().map(|n| n.uuid.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(directory.lookups(), 1);

        directory.withdraw("a");
        let by_id = FunctionQuery {
            function_id: 900,
            api_name: String::new(),
        };
        assert_eq!(directory.connections(&by_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_static_directory_nodes_and_heartbeats() {
        let directory = StaticDirectory::new();
        directory.publish(node("a", "alpha"), &[]);
        let by_name = NodeQuery {
            uuid: String::new(),
            name: "alpha".into(),
        };
        assert_eq!(directory.node(&by_name).await.unwrap().uuid, "a");
        assert!(directory
            .node(&NodeQuery {
                uuid: "zzz".into(),
                name: String::new()
            })
            .await
            .is_err());

        directory.heartbeat(&node("a", "alpha")).await.unwrap();
        directory.heartbeat(&node("a", "alpha")).await.unwrap();
        assert_eq!(directory.heartbeats("a"), 2);
    }

    #[test]
    fn test_watcher_addresses() {
        let watcher = watcher_identity("10.1.2.3:7000").unwrap();
        assert_eq!(watcher.host, "10.1.2.3");
        assert_eq!(watcher.tcp_port, 7000);
        assert_eq!(watcher.name, WATCHER_NODE_NAME);
        assert_eq!(watcher_identity("[::1]:7000").unwrap().host, "::1");
        assert!(watcher_identity("nohost").is_err());
        assert!(watcher_identity("host:0").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_watchers_fail_with_directory_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let directory = WatcherDirectory::new(ctx, &[addr], Duration::from_millis(500)).unwrap();
        let err = directory.heartbeat(&node("a", "alpha")).await.unwrap_err();
        assert!(matches!(err, MeshError::Directory(_)));
    }
}
