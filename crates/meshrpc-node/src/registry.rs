//! Function registry
//!
//! Maps function ids to descriptors and back, and remembers which nodes serve
//! each function and which connections reach each node.
//!
//! Functions live in an arena indexed by id with a name side index, both behind
//! one reader/writer lock. Ids for locally registered names are derived from a
//! stable hash of the name, so two nodes registering the same api name agree on
//! its id without asking anyone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshrpc_common::protocol::builtin::RESERVED_MAX;
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::{CallKind, Encoding, FunctionDescriptor, NodeIdentity};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Network};

/// Number of ids available outside the reserved range.
const ID_SPAN: u32 = u16::MAX as u32 - RESERVED_MAX as u32 + 1;

/// One registered function and the nodes known to serve it.
#[derive(Debug)]
pub struct FunctionEntry {
    descriptor: FunctionDescriptor,
    nodes: RwLock<Vec<String>>,
}

impl FunctionEntry {
    fn new(descriptor: FunctionDescriptor) -> Self {
        Self {
            descriptor,
            nodes: RwLock::new(Vec::new()),
        }
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> u16 {
        self.descriptor.id
    }

    pub fn api_name(&self) -> &str {
        &self.descriptor.api_name
    }

    /// Uuids of nodes serving this function, in the order they were learned.
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.read().clone()
    }

    /// Returns false if the node was already listed.
    pub fn add_node(&self, uuid: &str) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n == uuid) {
            return false;
        }
        nodes.push(uuid.to_string());
        true
    }
}

/// Lookup key accepted by [`FunctionRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKey<'a> {
    Id(u16),
    Name(&'a str),
}

impl From<u16> for FunctionKey<'_> {
    fn from(id: u16) -> Self {
        FunctionKey::Id(id)
    }
}

impl<'a> From<&'a str> for FunctionKey<'a> {
    fn from(name: &'a str) -> Self {
        FunctionKey::Name(name)
    }
}

#[derive(Default)]
struct FunctionTable {
    by_id: Vec<Option<Arc<FunctionEntry>>>,
    by_name: HashMap<String, u16>,
}

impl FunctionTable {
    fn get(&self, id: u16) -> Option<&Arc<FunctionEntry>> {
        self.by_id.get(id as usize).and_then(Option::as_ref)
    }

    fn insert(&mut self, entry: Arc<FunctionEntry>) {
        let index = entry.id() as usize;
        if self.by_id.len() <= index {
            self.by_id.resize(index + 1, None);
        }
        self.by_name.insert(entry.api_name().to_string(), entry.id());
        self.by_id[index] = Some(entry);
    }

    /// First free id at or after the name's hash, wrapping inside the
    /// non-reserved range.
    fn free_id_for(&self, api_name: &str) -> Option<u16> {
        let mut id = hashed_id(api_name);
        for _ in 0..ID_SPAN {
            if self.get(id).is_none() {
                return Some(id);
            }
            id = if id == u16::MAX { RESERVED_MAX } else { id + 1 };
        }
        None
    }
}

/// FNV-1a of the name folded into `RESERVED_MAX..=u16::MAX`.
pub fn hashed_id(api_name: &str) -> u16 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in api_name.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    RESERVED_MAX + (hash % ID_SPAN) as u16
}

#[derive(Debug)]
struct NodeRecord {
    identity: NodeIdentity,
    connections: Vec<Arc<Connection>>,
}

/// Functions, nodes and the connections reaching them.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<FunctionTable>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Registers a function hosted by this process, minting its id from the
    /// name. Registering a name twice returns the first entry.
    ///
    /// # Errors
    ///
    /// - `MeshError::InvalidApiName` if the name is not `Service.Method`
    /// - `MeshError::Registration` if the id space is exhausted
    pub fn register_local(&self, api_name: &str, kind: CallKind, encoding: Encoding) -> Result<Arc<FunctionEntry>> {
        let mut table = self.functions.write();
        if let Some(entry) = table.by_name.get(api_name).and_then(|id| table.get(*id)) {
            return Ok(entry.clone());
        }
        let id = table
            .free_id_for(api_name)
            .ok_or_else(|| MeshError::Registration("function id space exhausted".to_string()))?;
        let entry = Arc::new(FunctionEntry::new(FunctionDescriptor::new(id, api_name, kind, encoding)?));
        table.insert(entry.clone());
        debug!("Registered {} as fid {}", api_name, id);
        Ok(entry)
    }

    /// Registers a descriptor learned from elsewhere, keeping its id.
    ///
    /// Idempotent by api name: a name that is already known keeps its
    /// existing entry.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Registration` if the id is reserved or already used
    /// by a different name.
    pub fn register(&self, descriptor: FunctionDescriptor) -> Result<Arc<FunctionEntry>> {
        let mut table = self.functions.write();
        if let Some(entry) = table.by_name.get(&descriptor.api_name).and_then(|id| table.get(*id)) {
            if entry.id() != descriptor.id {
                warn!(
                    "{} already registered as fid {}, ignoring fid {}",
                    descriptor.api_name,
                    entry.id(),
                    descriptor.id
                );
            }
            return Ok(entry.clone());
        }
        if descriptor.id < RESERVED_MAX {
            return Err(MeshError::Registration(format!(
                "fid {} for {} is reserved",
                descriptor.id, descriptor.api_name
            )));
        }
        if let Some(existing) = table.get(descriptor.id) {
            return Err(MeshError::Registration(format!(
                "fid {} for {} is taken by {}",
                descriptor.id,
                descriptor.api_name,
                existing.api_name()
            )));
        }
        let entry = Arc::new(FunctionEntry::new(descriptor));
        table.insert(entry.clone());
        Ok(entry)
    }

    pub fn resolve_id(&self, id: u16) -> Option<Arc<FunctionEntry>> {
        self.functions.read().get(id).cloned()
    }

    pub fn resolve_name(&self, api_name: &str) -> Option<Arc<FunctionEntry>> {
        let table = self.functions.read();
        table.by_name.get(api_name).and_then(|id| table.get(*id)).cloned()
    }

    /// Looks a function up by id or by `Service.Method`.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::UnknownApi` if nothing is registered under the key.
    pub fn resolve<'a>(&self, key: impl Into<FunctionKey<'a>>) -> Result<Arc<FunctionEntry>> {
        match key.into() {
            FunctionKey::Id(id) => self
                .resolve_id(id)
                .ok_or_else(|| MeshError::UnknownApi(format!("fid {}", id))),
            FunctionKey::Name(name) => self
                .resolve_name(name)
                .ok_or_else(|| MeshError::UnknownApi(name.to_string())),
        }
    }

    pub fn functions(&self) -> Vec<FunctionDescriptor> {
        self.functions
            .read()
            .by_id
            .iter()
            .flatten()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    // ========================================================================
    // Nodes and connections
    // ========================================================================

    /// Inserts or refreshes a node identity, keeping its connections.
    pub fn record_node(&self, identity: &NodeIdentity) {
        if identity.uuid.is_empty() {
            return;
        }
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&identity.uuid) {
            Some(record) => record.identity = identity.clone(),
            None => {
                info!("Learned node {} ({})", identity.uuid, identity.name);
                nodes.insert(
                    identity.uuid.clone(),
                    NodeRecord {
                        identity: identity.clone(),
                        connections: Vec::new(),
                    },
                );
            }
        }
    }

    /// Records `connection` as the way to reach `identity` over its network.
    ///
    /// A node keeps one connection per network. A usable connection already on
    /// record wins; one that is wrong or closed is replaced and handed back so
    /// the caller can close it.
    pub fn record_node_connection(
        &self,
        identity: &NodeIdentity,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        if identity.uuid.is_empty() {
            return None;
        }
        self.record_node(identity);
        let mut nodes = self.nodes.write();
        let record = nodes.get_mut(&identity.uuid)?;

        let slot = record
            .connections
            .iter()
            .position(|c| c.network() == connection.network());
        match slot {
            None => {
                record.connections.push(connection);
                None
            }
            Some(index) if Arc::ptr_eq(&record.connections[index], &connection) => None,
            Some(index) if record.connections[index].is_usable() => {
                debug!(
                    "Keeping existing {} connection to {}",
                    connection.network(),
                    identity.uuid
                );
                None
            }
            Some(index) => Some(std::mem::replace(&mut record.connections[index], connection)),
        }
    }

    /// Drops `connection` from whichever node lists it.
    pub fn remove_connection(&self, connection: &Arc<Connection>) {
        let mut nodes = self.nodes.write();
        for record in nodes.values_mut() {
            record.connections.retain(|c| !Arc::ptr_eq(c, connection));
        }
    }

    /// Usable connections to the nodes serving `entry`, nodes in the order they
    /// were learned and each node's connections ordered TCP, UDP, HTTP.
    pub fn connections_for(&self, entry: &FunctionEntry) -> Vec<Arc<Connection>> {
        let nodes = self.nodes.read();
        let mut found = Vec::new();
        for uuid in entry.nodes.read().iter() {
            if let Some(record) = nodes.get(uuid) {
                found.extend(connections_in_order(record));
            }
        }
        found
    }

    /// Usable connections to one node.
    pub fn connections_to(&self, uuid: &str) -> Vec<Arc<Connection>> {
        self.nodes
            .read()
            .get(uuid)
            .map(connections_in_order)
            .unwrap_or_default()
    }

    /// Identities serving `entry` that have no usable connection yet.
    pub fn unconnected_nodes(&self, entry: &FunctionEntry) -> Vec<NodeIdentity> {
        let nodes = self.nodes.read();
        entry
            .nodes
            .read()
            .iter()
            .filter_map(|uuid| nodes.get(uuid))
            .filter(|record| !record.connections.iter().any(|c| c.is_usable()))
            .map(|record| record.identity.clone())
            .collect()
    }

    /// Every connection on record, usable or not.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.nodes
            .read()
            .values()
            .flat_map(|record| record.connections.iter().cloned())
            .collect()
    }

    /// Removes connections flagged wrong or idle longer than `max_idle` and
    /// returns them for closing.
    pub fn evict_stale_connections(&self, max_idle: Duration) -> Vec<Arc<Connection>> {
        let mut evicted = Vec::new();
        let mut nodes = self.nodes.write();
        for record in nodes.values_mut() {
            record.connections.retain(|c| {
                let stale = !c.is_usable() || c.idle_for() > max_idle;
                if stale {
                    evicted.push(c.clone());
                }
                !stale
            });
        }
        if !evicted.is_empty() {
            info!("Evicted {} stale connections", evicted.len());
        }
        evicted
    }

    pub fn nodes(&self) -> Vec<NodeIdentity> {
        self.nodes
            .read()
            .values()
            .map(|record| record.identity.clone())
            .collect()
    }

    pub fn node_by_uuid(&self, uuid: &str) -> Option<NodeIdentity> {
        self.nodes.read().get(uuid).map(|record| record.identity.clone())
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIdentity> {
        self.nodes
            .read()
            .values()
            .find(|record| record.identity.name == name)
            .map(|record| record.identity.clone())
    }
}

fn connections_in_order(record: &NodeRecord) -> Vec<Arc<Connection>> {
    let mut usable: Vec<Arc<Connection>> = record
        .connections
        .iter()
        .filter(|c| c.is_usable())
        .cloned()
        .collect();
    usable.sort_by_key(|c| rank(c.network()));
    usable
}

fn rank(network: Network) -> u8 {
    match network {
        Network::Tcp => 0,
        Network::Udp => 1,
        Network::Http => 2,
        Network::Local => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionContext;

    fn identity(uuid: &str, http_port: u16) -> NodeIdentity {
        NodeIdentity {
            uuid: uuid.to_string(),
            name: format!("node-{}", uuid),
            host: "127.0.0.1".to_string(),
            http_port,
            ..Default::default()
        }
    }

    #[test]
    fn test_registration_is_idempotent_by_name() {
        let registry = FunctionRegistry::new();
        let first = registry
            .register_local("Billing.Charge", CallKind::Call, Encoding::Binary)
            .unwrap();
        let second = registry
            .register_local("Billing.Charge", CallKind::Call, Encoding::Binary)
            .unwrap();
        assert_eq!(first.id(), second.id());
        assert!(first.id() >= RESERVED_MAX);
        assert_eq!(registry.functions().len(), 1);
    }

    #[test]
    fn test_hashed_ids_agree_across_registries() {
        let a = FunctionRegistry::new();
        let b = FunctionRegistry::new();
        let ida = a.register_local("Echo.Say", CallKind::Call, Encoding::Json).unwrap().id();
        let idb = b.register_local("Echo.Say", CallKind::Call, Encoding::Json).unwrap().id();
        assert_eq!(ida, idb);
        assert_eq!(ida, hashed_id("Echo.Say"));
    }

    #[test]
    fn test_collision_probes_to_next_free_id() {
        let registry = FunctionRegistry::new();
        let wanted = hashed_id("Echo.Say");
        let squatter = FunctionDescriptor::new(wanted, "Other.Thing", CallKind::Send, Encoding::Binary).unwrap();
        registry.register(squatter).unwrap();

        let entry = registry.register_local("Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        let expected = if wanted == u16::MAX { RESERVED_MAX } else { wanted + 1 };
        assert_eq!(entry.id(), expected);
    }

    #[test]
    fn test_register_rejects_reserved_and_taken_ids() {
        let registry = FunctionRegistry::new();
        let reserved = FunctionDescriptor::new(12, "Low.Id", CallKind::Call, Encoding::Binary).unwrap();
        assert!(matches!(registry.register(reserved), Err(MeshError::Registration(_))));

        let a = FunctionDescriptor::new(5000, "A.One", CallKind::Call, Encoding::Binary).unwrap();
        let b = FunctionDescriptor::new(5000, "B.Two", CallKind::Call, Encoding::Binary).unwrap();
        registry.register(a).unwrap();
        assert!(matches!(registry.register(b), Err(MeshError::Registration(_))));
    }

    #[test]
    fn test_register_keeps_existing_entry_for_known_name() {
        let registry = FunctionRegistry::new();
        let local = registry.register_local("Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        let pushed = FunctionDescriptor::new(7777, "Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        assert_eq!(registry.register(pushed).unwrap().id(), local.id());
    }

    #[test]
    fn test_probed_local_id_survives_conflicting_push() {
        let registry = FunctionRegistry::new();
        let wanted = hashed_id("Echo.Say");
        let squatter = FunctionDescriptor::new(wanted, "Other.Thing", CallKind::Send, Encoding::Binary).unwrap();
        registry.register(squatter).unwrap();
        let local = registry.register_local("Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        assert_ne!(local.id(), wanted);

        let pushed = FunctionDescriptor::new(wanted, "Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        assert_eq!(registry.register(pushed).unwrap().id(), local.id());
        assert_eq!(registry.resolve(wanted).unwrap().api_name(), "Other.Thing");
    }

    #[test]
    fn test_resolve_by_id_and_name() {
        let registry = FunctionRegistry::new();
        let entry = registry.register_local("Echo.Say", CallKind::Call, Encoding::Binary).unwrap();
        assert_eq!(registry.resolve(entry.id()).unwrap().api_name(), "Echo.Say");
        assert_eq!(registry.resolve("Echo.Say").unwrap().id(), entry.id());
        assert!(matches!(registry.resolve("Echo.Missing"), Err(MeshError::UnknownApi(_))));
        assert!(matches!(registry.resolve(99u16), Err(MeshError::UnknownApi(_))));
    }

    #[tokio::test]
    async fn test_connections_for_skips_wrong_connections() {
        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let registry = FunctionRegistry::new();
        let entry = registry.register_local("Echo.Say", CallKind::Call, Encoding::Binary).unwrap();

        let a = identity("aaaa", 9001);
        let b = identity("bbbb", 9002);
        let conn_a = Connection::http(a.clone(), &ctx).unwrap();
        let conn_b = Connection::http(b.clone(), &ctx).unwrap();
        registry.record_node_connection(&a, conn_a.clone());
        registry.record_node_connection(&b, conn_b.clone());
        entry.add_node("aaaa");
        entry.add_node("bbbb");

        let found = registry.connections_for(&entry);
        assert_eq!(found.len(), 2);
        assert!(Arc::ptr_eq(&found[0], &conn_a));

        conn_a.mark_wrong();
        let found = registry.connections_for(&entry);
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&found[0], &conn_b));
        assert_eq!(registry.unconnected_nodes(&entry), vec![a]);
    }

    #[tokio::test]
    async fn test_wrong_connection_is_replaced_and_evicted() {
        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let registry = FunctionRegistry::new();
        let node = identity("cccc", 9003);

        let first = Connection::http(node.clone(), &ctx).unwrap();
        let second = Connection::http(node.clone(), &ctx).unwrap();
        assert!(registry.record_node_connection(&node, first.clone()).is_none());
        // A usable connection on record is kept.
        assert!(registry.record_node_connection(&node, second.clone()).is_none());
        assert!(Arc::ptr_eq(&registry.connections_to("cccc")[0], &first));

        first.mark_wrong();
        let replaced = registry.record_node_connection(&node, second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));

        second.mark_wrong();
        let evicted = registry.evict_stale_connections(Duration::from_secs(10));
        assert_eq!(evicted.len(), 1);
        assert!(registry.all_connections().is_empty());
        assert_eq!(registry.node_by_name("node-cccc").unwrap().uuid, "cccc");
    }

    #[tokio::test]
    async fn test_idle_connections_are_evicted() {
        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let registry = FunctionRegistry::new();
        let node = identity("dddd", 9004);
        registry.record_node_connection(&node, Connection::http(node.clone(), &ctx).unwrap());

        assert!(registry.evict_stale_connections(Duration::from_secs(60)).is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.evict_stale_connections(Duration::from_millis(1)).len(), 1);
    }
}
