//! Call router
//!
//! Turns an api name into a local or remote invocation:
//!
//! 1. **Local**: a name without node qualifier whose service this process hosts,
//!    or one qualified with this node's name or uuid, runs in-process.
//! 2. **Resolve**: the registry maps the name to a function id, asking the
//!    directory when it does not know the name.
//! 3. **Select**: usable connections to nodes serving the function, ordered
//!    TCP, UDP, HTTP per node. Known nodes without one are dialed.
//! 4. **Dispatch**: candidates are tried in order. A transport error moves on
//!    to the next candidate; any other error is the call's answer.
//! 5. **Re-query**: when no candidate is left and the directory was not asked
//!    during this call, it is asked once more for fresh nodes before giving up.
//!
//! The router also receives requests arriving on any connection and runs them
//! against the dispatcher, one task per request.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use meshrpc_common::protocol::builtin::{FunctionQuery, NodeQuery, RESERVED_MAX};
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::{ApiName, CallKind, Encoding, Message, MultiBody, NodeIdentity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::builtin::Builtins;
use crate::config::NodeConfig;
use crate::connection::{Connection, ConnectionContext, Inbound, Network};
use crate::directory::{Directory, WatcherDirectory};
use crate::registry::{FunctionEntry, FunctionRegistry};
use crate::service::{Dispatcher, MultiArgs, ServiceDescriptor};

/// Result of a routed call along with where it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub value: T,
    /// The node that answered; this node for local calls.
    pub node: NodeIdentity,
    pub network: Network,
}

impl<T> Reply<T> {
    fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Reply<U>> {
        Ok(Reply {
            value: f(self.value)?,
            node: self.node,
            network: self.network,
        })
    }
}

/// Where a resolved call will run.
enum Target {
    Local {
        service: Arc<ServiceDescriptor>,
        method: String,
        kind: CallKind,
    },
    Remote {
        name: ApiName,
        entry: Arc<FunctionEntry>,
    },
}

impl Target {
    fn kind(&self) -> CallKind {
        match self {
            Target::Local { kind, .. } => *kind,
            Target::Remote { entry, .. } => entry.descriptor().kind,
        }
    }

    fn encoding(&self) -> Encoding {
        match self {
            Target::Local { service, .. } => service.encoding(),
            Target::Remote { entry, .. } => entry.descriptor().encoding,
        }
    }
}

/// What to do with an inbound request once it has run.
pub(crate) enum Outcome {
    Reply(Result<Vec<u8>>),
    NoReply,
    NotFound,
}

pub(crate) struct RouterState {
    identity: NodeIdentity,
    config: NodeConfig,
    registry: Arc<FunctionRegistry>,
    dispatcher: Arc<Dispatcher>,
    directory: Option<Arc<dyn Directory>>,
    builtins: Builtins,
    ctx: ConnectionContext,
}

/// Handle for issuing calls. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    state: Arc<RouterState>,
}

impl Router {
    /// Creates the router and the connection context its connections share.
    ///
    /// Without an explicit `directory`, the configured watcher addresses are
    /// used; with neither, the router only knows what it is told.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Directory` if a configured watcher address is bad.
    pub fn new(
        identity: NodeIdentity,
        config: NodeConfig,
        dispatcher: Arc<Dispatcher>,
        directory: Option<Arc<dyn Directory>>,
    ) -> Result<Self> {
        let watchers = if directory.is_none() && !config.directory.is_empty() {
            Some(crate::directory::parse_watchers(&config.directory)?)
        } else {
            None
        };
        let registry = Arc::new(FunctionRegistry::new());

        let state = Arc::new_cyclic(|weak: &Weak<RouterState>| {
            let inbound: Weak<dyn Inbound> = weak.clone();
            let ctx = ConnectionContext::new(identity.clone(), inbound, &config);
            let directory = directory.or_else(|| {
                watchers.map(|watchers| {
                    let client = WatcherDirectory::with_watchers(ctx.clone(), watchers, config.call_timeout);
                    Arc::new(client) as Arc<dyn Directory>
                })
            });
            RouterState {
                builtins: Builtins::new(registry.clone(), identity.uuid.clone()),
                identity,
                config,
                registry,
                dispatcher,
                directory,
                ctx,
            }
        });
        Ok(Self { state })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.state.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.state.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    pub fn directory(&self) -> Option<&Arc<dyn Directory>> {
        self.state.directory.as_ref()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.state.ctx
    }

    pub(crate) fn state(&self) -> &Arc<RouterState> {
        &self.state
    }

    // ========================================================================
    // Typed calls
    // ========================================================================

    /// Calls a request/response method with the default timeout.
    ///
    /// # Errors
    ///
    /// - `MeshError::UnknownApi` if nothing resolves the name or it is not a
    ///   request/response method
    /// - `MeshError::NoConnection` if no node serving it can be reached
    /// - `MeshError::Timeout` if no answer arrives in time
    /// - `MeshError::Remote` or `MeshError::Handler` for the method's own error
    pub async fn call<Req, Rsp>(&self, api_name: &str, request: &Req) -> Result<Rsp>
    where
        Req: Serialize + ?Sized + Sync,
        Rsp: DeserializeOwned,
    {
        self.call_timeout(api_name, request, self.state.config.call_timeout).await
    }

    pub async fn call_timeout<Req, Rsp>(&self, api_name: &str, request: &Req, timeout: Duration) -> Result<Rsp>
    where
        Req: Serialize + ?Sized + Sync,
        Rsp: DeserializeOwned,
    {
        Ok(self.call_reply(api_name, request, timeout).await?.value)
    }

    /// Calls `api_name` on the node with the given name or uuid.
    pub async fn call_on<Req, Rsp>(&self, node: &str, api_name: &str, request: &Req) -> Result<Rsp>
    where
        Req: Serialize + ?Sized + Sync,
        Rsp: DeserializeOwned,
    {
        self.call(&format!("{}.{}", node, api_name), request).await
    }

    /// Like [`Router::call_timeout`], also reporting which node answered over
    /// which network.
    pub async fn call_reply<Req, Rsp>(&self, api_name: &str, request: &Req, timeout: Duration) -> Result<Reply<Rsp>>
    where
        Req: Serialize + ?Sized + Sync,
        Rsp: DeserializeOwned,
    {
        let target = self.prepare(api_name, CallKind::Call).await?;
        let encoding = target.encoding();
        let payload = encoding.encode(request)?;
        let reply = self.execute(api_name, &target, payload, Instant::now() + timeout).await?;
        reply.try_map(|body| encoding.decode(&body))
    }

    /// Sends to a fire-and-forget method; returns once the request is written.
    pub async fn send<Req>(&self, api_name: &str, request: &Req) -> Result<()>
    where
        Req: Serialize + ?Sized + Sync,
    {
        self.send_timeout(api_name, request, self.state.config.call_timeout).await
    }

    pub async fn send_timeout<Req>(&self, api_name: &str, request: &Req, timeout: Duration) -> Result<()>
    where
        Req: Serialize + ?Sized + Sync,
    {
        let target = self.prepare(api_name, CallKind::Send).await?;
        let payload = target.encoding().encode(request)?;
        self.execute(api_name, &target, payload, Instant::now() + timeout)
            .await
            .map(|_| ())
    }

    pub async fn send_on<Req>(&self, node: &str, api_name: &str, request: &Req) -> Result<()>
    where
        Req: Serialize + ?Sized + Sync,
    {
        self.send(&format!("{}.{}", node, api_name), request).await
    }

    /// Sends to every known node serving `api_name`, this one included when
    /// it hosts the method, within the broadcast timeout.
    ///
    /// Returns how many nodes accepted the request.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::NoConnection` when no node could be reached.
    pub async fn send_all<Req>(&self, api_name: &str, request: &Req) -> Result<usize>
    where
        Req: Serialize + ?Sized + Sync,
    {
        let name = ApiName::parse(api_name)?;
        let local = self
            .state
            .dispatcher
            .service(&name.service)
            .filter(|service| service.method(&name.method).is_some());
        if let Some(kind) = local.as_ref().and_then(|s| s.method(&name.method)).map(|m| m.kind()) {
            expect_kind(api_name, kind, CallKind::Send)?;
        }

        let entry = match self.resolve_function(&name).await {
            Ok(entry) => entry,
            Err(e) => {
                let Some(service) = local else {
                    return Err(e);
                };
                debug!("Broadcast {} stays local: {}", api_name, e);
                let payload = service.encoding().encode(request)?;
                self.spawn_local(service, name.method.clone(), payload);
                return Ok(1);
            }
        };
        expect_kind(api_name, entry.descriptor().kind, CallKind::Send)?;
        let payload = entry.descriptor().encoding.encode(request)?;
        let deadline = Instant::now() + self.state.config.broadcast_timeout;

        if entry.nodes().is_empty() {
            if let Err(e) = self.refresh(&entry).await {
                debug!("Directory lookup for broadcast failed: {}", e);
            }
        }

        let mut delivered = 0;
        if let Some(service) = local {
            self.spawn_local(service, name.method.clone(), payload.clone());
            delivered += 1;
        }

        let sends = entry
            .nodes()
            .into_iter()
            .filter(|uuid| *uuid != self.state.identity.uuid)
            .map(|uuid| {
                let entry = entry.clone();
                let payload = &payload;
                async move {
                    for connection in self.connections_to_node(&uuid).await {
                        match self.attempt(&connection, &entry, payload, deadline).await {
                            Ok(_) => return true,
                            Err(e) => debug!("Broadcast to {} failed: {}", connection.describe(), e),
                        }
                    }
                    false
                }
            });
        delivered += join_all(sends).await.into_iter().filter(|ok| *ok).count();

        if delivered == 0 {
            return Err(MeshError::NoConnection(api_name.to_string()));
        }
        Ok(delivered)
    }

    /// Calls a multi-argument method with the default timeout.
    pub async fn call_multi<Args, Rsp>(&self, api_name: &str, args: &Args) -> Result<Rsp>
    where
        Args: MultiArgs + Sync,
        Rsp: DeserializeOwned,
    {
        let target = self.prepare(api_name, CallKind::Multi).await?;
        let encoding = target.encoding();
        let payload = args.encode(encoding)?.encode();
        let deadline = Instant::now() + self.state.config.call_timeout;
        let reply = self.execute(api_name, &target, payload, deadline).await?;
        encoding.decode(&reply.value)
    }

    pub async fn call_multi_on<Args, Rsp>(&self, node: &str, api_name: &str, args: &Args) -> Result<Rsp>
    where
        Args: MultiArgs + Sync,
        Rsp: DeserializeOwned,
    {
        self.call_multi(&format!("{}.{}", node, api_name), args).await
    }

    // ========================================================================
    // Raw calls
    // ========================================================================

    /// Calls a request/response method with an already encoded request.
    pub async fn call_raw(&self, api_name: &str, payload: Vec<u8>, timeout: Duration) -> Result<Reply<Vec<u8>>> {
        let target = self.prepare(api_name, CallKind::Call).await?;
        self.execute(api_name, &target, payload, Instant::now() + timeout).await
    }

    /// Calls a multi-argument method with already encoded arguments, one
    /// segment each.
    pub async fn call_multi_raw(
        &self,
        api_name: &str,
        segments: Vec<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Reply<Vec<u8>>> {
        let target = self.prepare(api_name, CallKind::Multi).await?;
        let payload = MultiBody::new(segments).encode();
        self.execute(api_name, &target, payload, Instant::now() + timeout).await
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Looks a node up by uuid, asking the directory when it is not known.
    pub async fn node_by_uuid(&self, uuid: &str) -> Result<NodeIdentity> {
        if let Some(node) = self.state.registry.node_by_uuid(uuid) {
            return Ok(node);
        }
        self.ask_node(NodeQuery {
            uuid: uuid.to_string(),
            name: String::new(),
        })
        .await
    }

    /// Looks a node up by name, asking the directory when it is not known.
    pub async fn node_by_name(&self, name: &str) -> Result<NodeIdentity> {
        if name == self.state.identity.name {
            return Ok(self.state.identity.clone());
        }
        if let Some(node) = self.state.registry.node_by_name(name) {
            return Ok(node);
        }
        self.ask_node(NodeQuery {
            uuid: String::new(),
            name: name.to_string(),
        })
        .await
    }

    async fn ask_node(&self, query: NodeQuery) -> Result<NodeIdentity> {
        let directory = self.state.directory.as_ref().ok_or_else(|| {
            MeshError::Directory(format!("unknown node {}{}", query.uuid, query.name))
        })?;
        let node = directory.node(&query).await?;
        self.state.registry.record_node(&node);
        Ok(node)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    async fn prepare(&self, api_name: &str, expected: CallKind) -> Result<Target> {
        let name = ApiName::parse(api_name)?;
        let is_self = name
            .node
            .as_deref()
            .is_some_and(|q| self.state.identity.answers_to(q));

        if name.node.is_none() || is_self {
            if let Some(service) = self.state.dispatcher.service(&name.service) {
                if let Some(method) = service.method(&name.method) {
                    let kind = method.kind();
                    expect_kind(api_name, kind, expected)?;
                    return Ok(Target::Local {
                        method: name.method,
                        service,
                        kind,
                    });
                }
            }
            if is_self {
                return Err(MeshError::UnknownApi(api_name.to_string()));
            }
        }

        let entry = self.resolve_function(&name).await?;
        expect_kind(api_name, entry.descriptor().kind, expected)?;
        Ok(Target::Remote { name, entry })
    }

    async fn resolve_function(&self, name: &ApiName) -> Result<Arc<FunctionEntry>> {
        let qualified = name.qualified();
        if let Some(entry) = self.state.registry.resolve_name(&qualified) {
            return Ok(entry);
        }
        let directory = self
            .state
            .directory
            .as_ref()
            .ok_or_else(|| MeshError::UnknownApi(qualified.clone()))?;
        let descriptor = directory
            .function(&FunctionQuery {
                function_id: 0,
                api_name: qualified,
            })
            .await?;
        self.state.registry.register(descriptor)
    }

    async fn execute(
        &self,
        api_name: &str,
        target: &Target,
        payload: Vec<u8>,
        deadline: Instant,
    ) -> Result<Reply<Vec<u8>>> {
        match target {
            Target::Local { service, method, .. } => {
                if target.kind() == CallKind::Send {
                    self.spawn_local(service.clone(), method.clone(), payload);
                    return Ok(self.local_reply(Vec::new()));
                }
                let value = self.invoke_local(service.clone(), method.clone(), payload).await?;
                Ok(self.local_reply(value))
            }
            Target::Remote { name, entry } => self.dispatch(api_name, name, entry, &payload, deadline).await,
        }
    }

    fn local_reply(&self, value: Vec<u8>) -> Reply<Vec<u8>> {
        Reply {
            value,
            node: self.state.identity.clone(),
            network: Network::Local,
        }
    }

    async fn invoke_local(&self, service: Arc<ServiceDescriptor>, method: String, payload: Vec<u8>) -> Result<Vec<u8>> {
        let dispatcher = self.state.dispatcher.clone();
        tokio::task::spawn_blocking(move || dispatcher.invoke(&service, &method, &payload))
            .await
            .map_err(|e| MeshError::Handler(format!("handler task failed: {}", e)))?
    }

    fn spawn_local(&self, service: Arc<ServiceDescriptor>, method: String, payload: Vec<u8>) {
        let router = self.clone();
        tokio::spawn(async move {
            if let Err(e) = router.invoke_local(service, method.clone(), payload).await {
                warn!("Local send to {} failed: {}", method, e);
            }
        });
    }

    async fn dispatch(
        &self,
        api_name: &str,
        name: &ApiName,
        entry: &Arc<FunctionEntry>,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Reply<Vec<u8>>> {
        let mut consulted = false;
        let mut last: Option<MeshError> = None;

        loop {
            let mut candidates = self.candidates(name, entry).await?;
            if candidates.is_empty() && !consulted && self.refresh(entry).await? {
                consulted = true;
                candidates = self.candidates(name, entry).await?;
            }

            for connection in candidates {
                match self.attempt(&connection, entry, payload, deadline).await {
                    Ok(value) => {
                        return Ok(Reply {
                            value,
                            node: connection.peer(),
                            network: connection.network(),
                        })
                    }
                    Err(e) if e.is_transport() => {
                        warn!("Call {} via {} failed, trying next: {}", api_name, connection.describe(), e);
                        last = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            if consulted {
                break;
            }
            match self.refresh(entry).await {
                Ok(true) => consulted = true,
                Ok(false) => break,
                Err(e) => {
                    debug!("Directory re-query for {} failed: {}", api_name, e);
                    break;
                }
            }
        }

        Err(last.unwrap_or_else(|| MeshError::NoConnection(api_name.to_string())))
    }

    /// Asks the directory who serves `entry`. Returns false when there is no
    /// directory to ask.
    async fn refresh(&self, entry: &Arc<FunctionEntry>) -> Result<bool> {
        let Some(directory) = &self.state.directory else {
            return Ok(false);
        };
        let nodes = directory
            .connections(&FunctionQuery {
                function_id: entry.id(),
                api_name: entry.api_name().to_string(),
            })
            .await?;
        for node in nodes.iter().filter(|n| n.uuid != self.state.identity.uuid) {
            self.state.registry.record_node(node);
            entry.add_node(&node.uuid);
        }
        debug!("Directory lists {} nodes for {}", nodes.len(), entry.api_name());
        Ok(true)
    }

    async fn candidates(&self, name: &ApiName, entry: &Arc<FunctionEntry>) -> Result<Vec<Arc<Connection>>> {
        match name.node.as_deref() {
            Some(qualifier) => {
                let node = match self.state.registry.node_by_uuid(qualifier) {
                    Some(node) => node,
                    None => self
                        .node_by_name(qualifier)
                        .await
                        .map_err(|_| MeshError::NoConnection(format!("unknown node {}", qualifier)))?,
                };
                let found = self.connections_to_node(&node.uuid).await;
                Ok(self.revalidate(found).await)
            }
            None => {
                let mut found = self.revalidate(self.state.registry.connections_for(entry)).await;
                for node in self.state.registry.unconnected_nodes(entry) {
                    if let Some(connection) = self.dial(node).await {
                        found.push(connection);
                    }
                }
                Ok(found)
            }
        }
    }

    /// Probes connections that have been silent past `revalidate_after` and
    /// drops those whose probe fails. A failed probe flags the connection wrong.
    async fn revalidate(&self, connections: Vec<Arc<Connection>>) -> Vec<Arc<Connection>> {
        let idle_limit = self.state.config.revalidate_after;
        let checks = connections.into_iter().map(|connection| async move {
            if connection.idle_for() <= idle_limit {
                return Some(connection);
            }
            match connection.test().await {
                Ok(()) => Some(connection),
                Err(e) => {
                    warn!("Skipping {}: probe failed: {}", connection.describe(), e);
                    None
                }
            }
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Usable connections to one node, dialing it when there are none.
    async fn connections_to_node(&self, uuid: &str) -> Vec<Arc<Connection>> {
        let found = self.state.registry.connections_to(uuid);
        if !found.is_empty() {
            return found;
        }
        match self.state.registry.node_by_uuid(uuid) {
            Some(node) => self.dial(node).await.into_iter().collect(),
            None => Vec::new(),
        }
    }

    async fn dial(&self, node: NodeIdentity) -> Option<Arc<Connection>> {
        if node.uuid == self.state.identity.uuid {
            return None;
        }
        match Connection::connect(node.clone(), &self.state.ctx).await {
            Ok(connection) => {
                let registry = &self.state.registry;
                if let Some(replaced) = registry.record_node_connection(&node, connection.clone()) {
                    replaced.close().await;
                }
                // A concurrent dial to the same node may have been recorded first.
                let recorded = registry
                    .connections_to(&node.uuid)
                    .into_iter()
                    .find(|c| c.network() == connection.network());
                match recorded {
                    Some(existing) if !Arc::ptr_eq(&existing, &connection) => {
                        connection.close().await;
                        Some(existing)
                    }
                    _ => Some(connection),
                }
            }
            Err(e) => {
                warn!("Could not reach node {} at {}: {}", node.uuid, node.host, e);
                None
            }
        }
    }

    async fn attempt(
        &self,
        connection: &Arc<Connection>,
        entry: &FunctionEntry,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        let descriptor = entry.descriptor();
        if connection.network() == Network::Http && descriptor.kind == CallKind::Multi {
            return Err(MeshError::Connection(format!(
                "{} is not served over HTTP",
                descriptor.api_name
            )));
        }
        if descriptor.kind.expects_response() {
            connection
                .call(descriptor.id, &descriptor.api_name, payload, deadline)
                .await
        } else {
            connection
                .send(descriptor.id, &descriptor.api_name, payload, deadline)
                .await
                .map(|()| Vec::new())
        }
    }
}

fn expect_kind(api_name: &str, actual: CallKind, expected: CallKind) -> Result<()> {
    if actual != expected {
        return Err(MeshError::UnknownApi(format!(
            "{} is a {:?} method, not {:?}",
            api_name, actual, expected
        )));
    }
    Ok(())
}

// ============================================================================
// Inbound requests
// ============================================================================

impl RouterState {
    pub(crate) fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Runs a request addressed by function id.
    pub(crate) async fn serve_function(
        &self,
        function_id: u16,
        payload: Vec<u8>,
        origin: Option<&Arc<Connection>>,
    ) -> Outcome {
        if function_id < RESERVED_MAX {
            return match self.builtins.handle(function_id, &payload, origin).await {
                Some(result) => Outcome::Reply(result),
                None => Outcome::NotFound,
            };
        }
        let Some(entry) = self.registry.resolve_id(function_id) else {
            return Outcome::NotFound;
        };
        let descriptor = entry.descriptor();
        self.serve_method(&descriptor.service, &descriptor.method, payload).await
    }

    /// Runs a hosted method by name.
    pub(crate) async fn serve_method(&self, service: &str, method: &str, payload: Vec<u8>) -> Outcome {
        let Some(service) = self.dispatcher.service(service) else {
            return Outcome::NotFound;
        };
        let Some(kind) = service.method(method).map(|m| m.kind()) else {
            return Outcome::NotFound;
        };

        let dispatcher = self.dispatcher.clone();
        let method = method.to_string();
        let result = tokio::task::spawn_blocking(move || dispatcher.invoke(&service, &method, &payload))
            .await
            .map_err(|e| MeshError::Handler(format!("handler task failed: {}", e)))
            .and_then(|result| result);

        if kind == CallKind::Send {
            if let Err(e) = result {
                warn!("Send handler failed: {}", e);
            }
            return Outcome::NoReply;
        }
        Outcome::Reply(result)
    }

    /// Whether `service.method` is hosted and may be called over HTTP.
    pub(crate) fn http_kind(&self, service: &str, method: &str) -> Option<CallKind> {
        self.dispatcher
            .service(service)
            .and_then(|s| s.method(method).map(|m| m.kind()))
    }

    async fn serve(&self, connection: Arc<Connection>, message: Message) {
        let correlation_id = message.correlation_id;
        let function_id = message.function_id;
        debug!(
            "Request fid {} cid {} from {}",
            function_id,
            correlation_id,
            connection.describe()
        );

        let written = match self
            .serve_function(function_id, message.payload, Some(&connection))
            .await
        {
            Outcome::Reply(result) => connection.respond(correlation_id, function_id, result).await,
            Outcome::NotFound => connection.respond_not_found(correlation_id, function_id).await,
            Outcome::NoReply => Ok(()),
        };
        if let Err(e) = written {
            warn!("Could not answer fid {} on {}: {}", function_id, connection.describe(), e);
        }
    }
}

impl Inbound for RouterState {
    fn on_request(self: Arc<Self>, connection: Arc<Connection>, message: Message) {
        tokio::spawn(async move {
            self.serve(connection, message).await;
        });
    }

    fn on_closed(&self, connection: &Arc<Connection>) {
        self.registry.remove_connection(connection);
    }
}
