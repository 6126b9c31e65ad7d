//! Node bootstrap
//!
//! [`NodeBuilder`] binds the configured listeners, derives the node identity
//! from the bound ports, registers hosted services locally and with the
//! directory, and starts the background tasks. The resulting [`Node`] hands
//! out the [`Router`] used to make calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use meshrpc_common::protocol::builtin::Registration;
use meshrpc_common::protocol::error::Result;
use meshrpc_common::protocol::identity::qualify;
use meshrpc_common::protocol::{FunctionDescriptor, NodeIdentity};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::directory::Directory;
use crate::maintenance::{Heartbeat, Maintenance};
use crate::router::Router;
use crate::server::{bind_addr, HttpServer, TcpServer, UdpServer};
use crate::service::{Dispatcher, ServiceDescriptor};

/// Nodes started by this process so far. Later nodes mix their ordinal into
/// the uuid seed so two nodes of one process never share a uuid.
static STARTED: AtomicU32 = AtomicU32::new(0);

/// Collects services and settings for a node.
pub struct NodeBuilder {
    config: NodeConfig,
    services: Vec<ServiceDescriptor>,
    directory: Option<Arc<dyn Directory>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
            directory: None,
        }
    }

    /// Hosts a service built with [`ServiceBuilder`](crate::service::ServiceBuilder).
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Uses `directory` instead of the watchers named in the config.
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Binds listeners, registers services and starts serving.
    ///
    /// # Errors
    ///
    /// - `MeshError::Io` / `MeshError::Connection` if a listener cannot bind
    /// - `MeshError::Registration` if two services share a name
    /// - `MeshError::Directory` if a configured watcher address is bad
    ///
    /// A directory that cannot be reached is logged, not fatal.
    pub async fn start(self) -> Result<Node> {
        let config = self.config;
        let host = config.host.clone();

        let tcp = match config.tcp_port.bind_port() {
            Some(port) => Some(TcpServer::bind(&bind_addr(&host, port)).await?),
            None => None,
        };
        let udp = match config.udp_port.bind_port() {
            Some(port) => Some(UdpServer::bind(&bind_addr(&host, port)).await?),
            None => None,
        };
        let http = match config.http_port.bind_port() {
            Some(port) => Some(HttpServer::bind(&bind_addr(&host, port)).await?),
            None => None,
        };

        let pid = std::process::id();
        let identity = NodeIdentity {
            uuid: node_uuid(&host, pid),
            name: config.name.clone(),
            host,
            tcp_port: tcp.as_ref().map(|s| s.local_addr()).transpose()?.map_or(0, |a| a.port()),
            udp_port: udp.as_ref().map(|s| s.local_addr()).transpose()?.map_or(0, |a| a.port()),
            http_port: http.as_ref().map(|s| s.local_addr()).transpose()?.map_or(0, |a| a.port()),
            pid,
            version: config.version.clone(),
        };

        let dispatcher = Arc::new(Dispatcher::new());
        for service in self.services {
            dispatcher.register_service(service)?;
        }

        let router = Router::new(identity.clone(), config.clone(), dispatcher.clone(), self.directory)?;
        let registry = router.registry().clone();
        let mut functions: Vec<FunctionDescriptor> = Vec::new();
        for service in dispatcher.services() {
            for method in service.methods() {
                let api_name = qualify(service.name(), method.name());
                let entry = registry.register_local(&api_name, method.kind(), service.encoding())?;
                functions.push(entry.descriptor().clone());
            }
        }

        let mut tasks = Vec::new();
        let ctx = router.context().clone();
        if let Some(server) = tcp {
            tasks.push(supervise("TCP", server.run(ctx.clone())));
        }
        if let Some(server) = udp {
            tasks.push(supervise("UDP", server.run(ctx.clone())));
        }
        if let Some(server) = http {
            tasks.push(supervise("HTTP", server.run(router.clone())));
        }
        tasks.push(Maintenance::new(registry.clone(), &config).spawn());

        if let Some(directory) = router.directory().cloned() {
            let registration = Registration {
                node: identity.clone(),
                functions,
            };
            match directory.register(&registration).await {
                Ok(reply) => {
                    for descriptor in reply.functions {
                        let name = descriptor.api_name.clone();
                        if let Err(e) = registry.register(descriptor) {
                            warn!("Ignoring directory function {}: {}", name, e);
                        }
                    }
                    info!("Registered node {} with directory", identity.uuid);
                }
                Err(e) => warn!("Could not register with directory: {}", e),
            }
            tasks.push(Heartbeat::new(directory, identity.clone(), &config).spawn());
        }

        info!(
            "Node {} ({}) up: tcp={} udp={} http={}",
            identity.uuid, identity.name, identity.tcp_port, identity.udp_port, identity.http_port
        );
        Ok(Node { router, tasks })
    }
}

fn node_uuid(host: &str, pid: u32) -> String {
    match STARTED.fetch_add(1, Ordering::Relaxed) {
        0 => NodeIdentity::derive_uuid(host, pid),
        ordinal => NodeIdentity::derive_uuid(&format!("{}#{}", host, ordinal), pid),
    }
}

fn supervise<F>(transport: &'static str, server: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("{} listener stopped: {}", transport, e);
        }
    })
}

/// A running node. Dropping it stops the listeners and background tasks.
pub struct Node {
    router: Router,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.router.identity()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Stops serving and closes every connection on record.
    pub async fn shutdown(mut self) {
        self.abort_tasks();
        for connection in self.router.registry().all_connections() {
            connection.close().await;
        }
        info!("Node {} stopped", self.identity().uuid);
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
