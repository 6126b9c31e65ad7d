//! Periodic upkeep
//!
//! Two background tasks per node:
//!
//! - [`Maintenance`] re-probes connections flagged wrong, evicts connections
//!   that stayed wrong or idle past the staleness window, expires waiters
//!   whose caller gave up long ago and drops stalled partial messages
//! - [`Heartbeat`] reports the node to its directory

use std::sync::Arc;
use std::time::Duration;

use meshrpc_common::protocol::NodeIdentity;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::directory::Directory;
use crate::registry::FunctionRegistry;

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Wrong connections whose probe succeeded.
    pub recovered: usize,
    /// Connections removed from the registry and closed.
    pub evicted: usize,
    /// Waiters failed with a timeout.
    pub expired_waiters: usize,
    /// Incomplete multi-chunk messages dropped.
    pub dropped_partials: usize,
}

/// Connection maintenance task.
pub struct Maintenance {
    registry: Arc<FunctionRegistry>,
    interval: Duration,
    stale_after: Duration,
    waiter_max_age: Duration,
}

impl Maintenance {
    pub fn new(registry: Arc<FunctionRegistry>, config: &NodeConfig) -> Self {
        Self {
            registry,
            interval: config.sweep_interval,
            stale_after: config.stale_after,
            // A waiter never outlives its call's deadline on its own; this only
            // catches callers that were dropped mid-flight.
            waiter_max_age: config.stale_after.max(config.call_timeout),
        }
    }

    /// Starts the maintenance task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = self.sweep_once().await;
            if report != SweepReport::default() {
                debug!("Maintenance pass: {:?}", report);
            }
        }
    }

    /// Runs one maintenance pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let connections = self.registry.all_connections();
        let mut report = SweepReport::default();

        for connection in &connections {
            report.expired_waiters += connection.pending().sweep(self.waiter_max_age);
            report.dropped_partials += connection.sweep_partials(self.stale_after);
        }

        // Probe in parallel
        let probes = connections
            .iter()
            .filter(|c| c.is_wrong() && !c.is_closed())
            .map(|connection| async move { (connection, connection.test().await) });
        for (connection, result) in futures::future::join_all(probes).await {
            match result {
                Ok(()) => {
                    connection.clear_wrong();
                    info!("Connection {} recovered", connection.describe());
                    report.recovered += 1;
                }
                Err(e) => warn!("Probe of {} failed: {}", connection.describe(), e),
            }
        }

        let evicted = self.registry.evict_stale_connections(self.stale_after);
        report.evicted = evicted.len();
        for connection in evicted {
            connection.close().await;
        }
        report
    }
}

/// Directory heartbeat task.
pub struct Heartbeat {
    directory: Arc<dyn Directory>,
    identity: NodeIdentity,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(directory: Arc<dyn Directory>, identity: NodeIdentity, config: &NodeConfig) -> Self {
        Self {
            directory,
            identity,
            interval: config.heartbeat.effective_interval(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = self.directory.heartbeat(&self.identity).await {
                warn!("Heartbeat to directory failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionContext};
    use crate::directory::StaticDirectory;

    fn unreachable_http_peer() -> NodeIdentity {
        NodeIdentity {
            uuid: "peer".into(),
            host: "127.0.0.1".into(),
            // Nothing listens on port 1.
            http_port: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_wrong_connection_is_evicted_after_failed_probe() {
        let registry = Arc::new(FunctionRegistry::new());
        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let peer = unreachable_http_peer();
        let connection = Connection::http(peer.clone(), &ctx).unwrap();
        registry.record_node_connection(&peer, connection.clone());
        connection.mark_wrong();

        let maintenance = Maintenance::new(registry.clone(), &NodeConfig::default());
        let report = maintenance.sweep_once().await;
        assert_eq!(report.recovered, 0);
        assert_eq!(report.evicted, 1);
        assert!(registry.all_connections().is_empty());
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_fresh_connection_survives() {
        let registry = Arc::new(FunctionRegistry::new());
        let ctx = ConnectionContext::detached(NodeIdentity::default());
        let peer = unreachable_http_peer();
        registry.record_node_connection(&peer, Connection::http(peer.clone(), &ctx).unwrap());

        let maintenance = Maintenance::new(registry.clone(), &NodeConfig::default());
        assert_eq!(maintenance.sweep_once().await, SweepReport::default());
        assert_eq!(registry.all_connections().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reaches_directory() {
        let directory = StaticDirectory::new();
        let identity = NodeIdentity {
            uuid: "beating".into(),
            ..Default::default()
        };
        let handle = Heartbeat::new(directory.clone(), identity, &NodeConfig::default()).spawn();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        handle.abort();
        assert_eq!(directory.heartbeats("beating"), 2);
    }
}
