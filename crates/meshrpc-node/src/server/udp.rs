use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshrpc_common::protocol::error::{MeshError, Result};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionContext};

/// Datagram listener shared by every UDP peer.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
}

impl UdpServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| MeshError::from_io(e, &format!("binding UDP {}", addr)))?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| MeshError::from_io(e, "reading UDP socket address"))
    }

    /// Receives datagrams until the socket fails.
    ///
    /// Only datagrams of exactly one frame are accepted. Peers idle past the
    /// staleness window are closed and forgotten; their next datagram starts
    /// over with a fresh connection.
    pub async fn run(self, ctx: ConnectionContext) -> Result<()> {
        info!("UDP listener bound on {}", self.local_addr()?);

        let frame_size = ctx.udp_codec().profile().total_size();
        let stale_after = ctx.stale_after();
        let mut buf = vec![0u8; frame_size + 1];
        let mut peers: HashMap<SocketAddr, Arc<Connection>> = HashMap::new();
        let mut sweep = tokio::time::interval(stale_after.max(Duration::from_millis(1)));

        loop {
            let received = tokio::select! {
                result = self.socket.recv_from(&mut buf) => result,
                _ = sweep.tick() => {
                    sweep_peers(&mut peers, stale_after, &ctx);
                    continue;
                }
            };
            let (n, from) = match received {
                Ok(received) => received,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!("UDP peer refused an earlier datagram");
                    continue;
                }
                Err(e) => return Err(MeshError::from_io(e, "receiving datagram")),
            };

            if n != frame_size {
                debug!("Discarding {} byte datagram from {}", n, from);
                continue;
            }
            let connection = peers
                .entry(from)
                .or_insert_with(|| Connection::udp_peer(self.socket.clone(), from, &ctx));
            connection.handle_frame(&buf[..n], ctx.inbound());
        }
    }
}

fn sweep_peers(peers: &mut HashMap<SocketAddr, Arc<Connection>>, stale_after: Duration, ctx: &ConnectionContext) {
    peers.retain(|addr, connection| {
        connection.sweep_partials(stale_after);
        let idle = connection.idle_for() > stale_after || connection.is_closed();
        if idle && connection.partial_messages() == 0 && connection.pending().is_empty() {
            debug!("Forgetting idle UDP peer {}", addr);
            connection.on_read_closed(ctx.inbound());
            return false;
        }
        true
    });
}
