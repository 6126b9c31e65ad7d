use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use meshrpc_common::protocol::error::{MeshError, Result};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::{Connection, Inbound};

/// One UDP peer.
///
/// Dialed links own a connected socket. Links created by a listener share the
/// listener's socket and address every datagram explicitly.
pub(crate) struct UdpLink {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    connected: bool,
}

impl UdpLink {
    pub(crate) fn connected(socket: Arc<UdpSocket>, peer_addr: SocketAddr) -> Self {
        Self {
            socket,
            peer_addr,
            connected: true,
        }
    }

    pub(crate) fn shared(socket: Arc<UdpSocket>, peer_addr: SocketAddr) -> Self {
        Self {
            socket,
            peer_addr,
            connected: false,
        }
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) async fn write(&self, frames: &[Vec<u8>]) -> Result<()> {
        for frame in frames {
            let sent = if self.connected {
                self.socket.send(frame).await
            } else {
                self.socket.send_to(frame, self.peer_addr).await
            }
            .map_err(|e| MeshError::from_io(e, "sending datagram"))?;

            if sent != frame.len() {
                return Err(MeshError::Connection(format!(
                    "short datagram write: {} of {} bytes",
                    sent,
                    frame.len()
                )));
            }
        }
        Ok(())
    }
}

/// Receives datagrams on a dialed socket until it fails or the task is aborted.
///
/// Datagrams are read into a buffer one byte larger than a frame so oversized
/// ones can be told apart and discarded.
pub(crate) async fn read_loop(
    connection: Arc<Connection>,
    socket: Arc<UdpSocket>,
    inbound: Weak<dyn Inbound>,
) {
    let frame_size = connection.codec().profile().total_size();
    let stale_after = connection.stale_after();
    let mut buf = vec![0u8; frame_size + 1];
    let mut sweep = connection.sweep_timer();

    loop {
        let received = tokio::select! {
            result = socket.recv(&mut buf) => result,
            _ = sweep.tick() => {
                connection.sweep_partials(stale_after);
                continue;
            }
        };

        match received {
            Ok(n) if n == frame_size => connection.handle_frame(&buf[..n], &inbound),
            Ok(n) => debug!("Discarding {} byte datagram from {}", n, connection.describe()),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                // ICMP port unreachable from an earlier send; the socket stays usable.
                debug!("Peer {} refused a datagram", connection.describe());
                connection.mark_wrong();
            }
            Err(e) => {
                warn!("UDP receive from {} failed: {}", connection.describe(), e);
                break;
            }
        }
    }

    connection.on_read_closed(&inbound);
}
