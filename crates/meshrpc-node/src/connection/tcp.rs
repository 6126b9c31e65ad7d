use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use meshrpc_common::protocol::error::{MeshError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Connection, Inbound};

/// Write side of a TCP connection.
///
/// The writer lock is held for a whole message, so the chunks of two concurrent
/// large calls never interleave on the stream.
pub(crate) struct TcpLink {
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
}

impl TcpLink {
    pub(crate) fn new(writer: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            writer: Mutex::new(writer),
            peer_addr,
        }
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) async fn write(&self, frames: &[Vec<u8>]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        for frame in frames {
            writer
                .write_all(frame)
                .await
                .map_err(|e| MeshError::from_io(e, "writing frame"))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| MeshError::from_io(e, "flushing stream"))
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Reads whole frames until the stream ends.
///
/// `read_exact` absorbs short reads, so each iteration sees exactly one
/// `total_size` frame. It is not cancel safe, so the pending read is kept alive
/// while the sweep timer fires in between.
pub(crate) async fn read_loop(
    connection: Arc<Connection>,
    mut reader: OwnedReadHalf,
    inbound: Weak<dyn Inbound>,
) {
    let stale_after = connection.stale_after();
    let mut buf = connection.codec().buffer();
    let mut sweep = connection.sweep_timer();

    loop {
        let outcome = {
            let read = reader.read_exact(&mut buf);
            tokio::pin!(read);
            loop {
                tokio::select! {
                    result = &mut read => break result,
                    _ = sweep.tick() => {
                        connection.sweep_partials(stale_after);
                    }
                }
            }
        };

        match outcome {
            Ok(_) => connection.handle_frame(&buf, &inbound),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection {} closed by peer", connection.describe());
                break;
            }
            Err(e) => {
                warn!("TCP read from {} failed: {}", connection.describe(), e);
                break;
            }
        }
    }

    connection.codec().recycle([buf]);
    connection.on_read_closed(&inbound);
}
