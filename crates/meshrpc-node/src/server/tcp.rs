use std::net::SocketAddr;

use meshrpc_common::protocol::error::{MeshError, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionContext};

/// Accept loop for framed TCP connections.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Io` or `MeshError::Connection` when the address
    /// cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::from_io(e, &format!("binding TCP {}", addr)))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MeshError::from_io(e, "reading TCP listener address"))
    }

    /// Accepts streams until the listener fails.
    ///
    /// A stream that cannot be set up is dropped; the loop carries on.
    pub async fn run(self, ctx: ConnectionContext) -> Result<()> {
        info!("TCP listener bound on {}", self.local_addr()?);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| MeshError::from_io(e, "accepting TCP connection"))?;

            match Connection::accept_tcp(stream, &ctx) {
                Ok(connection) => debug!("Accepted {}", connection.describe()),
                Err(e) => warn!("Dropping TCP connection from {}: {}", peer_addr, e),
            }
        }
    }
}
