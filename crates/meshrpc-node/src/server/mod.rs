//! Listeners
//!
//! One listener per offered transport. Each binds in [`bind`](TcpServer::bind)
//! so the node learns its real port before advertising it, then serves from
//! `run` until the task is aborted or the socket fails.
//!
//! - **[`TcpServer`]**: accepts streams; each becomes a [`Connection`](crate::connection::Connection)
//!   with its own read loop
//! - **[`UdpServer`]**: one socket for every peer; datagrams are demultiplexed
//!   by source address
//! - **[`HttpServer`]**: hyper HTTP/1.1, one POST endpoint per hosted method

mod http;
mod tcp;
mod udp;

pub use http::HttpServer;
pub use tcp::TcpServer;
pub use udp::UdpServer;

/// `host:port` in a form `bind` accepts, bracketing IPv6 literals.
pub(crate) fn bind_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
