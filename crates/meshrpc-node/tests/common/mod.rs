//! Shared fixtures for the networked tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshrpc_node::config::{NodeConfig, PortSetting};
use meshrpc_node::directory::{Directory, StaticDirectory};
use meshrpc_node::node::Node;
use meshrpc_node::service::{ServiceBuilder, ServiceDescriptor};
use tokio::io::AsyncReadExt;

/// Test service with a counter for fire-and-forget calls.
#[derive(Default)]
pub struct Arith {
    pub recorded: AtomicU64,
}

pub fn arith_service(arith: Arc<Arith>) -> ServiceDescriptor {
    ServiceBuilder::shared("Arith", arith)
        .call("Double", |_: &Arith, n: i64| Ok::<_, String>(n * 2))
        .call("Echo", |_: &Arith, text: String| Ok::<_, String>(text))
        .call("Fail", |_: &Arith, _: i64| Err::<i64, _>("boom".to_string()))
        .call("Sleep", |_: &Arith, ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok::<_, String>(ms)
        })
        .multi("Add", |_: &Arith, (a, b): (i64, i64)| Ok::<_, String>(a + b))
        .send("Record", |arith: &Arith, n: u64| {
            arith.recorded.fetch_add(n, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .build()
        .unwrap()
}

pub fn config(name: &str, tcp: bool, udp: bool, http: bool) -> NodeConfig {
    let port = |enabled: bool| if enabled { PortSetting::Auto } else { PortSetting::Disabled };
    NodeConfig {
        tcp_port: port(tcp),
        udp_port: port(udp),
        http_port: port(http),
        call_timeout: Duration::from_secs(5),
        broadcast_timeout: Duration::from_secs(2),
        dial_timeout: Duration::from_secs(1),
        revalidate_after: Duration::from_millis(200),
        ..NodeConfig::named(name)
    }
}

/// A server hosting `Arith` and a client without services, sharing one
/// in-memory directory.
pub struct Mesh {
    pub directory: Arc<StaticDirectory>,
    pub arith: Arc<Arith>,
    pub server: Node,
    pub client: Node,
}

pub async fn mesh(server_config: NodeConfig) -> Mesh {
    let directory = StaticDirectory::new();
    let arith = Arc::new(Arith::default());
    let shared: Arc<dyn Directory> = directory.clone();

    let server = Node::builder(server_config)
        .service(arith_service(arith.clone()))
        .directory(shared.clone())
        .start()
        .await
        .unwrap();
    let client = Node::builder(config("client", true, true, true))
        .directory(shared)
        .start()
        .await
        .unwrap();

    Mesh {
        directory,
        arith,
        server,
        client,
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A TCP peer that accepts one connection, swallows whatever it is sent and
/// never answers. The listener is gone once the connection is accepted.
pub async fn silent_peer() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut sink = vec![0u8; 4096];
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    });
    port
}

/// A loopback port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
