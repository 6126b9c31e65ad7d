//! Talking to a watcher process
//!
//! The watcher here is a bare TCP listener speaking the frame protocol with
//! `FrameCodec`, so the test sees exactly what a node puts on the wire.

mod common;

use meshrpc_common::protocol::builtin::{
    ApiConnections, RegisterReply, Registration, DIAL_REGISTER, WATCH_API_CONNECTIONS, WATCH_REGISTER,
};
use meshrpc_common::protocol::{CallKind, Encoding, FunctionDescriptor, MeshError, Reassembler};
use meshrpc_common::transport::FrameCodec;
use meshrpc_node::node::Node;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use common::{arith_service, config};

/// Serves one connection, answering registrations with `reply` and every
/// other request with an empty success. Reports each request it sees.
async fn fake_watcher(reply: RegisterReply) -> (String, mpsc::UnboundedReceiver<(u16, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = FrameCodec::tcp();
        let mut reassembler = Reassembler::new();
        let mut buf = vec![0u8; codec.profile().total_size()];

        while stream.read_exact(&mut buf).await.is_ok() {
            let view = codec.decode(&buf).unwrap();
            let Some(message) = reassembler.accept(&view).unwrap() else {
                continue;
            };
            let _ = tx.send((message.function_id, message.payload.clone()));

            let body = match message.function_id {
                DIAL_REGISTER => continue,
                WATCH_REGISTER => serde_json::to_vec(&reply).unwrap(),
                WATCH_API_CONNECTIONS => serde_json::to_vec(&ApiConnections::default()).unwrap(),
                _ => Vec::new(),
            };
            let frames = codec
                .encode_response(&body, message.correlation_id, message.function_id, None)
                .unwrap();
            for frame in frames {
                stream.write_all(&frame).await.unwrap();
            }
        }
    });
    (addr, rx)
}

#[tokio::test]
async fn test_node_registers_with_watcher() {
    let remote = FunctionDescriptor::new(5000, "Remote.Thing", CallKind::Call, Encoding::Json).unwrap();
    let (addr, mut seen) = fake_watcher(RegisterReply {
        functions: vec![remote],
        watchers: Vec::new(),
    })
    .await;

    let mut node_config = config("watched", true, false, false);
    node_config.directory = vec![addr];
    let node = Node::builder(node_config)
        .service(arith_service(Default::default()))
        .start()
        .await
        .unwrap();

    // The dial announcement precedes the registration on the stream.
    let (fid, _) = seen.recv().await.unwrap();
    assert_eq!(fid, DIAL_REGISTER);
    let (fid, payload) = seen.recv().await.unwrap();
    assert_eq!(fid, WATCH_REGISTER);
    let registration: Registration = serde_json::from_slice(&payload).unwrap();
    assert_eq!(registration.node.uuid, node.identity().uuid);
    assert_eq!(registration.node.tcp_port, node.identity().tcp_port);
    assert!(registration.functions.iter().any(|f| f.api_name == "Arith.Double"));

    // Functions handed back by the watcher keep their ids.
    let registry = node.router().registry();
    assert_eq!(registry.resolve("Remote.Thing").unwrap().id(), 5000);

    // Nobody serves it, and the watcher is asked exactly for that.
    let err = node.router().call::<_, i64>("Remote.Thing", &1i64).await.unwrap_err();
    assert!(matches!(err, MeshError::NoConnection(_)), "got {:?}", err);
    let mut asked = false;
    while let Ok((fid, _)) = seen.try_recv() {
        asked |= fid == WATCH_API_CONNECTIONS;
    }
    assert!(asked);
}

#[tokio::test]
async fn test_bad_watcher_address_fails_start() {
    let mut node_config = config("misconfigured", true, false, false);
    node_config.directory = vec!["no-port-here".to_string()];
    let err = Node::builder(node_config).start().await.err().unwrap();
    assert!(matches!(err, MeshError::Directory(_)), "got {:?}", err);
}
