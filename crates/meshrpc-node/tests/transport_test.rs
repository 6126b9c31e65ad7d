//! UDP and HTTP transports end to end

mod common;

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use meshrpc_common::protocol::builtin::{BuiltinEnvelope, PING};
use meshrpc_common::protocol::{Encoding, MeshError};
use meshrpc_common::transport::http::CODE_HEADER;
use meshrpc_node::connection::Network;

use common::{config, mesh};

async fn post(url: &str, body: Vec<u8>) -> (String, Vec<u8>) {
    let client = Client::builder(TokioExecutor::new()).build_http();
    let request = Request::builder()
        .method("POST")
        .uri(url)
        .body(Full::new(Bytes::from(body)))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let code = response.headers()[CODE_HEADER].to_str().unwrap().to_string();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (code, body)
}

#[tokio::test]
async fn test_udp_only_server() {
    let mesh = mesh(config("server", false, true, false)).await;
    let router = mesh.client.router();

    let reply = router
        .call_reply::<_, i64>("Arith.Double", &8i64, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.value, 16);
    assert_eq!(reply.network, Network::Udp);

    // Several 520 byte chunks per message.
    let text = "datagram".repeat(600);
    let echoed: String = router.call("Arith.Echo", &text).await.unwrap();
    assert_eq!(echoed, text);

    let sum: i64 = router.call_multi("Arith.Add", &(1i64, 2i64)).await.unwrap();
    assert_eq!(sum, 3);

    let err = router.call::<_, i64>("Arith.Fail", &0i64).await.unwrap_err();
    assert!(matches!(err, MeshError::Remote(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_http_only_server_through_router() {
    let mesh = mesh(config("server", false, false, true)).await;
    let router = mesh.client.router();

    let reply = router
        .call_reply::<_, i64>("Arith.Double", &50i64, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.value, 100);
    assert_eq!(reply.network, Network::Http);

    let err = router.call::<_, i64>("Arith.Fail", &0i64).await.unwrap_err();
    assert!(matches!(err, MeshError::Remote(_)), "got {:?}", err);

    // Multi-argument methods are not served over HTTP.
    let err = router.call_multi::<_, i64>("Arith.Add", &(1i64, 2i64)).await.unwrap_err();
    assert!(matches!(err, MeshError::Connection(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_http_response_codes() {
    let mesh = mesh(config("server", false, false, true)).await;
    let base = format!("http://127.0.0.1:{}", mesh.server.identity().http_port);

    let (code, body) = post(&format!("{}/Ping", base), Vec::new()).await;
    assert_eq!((code.as_str(), body.as_slice()), ("000", b"PONG".as_slice()));

    let request = Encoding::Binary.encode(&21i64).unwrap();
    let (code, body) = post(&format!("{}/Arith.Double", base), request).await;
    assert_eq!(code, "000");
    assert_eq!(Encoding::Binary.decode::<i64>(&body).unwrap(), 42);

    let request = Encoding::Binary.encode(&5u64).unwrap();
    let (code, body) = post(&format!("{}/Arith.Record", base), request).await;
    assert_eq!(code, "001");
    assert!(body.is_empty());

    let request = Encoding::Binary.encode(&1i64).unwrap();
    let (code, body) = post(&format!("{}/Arith.Fail", base), request).await;
    assert_eq!(code, "002");
    assert!(String::from_utf8_lossy(&body).contains("boom"));

    let (code, _) = post(&format!("{}/Arith.Add", base), Vec::new()).await;
    assert_eq!(code, "003");
    let (code, _) = post(&format!("{}/Nobody.Home", base), Vec::new()).await;
    assert_eq!(code, "003");

    let envelope = serde_json::to_vec(&BuiltinEnvelope {
        data: vec![1],
        num: 1,
        fid: PING,
    })
    .unwrap();
    let (code, body) = post(&format!("{}/builtin", base), envelope).await;
    assert_eq!((code.as_str(), body.as_slice()), ("000", b"PONG".as_slice()));
}
