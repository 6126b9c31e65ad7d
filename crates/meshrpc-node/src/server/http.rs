use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Method;
use hyper_util::rt::TokioIo;
use meshrpc_common::protocol::builtin::{BuiltinEnvelope, NOT_FOUND_MESSAGE, PONG};
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::{ApiName, CallKind};
use meshrpc_common::transport::http::{BUILTIN_PATH, PING_PATH};
use meshrpc_common::transport::{HttpTransport, HyperRequest, HyperResponse, ResponseCode};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::router::{Outcome, Router, RouterState};

/// HTTP/1.1 listener.
///
/// Every hosted Send or Call method is reachable as `POST /<Service>.<Method>`
/// with the encoded request as body. The outcome travels in the `code` header.
pub struct HttpServer {
    listener: TcpListener,
}

impl HttpServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::from_io(e, &format!("binding HTTP {}", addr)))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MeshError::from_io(e, "reading HTTP listener address"))
    }

    /// Serves requests against `router`'s hosted services until the listener
    /// fails. Each accepted connection runs in its own task.
    pub async fn run(self, router: Router) -> Result<()> {
        info!("HTTP listener bound on {}", self.local_addr()?);
        let state = router.state().clone();

        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .map_err(|e| MeshError::from_io(e, "accepting HTTP connection"))?;

            let io = TokioIo::new(stream);
            let state = state.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_request(state, req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving HTTP connection: {}", err);
                }
            });
        }
    }
}

async fn handle_request(state: Arc<RouterState>, req: HyperRequest) -> HyperResponse {
    let path = req.uri().path().to_string();
    if path == PING_PATH {
        return HttpTransport::respond(ResponseCode::Body, PONG.to_vec());
    }
    if req.method() != Method::POST {
        return network_error(format!("{} {} is not supported", req.method(), path));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return network_error(format!("reading request body: {}", e)),
    };
    debug!("HTTP {} with {} bytes", path, body.len());

    if path == BUILTIN_PATH {
        let envelope: BuiltinEnvelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => return network_error(format!("bad built-in envelope: {}", e)),
        };
        let outcome = state.serve_function(envelope.fid, envelope.data, None).await;
        return into_response(outcome);
    }

    let name = match ApiName::parse(path.trim_start_matches('/')) {
        Ok(name) if name.node.is_none() => name,
        _ => return not_found(),
    };
    match state.http_kind(&name.service, &name.method) {
        None => not_found(),
        Some(CallKind::Multi) => network_error(format!("{} is not served over HTTP", name.qualified())),
        Some(_) => into_response(state.serve_method(&name.service, &name.method, body.to_vec()).await),
    }
}

fn into_response(outcome: Outcome) -> HyperResponse {
    match outcome {
        Outcome::Reply(result) => HttpTransport::from_result(result),
        Outcome::NoReply => HttpTransport::respond(ResponseCode::Empty, Vec::new()),
        Outcome::NotFound => not_found(),
    }
}

fn not_found() -> HyperResponse {
    network_error(NOT_FOUND_MESSAGE.to_string())
}

fn network_error(message: String) -> HyperResponse {
    HttpTransport::respond(ResponseCode::Network, message.into_bytes())
}
