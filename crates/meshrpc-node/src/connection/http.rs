use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use meshrpc_common::protocol::builtin::BuiltinEnvelope;
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::transport::http::{HttpTransport, BUILTIN_PATH, CODE_HEADER, PING_PATH};
use tokio::time::Instant;

/// Client binding for a peer's HTTP listener.
///
/// There is no read loop: each call is one POST whose response carries the
/// outcome in the `code` header.
pub(crate) struct HttpLink {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
}

impl HttpLink {
    pub(crate) fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Calls `/<api_name>` with a raw encoded body.
    pub(crate) async fn call(&self, api_name: &str, body: Vec<u8>, deadline: Instant) -> Result<Vec<u8>> {
        self.post(&HttpTransport::path_for(api_name), body, deadline).await
    }

    /// Calls a built-in function through the `/builtin` envelope.
    pub(crate) async fn call_builtin(
        &self,
        function_id: u16,
        correlation_id: u32,
        data: Vec<u8>,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        let envelope = BuiltinEnvelope {
            data,
            num: correlation_id,
            fid: function_id,
        };
        let body = serde_json::to_vec(&envelope).map_err(|e| MeshError::Encode(e.to_string()))?;
        self.post(BUILTIN_PATH, body, deadline).await
    }

    pub(crate) async fn ping(&self, deadline: Instant) -> Result<()> {
        self.post(PING_PATH, Vec::new(), deadline).await.map(|_| ())
    }

    async fn post(&self, path: &str, body: Vec<u8>, deadline: Instant) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        let request = Request::builder()
            .method("POST")
            .uri(&url)
            .header("Content-Type", "application/octet-stream")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| MeshError::Connection(format!("Failed to build request: {}", e)))?;

        let timeout = deadline.saturating_duration_since(Instant::now());
        let response = tokio::time::timeout_at(deadline, self.client.request(request))
            .await
            .map_err(|_| MeshError::timeout(timeout))?
            .map_err(|e| MeshError::Connection(format!("HTTP request to {} failed: {}", url, e)))?;

        let code = response
            .headers()
            .get(CODE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = tokio::time::timeout_at(deadline, response.into_body().collect())
            .await
            .map_err(|_| MeshError::timeout(timeout))?
            .map_err(|e| MeshError::Connection(format!("Failed to read response: {}", e)))?
            .to_bytes();

        HttpTransport::into_result(code.as_deref(), body)
    }
}
