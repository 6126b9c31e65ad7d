//! HTTP Transport Utilities
//!
//! HTTP is the degraded transport: every call is one POST to `/<Service>.<Method>`
//! and the outcome travels in the `code` response header rather than in a frame.
//!
//! # Components
//!
//! - **[`ResponseCode`]**: The four outcome codes carried by the `code` header
//! - **[`HttpTransport`]**: Builders for hyper responses carrying those codes
//! - **[`HyperRequest`]** / **[`HyperResponse`]**: Type aliases for hyper messages
//!
//! # Example
//!
//! ```
//! use meshrpc_common::transport::http::{HttpTransport, ResponseCode, CODE_HEADER};
//!
//! let response = HttpTransport::respond(ResponseCode::Body, b"42".to_vec());
//! assert_eq!(response.headers()[CODE_HEADER], "000");
//! ```

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::{Request, Response, StatusCode};

use crate::protocol::error::MeshError;

/// Type alias for Hyper incoming requests
pub type HyperRequest = Request<Incoming>;

/// Type alias for Hyper responses with full body
pub type HyperResponse = Response<Full<Bytes>>;

/// Response header carrying the outcome code.
pub const CODE_HEADER: &str = "code";

/// Liveness endpoint path.
pub const PING_PATH: &str = "/Ping";

/// Built-in envelope endpoint path.
pub const BUILTIN_PATH: &str = "/builtin";

/// Outcome of an HTTP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Success, body carries the payload.
    Body,
    /// Success without a payload.
    Empty,
    /// Handler failure, body carries the message.
    Failure,
    /// The request never reached a handler.
    Network,
}

impl ResponseCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCode::Body => "000",
            ResponseCode::Empty => "001",
            ResponseCode::Failure => "002",
            ResponseCode::Network => "003",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "000" => Some(ResponseCode::Body),
            "001" => Some(ResponseCode::Empty),
            "002" => Some(ResponseCode::Failure),
            "003" => Some(ResponseCode::Network),
            _ => None,
        }
    }
}

/// HTTP transport utility functions
pub struct HttpTransport;

impl HttpTransport {
    /// Builds a response with the given outcome code and body.
    pub fn respond(code: ResponseCode, body: Vec<u8>) -> HyperResponse {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(CODE_HEADER, HeaderValue::from_static(code.as_str()));
        response
    }

    /// Maps a call result onto a response.
    ///
    /// Handler-level failures use code `002`; everything that prevented the call
    /// from running uses `003`.
    pub fn from_result(result: Result<Vec<u8>, MeshError>) -> HyperResponse {
        match result {
            Ok(body) if body.is_empty() => Self::respond(ResponseCode::Empty, body),
            Ok(body) => Self::respond(ResponseCode::Body, body),
            Err(err @ (MeshError::Handler(_)
            | MeshError::Decode(_)
            | MeshError::Encode(_)
            | MeshError::Remote(_))) => {
                Self::respond(ResponseCode::Failure, err.to_string().into_bytes())
            }
            Err(err) => Self::respond(ResponseCode::Network, err.to_string().into_bytes()),
        }
    }

    /// Interprets a call response from its `code` header and body.
    ///
    /// # Errors
    ///
    /// - `MeshError::Remote` for code `002`
    /// - `MeshError::Connection` for code `003` or a missing/unknown header
    pub fn into_result(code: Option<&str>, body: Bytes) -> Result<Vec<u8>, MeshError> {
        match code.and_then(ResponseCode::parse) {
            Some(ResponseCode::Body) => Ok(body.to_vec()),
            Some(ResponseCode::Empty) => Ok(Vec::new()),
            Some(ResponseCode::Failure) => {
                Err(MeshError::Remote(String::from_utf8_lossy(&body).into_owned()))
            }
            Some(ResponseCode::Network) => Err(MeshError::Connection(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            None => Err(MeshError::Connection(format!(
                "missing or unknown {} header",
                CODE_HEADER
            ))),
        }
    }

    /// Path for an api name.
    pub fn path_for(api_name: &str) -> String {
        format!("/{}", api_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [
            ResponseCode::Body,
            ResponseCode::Empty,
            ResponseCode::Failure,
            ResponseCode::Network,
        ] {
            assert_eq!(ResponseCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ResponseCode::parse("404"), None);
    }

    #[test]
    fn test_handler_errors_use_failure_code() {
        let response = HttpTransport::from_result(Err(MeshError::Handler("bad input".into())));
        assert_eq!(response.headers()[CODE_HEADER], "002");

        let response = HttpTransport::from_result(Err(MeshError::UnknownApi("X.Y".into())));
        assert_eq!(response.headers()[CODE_HEADER], "003");

        let response = HttpTransport::from_result(Ok(Vec::new()));
        assert_eq!(response.headers()[CODE_HEADER], "001");
    }

    #[test]
    fn test_into_result() {
        assert_eq!(
            HttpTransport::into_result(Some("000"), Bytes::from_static(b"ok")).unwrap(),
            b"ok".to_vec()
        );
        assert!(HttpTransport::into_result(Some("001"), Bytes::new())
            .unwrap()
            .is_empty());
        assert!(matches!(
            HttpTransport::into_result(Some("002"), Bytes::from_static(b"boom")),
            Err(MeshError::Remote(msg)) if msg == "boom"
        ));
        assert!(matches!(
            HttpTransport::into_result(None, Bytes::new()),
            Err(MeshError::Connection(_))
        ));
    }
}
