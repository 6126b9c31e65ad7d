use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Reassembly error: {0}")]
    Reassembly(String),

    #[error("Unknown api: {0}")]
    UnknownApi(String),

    #[error("Invalid api name: {0}")]
    InvalidApiName(String),

    #[error("No live connection for: {0}")]
    NoConnection(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote function not found: {0}")]
    RemoteNotFound(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Correlation id {0} already in use")]
    CorrelationInUse(u32),
}

impl MeshError {
    /// Creates a timeout error from the elapsed deadline.
    pub fn timeout(after: Duration) -> Self {
        MeshError::Timeout(after.as_millis() as u64)
    }

    /// Whether the error came from the wire rather than from the peer's handler.
    ///
    /// Transport errors are the only ones a caller should fail over on; every other
    /// variant describes an answer that a second connection would repeat.
    pub fn is_transport(&self) -> bool {
        matches!(self, MeshError::Connection(_) | MeshError::Io(_))
    }

    /// Maps an I/O error onto the taxonomy.
    ///
    /// - Timeouts/would block -> `Timeout`
    /// - Connection loss -> `Connection`
    /// - Other IO errors -> `Io`
    pub fn from_io(err: std::io::Error, context: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => MeshError::Timeout(0),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => {
                MeshError::Connection(format!("{}: {}", context, err))
            }
            _ => MeshError::Io(format!("{}: {}", context, err)),
        }
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::from_io(err, "io")
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            MeshError::Decode(err.to_string())
        } else {
            MeshError::Encode(err.to_string())
        }
    }
}

impl From<postcard::Error> for MeshError {
    fn from(err: postcard::Error) -> Self {
        match err {
            postcard::Error::SerializeBufferFull
            | postcard::Error::SerializeSeqLengthUnknown
            | postcard::Error::SerdeSerCustom => MeshError::Encode(err.to_string()),
            _ => MeshError::Decode(err.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for MeshError {
    fn from(err: std::net::AddrParseError) -> Self {
        MeshError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
