//! Payload encodings
//!
//! Frames carry opaque bytes. What those bytes mean is decided per service:
//! either plain JSON or a compact binary encoding. Services that take several
//! request arguments pack them into a [`MultiBody`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::error::{MeshError, Result};

/// Wire encoding used by a service's request and response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    #[default]
    Binary,
}

impl Encoding {
    /// Reserved method name that declares a JSON service.
    pub const JSON_MARKER: &'static str = "Encoding_JSON";

    /// Reserved method name that declares a binary service.
    pub const BINARY_MARKER: &'static str = "Encoding_BINARY";

    /// Returns the encoding declared by a reserved method name, if any.
    pub fn from_marker(name: &str) -> Option<Self> {
        match name {
            Self::JSON_MARKER => Some(Encoding::Json),
            Self::BINARY_MARKER => Some(Encoding::Binary),
            _ => None,
        }
    }

    /// Serializes a value.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Encode` if the value cannot be represented.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| MeshError::Encode(e.to_string()))
            }
            Encoding::Binary => {
                postcard::to_allocvec(value).map_err(|e| MeshError::Encode(e.to_string()))
            }
        }
    }

    /// Deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Decode` if the bytes do not match the expected shape.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| MeshError::Decode(e.to_string()))
            }
            Encoding::Binary => {
                postcard::from_bytes(bytes).map_err(|e| MeshError::Decode(e.to_string()))
            }
        }
    }
}

/// Count-prefixed list of byte segments, one per request argument.
///
/// ```text
/// u32 count | (u32 length | bytes) * count
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiBody {
    segments: Vec<Vec<u8>>,
}

impl MultiBody {
    pub fn new(segments: Vec<Vec<u8>>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Vec<u8>> {
        self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = 4 + self.segments.iter().map(|s| 4 + s.len()).sum::<usize>();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&(self.segments.len() as u32).to_be_bytes());
        for segment in &self.segments {
            out.extend_from_slice(&(segment.len() as u32).to_be_bytes());
            out.extend_from_slice(segment);
        }
        out
    }

    /// Parses a multi body.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Decode` on truncated input or trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;
        let count = take_u32(&mut rest)? as usize;
        // Every segment needs at least its length prefix.
        if count > rest.len() / 4 {
            return Err(MeshError::Decode(format!(
                "multi body declares {} segments in {} bytes",
                count,
                bytes.len()
            )));
        }

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let len = take_u32(&mut rest)? as usize;
            if rest.len() < len {
                return Err(MeshError::Decode("truncated multi body segment".to_string()));
            }
            let (segment, tail) = rest.split_at(len);
            segments.push(segment.to_vec());
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(MeshError::Decode(format!(
                "{} trailing bytes after multi body",
                rest.len()
            )));
        }
        Ok(Self { segments })
    }
}

fn take_u32(input: &mut &[u8]) -> Result<u32> {
    if input.len() < 4 {
        return Err(MeshError::Decode("truncated multi body header".to_string()));
    }
    let (head, tail) = input.split_at(4);
    *input = tail;
    Ok(u32::from_be_bytes([head[0], head[1], head[2], head[3]]))
}
