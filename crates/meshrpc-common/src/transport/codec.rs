use crate::protocol::builtin::{NOT_FOUND_MESSAGE, PING};
use crate::protocol::error::{MeshError, Result};
use crate::protocol::frame::{FrameHeader, FrameKind, FrameProfile, FrameView};
use crate::transport::pool::{BufferPool, DEFAULT_POOL_CAPACITY};

/// Encoder and decoder for one frame profile.
///
/// Encoded frames are drawn from an internal [`BufferPool`]; hand them back with
/// [`FrameCodec::recycle`] once written.
///
/// # Example
///
/// ```
/// use meshrpc_common::transport::FrameCodec;
///
/// let codec = FrameCodec::tcp();
/// let frames = codec.encode_request(b"hello", 120, 42).unwrap();
/// assert_eq!(frames.len(), 1);
///
/// let view = codec.decode(&frames[0]).unwrap();
/// assert_eq!(view.correlation_id, 120);
/// assert_eq!(view.function_id, 42);
/// assert_eq!(view.payload, b"hello");
/// ```
#[derive(Debug)]
pub struct FrameCodec {
    profile: FrameProfile,
    pool: BufferPool,
}

impl FrameCodec {
    pub fn new(profile: FrameProfile) -> Self {
        Self {
            profile,
            pool: BufferPool::new(profile.total_size(), DEFAULT_POOL_CAPACITY),
        }
    }

    pub fn tcp() -> Self {
        Self::new(FrameProfile::TCP)
    }

    pub fn udp() -> Self {
        Self::new(FrameProfile::UDP)
    }

    pub fn profile(&self) -> FrameProfile {
        self.profile
    }

    /// Frames a request payload.
    ///
    /// An empty payload yields one no-data frame, a payload that fits yields one
    /// whole frame, and anything larger is split into start/middle/final chunks.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Encode` if the payload needs more than `u16::MAX` chunks.
    pub fn encode_request(
        &self,
        payload: &[u8],
        correlation_id: u32,
        function_id: u16,
    ) -> Result<Vec<Vec<u8>>> {
        self.split(payload, correlation_id, function_id, false)
    }

    /// Frames a response.
    ///
    /// With `error` set, the payload is ignored and a single failure frame carries
    /// the message, truncated to the body capacity.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Encode` if the payload needs more than `u16::MAX` chunks.
    pub fn encode_response(
        &self,
        payload: &[u8],
        correlation_id: u32,
        function_id: u16,
        error: Option<&str>,
    ) -> Result<Vec<Vec<u8>>> {
        match error {
            Some(message) => Ok(vec![self.single(
                FrameKind::Failed,
                correlation_id,
                function_id,
                truncate(message, self.profile.body_capacity()),
            )]),
            None => self.split(payload, correlation_id, function_id, true),
        }
    }

    /// Frames a not-found response for an unknown function id.
    pub fn encode_not_found(&self, correlation_id: u32, function_id: u16) -> Vec<u8> {
        self.single(
            FrameKind::NotFound,
            correlation_id,
            function_id,
            truncate(NOT_FOUND_MESSAGE, self.profile.body_capacity()),
        )
    }

    /// Frames a liveness probe.
    pub fn encode_ping(&self, correlation_id: u32) -> Vec<u8> {
        self.single(FrameKind::Whole, correlation_id, PING, &[1])
    }

    /// Validates and interprets one frame. See [`FrameProfile::decode`].
    pub fn decode<'a>(&self, frame: &'a [u8]) -> Result<FrameView<'a>> {
        self.profile.decode(frame)
    }

    /// Takes a zeroed frame-sized buffer, for read loops.
    pub fn buffer(&self) -> Vec<u8> {
        self.pool.acquire()
    }

    /// Returns frames to the buffer pool.
    pub fn recycle<I>(&self, frames: I)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        for frame in frames {
            self.pool.release(frame);
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn split(
        &self,
        payload: &[u8],
        correlation_id: u32,
        function_id: u16,
        response: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let capacity = self.profile.body_capacity();
        if payload.len() > self.profile.max_payload() {
            return Err(MeshError::Encode(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.profile.max_payload()
            )));
        }

        if payload.is_empty() {
            let kind = if response { FrameKind::SuccessEmpty } else { FrameKind::NoData };
            return Ok(vec![self.single(kind, correlation_id, function_id, &[])]);
        }

        if payload.len() <= capacity {
            let kind = if response { FrameKind::Success } else { FrameKind::Whole };
            return Ok(vec![self.single(kind, correlation_id, function_id, payload)]);
        }

        let count = self.profile.frames_for(payload.len());
        let mut frames = Vec::with_capacity(count);
        for (i, chunk) in payload.chunks(capacity).enumerate() {
            let index = i + 1;
            let field = if index == count { chunk.len() } else { index };
            let mut buf = self.pool.acquire();
            self.profile.write(
                &mut buf,
                FrameHeader {
                    correlation_id,
                    kind: FrameKind::for_chunk(response, index, count),
                    function_id,
                    chunk_count: count as u16,
                    field: field as u16,
                },
                chunk,
            );
            frames.push(buf);
        }
        Ok(frames)
    }

    fn single(&self, kind: FrameKind, correlation_id: u32, function_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = self.pool.acquire();
        self.profile.write(
            &mut buf,
            FrameHeader {
                correlation_id,
                kind,
                function_id,
                chunk_count: 1,
                field: payload.len() as u16,
            },
            payload,
        );
        buf
    }
}

/// Cuts a message to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate(message: &str, max: usize) -> &[u8] {
    if message.len() <= max {
        return message.as_bytes();
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message.as_bytes()[..end]
}
