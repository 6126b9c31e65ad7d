//! Fixed-size wire frames
//!
//! Every unit on the wire has exactly the byte length of its transport profile.
//! Payloads that do not fit into a single frame are split into chunks and put
//! back together by the [`Reassembler`](super::reassembly::Reassembler).
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//! 0       2     magic prefix [1, 0]
//! 2       3     correlation id (big-endian, 24 bits)
//! 5       1     frame kind
//! 6       2     function id (big-endian)
//! 8       2     chunk count (big-endian)
//! 10      2     chunk index (start/middle) or payload length (everything else)
//! 12      ..    payload, zero padded
//! N-2     2     magic suffix [0, 1]
//! ```
//!
//! A final chunk carries the true length of its segment in the index/length
//! field; its index is implied to equal the chunk count.

use crate::protocol::error::{MeshError, Result};

/// Two leading bytes of every frame.
pub const MAGIC_PREFIX: [u8; 2] = [1, 0];

/// Two trailing bytes of every frame.
pub const MAGIC_SUFFIX: [u8; 2] = [0, 1];

/// Offset of the first payload byte.
pub const BODY_START: usize = 12;

/// Largest correlation id representable in the 3-byte header field.
pub const MAX_CORRELATION_ID: u32 = 0x00FF_FFFF;

/// Size configuration for one transport.
///
/// Profiles are plain values handed to every codec and connection; there is no
/// process-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProfile {
    total_size: usize,
}

impl FrameProfile {
    /// Stream profile, used for TCP connections.
    pub const TCP: FrameProfile = FrameProfile { total_size: 1444 };

    /// Datagram profile, sized to stay under common path MTUs.
    pub const UDP: FrameProfile = FrameProfile { total_size: 534 };

    /// Builds a profile with a custom frame size.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::MalformedFrame` when the size cannot hold a header and
    /// suffix, or when the body capacity would overflow the 16-bit length field.
    pub fn custom(total_size: usize) -> Result<Self> {
        if total_size <= BODY_START + MAGIC_SUFFIX.len() {
            return Err(MeshError::MalformedFrame(format!(
                "frame size {} leaves no room for a body",
                total_size
            )));
        }
        if total_size - BODY_START - MAGIC_SUFFIX.len() > u16::MAX as usize {
            return Err(MeshError::MalformedFrame(format!(
                "frame size {} exceeds the 16-bit length field",
                total_size
            )));
        }
        Ok(Self { total_size })
    }

    /// Exact byte length of every frame in this profile.
    pub const fn total_size(&self) -> usize {
        self.total_size
    }

    /// Payload bytes carried by one frame.
    pub const fn body_capacity(&self) -> usize {
        self.total_size - BODY_START - MAGIC_SUFFIX.len()
    }

    /// Offset of the magic suffix, one past the last payload byte.
    pub const fn final_byte(&self) -> usize {
        self.total_size - MAGIC_SUFFIX.len()
    }

    /// Largest payload this profile can carry, limited by the 16-bit chunk count.
    pub const fn max_payload(&self) -> usize {
        self.body_capacity() * u16::MAX as usize
    }

    /// Number of frames needed for a payload of `len` bytes.
    pub fn frames_for(&self, len: usize) -> usize {
        if len == 0 {
            1
        } else {
            len.div_ceil(self.body_capacity())
        }
    }

    /// Validates and interprets one frame.
    ///
    /// Length and magic bytes are checked before any other field is read.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::MalformedFrame` for any structural violation.
    pub fn decode<'a>(&self, frame: &'a [u8]) -> Result<FrameView<'a>> {
        if frame.len() != self.total_size {
            return Err(MeshError::MalformedFrame(format!(
                "expected {} bytes, got {}",
                self.total_size,
                frame.len()
            )));
        }
        if frame[..2] != MAGIC_PREFIX || frame[self.final_byte()..] != MAGIC_SUFFIX {
            return Err(MeshError::MalformedFrame("bad magic bytes".to_string()));
        }

        let kind = FrameKind::from_byte(frame[5])
            .ok_or_else(|| MeshError::MalformedFrame(format!("unknown frame kind {}", frame[5])))?;
        let correlation_id = u32::from_be_bytes([0, frame[2], frame[3], frame[4]]);
        let function_id = u16::from_be_bytes([frame[6], frame[7]]);
        let chunk_count = u16::from_be_bytes([frame[8], frame[9]]);
        let field = u16::from_be_bytes([frame[10], frame[11]]);

        let (chunk_index, payload) = match kind.position() {
            ChunkPosition::Single => {
                if chunk_count != 1 {
                    return Err(MeshError::MalformedFrame(format!(
                        "single frame declares {} chunks",
                        chunk_count
                    )));
                }
                (1, self.bounded(frame, field)?)
            }
            ChunkPosition::Start | ChunkPosition::Middle => {
                if chunk_count < 2 {
                    return Err(MeshError::MalformedFrame(format!(
                        "chunk frame declares {} chunks",
                        chunk_count
                    )));
                }
                let valid = match kind.position() {
                    ChunkPosition::Start => field == 1,
                    _ => field > 1 && field < chunk_count,
                };
                if !valid {
                    return Err(MeshError::MalformedFrame(format!(
                        "chunk index {} out of range for {} chunks",
                        field, chunk_count
                    )));
                }
                (field, &frame[BODY_START..self.final_byte()])
            }
            ChunkPosition::Final => {
                if chunk_count < 2 {
                    return Err(MeshError::MalformedFrame(format!(
                        "final chunk declares {} chunks",
                        chunk_count
                    )));
                }
                (chunk_count, self.bounded(frame, field)?)
            }
        };

        Ok(FrameView {
            correlation_id,
            kind,
            function_id,
            chunk_count,
            chunk_index,
            payload,
        })
    }

    fn bounded<'a>(&self, frame: &'a [u8], len: u16) -> Result<&'a [u8]> {
        let len = len as usize;
        if len > self.body_capacity() {
            return Err(MeshError::MalformedFrame(format!(
                "payload length {} exceeds capacity {}",
                len,
                self.body_capacity()
            )));
        }
        Ok(&frame[BODY_START..BODY_START + len])
    }

    /// Writes header, payload and suffix into a zeroed buffer of `total_size` bytes.
    pub(crate) fn write(&self, buf: &mut [u8], header: FrameHeader, payload: &[u8]) {
        debug_assert_eq!(buf.len(), self.total_size);
        debug_assert!(payload.len() <= self.body_capacity());

        let id = header.correlation_id & MAX_CORRELATION_ID;
        buf[..2].copy_from_slice(&MAGIC_PREFIX);
        buf[2] = (id >> 16) as u8;
        buf[3] = (id >> 8) as u8;
        buf[4] = id as u8;
        buf[5] = header.kind as u8;
        buf[6..8].copy_from_slice(&header.function_id.to_be_bytes());
        buf[8..10].copy_from_slice(&header.chunk_count.to_be_bytes());
        buf[10..12].copy_from_slice(&header.field.to_be_bytes());
        buf[BODY_START..BODY_START + payload.len()].copy_from_slice(payload);
        let end = self.final_byte();
        buf[end..].copy_from_slice(&MAGIC_SUFFIX);
    }
}

/// Header values for one outgoing frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub correlation_id: u32,
    pub kind: FrameKind,
    pub function_id: u16,
    pub chunk_count: u16,
    /// Chunk index for start/middle frames, payload length otherwise.
    pub field: u16,
}

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Whole = 0,
    Start = 1,
    Middle = 2,
    Final = 3,
    NoData = 4,
    Success = 11,
    Failed = 12,
    NotFound = 13,
    SuccessEmpty = 14,
    ResponseStart = 15,
    ResponseMiddle = 16,
    ResponseFinal = 17,
}

/// Where a frame sits within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    Single,
    Start,
    Middle,
    Final,
}

/// What a completed message means to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Success,
    Failed,
    NotFound,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => FrameKind::Whole,
            1 => FrameKind::Start,
            2 => FrameKind::Middle,
            3 => FrameKind::Final,
            4 => FrameKind::NoData,
            11 => FrameKind::Success,
            12 => FrameKind::Failed,
            13 => FrameKind::NotFound,
            14 => FrameKind::SuccessEmpty,
            15 => FrameKind::ResponseStart,
            16 => FrameKind::ResponseMiddle,
            17 => FrameKind::ResponseFinal,
            _ => return None,
        })
    }

    pub fn is_response(self) -> bool {
        (self as u8) >= FrameKind::Success as u8
    }

    pub fn position(self) -> ChunkPosition {
        match self {
            FrameKind::Start | FrameKind::ResponseStart => ChunkPosition::Start,
            FrameKind::Middle | FrameKind::ResponseMiddle => ChunkPosition::Middle,
            FrameKind::Final | FrameKind::ResponseFinal => ChunkPosition::Final,
            _ => ChunkPosition::Single,
        }
    }

    pub fn message_kind(self) -> MessageKind {
        match self {
            FrameKind::Failed => MessageKind::Failed,
            FrameKind::NotFound => MessageKind::NotFound,
            kind if kind.is_response() => MessageKind::Success,
            _ => MessageKind::Request,
        }
    }

    /// Kind for chunk `index` (1-based) of `count` chunks.
    pub(crate) fn for_chunk(response: bool, index: usize, count: usize) -> Self {
        match (response, index == 1, index == count) {
            (false, true, _) => FrameKind::Start,
            (false, _, true) => FrameKind::Final,
            (false, _, _) => FrameKind::Middle,
            (true, true, _) => FrameKind::ResponseStart,
            (true, _, true) => FrameKind::ResponseFinal,
            (true, _, _) => FrameKind::ResponseMiddle,
        }
    }
}

/// A validated, borrowed view over one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub correlation_id: u32,
    pub kind: FrameKind,
    pub function_id: u16,
    pub chunk_count: u16,
    /// 1-based index of this chunk; always 1 for single frames.
    pub chunk_index: u16,
    pub payload: &'a [u8],
}

impl FrameView<'_> {
    pub fn is_single(&self) -> bool {
        self.kind.position() == ChunkPosition::Single
    }
}
