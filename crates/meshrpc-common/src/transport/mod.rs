//! meshrpc Transport Layer
//!
//! Pieces shared by every connection type: the frame codec, the buffer pool it
//! draws from, and the HTTP outcome codes.
//!
//! # Components
//!
//! - **[`FrameCodec`]**: Splits payloads into fixed-size frames and validates incoming ones
//! - **[`BufferPool`]**: Reusable, zeroed frame buffers
//! - **[`http`]**: `code` header handling for the HTTP transport
//!
//! # Example
//!
//! ```
//! use meshrpc_common::protocol::Reassembler;
//! use meshrpc_common::transport::FrameCodec;
//!
//! let codec = FrameCodec::udp();
//! let payload = vec![7u8; 2000];
//! let frames = codec.encode_request(&payload, 500, 31).unwrap();
//! assert_eq!(frames.len(), 4);
//!
//! let mut reassembler = Reassembler::new();
//! let mut done = None;
//! for frame in frames.iter().rev() {
//!     let view = codec.decode(frame).unwrap();
//!     if let Some(message) = reassembler.accept(&view).unwrap() {
//!         done = Some(message);
//!     }
//! }
//! assert_eq!(done.unwrap().payload, payload);
//! ```

pub mod codec;
pub mod http;
pub mod pool;

pub use codec::FrameCodec;
pub use http::{HttpTransport, HyperRequest, HyperResponse, ResponseCode};
pub use pool::BufferPool;
