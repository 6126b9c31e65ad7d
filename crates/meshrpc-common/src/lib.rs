//! meshrpc Common Types and Transport
//!
//! This crate provides the wire protocol and shared types for meshrpc, a
//! peer-to-peer RPC runtime where every process is both a server and a client.
//!
//! # Overview
//!
//! - **Protocol Layer**: frame layout, reassembly, payload encodings, node
//!   identities, function descriptors, built-in function ids and the error type
//! - **Transport Layer**: the pooled frame codec and HTTP outcome codes
//!
//! # Architecture
//!
//! Every message travels as one or more fixed-size frames:
//! - **TCP profile**: 1444 bytes per frame, 1430 bytes of payload
//! - **UDP profile**: 534 bytes per frame, 520 bytes of payload
//! - **Header**: magic, 24-bit correlation id, kind, function id, chunk fields
//!
//! # Example
//!
//! ```
//! use meshrpc_common::protocol::{Encoding, MessageKind, Reassembler};
//! use meshrpc_common::transport::FrameCodec;
//!
//! let codec = FrameCodec::tcp();
//! let body = Encoding::Json.encode(&("hello", 42)).unwrap();
//! let frames = codec.encode_response(&body, 101, 40, None).unwrap();
//!
//! let mut reassembler = Reassembler::new();
//! let view = codec.decode(&frames[0]).unwrap();
//! let message = reassembler.accept(&view).unwrap().unwrap();
//! assert_eq!(message.kind, MessageKind::Success);
//! let (text, n): (String, u32) = Encoding::Json.decode(&message.payload).unwrap();
//! assert_eq!((text.as_str(), n), ("hello", 42));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
