pub mod builtin;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod identity;
pub mod reassembly;

#[cfg(test)]
mod tests;

pub use descriptor::{CallKind, FunctionDescriptor};
pub use encoding::{Encoding, MultiBody};
pub use error::{MeshError, Result};
pub use frame::{ChunkPosition, FrameKind, FrameProfile, FrameView, MessageKind};
pub use identity::{ApiName, NodeIdentity};
pub use reassembly::{Message, Reassembler};
