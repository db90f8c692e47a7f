//! Hand-rolled WebSocket protocol layer: upgrade handshake and frame codec.

pub mod frame;
pub mod handshake;

pub use frame::{
    DEFAULT_MAX_FRAME_SIZE, Frame, FrameBuffer, FrameError, MAX_FRAME_HEADER_BYTES, Opcode,
};
pub use handshake::{HandshakeError, MAX_HEADER_BYTES, UpgradeRequest};
