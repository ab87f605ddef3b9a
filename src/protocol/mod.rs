//! The wire-level building blocks shared by every encrypted channel:
//! the fixed binary frame encoding and the compact SDP descriptor codecs.

pub mod frame;
pub mod sdp;

pub use frame::{FrameError, Message, MAX_PAYLOAD_SIZE};
pub use sdp::SdpCodecError;
