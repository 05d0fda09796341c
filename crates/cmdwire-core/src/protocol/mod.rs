//! Protocol module: length-prefixed framing, the command grammar, and the
//! combined wire codec used by both endpoints.

pub mod codec;
pub mod frame;
pub mod grammar;

pub use codec::{ProtocolError, WireCodec};
pub use frame::{FrameCodec, FrameReader, FrameWriter, DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_SIZE};
pub use grammar::{Control, Grammar, JoinInfo, Message};
