//! Wire protocol: the three-command model and its newline-delimited framing.

pub mod codec;
pub mod message;

pub use codec::{encode_frame, FrameDecoder};
pub use message::{Command, Operation, PeerAddress, PeerId};
