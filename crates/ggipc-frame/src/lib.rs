//! Stream-tagged message framing for local IPC.
//!
//! Every message is framed with:
//! - A 2-byte magic number ("GG") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 4-byte little-endian signed stream id
//! - A 1-byte message kind and a 1-byte flag set
//!
//! [`FrameReader`] decodes exactly one frame per call and never reads past
//! it, so a level-triggered poller keeps reporting a socket while more
//! frames are queued on it.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, CommonHeaders, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use kind::{MessageFlags, MessageKind};
pub use reader::FrameReader;
pub use writer::FrameWriter;
