use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::{MessageFlags, MessageKind};

/// Frame header: magic (2) + length (4) + stream id (4) + kind (1) + flags (1) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Magic bytes: "GG" (0x47 0x47).
pub const MAGIC: [u8; 2] = [0x47, 0x47];

/// Default maximum payload size in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 10_000;

/// Routing metadata common to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeaders {
    /// Stream the frame belongs to. Negative ids are a protocol violation
    /// but still decode; rejecting them is up to the receiver.
    pub stream_id: i32,
    /// Message kind.
    pub kind: MessageKind,
    /// Message flags.
    pub flags: MessageFlags,
}

impl CommonHeaders {
    /// Headers for a plain application message on `stream_id`.
    pub fn application(stream_id: i32) -> Self {
        Self {
            stream_id,
            kind: MessageKind::ApplicationMessage,
            flags: MessageFlags::NONE,
        }
    }
}

/// A decoded frame: common headers plus the message body.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Routing metadata.
    pub headers: CommonHeaders,
    /// The message body.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(headers: CommonHeaders, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬────────────┬────────┬────────┬────────────────┐
/// │ Magic (2B) │ Length    │ Stream id  │ Kind   │ Flags  │ Body           │
/// │ 0x47 0x47  │ (4B LE)   │ (4B LE i32)│ (1B)   │ (1B)   │ (Length bytes) │
/// └────────────┴───────────┴────────────┴────────┴────────┴────────────────┘
/// ```
pub fn encode_frame(headers: &CommonHeaders, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body.len() as u32);
    dst.put_i32_le(headers.stream_id);
    dst.put_u8(headers.kind.as_u8());
    dst.put_u8(headers.flags.bits());
    dst.put_slice(body);
    Ok(())
}

/// Parse a complete header, returning the headers and the body length.
pub(crate) fn parse_header(
    header: &[u8; HEADER_SIZE],
    max_payload: usize,
) -> Result<(CommonHeaders, usize)> {
    if header[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut rest = &header[2..];
    let body_len = rest.get_u32_le() as usize;
    let stream_id = rest.get_i32_le();
    let kind = MessageKind::try_from(rest.get_u8())?;
    let flags = MessageFlags::from_bits(rest.get_u8());

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    Ok((
        CommonHeaders {
            stream_id,
            kind,
            flags,
        },
        body_len,
    ))
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let (headers, body_len) = parse_header(&header, max_payload)?;

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Frame { headers, body }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 10 000.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
