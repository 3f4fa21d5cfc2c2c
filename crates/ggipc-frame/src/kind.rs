//! Message kinds and flags carried in every frame header.

use crate::error::FrameError;

/// What a frame means to the stream it is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Request, response or published event.
    ApplicationMessage = 0,
    /// Error reply for a stream.
    ApplicationError = 1,
    Ping = 2,
    PingResponse = 3,
    /// Connection setup on the control stream.
    Connect = 4,
    ConnectAck = 5,
    ProtocolError = 6,
    InternalError = 7,
}

impl MessageKind {
    /// Wire representation.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable name for the kind.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::ApplicationMessage => "APPLICATION_MESSAGE",
            MessageKind::ApplicationError => "APPLICATION_ERROR",
            MessageKind::Ping => "PING",
            MessageKind::PingResponse => "PING_RESPONSE",
            MessageKind::Connect => "CONNECT",
            MessageKind::ConnectAck => "CONNECT_ACK",
            MessageKind::ProtocolError => "PROTOCOL_ERROR",
            MessageKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageKind::ApplicationMessage,
            1 => MessageKind::ApplicationError,
            2 => MessageKind::Ping,
            3 => MessageKind::PingResponse,
            4 => MessageKind::Connect,
            5 => MessageKind::ConnectAck,
            6 => MessageKind::ProtocolError,
            7 => MessageKind::InternalError,
            other => return Err(FrameError::UnknownMessageKind(other)),
        })
    }
}

/// Per-frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Set on a `ConnectAck` that accepts the connection.
    pub const CONNECTION_ACCEPTED: Self = Self(0x1);
    /// Last frame the sender will emit on this stream.
    pub const TERMINATE_STREAM: Self = Self(0x2);

    /// Build from raw wire bits. Unknown bits are preserved.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw wire bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_wire() {
        for kind in [
            MessageKind::ApplicationMessage,
            MessageKind::ApplicationError,
            MessageKind::ConnectAck,
            MessageKind::InternalError,
        ] {
            assert_eq!(MessageKind::try_from(kind.as_u8()).unwrap(), kind);
        }
        assert!(matches!(
            MessageKind::try_from(42),
            Err(FrameError::UnknownMessageKind(42))
        ));
    }

    #[test]
    fn flags_contains() {
        let flags = MessageFlags::CONNECTION_ACCEPTED | MessageFlags::TERMINATE_STREAM;
        assert!(flags.contains(MessageFlags::TERMINATE_STREAM));
        assert!(!MessageFlags::NONE.contains(MessageFlags::TERMINATE_STREAM));
        assert!(MessageFlags::from_bits(0x80).contains(MessageFlags::NONE));
    }
}
