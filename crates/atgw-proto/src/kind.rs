//! Record kinds.

use std::fmt;

use crate::errors::ProtocolError;

/// Kind of a record, carried in the header's `kind` byte.
///
/// Handshake kinds are exchanged in the clear before key material exists.
/// Every other kind is sealed under the active traffic key once the
/// handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Client proposes a fresh session and cipher.
    HandshakeStart = 0x01,
    /// Client resumes a known session with its secret.
    HandshakeReconnect = 0x02,
    /// Gateway completes (or refuses) a handshake.
    HandshakeDone = 0x03,
    /// Either side proposes the next key epoch.
    KeyUpdate = 0x04,
    /// Acknowledges a key update; sent under the old key.
    KeyUpdateAck = 0x05,
    /// Application message.
    Post = 0x10,
    /// Keepalive ping.
    Ping = 0x20,
    /// Keepalive reply echoing the ping's timestamp.
    Pong = 0x21,
    /// Peer is closing the session.
    Kickoff = 0x30,
}

impl RecordKind {
    /// Every known kind.
    pub const ALL: [Self; 9] = [
        Self::HandshakeStart,
        Self::HandshakeReconnect,
        Self::HandshakeDone,
        Self::KeyUpdate,
        Self::KeyUpdateAck,
        Self::Post,
        Self::Ping,
        Self::Pong,
        Self::Kickoff,
    ];

    /// Wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// True for kinds exchanged before keys exist.
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::HandshakeStart | Self::HandshakeReconnect | Self::HandshakeDone)
    }

    /// Short name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::HandshakeStart => "handshake-start",
            Self::HandshakeReconnect => "handshake-reconnect",
            Self::HandshakeDone => "handshake-done",
            Self::KeyUpdate => "key-update",
            Self::KeyUpdateAck => "key-update-ack",
            Self::Post => "post",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Kickoff => "kickoff",
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_u8() == value)
            .ok_or(ProtocolError::UnknownKind(value))
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
