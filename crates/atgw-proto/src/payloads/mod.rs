//! Typed record bodies.
//!
//! [`Payload`] pairs each [`RecordKind`] with its decoded body. Control
//! bodies are CBOR; [`Payload::Post`] carries application bytes untouched.

mod control;
mod handshake;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

pub use control::{Keepalive, KeyUpdate, Kickoff};
pub use handshake::{HandshakeDone, HandshakeReconnect, HandshakeStart};

use crate::{
    errors::{ProtocolError, Result},
    flags::RecordFlags,
    kind::RecordKind,
    record::Record,
};

/// Decoded record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Fresh session proposal
    HandshakeStart(HandshakeStart),
    /// Session resumption
    HandshakeReconnect(HandshakeReconnect),
    /// Handshake result
    HandshakeDone(HandshakeDone),
    /// Key epoch proposal
    KeyUpdate(KeyUpdate),
    /// Key epoch acknowledgement
    KeyUpdateAck(KeyUpdate),
    /// Application message
    Post(Bytes),
    /// Keepalive ping
    Ping(Keepalive),
    /// Keepalive reply
    Pong(Keepalive),
    /// Peer close
    Kickoff(Kickoff),
}

impl Payload {
    /// Record kind this payload travels as.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::HandshakeStart(_) => RecordKind::HandshakeStart,
            Self::HandshakeReconnect(_) => RecordKind::HandshakeReconnect,
            Self::HandshakeDone(_) => RecordKind::HandshakeDone,
            Self::KeyUpdate(_) => RecordKind::KeyUpdate,
            Self::KeyUpdateAck(_) => RecordKind::KeyUpdateAck,
            Self::Post(_) => RecordKind::Post,
            Self::Ping(_) => RecordKind::Ping,
            Self::Pong(_) => RecordKind::Pong,
            Self::Kickoff(_) => RecordKind::Kickoff,
        }
    }

    /// Serialize the body (before any sealing).
    pub fn encode_body(&self) -> Result<Bytes> {
        let kind = self.kind();
        match self {
            Self::HandshakeStart(p) => to_cbor(kind, p),
            Self::HandshakeReconnect(p) => to_cbor(kind, p),
            Self::HandshakeDone(p) => to_cbor(kind, p),
            Self::KeyUpdate(p) | Self::KeyUpdateAck(p) => to_cbor(kind, p),
            Self::Post(data) => Ok(data.clone()),
            Self::Ping(p) | Self::Pong(p) => to_cbor(kind, p),
            Self::Kickoff(p) => to_cbor(kind, p),
        }
    }

    /// Parse a body (after any opening) as `kind`.
    pub fn decode_body(kind: RecordKind, body: Bytes) -> Result<Self> {
        Ok(match kind {
            RecordKind::HandshakeStart => Self::HandshakeStart(from_cbor(kind, &body)?),
            RecordKind::HandshakeReconnect => Self::HandshakeReconnect(from_cbor(kind, &body)?),
            RecordKind::HandshakeDone => Self::HandshakeDone(from_cbor(kind, &body)?),
            RecordKind::KeyUpdate => Self::KeyUpdate(from_cbor(kind, &body)?),
            RecordKind::KeyUpdateAck => Self::KeyUpdateAck(from_cbor(kind, &body)?),
            RecordKind::Post => Self::Post(body),
            RecordKind::Ping => Self::Ping(from_cbor(kind, &body)?),
            RecordKind::Pong => Self::Pong(from_cbor(kind, &body)?),
            RecordKind::Kickoff => Self::Kickoff(from_cbor(kind, &body)?),
        })
    }

    /// Plaintext record at epoch 0. Used for handshake kinds, which are
    /// never sealed.
    pub fn to_plain_record(&self) -> Result<Record> {
        Record::new(self.kind(), RecordFlags::empty(), 0, self.encode_body()?)
    }
}

fn to_cbor<T: Serialize>(kind: RecordKind, value: &T) -> Result<Bytes> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ProtocolError::Encode { kind: kind.name(), reason: e.to_string() })?;
    Ok(Bytes::from(out))
}

fn from_cbor<T: DeserializeOwned>(kind: RecordKind, body: &[u8]) -> Result<T> {
    ciborium::de::from_reader(body)
        .map_err(|e| ProtocolError::MalformedBody { kind: kind.name(), reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_start_survives_the_wire() {
        let payload = Payload::HandshakeStart(HandshakeStart {
            session_id: 42,
            crypt_type: "xchacha20-poly1305".into(),
            public_key: vec![9; 32],
        });

        let record = payload.to_plain_record().unwrap();
        assert_eq!(record.kind(), RecordKind::HandshakeStart);
        assert!(record.header.flags().is_empty());

        let decoded = Payload::decode_body(record.kind(), record.body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn post_body_is_not_reencoded() {
        let payload = Payload::Post(Bytes::from_static(b"ping-1"));
        assert_eq!(payload.encode_body().unwrap(), Bytes::from_static(b"ping-1"));
    }

    #[test]
    fn garbage_control_body_is_malformed() {
        let result = Payload::decode_body(RecordKind::Kickoff, Bytes::from_static(&[0xff, 0x00]));
        assert!(matches!(result, Err(ProtocolError::MalformedBody { kind: "kickoff", .. })));
    }

    #[test]
    fn refused_done_carries_status_only() {
        let done = HandshakeDone::refused(-1005, 7, "none");
        assert_eq!(done.status, -1005);
        assert!(done.public_key.is_empty());
        assert_eq!(done.keybits, 0);
    }
}
