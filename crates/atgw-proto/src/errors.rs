//! Wire-level error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes than a record header were supplied.
    #[error("buffer too short: need {need} bytes, have {have}")]
    TooShort {
        /// Bytes required
        need: usize,
        /// Bytes available
        have: usize,
    },

    /// Header magic does not identify this protocol.
    #[error("invalid magic: 0x{found:04x}")]
    InvalidMagic {
        /// Magic value found on the wire
        found: u16,
    },

    /// Header version is not one this implementation speaks.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Header kind byte is not a known record kind.
    #[error("unknown record kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Declared body length exceeds the sanity bound.
    #[error("record body too large: {size} bytes (max {max})")]
    BodyTooLarge {
        /// Declared size
        size: usize,
        /// Sanity bound
        max: usize,
    },

    /// A control body failed to decode as CBOR, or a raw body was given
    /// where a control body was expected.
    #[error("malformed {kind} body: {reason}")]
    MalformedBody {
        /// Kind name being decoded
        kind: &'static str,
        /// Decoder diagnostic
        reason: String,
    },

    /// A control body failed to encode.
    #[error("failed to encode {kind} body: {reason}")]
    Encode {
        /// Kind name being encoded
        kind: &'static str,
        /// Encoder diagnostic
        reason: String,
    },
}
