//! Error and close-reason taxonomy.
//!
//! Every public operation either succeeds or returns one of the [`Error`]
//! variants below. Each variant has a stable negative code so hosts that
//! bridge to other languages (or log numerically) see the same values on
//! every platform.

use std::fmt;

use atgw_proto::ProtocolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine errors.
///
/// Grouped by concern: handle/lifecycle, protocol, handshake/crypto,
/// resource, and contract violations. Host callbacks return this type too;
/// codes outside the taxonomy travel as [`Error::Rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// Session idle for too long before its first message.
    #[error("first message not received in time")]
    FirstIdle,
    /// Operation requires a completed handshake (or one is in progress).
    #[error("handshake not complete")]
    Handshake,
    /// Session is busy: reentrant call, double start, or queue full.
    #[error("session busy")]
    Busy,
    /// Session secret is no longer valid for resumption.
    #[error("session expired")]
    SessionExpired,
    /// Host or peer refused to resume the session.
    #[error("reconnect refused")]
    RefuseReconnect,
    /// A required host callback is not registered.
    #[error("missing host callback")]
    MissCallbacks,
    /// No route to the session's backend.
    #[error("invalid router")]
    InvalidRouter,
    /// Address could not be used.
    #[error("invalid address")]
    InvalidAddress,
    /// Transport-level failure.
    #[error("network error")]
    Network,
    /// Record violates the protocol state machine or version.
    #[error("bad protocol")]
    BadProtocol,
    /// Session is closing or closed.
    #[error("session closing")]
    Closing,
    /// Owning manager no longer exists.
    #[error("lost manager")]
    LostManager,
    /// Message exceeds a configured size limit.
    #[error("message too large")]
    MsgTooLarge,
    /// Handle is not registered.
    #[error("handle not found")]
    HandleNotFound,
    /// Session is already bound to a transport.
    #[error("session already has a transport")]
    AlreadyHasFd,
    /// Session identifier is unknown.
    #[error("session not found")]
    SessionNotFound,
    /// Session identifier or handle is already registered.
    #[error("session already exists")]
    SessionAlreadyExist,
    /// Write completion reported while no write is outstanding.
    #[error("no write outstanding")]
    NotWriting,
    /// Cipher is not supported by one of the sides.
    #[error("crypt type not supported")]
    CryptNotSupported,
    /// Invalid argument.
    #[error("invalid parameter")]
    Param,
    /// Malformed framing or body.
    #[error("bad data")]
    BadData,
    /// Length out of range for the operation.
    #[error("invalid size")]
    InvalidSize,
    /// Nothing to operate on.
    #[error("no data")]
    NoData,
    /// Allocation failed.
    #[error("allocation failed")]
    Malloc,
    /// Cipher state was already initialized.
    #[error("crypt already initialized")]
    CryptAlreadyInited,
    /// Authentication tag, proof or key agreement check failed.
    #[error("crypt verification failed")]
    CryptVerify,
    /// Cipher primitive failed.
    #[error("crypt operation failed")]
    CryptOperation,
    /// DH parameter file could not be read.
    #[error("failed to read DH parameter file")]
    CryptReadDhparamFile,
    /// DH parameters could not be initialized.
    #[error("failed to initialize DH parameters")]
    CryptInitDhparam,
    /// RSA public key could not be read.
    #[error("failed to read RSA public key")]
    CryptReadRsaPubkey,
    /// RSA private key could not be read.
    #[error("failed to read RSA private key")]
    CryptReadRsaPrikey,
    /// Host or peer status outside the taxonomy.
    #[error("rejected with status {0}")]
    Rejected(i32),
}

const CODES: [(Error, i32); 31] = [
    (Error::FirstIdle, -1001),
    (Error::Handshake, -1002),
    (Error::Busy, -1003),
    (Error::SessionExpired, -1004),
    (Error::RefuseReconnect, -1005),
    (Error::MissCallbacks, -1006),
    (Error::InvalidRouter, -1007),
    (Error::InvalidAddress, -1008),
    (Error::Network, -1009),
    (Error::BadProtocol, -1010),
    (Error::Closing, -1011),
    (Error::LostManager, -1012),
    (Error::MsgTooLarge, -1013),
    (Error::HandleNotFound, -1014),
    (Error::AlreadyHasFd, -1015),
    (Error::SessionNotFound, -1016),
    (Error::SessionAlreadyExist, -1017),
    (Error::NotWriting, -1018),
    (Error::CryptNotSupported, -1019),
    (Error::Param, -1020),
    (Error::BadData, -1021),
    (Error::InvalidSize, -1022),
    (Error::NoData, -1023),
    (Error::Malloc, -1024),
    (Error::CryptAlreadyInited, -1101),
    (Error::CryptVerify, -1102),
    (Error::CryptOperation, -1103),
    (Error::CryptReadDhparamFile, -1211),
    (Error::CryptInitDhparam, -1212),
    (Error::CryptReadRsaPubkey, -1221),
    (Error::CryptReadRsaPrikey, -1222),
];

impl Error {
    /// Stable negative status code.
    pub fn code(self) -> i32 {
        if let Self::Rejected(code) = self {
            return code;
        }
        CODES.iter().find(|(e, _)| *e == self).map_or(-1, |(_, code)| *code)
    }

    /// Map a status code back into the taxonomy.
    ///
    /// Returns `None` for 0 (success). Codes the taxonomy does not know
    /// become [`Error::Rejected`].
    pub fn from_code(code: i32) -> Option<Self> {
        if code == 0 {
            return None;
        }
        Some(CODES.iter().find(|(_, c)| *c == code).map_or(Self::Rejected(code), |(e, _)| *e))
    }

    /// Convert a `Result` into a status code (0 on success).
    pub fn status_of(result: Result<(), Self>) -> i32 {
        result.err().map_or(0, Self::code)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedVersion(_) => Self::BadProtocol,
            ProtocolError::Encode { .. } => Self::CryptOperation,
            ProtocolError::TooShort { .. }
            | ProtocolError::InvalidMagic { .. }
            | ProtocolError::UnknownKind(_)
            | ProtocolError::BodyTooLarge { .. }
            | ProtocolError::MalformedBody { .. } => Self::BadData,
        }
    }
}

/// Why a session closed.
///
/// Values below [`CloseReason::RECONNECT_BOUND`] describe transport trouble
/// the host may recover from by resuming the session on a new connection;
/// values at or above it are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseReason(pub u32);

impl CloseReason {
    /// Unspecified.
    pub const UNKNOWN: Self = Self(0x0000);
    /// Resource temporarily unavailable.
    pub const EAGAIN: Self = Self(0x0001);
    /// Traffic exceeded configured bounds.
    pub const TRAFFIC_EXTENDED: Self = Self(0x0002);
    /// Peer sent malformed or oversized data.
    pub const INVALID_DATA: Self = Self(0x0003);
    /// Transport reset or write failure.
    pub const RESET: Self = Self(0x0004);
    /// Upper bound of engine-internal reconnectable reasons.
    pub const RECONNECT_INNER_BOUND: Self = Self(0x0100);
    /// First non-reconnectable reason.
    pub const RECONNECT_BOUND: Self = Self(0x1_0000);
    /// No first message in time.
    pub const FIRST_IDLE: Self = Self(0x1_0001);
    /// Server shut down.
    pub const SERVER_CLOSED: Self = Self(0x1_0002);
    /// Server overloaded.
    pub const SERVER_BUSY: Self = Self(0x1_0003);
    /// Kicked off by the server.
    pub const KICKOFF: Self = Self(0x1_0004);
    /// Handshake failed.
    pub const HANDSHAKE: Self = Self(0x1_0005);
    /// Client logged out.
    pub const LOGOUT: Self = Self(0x1_0006);
    /// Kicked off by an administrator.
    pub const ADMINISTRATOR: Self = Self(0x1_0007);
    /// Closed for maintenance.
    pub const MAINTENANCE: Self = Self(0x1_0008);
    /// Everything finished; connection no longer needed.
    pub const EOF: Self = Self(0x1_0009);
    /// Upper bound of engine-internal final reasons.
    pub const NO_RECONNECT_INNER_BOUND: Self = Self(0x1_0100);

    /// Whether the host may resume the session after this close.
    pub fn is_reconnectable(self) -> bool {
        self < Self::RECONNECT_BOUND
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::UNKNOWN => "unknown",
            Self::EAGAIN => "eagain",
            Self::TRAFFIC_EXTENDED => "traffic-extended",
            Self::INVALID_DATA => "invalid-data",
            Self::RESET => "reset",
            Self::FIRST_IDLE => "first-idle",
            Self::SERVER_CLOSED => "server-closed",
            Self::SERVER_BUSY => "server-busy",
            Self::KICKOFF => "kickoff",
            Self::HANDSHAKE => "handshake",
            Self::LOGOUT => "logout",
            Self::ADMINISTRATOR => "administrator",
            Self::MAINTENANCE => "maintenance",
            Self::EOF => "eof",
            _ => return None,
        })
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:x})", self.0),
            None => write!(f, "0x{:x}", self.0),
        }
    }
}

/// Payload of the `on_error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Source file that raised the report
    pub location: &'static str,
    /// Source line
    pub line: u32,
    /// Taxonomy error
    pub error: Error,
    /// Human-readable detail
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_taxonomy() {
        for (error, code) in CODES {
            assert_eq!(error.code(), code);
            assert_eq!(Error::from_code(code), Some(error));
        }
    }

    #[test]
    fn zero_is_success() {
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::status_of(Ok(())), 0);
        assert_eq!(Error::status_of(Err(Error::NotWriting)), -1018);
    }

    #[test]
    fn foreign_codes_are_preserved() {
        let err = Error::from_code(-42).unwrap();
        assert_eq!(err, Error::Rejected(-42));
        assert_eq!(err.code(), -42);
    }

    #[test]
    fn protocol_errors_map_to_data_or_protocol() {
        assert_eq!(Error::from(ProtocolError::UnknownKind(9)), Error::BadData);
        assert_eq!(Error::from(ProtocolError::UnsupportedVersion(2)), Error::BadProtocol);
    }

    #[test]
    fn reconnect_bound_splits_reasons() {
        assert!(CloseReason::RESET.is_reconnectable());
        assert!(CloseReason::INVALID_DATA.is_reconnectable());
        assert!(!CloseReason::KICKOFF.is_reconnectable());
        assert!(!CloseReason::RECONNECT_BOUND.is_reconnectable());
    }

    #[test]
    fn close_reason_display_names_known_values() {
        assert_eq!(CloseReason::INVALID_DATA.to_string(), "invalid-data (0x3)");
        assert_eq!(CloseReason(0x4242).to_string(), "0x4242");
    }
}
