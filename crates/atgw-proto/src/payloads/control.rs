//! Post-handshake control payloads.

use serde::{Deserialize, Serialize};

/// Key update proposal or acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdate {
    /// Epoch being switched to
    pub epoch: u8,
}

/// Ping or pong body.
///
/// A pong echoes the ping's timestamp verbatim, so only the sender's clock
/// matters for latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    /// Sender-relative milliseconds
    pub timestamp_ms: u64,
}

/// Peer-initiated close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kickoff {
    /// Close reason code
    pub reason: u32,
}
