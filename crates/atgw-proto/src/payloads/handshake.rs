//! Handshake payloads.
//!
//! These travel in the clear: they are what establishes the keys. Anything
//! secret-dependent (the resumption proof) is a MAC, never the secret itself.

use serde::{Deserialize, Serialize};

/// Fresh session proposal from the client.
///
/// # Protocol Flow
///
/// 1. Host allocates `session_id` (may be 0 to let the gateway choose)
/// 2. Client sends `HandshakeStart` with its ephemeral public key
/// 3. Gateway replies [`HandshakeDone`] with its own public key
/// 4. Both sides derive the session secret from the X25519 agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeStart {
    /// Host-proposed session identifier
    pub session_id: u64,
    /// Proposed cipher name
    pub crypt_type: String,
    /// Client ephemeral public key (empty for `"none"`)
    pub public_key: Vec<u8>,
}

/// Resumption of a known session on a new transport.
///
/// `proof` is an HMAC over `session_id` and `nonce` keyed by the session
/// secret. The nonce also salts the new connection's traffic keys, so a
/// resumed connection never reuses a previous connection's keystream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReconnect {
    /// Session being resumed
    pub session_id: u64,
    /// Cipher the session negotiated originally
    pub crypt_type: String,
    /// Fresh random nonce
    pub nonce: Vec<u8>,
    /// HMAC proof of secret possession
    pub proof: Vec<u8>,
}

/// Gateway's answer to either handshake request.
///
/// `status` is 0 on success or a negative error code; on failure the
/// remaining fields are informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeDone {
    /// 0 or a negative error code
    pub status: i32,
    /// Authoritative session identifier
    pub session_id: u64,
    /// Cipher in force
    pub crypt_type: String,
    /// Gateway ephemeral public key (empty for `"none"` and resumption)
    pub public_key: Vec<u8>,
    /// Key strength in bits
    pub keybits: u32,
}

impl HandshakeDone {
    /// Refusal carrying only a status code.
    pub fn refused(status: i32, session_id: u64, crypt_type: impl Into<String>) -> Self {
        Self { status, session_id, crypt_type: crypt_type.into(), public_key: Vec::new(), keybits: 0 }
    }
}
