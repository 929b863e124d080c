//! Cipher capability.
//!
//! The engine treats cryptography as a capability with three jobs: agree on
//! a session secret during a fresh handshake, prove possession of that
//! secret when resuming, and seal/open records once a session is
//! established.
//!
//! - [`kex`]: X25519 agreement, secret derivation, resumption proofs
//! - [`aead`]: Per-direction, per-epoch record keys (XChaCha20-Poly1305)
//!
//! # Security
//!
//! All secrets and derived keys are wrapped in `Zeroizing` so they are
//! cleared when dropped.

pub mod aead;
pub mod kex;

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use aead::KeySchedule;
pub use kex::EphemeralKey;

/// Session secret as exported to the host.
pub type Secret = Zeroizing<Vec<u8>>;

/// Negotiable ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CryptType {
    /// No encryption; records travel in the clear.
    #[serde(rename = "none")]
    None,
    /// XChaCha20-Poly1305 with X25519 key agreement.
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl CryptType {
    /// Every cipher this build can negotiate.
    pub const ALL: [Self; 2] = [Self::None, Self::XChaCha20Poly1305];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|crypt| crypt.name() == name)
    }

    /// Key strength in bits.
    pub fn keybits(self) -> u32 {
        match self {
            Self::None => 0,
            Self::XChaCha20Poly1305 => 256,
        }
    }

    /// Whether records are sealed.
    pub fn is_encrypted(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for CryptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ciphers available to hosts, in preference order.
pub fn available_crypt_types() -> &'static [CryptType] {
    &CryptType::ALL
}

/// Which end of the session a key schedule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The engine's side
    Client,
    /// The gateway's side
    Gateway,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for crypt in available_crypt_types() {
            assert_eq!(CryptType::from_name(crypt.name()), Some(*crypt));
        }
        assert_eq!(CryptType::from_name("aes-256-cfb"), None);
    }

    #[test]
    fn keybits_follow_cipher() {
        assert_eq!(CryptType::None.keybits(), 0);
        assert_eq!(CryptType::XChaCha20Poly1305.keybits(), 256);
        assert!(!CryptType::None.is_encrypted());
    }
}
