//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{crypto::CryptType, error::Error};

/// Largest receive block handed out by a single `alloc_for_read`.
pub const MAX_READ_BLOCK_SIZE: usize = 64 * 1024;

/// Bound on buffered data. Zero in either field means "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferLimit {
    /// Byte bound
    pub max_bytes: usize,
    /// Count bound
    pub max_count: usize,
}

impl BufferLimit {
    /// No bound at all.
    pub const UNLIMITED: Self = Self { max_bytes: 0, max_count: 0 };

    /// Build a limit.
    pub fn new(max_bytes: usize, max_count: usize) -> Self {
        Self { max_bytes, max_count }
    }

    /// Whether `bytes` exceeds the byte bound.
    pub fn exceeds_bytes(&self, bytes: usize) -> bool {
        self.max_bytes != 0 && bytes > self.max_bytes
    }

    /// Whether `count` exceeds the count bound.
    pub fn exceeds_count(&self, count: usize) -> bool {
        self.max_count != 0 && count > self.max_count
    }
}

/// Per-session configuration.
///
/// Receive limit: `max_bytes` bounds one record's declared body length,
/// `max_count` bounds how many committed reads a single partial record may
/// span. Send limit: `max_bytes` bounds one framed message and the queued
/// total, `max_count` bounds queued messages. Control records (handshake,
/// keepalive, kickoff) are not counted against the send limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receive-side bound
    pub recv_limit: BufferLimit,
    /// Send-side bound
    pub send_limit: BufferLimit,
    /// Preferred receive block size
    pub read_block_size: usize,
    /// Ciphers this session may negotiate
    pub crypt_types: Vec<CryptType>,
    /// Deadline for a handshake to complete, checked by `tick`
    pub handshake_timeout: Option<Duration>,
    /// Automatic ping period, checked by `tick`
    pub ping_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_limit: BufferLimit::UNLIMITED,
            send_limit: BufferLimit::UNLIMITED,
            read_block_size: 8 * 1024,
            crypt_types: CryptType::ALL.to_vec(),
            handshake_timeout: Some(Duration::from_secs(30)),
            ping_interval: None,
        }
    }
}

impl SessionConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Param`] for a zero or oversized block size, an empty
    /// cipher list, or a zero timeout/interval.
    pub fn validate(&self) -> Result<(), Error> {
        if self.read_block_size == 0 || self.read_block_size > MAX_READ_BLOCK_SIZE {
            return Err(Error::Param);
        }
        if self.crypt_types.is_empty() {
            return Err(Error::Param);
        }
        if self.handshake_timeout == Some(Duration::ZERO) || self.ping_interval == Some(Duration::ZERO)
        {
            return Err(Error::Param);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_unbounded() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.recv_limit.exceeds_bytes(usize::MAX));
        assert!(!config.send_limit.exceeds_count(usize::MAX));
    }

    #[test]
    fn limits_are_inclusive() {
        let limit = BufferLimit::new(100, 2);
        assert!(!limit.exceeds_bytes(100));
        assert!(limit.exceeds_bytes(101));
        assert!(!limit.exceeds_count(2));
        assert!(limit.exceeds_count(3));
    }

    #[test]
    fn rejects_unusable_settings() {
        let mut config = SessionConfig { read_block_size: 0, ..SessionConfig::default() };
        assert_eq!(config.validate(), Err(Error::Param));

        config.read_block_size = MAX_READ_BLOCK_SIZE + 1;
        assert_eq!(config.validate(), Err(Error::Param));

        config.read_block_size = 1024;
        config.crypt_types.clear();
        assert_eq!(config.validate(), Err(Error::Param));

        config.crypt_types.push(CryptType::None);
        config.ping_interval = Some(Duration::ZERO);
        assert_eq!(config.validate(), Err(Error::Param));
    }
}
