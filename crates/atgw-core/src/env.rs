//! Environment abstraction.
//!
//! The engine never reads the wall clock or an OS random source directly.
//! Production hosts use [`SystemEnv`]; simulations supply a virtual clock and
//! a seeded generator so every run is reproducible.

use std::time::Instant;

use rand::RngCore;

/// Source of time and randomness.
pub trait Environment: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Fill `buf` with cryptographically secure random bytes.
    fn random_bytes(&self, buf: &mut [u8]);
}

/// Real clock and OS-seeded randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }
}
