//! Record header flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-record flags carried in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RecordFlags: u8 {
        /// Body is AEAD-sealed under the key for the header's epoch.
        const ENCRYPTED = 0b0000_0001;
    }
}

impl Default for RecordFlags {
    fn default() -> Self {
        Self::empty()
    }
}
