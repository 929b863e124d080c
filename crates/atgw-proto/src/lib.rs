//! Wire format for the atgw inner session protocol.
//!
//! A record is a fixed 12-byte binary header followed by a variable-length
//! body. The header carries just enough to frame and authenticate a record:
//! its kind, the key epoch it was sealed under, and the body length. Control
//! bodies (handshake, keepalive, kickoff) are CBOR maps; application bodies
//! are opaque bytes.
//!
//! ```text
//! 0      2     3      4       5       6          8            12
//! | magic | ver | kind | flags | epoch | reserved | body_len |  body ...
//! ```
//!
//! The header doubles as the AEAD associated data once a session is
//! established, so any bit flipped in it fails authentication.
//!
//! # Security
//!
//! Header parsing uses compile-time verified layouts via `zerocopy`. Body
//! lengths are capped at [`MAX_BODY_SIZE`] (16 MiB) before anything is
//! buffered, so a forged length prefix cannot force a large allocation.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod flags;
pub mod header;
pub mod kind;
pub mod payloads;
pub mod record;

pub use errors::{ProtocolError, Result};
pub use flags::RecordFlags;
pub use header::{MAX_BODY_SIZE, RecordHeader};
pub use kind::RecordKind;
pub use payloads::Payload;
pub use record::Record;
