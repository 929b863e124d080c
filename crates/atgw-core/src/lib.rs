//! Client session engine for the atgw inner protocol.
//!
//! Turns a raw duplex byte stream into a sequence of framed, optionally
//! encrypted application messages, with session resumption and in-session
//! key rotation.
//!
//! # Architecture
//!
//! The engine is a pure state machine. It owns no sockets, threads or
//! timers: the host feeds received bytes in through the alloc/commit cycle,
//! receives outbound bytes through [`SessionHandler::on_write_start`], and
//! drives timeouts by calling [`Session::tick`]. Time and randomness come
//! from an [`Environment`] so the same code runs under real clocks and under
//! a seeded simulation.
//!
//! # Components
//!
//! - [`registry`]: Handle-to-session table shared across host threads
//! - [`buffer`]: Receive blocks and record reassembly
//! - [`handshake`]: Session creation, resumption and key update
//! - [`writer`]: Serialized, single-in-flight write pipeline
//! - [`keepalive`]: Ping/pong latency tracking
//! - [`session`]: The aggregate binding the above to host events
//! - [`crypto`]: Cipher capability (key agreement, record sealing)
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`error`]: Error and close-reason taxonomy
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod crypto;
pub mod env;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod registry;
pub mod session;
pub mod writer;

pub use buffer::ReadBlock;
pub use config::{BufferLimit, SessionConfig};
pub use crypto::{CryptType, available_crypt_types};
pub use env::{Environment, SystemEnv};
pub use error::{CloseReason, Error, ErrorReport};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{Session, SessionFlags, SessionHandler, SessionState};
pub use writer::WriteCompletion;
