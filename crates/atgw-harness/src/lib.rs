//! Deterministic simulation harness for atgw sessions.
//!
//! Provides a seeded [`Environment`](atgw_core::Environment), an in-memory
//! gateway that speaks the responder side of the inner protocol, a host
//! handler that records every event, and glue for running all of it either
//! synchronously ([`Link`]) or over turmoil's simulated network ([`net`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod link;
pub mod net;
pub mod recorder;
pub mod sim_env;
pub mod sim_gateway;

pub use link::{Link, LinkBuilder};
pub use recorder::{Recorder, RecordingHandler, SessionEvent, WriteMode};
pub use sim_env::SimEnv;
pub use sim_gateway::{GatewayOptions, SimGateway};
