//! In-memory client/gateway pairing.
//!
//! A [`Link`] owns a client [`Session`] and a [`SimGateway`] and shuttles
//! bytes between them until both sides are quiet. No sockets, no runtime:
//! every exchange is synchronous and deterministic.

use std::sync::Arc;

use atgw_core::{Error, Session, SessionConfig};
use bytes::Bytes;

use crate::{
    recorder::{Recorder, RecordingHandler, WriteMode},
    sim_env::SimEnv,
    sim_gateway::{GatewayOptions, SimGateway},
};

/// Upper bound on pump rounds before a link is declared livelocked.
const MAX_ROUNDS: usize = 1024;

/// A client session wired to a simulated gateway.
#[derive(Debug)]
pub struct Link {
    /// Client side
    pub session: Session,
    /// Gateway side
    pub gateway: SimGateway,
    /// Client events
    pub recorder: Recorder,
    /// Shared environment
    pub env: SimEnv,
    mode: WriteMode,
}

impl Link {
    /// Link with default configuration and synchronous writes.
    pub fn new(seed: u64) -> Result<Self, Error> {
        Self::builder(seed).build()
    }

    /// Start configuring a link.
    pub fn builder(seed: u64) -> LinkBuilder {
        LinkBuilder {
            seed,
            config: SessionConfig::default(),
            options: GatewayOptions::default(),
            mode: WriteMode::Sync,
            proposed_id: 0,
        }
    }

    /// Exchange bytes until neither side has anything to send.
    pub fn pump(&mut self) -> Result<(), Error> {
        self.pump_chunked(usize::MAX)
    }

    /// Like [`Self::pump`], delivering gateway bytes to the client at most
    /// `chunk` bytes per read.
    pub fn pump_chunked(&mut self, chunk: usize) -> Result<(), Error> {
        for _ in 0..MAX_ROUNDS {
            let upstream = self.drain_client();
            if !upstream.is_empty() {
                self.gateway.receive(&upstream)?;
            }

            let downstream = self.gateway.take_outbound();
            if upstream.is_empty() && downstream.is_empty() {
                return Ok(());
            }
            for piece in downstream.chunks(chunk.max(1)) {
                self.session.read_from(piece)?;
            }
        }
        Err(Error::Busy)
    }

    /// Replace the client with a fresh session on a new connection. The
    /// gateway forgets the old connection but keeps its resumption store.
    pub fn reconnect_transport(&mut self, config: SessionConfig) -> Result<(), Error> {
        self.gateway.drop_connection();
        self.recorder = Recorder::new();
        let handler = RecordingHandler::new(self.recorder.clone(), self.mode);
        self.session = Session::new(config, Arc::new(self.env.clone()), Box::new(handler))?;
        Ok(())
    }

    /// Messages the client received.
    pub fn client_messages(&self) -> Vec<Bytes> {
        self.recorder.messages()
    }

    // Collect written bytes, completing pending writes as the transport
    // would.
    fn drain_client(&mut self) -> Bytes {
        let mut out = self.recorder.take_wire().to_vec();
        if self.mode == WriteMode::Async {
            while self.session.is_writing() {
                if self.session.notify_write_done(Ok(())).is_err() {
                    break;
                }
                out.extend_from_slice(&self.recorder.take_wire());
            }
        }
        Bytes::from(out)
    }
}

/// Builder for [`Link`].
#[derive(Debug)]
pub struct LinkBuilder {
    seed: u64,
    config: SessionConfig,
    options: GatewayOptions,
    mode: WriteMode,
    proposed_id: u64,
}

impl LinkBuilder {
    /// Client session configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Gateway behaviour.
    #[must_use]
    pub fn gateway(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Write completion mode of the client's handler.
    #[must_use]
    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Session id the client proposes.
    #[must_use]
    pub fn proposing(mut self, id: u64) -> Self {
        self.proposed_id = id;
        self
    }

    /// Build the link.
    pub fn build(self) -> Result<Link, Error> {
        let env = SimEnv::with_seed(self.seed);
        let recorder = Recorder::new();
        let handler =
            RecordingHandler::new(recorder.clone(), self.mode).proposing(self.proposed_id);
        let session = Session::new(self.config, Arc::new(env.clone()), Box::new(handler))?;
        let gateway = SimGateway::with_options(SimEnv::with_seed(self.seed ^ 0x5eed), self.options);
        Ok(Link { session, gateway, recorder, env, mode: self.mode })
    }
}
