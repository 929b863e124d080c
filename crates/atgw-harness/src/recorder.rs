//! Event-recording host handler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atgw_core::{
    CloseReason, Error, ErrorReport, Session, SessionHandler, WriteCompletion,
};
use bytes::{Bytes, BytesMut};

/// Everything a session told its host, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `on_write_start` with this many bytes
    WriteStart(usize),
    /// Application message
    Message(Bytes),
    /// Handshake outcome
    HandshakeDone(Result<(), Error>),
    /// Key update outcome
    HandshakeUpdate(Result<(), Error>),
    /// Session closed
    Close(CloseReason),
    /// Error report
    Error(Error),
}

#[derive(Debug, Default)]
struct Shared {
    events: Vec<SessionEvent>,
    wire: BytesMut,
}

/// Test-side view of a [`RecordingHandler`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    shared: Arc<Mutex<Shared>>,
}

impl Recorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.lock().events.clone()
    }

    /// Drain recorded events.
    pub fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.lock().events)
    }

    /// Drain bytes the session wrote.
    pub fn take_wire(&self) -> Bytes {
        self.lock().wire.split().freeze()
    }

    /// Received application messages, in order.
    pub fn messages(&self) -> Vec<Bytes> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Message(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reasons passed to `on_close`.
    pub fn closes(&self) -> Vec<CloseReason> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Close(reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SessionEvent) {
        self.lock().events.push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How the recording handler completes writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Complete inline
    #[default]
    Sync,
    /// Leave pending; the driver calls `notify_write_done`
    Async,
}

/// [`SessionHandler`] that records events and captures written bytes.
#[derive(Debug)]
pub struct RecordingHandler {
    recorder: Recorder,
    mode: WriteMode,
    proposed_id: u64,
    reconnect: Result<(), Error>,
}

impl RecordingHandler {
    /// Handler writing into `recorder`.
    pub fn new(recorder: Recorder, mode: WriteMode) -> Self {
        Self { recorder, mode, proposed_id: 0, reconnect: Ok(()) }
    }

    /// Propose `id` when starting a fresh session.
    #[must_use]
    pub fn proposing(mut self, id: u64) -> Self {
        self.proposed_id = id;
        self
    }

    /// Answer resumption requests with `result`.
    #[must_use]
    pub fn reconnect_result(mut self, result: Result<(), Error>) -> Self {
        self.reconnect = result;
        self
    }
}

impl SessionHandler for RecordingHandler {
    fn on_write_start(
        &mut self,
        _session: &mut Session,
        data: Bytes,
    ) -> Result<WriteCompletion, Error> {
        self.recorder.push(SessionEvent::WriteStart(data.len()));
        self.recorder.lock().wire.extend_from_slice(&data);
        Ok(match self.mode {
            WriteMode::Sync => WriteCompletion::Done,
            WriteMode::Async => WriteCompletion::Pending,
        })
    }

    fn on_message(&mut self, _session: &mut Session, data: &[u8]) -> Result<(), Error> {
        self.recorder.push(SessionEvent::Message(Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn on_init_new_session(&mut self, _session: &mut Session) -> Result<u64, Error> {
        Ok(self.proposed_id)
    }

    fn on_init_reconnect(&mut self, _session: &mut Session, _session_id: u64) -> Result<(), Error> {
        self.reconnect
    }

    fn on_close(&mut self, _session: &mut Session, reason: CloseReason) -> Result<(), Error> {
        self.recorder.push(SessionEvent::Close(reason));
        Ok(())
    }

    fn on_handshake_done(
        &mut self,
        _session: &mut Session,
        status: Result<(), Error>,
    ) -> Result<(), Error> {
        self.recorder.push(SessionEvent::HandshakeDone(status));
        Ok(())
    }

    fn on_handshake_update(
        &mut self,
        _session: &mut Session,
        status: Result<(), Error>,
    ) -> Result<(), Error> {
        self.recorder.push(SessionEvent::HandshakeUpdate(status));
        Ok(())
    }

    fn on_error(&mut self, _session: &mut Session, report: &ErrorReport) -> Result<(), Error> {
        self.recorder.push(SessionEvent::Error(report.error));
        Ok(())
    }
}
