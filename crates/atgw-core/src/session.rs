//! Session aggregate.
//!
//! A [`Session`] binds the receive buffer, handshake, write pipeline and
//! keepalive tracker of one logical connection to a host-supplied
//! [`SessionHandler`]. Every host operation runs to completion before it
//! returns: received records are dispatched, queued writes are started and
//! a drained close fires its event, all synchronously.
//!
//! # Reentrancy
//!
//! Handler methods receive `&mut Session` so they can read accessors or
//! react to events. While a handler runs the session carries
//! [`SessionFlags::IN_CALLBACK`]; every mutating operation then fails with
//! [`Error::Busy`] except [`Session::close`], which marks the session
//! closing immediately and finishes once the outer operation returns.
//!
//! # Close
//!
//! Closing is two-phase. `CLOSING` is set at once and no further records
//! are processed; queued writes (plus a `Kickoff` telling the gateway why,
//! if the session was established) drain first, then `CLOSED` is set and
//! [`SessionHandler::on_close`] fires exactly once.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use atgw_proto::{
    MAX_BODY_SIZE, Payload, Record, RecordHeader,
    payloads::{HandshakeDone, KeyUpdate, Keepalive, Kickoff},
};
use bitflags::bitflags;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    buffer::{ReadBlock, ReceiveBuffer},
    config::{BufferLimit, SessionConfig},
    crypto::CryptType,
    env::Environment,
    error::{CloseReason, Error, ErrorReport},
    handshake::{Handshake, HandshakePhase},
    keepalive::KeepaliveTracker,
    writer::{WriteCompletion, WritePipeline},
};

macro_rules! error_report {
    ($error:expr, $($arg:tt)+) => {
        ErrorReport { location: file!(), line: line!(), error: $error, message: format!($($arg)+) }
    };
}

bitflags! {
    /// Independent lifecycle flags. Several may be set at once, e.g.
    /// `WRITING | HANDSHAKE_UPDATING`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionFlags: u8 {
        /// Close requested; no further records are processed
        const CLOSING = 1 << 0;
        /// Close finished and reported
        const CLOSED = 1 << 1;
        /// Handshake completed successfully
        const HANDSHAKE_DONE = 1 << 2;
        /// Locally requested key update awaiting ack
        const HANDSHAKE_UPDATING = 1 << 3;
        /// A write is with the transport
        const WRITING = 1 << 4;
        /// A handler method is running
        const IN_CALLBACK = 1 << 5;
    }
}

/// Coarse view of the lifecycle, derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started
    Idle,
    /// Handshake request sent
    Handshaking,
    /// Keys in force
    Established,
    /// Established, key update in progress
    Updating,
    /// Draining before close
    Closing,
    /// Closed
    Closed,
}

/// Host side of a session.
///
/// Every method may fail; an `Err` is the authoritative result of that
/// event. Only [`Self::on_write_start`] is required.
pub trait SessionHandler: Send {
    /// Hand `data` to the transport.
    ///
    /// Return [`WriteCompletion::Done`] if it was written inline, or
    /// [`WriteCompletion::Pending`] and later call
    /// [`Session::notify_write_done`] exactly once. An `Err` fails the
    /// write and closes the session with [`CloseReason::RESET`].
    fn on_write_start(&mut self, session: &mut Session, data: Bytes)
    -> Result<WriteCompletion, Error>;

    /// An application message arrived. An `Err` is returned from the
    /// operation that delivered the message; the records after it are still
    /// decoded and delivered.
    fn on_message(&mut self, _session: &mut Session, _data: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    /// Allocate the session identifier proposed in a fresh handshake.
    fn on_init_new_session(&mut self, _session: &mut Session) -> Result<u64, Error> {
        Err(Error::MissCallbacks)
    }

    /// Accept or refuse resuming `session_id`.
    fn on_init_reconnect(&mut self, _session: &mut Session, _session_id: u64) -> Result<(), Error> {
        Err(Error::MissCallbacks)
    }

    /// The session closed. Fires exactly once.
    fn on_close(&mut self, _session: &mut Session, _reason: CloseReason) -> Result<(), Error> {
        Ok(())
    }

    /// The handshake finished (`Ok`) or failed.
    fn on_handshake_done(
        &mut self,
        _session: &mut Session,
        _status: Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// A key update switched keys.
    fn on_handshake_update(
        &mut self,
        _session: &mut Session,
        _status: Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// A failure worth surfacing that is not a direct operation result.
    fn on_error(&mut self, _session: &mut Session, _report: &ErrorReport) -> Result<(), Error> {
        Ok(())
    }
}

/// One logical, resumable, optionally encrypted message stream.
pub struct Session {
    env: Arc<dyn Environment>,
    config: SessionConfig,
    handler: Option<Box<dyn SessionHandler>>,
    flags: SessionFlags,
    handshake: Handshake,
    recv: ReceiveBuffer,
    writer: WritePipeline,
    keepalive: KeepaliveTracker,
    close_reason: Option<CloseReason>,
    created_at: Instant,
    messages_sent: u64,
    messages_received: u64,
}

impl Session {
    /// Create an idle session.
    ///
    /// # Errors
    ///
    /// [`Error::Param`] if `config` does not validate.
    pub fn new(
        config: SessionConfig,
        env: Arc<dyn Environment>,
        handler: Box<dyn SessionHandler>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let now = env.now();
        Ok(Self {
            recv: ReceiveBuffer::new(config.read_block_size, config.recv_limit),
            writer: WritePipeline::new(config.send_limit),
            keepalive: KeepaliveTracker::new(now, config.ping_interval),
            env,
            config,
            handler: Some(handler),
            flags: SessionFlags::empty(),
            handshake: Handshake::new(),
            close_reason: None,
            created_at: now,
            messages_sent: 0,
            messages_received: 0,
        })
    }

    /// Start a fresh handshake proposing `crypt_type`.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if a handshake was already started
    /// - [`Error::BadProtocol`] if `crypt_type` is not negotiable
    /// - [`Error::MissCallbacks`] or the host's error from
    ///   [`SessionHandler::on_init_new_session`]
    pub fn start_session(&mut self, crypt_type: &str) -> Result<(), Error> {
        self.enter()?;
        self.ensure_open()?;
        if self.handshake.phase() != HandshakePhase::Idle {
            return Err(Error::Busy);
        }
        let crypt = self.negotiable(crypt_type)?;

        let proposed = self.dispatch(|h, s| h.on_init_new_session(s))?;
        self.ensure_open_after_callback()?;

        let record = self.handshake.begin_fresh(&*self.env, crypt, proposed)?;
        debug!(proposed, crypt = %crypt, "starting session");
        self.writer.push_control(record.to_bytes());
        self.settle();
        Ok(())
    }

    /// Resume `session_id` on a new transport.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if a handshake was already started
    /// - [`Error::Param`] for a zero identifier or a missing secret
    /// - [`Error::BadProtocol`] if `crypt_type` is not negotiable
    /// - [`Error::RefuseReconnect`] or [`Error::SessionExpired`] if the host
    ///   refused in [`SessionHandler::on_init_reconnect`]
    pub fn reconnect_session(
        &mut self,
        session_id: u64,
        crypt_type: &str,
        secret: &[u8],
        keybits: u32,
    ) -> Result<(), Error> {
        self.enter()?;
        self.ensure_open()?;
        if self.handshake.phase() != HandshakePhase::Idle {
            return Err(Error::Busy);
        }
        if session_id == 0 {
            return Err(Error::Param);
        }
        let crypt = self.negotiable(crypt_type)?;
        if crypt.is_encrypted() && secret.is_empty() {
            return Err(Error::Param);
        }

        if let Err(err) = self.dispatch(|h, s| h.on_init_reconnect(s, session_id)) {
            debug!(session_id, %err, "reconnect refused by host");
            return Err(match err {
                Error::SessionExpired | Error::MissCallbacks => err,
                _ => Error::RefuseReconnect,
            });
        }
        self.ensure_open_after_callback()?;

        let record =
            self.handshake.begin_reconnect(&*self.env, session_id, crypt, secret, keybits)?;
        debug!(session_id, crypt = %crypt, "resuming session");
        self.writer.push_control(record.to_bytes());
        self.settle();
        Ok(())
    }

    /// Propose rotating to the next key epoch.
    ///
    /// # Errors
    ///
    /// [`Error::Handshake`] before establishment, [`Error::Busy`] while a
    /// previous update is unacknowledged.
    pub fn request_key_update(&mut self) -> Result<(), Error> {
        self.enter()?;
        self.ensure_open()?;
        let record = self.handshake.request_update()?;
        self.flags.insert(SessionFlags::HANDSHAKE_UPDATING);
        debug!(session_id = self.session_id(), "key update requested");
        self.writer.push_control(record.to_bytes());
        self.settle();
        Ok(())
    }

    /// Issue a block for the host to fill with received bytes.
    ///
    /// The block may be smaller than `suggested`; `0` picks the configured
    /// block size.
    ///
    /// # Errors
    ///
    /// [`Error::Closing`] once the session is closing.
    pub fn alloc_for_read(&mut self, suggested: usize) -> Result<ReadBlock, Error> {
        self.enter()?;
        self.ensure_open()?;
        Ok(self.recv.alloc(suggested))
    }

    /// Hand back `block` with `filled` bytes and process every record now
    /// complete.
    ///
    /// # Errors
    ///
    /// - [`Error::Param`] / [`Error::InvalidSize`] for a mismatched block
    ///   or length
    /// - framing, size and crypto errors, after which the session closes
    /// - the first error from [`SessionHandler::on_message`]; decoding
    ///   continues past the rejected message
    pub fn commit(&mut self, block: ReadBlock, filled: usize) -> Result<(), Error> {
        self.enter()?;
        if self.is_closing() {
            return Err(Error::Closing);
        }
        self.recv.commit(block, filled)?;

        let result = self.drain_records();
        self.settle();
        result
    }

    /// Absorb `data` through repeated alloc/commit cycles.
    ///
    /// All of `data` is absorbed unless the session closes part way. The
    /// first error is returned, including a message the host rejected.
    pub fn read_from(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut rejected = None;
        let mut rest = data;
        while !rest.is_empty() {
            let mut block = match self.alloc_for_read(rest.len()) {
                Ok(block) => block,
                Err(err) => return Err(rejected.unwrap_or(err)),
            };
            if block.capacity() == 0 {
                return Err(Error::Malloc);
            }
            let n = block.fill_from(rest);
            if let Err(err) = self.commit(block, n) {
                if self.is_closing() {
                    return Err(rejected.unwrap_or(err));
                }
                rejected.get_or_insert(err);
            }
            rest = &rest[n..];
        }
        rejected.map_or(Ok(()), Err)
    }

    /// Report completion of a [`WriteCompletion::Pending`] write.
    ///
    /// A failed write closes the session with [`CloseReason::RESET`].
    ///
    /// # Errors
    ///
    /// [`Error::NotWriting`] if no write is outstanding.
    pub fn notify_write_done(&mut self, status: Result<(), Error>) -> Result<(), Error> {
        self.enter()?;
        if !self.writer.is_writing() {
            return Err(Error::NotWriting);
        }

        match status {
            Ok(()) => {
                self.writer.complete()?;
                self.flags.remove(SessionFlags::WRITING);
            },
            Err(err) => self.write_failed(err),
        }
        self.settle();
        Ok(())
    }

    /// Queue an application message.
    ///
    /// Empty messages are accepted and dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::Closing`] once the session is closing
    /// - [`Error::Handshake`] before the handshake completes
    /// - [`Error::MsgTooLarge`] / [`Error::Busy`] when the send limit is hit
    pub fn post_message(&mut self, data: &[u8]) -> Result<(), Error> {
        self.enter()?;
        self.ensure_open()?;
        if !self.flags.contains(SessionFlags::HANDSHAKE_DONE) {
            return Err(Error::Handshake);
        }
        if data.is_empty() {
            return Ok(());
        }

        let framed = self.handshake.sealed_len(data.len())?;
        if framed - RecordHeader::SIZE > MAX_BODY_SIZE {
            return Err(Error::MsgTooLarge);
        }
        self.writer.check_capacity(framed)?;

        let record = self.handshake.seal(&Payload::Post(Bytes::copy_from_slice(data)))?;
        trace!(len = data.len(), epoch = record.header.epoch(), "message queued");
        self.writer.push_message(record.to_bytes());
        self.messages_sent += 1;
        self.settle();
        Ok(())
    }

    /// Send a keepalive ping.
    ///
    /// # Errors
    ///
    /// [`Error::Closing`] once closing, [`Error::Handshake`] before the
    /// handshake completes.
    pub fn send_ping(&mut self) -> Result<(), Error> {
        self.enter()?;
        self.ensure_open()?;
        if !self.flags.contains(SessionFlags::HANDSHAKE_DONE) {
            return Err(Error::Handshake);
        }
        self.queue_ping()?;
        self.settle();
        Ok(())
    }

    /// Drive time-based behaviour: the handshake deadline and automatic
    /// pings. Call periodically.
    pub fn tick(&mut self) -> Result<(), Error> {
        self.enter()?;
        if self.is_closing() {
            return Ok(());
        }
        let now = self.env.now();

        let deadline = self.handshake.started_at().zip(self.config.handshake_timeout);
        if let Some((started, timeout)) = deadline {
            if now.saturating_duration_since(started) >= timeout {
                warn!(session_id = self.session_id(), ?timeout, "handshake timed out");
                self.handshake.abandon();
                self.notify_handshake_done(Err(Error::Handshake));
                self.begin_close(CloseReason::HANDSHAKE);
            }
        } else if self.is_handshake_done() && self.keepalive.due(now) {
            self.queue_ping()?;
        }

        self.settle();
        Ok(())
    }

    /// Close with `reason`. Idempotent; only the first reason is kept.
    ///
    /// Safe to call from inside a handler: the close completes once the
    /// outer operation returns.
    pub fn close(&mut self, reason: CloseReason) -> Result<(), Error> {
        if self.is_closing() {
            return Ok(());
        }
        self.begin_close(reason);
        if self.flags.contains(SessionFlags::HANDSHAKE_DONE) {
            let kickoff = Payload::Kickoff(Kickoff { reason: reason.0 });
            match self.handshake.seal(&kickoff) {
                Ok(record) => self.writer.push_control(record.to_bytes()),
                Err(err) => debug!(%err, "could not seal kickoff"),
            }
        }
        self.settle();
        Ok(())
    }

    /// Release buffers and queued writes without firing events. Used when
    /// the host drops the session.
    pub fn release(&mut self) {
        self.recv.release();
        self.writer.abort();
        self.flags.remove(SessionFlags::WRITING | SessionFlags::HANDSHAKE_UPDATING);
        self.flags.insert(SessionFlags::CLOSING | SessionFlags::CLOSED);
    }

    /// Replace the receive limit. Zero fields mean unlimited.
    pub fn set_receive_buffer_limit(&mut self, max_bytes: usize, max_count: usize) {
        self.config.recv_limit = BufferLimit::new(max_bytes, max_count);
        self.recv.set_limit(self.config.recv_limit);
    }

    /// Replace the send limit. Zero fields mean unlimited.
    pub fn set_send_buffer_limit(&mut self, max_bytes: usize, max_count: usize) {
        self.config.send_limit = BufferLimit::new(max_bytes, max_count);
        self.writer.set_limit(self.config.send_limit);
    }

    /// Session identifier (0 before the first successful handshake).
    pub fn session_id(&self) -> u64 {
        self.handshake.session_id()
    }

    /// Cipher proposed or negotiated.
    pub fn crypt_type(&self) -> Option<CryptType> {
        self.handshake.crypt_type()
    }

    /// Secret for resuming this session elsewhere.
    pub fn secret(&self) -> &[u8] {
        self.handshake.secret()
    }

    /// Key strength in bits.
    pub fn keybits(&self) -> u32 {
        self.handshake.keybits()
    }

    /// Latest ping round trip (zero until one completes).
    pub fn last_ping_delta(&self) -> Duration {
        self.keepalive.last_ping_delta()
    }

    /// Reason the session is closing, if it is.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Lifecycle flags.
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Closing or closed.
    pub fn is_closing(&self) -> bool {
        self.flags.intersects(SessionFlags::CLOSING | SessionFlags::CLOSED)
    }

    /// Closed and reported.
    pub fn is_closed(&self) -> bool {
        self.flags.contains(SessionFlags::CLOSED)
    }

    /// Key update in progress.
    pub fn is_handshake_updating(&self) -> bool {
        self.flags.contains(SessionFlags::HANDSHAKE_UPDATING)
    }

    /// Handshake completed.
    pub fn is_handshake_done(&self) -> bool {
        self.flags.contains(SessionFlags::HANDSHAKE_DONE)
    }

    /// A write is with the transport.
    pub fn is_writing(&self) -> bool {
        self.flags.contains(SessionFlags::WRITING)
    }

    /// A handler method is running.
    pub fn is_in_callback(&self) -> bool {
        self.flags.contains(SessionFlags::IN_CALLBACK)
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.flags.contains(SessionFlags::CLOSED) {
            SessionState::Closed
        } else if self.flags.contains(SessionFlags::CLOSING) {
            SessionState::Closing
        } else if self.flags.contains(SessionFlags::HANDSHAKE_UPDATING) {
            SessionState::Updating
        } else if self.flags.contains(SessionFlags::HANDSHAKE_DONE) {
            SessionState::Established
        } else if self.handshake.phase() == HandshakePhase::Handshaking {
            SessionState::Handshaking
        } else {
            SessionState::Idle
        }
    }

    /// Multi-line diagnostic dump. Not for hot paths.
    pub fn information(&self) -> String {
        let (bytes_written, jobs_written) = self.writer.written();
        let recv_limit = self.recv.limit();
        let send_limit = self.writer.limit();
        format!(
            "session_id: {}\n\
             state: {:?}\n\
             flags: {:?}\n\
             crypt_type: {}\n\
             keybits: {}\n\
             key_epoch: {}\n\
             recv: buffered={} block_outstanding={} limit=({}, {})\n\
             send: queued={} in_flight={} message_bytes={} limit=({}, {})\n\
             written: bytes={bytes_written} jobs={jobs_written}\n\
             messages: sent={} received={}\n\
             ping: last_delta={:?} sent={}\n\
             age: {:?}\n\
             close_reason: {}",
            self.session_id(),
            self.state(),
            self.flags,
            self.crypt_type().map_or("-", CryptType::name),
            self.keybits(),
            self.handshake.epoch(),
            self.recv.buffered(),
            self.recv.has_outstanding(),
            recv_limit.max_bytes,
            recv_limit.max_count,
            self.writer.queued(),
            self.writer.is_writing(),
            self.writer.message_bytes(),
            send_limit.max_bytes,
            send_limit.max_count,
            self.messages_sent,
            self.messages_received,
            self.keepalive.last_ping_delta(),
            self.keepalive.pings_sent(),
            self.env.now().saturating_duration_since(self.created_at),
            self.close_reason.map_or_else(|| "-".to_owned(), |r| r.to_string()),
        )
    }

    fn enter(&self) -> Result<(), Error> {
        if self.flags.contains(SessionFlags::IN_CALLBACK) {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closing() {
            return Err(Error::Closing);
        }
        Ok(())
    }

    // A handler may close the session from inside an init callback.
    fn ensure_open_after_callback(&mut self) -> Result<(), Error> {
        if self.is_closing() {
            self.settle();
            return Err(Error::Closing);
        }
        Ok(())
    }

    fn negotiable(&self, name: &str) -> Result<CryptType, Error> {
        CryptType::from_name(name)
            .filter(|crypt| self.config.crypt_types.contains(crypt))
            .ok_or(Error::BadProtocol)
    }

    fn dispatch<R>(
        &mut self,
        f: impl FnOnce(&mut dyn SessionHandler, &mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let Some(mut handler) = self.handler.take() else {
            return Err(Error::MissCallbacks);
        };
        self.flags.insert(SessionFlags::IN_CALLBACK);
        let result = f(handler.as_mut(), self);
        self.flags.remove(SessionFlags::IN_CALLBACK);
        self.handler = Some(handler);
        result
    }

    fn drain_records(&mut self) -> Result<(), Error> {
        let mut rejected = None;
        loop {
            if self.is_closing() {
                break;
            }

            let record = match self.recv.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    let reason = if err == Error::InvalidSize {
                        CloseReason::TRAFFIC_EXTENDED
                    } else {
                        CloseReason::INVALID_DATA
                    };
                    self.fail(error_report!(err, "framing failed: {err}"), reason);
                    return Err(err);
                },
            };

            let kind = record.kind();
            trace!(kind = %kind, len = record.body.len(), epoch = record.header.epoch(), "record received");
            match self.process_record(record) {
                Ok(()) => {},
                Err(err) if self.is_closing() => {
                    trace!(kind = %kind, %err, "record processing stopped");
                    return Err(err);
                },
                Err(err) => {
                    debug!(kind = %kind, %err, "record rejected, decoding continues");
                    rejected.get_or_insert(err);
                },
            }
        }
        rejected.map_or(Ok(()), Err)
    }

    fn process_record(&mut self, record: Record) -> Result<(), Error> {
        let kind = record.kind();
        let payload = match self.handshake.open(record) {
            Ok(payload) => payload,
            Err(err) => {
                self.fail(error_report!(err, "cannot open {kind} record: {err}"), CloseReason::INVALID_DATA);
                return Err(err);
            },
        };

        match payload {
            Payload::HandshakeDone(done) => self.on_handshake_done_record(done),
            Payload::KeyUpdate(update) => self.on_key_update_record(update),
            Payload::KeyUpdateAck(ack) => self.on_key_update_ack_record(ack),
            Payload::Post(data) => {
                self.messages_received += 1;
                self.dispatch(|h, s| h.on_message(s, &data))
            },
            Payload::Ping(ping) => self.answer_ping(ping),
            Payload::Pong(pong) => {
                if let Some(rtt) = self.keepalive.on_pong(self.env.now(), pong) {
                    trace!(?rtt, "pong received");
                }
                Ok(())
            },
            Payload::Kickoff(kickoff) => {
                let reason = CloseReason(kickoff.reason);
                debug!(session_id = self.session_id(), %reason, "kicked off by peer");
                self.begin_close(reason);
                Ok(())
            },
            Payload::HandshakeStart(_) | Payload::HandshakeReconnect(_) => {
                let err = Error::BadProtocol;
                self.fail(error_report!(err, "unexpected {kind} from gateway"), CloseReason::INVALID_DATA);
                Err(err)
            },
        }
    }

    fn on_handshake_done_record(&mut self, done: HandshakeDone) -> Result<(), Error> {
        if self.handshake.phase() != HandshakePhase::Handshaking {
            let err = Error::BadProtocol;
            self.fail(error_report!(err, "handshake completion without a request"), CloseReason::INVALID_DATA);
            return Err(err);
        }

        match self.handshake.on_done(done) {
            Ok(()) => {
                self.flags.insert(SessionFlags::HANDSHAKE_DONE);
                self.keepalive.reset(self.env.now());
                debug!(
                    session_id = self.session_id(),
                    crypt = ?self.crypt_type(),
                    keybits = self.keybits(),
                    "handshake done"
                );
                self.notify_handshake_done(Ok(()));
            },
            Err(err) => {
                warn!(session_id = self.session_id(), %err, "handshake failed");
                self.notify_handshake_done(Err(err));
                self.begin_close(CloseReason::HANDSHAKE);
            },
        }
        Ok(())
    }

    fn on_key_update_record(&mut self, update: KeyUpdate) -> Result<(), Error> {
        match self.handshake.on_key_update(update) {
            Ok(ack) => {
                self.writer.push_control(ack.to_bytes());
                self.flags.remove(SessionFlags::HANDSHAKE_UPDATING);
                debug!(session_id = self.session_id(), epoch = update.epoch, "key updated by peer");
                self.notify_handshake_update(Ok(()));
                Ok(())
            },
            Err(err) => {
                self.fail(error_report!(err, "rejected key update to epoch {}", update.epoch), CloseReason::INVALID_DATA);
                Err(err)
            },
        }
    }

    fn on_key_update_ack_record(&mut self, ack: KeyUpdate) -> Result<(), Error> {
        match self.handshake.on_key_update_ack(ack) {
            Ok(switched) => {
                self.flags.remove(SessionFlags::HANDSHAKE_UPDATING);
                if switched {
                    debug!(session_id = self.session_id(), epoch = ack.epoch, "key updated");
                    self.notify_handshake_update(Ok(()));
                }
                Ok(())
            },
            Err(err) => {
                self.fail(error_report!(err, "unexpected key update ack for epoch {}", ack.epoch), CloseReason::INVALID_DATA);
                Err(err)
            },
        }
    }

    fn answer_ping(&mut self, ping: Keepalive) -> Result<(), Error> {
        let record = self.handshake.seal(&Payload::Pong(ping))?;
        self.writer.push_control(record.to_bytes());
        Ok(())
    }

    fn queue_ping(&mut self) -> Result<(), Error> {
        let ping = self.keepalive.ping(self.env.now());
        let record = self.handshake.seal(&Payload::Ping(ping))?;
        trace!(timestamp_ms = ping.timestamp_ms, "ping queued");
        self.writer.push_control(record.to_bytes());
        Ok(())
    }

    fn notify_handshake_done(&mut self, status: Result<(), Error>) {
        if let Err(err) = self.dispatch(|h, s| h.on_handshake_done(s, status)) {
            debug!(%err, "handshake-done handler failed");
        }
    }

    fn notify_handshake_update(&mut self, status: Result<(), Error>) {
        if let Err(err) = self.dispatch(|h, s| h.on_handshake_update(s, status)) {
            debug!(%err, "handshake-update handler failed");
        }
    }

    fn report(&mut self, report: &ErrorReport) {
        warn!(
            error = %report.error,
            code = report.error.code(),
            location = report.location,
            line = report.line,
            "{}",
            report.message
        );
        if let Err(err) = self.dispatch(|h, s| h.on_error(s, report)) {
            debug!(%err, "error handler failed");
        }
    }

    fn fail(&mut self, report: ErrorReport, reason: CloseReason) {
        self.report(&report);
        self.begin_close(reason);
    }

    fn write_failed(&mut self, err: Error) {
        let dropped = self.writer.abort();
        self.flags.remove(SessionFlags::WRITING);
        self.fail(error_report!(err, "write failed, dropped {dropped} queued writes"), CloseReason::RESET);
    }

    fn begin_close(&mut self, reason: CloseReason) {
        if self.is_closing() {
            return;
        }
        debug!(session_id = self.session_id(), %reason, "closing");
        self.flags.insert(SessionFlags::CLOSING);
        self.close_reason = Some(reason);
    }

    // Start queued writes and finish a drained close. Deferred while a
    // handler runs; the outer operation settles on its way out.
    fn settle(&mut self) {
        if self.flags.contains(SessionFlags::IN_CALLBACK) {
            return;
        }
        self.pump_writes();
        self.finish_close_if_drained();
    }

    fn pump_writes(&mut self) {
        while let Some(data) = self.writer.start_next() {
            self.flags.insert(SessionFlags::WRITING);
            trace!(len = data.len(), "write start");
            match self.dispatch(|h, s| h.on_write_start(s, data)) {
                Ok(WriteCompletion::Done) => {
                    if self.writer.complete().is_ok() {
                        self.flags.remove(SessionFlags::WRITING);
                    }
                },
                Ok(WriteCompletion::Pending) => break,
                Err(err) => {
                    self.write_failed(err);
                    break;
                },
            }
        }
    }

    fn finish_close_if_drained(&mut self) {
        if !self.flags.contains(SessionFlags::CLOSING)
            || self.flags.contains(SessionFlags::CLOSED)
            || !self.writer.is_idle()
        {
            return;
        }

        self.flags.insert(SessionFlags::CLOSED);
        self.flags.remove(SessionFlags::WRITING | SessionFlags::HANDSHAKE_UPDATING);
        self.recv.release();
        self.handshake.abandon();

        let reason = self.close_reason.unwrap_or_default();
        debug!(session_id = self.session_id(), %reason, "closed");
        if let Err(err) = self.dispatch(|h, s| h.on_close(s, reason)) {
            debug!(%err, "close handler failed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("flags", &self.flags)
            .field("handshake", &self.handshake)
            .field("recv_buffered", &self.recv.buffered())
            .field("writes_queued", &self.writer.queued())
            .field("close_reason", &self.close_reason)
            .finish_non_exhaustive()
    }
}
