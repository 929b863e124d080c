//! In-memory gateway.
//!
//! [`SimGateway`] is the responder side of the inner protocol, written as a
//! sans-IO state machine like the client: bytes go in through
//! [`SimGateway::receive`], bytes come out of [`SimGateway::take_outbound`].
//! It keeps a resumption store across connections so reconnect paths can be
//! exercised by dropping one connection and starting another.

use std::collections::HashMap;

use atgw_core::{
    CloseReason, CryptType, Error,
    crypto::{EphemeralKey, KeySchedule, Role, Secret, kex},
};
use atgw_proto::{
    Payload, Record,
    payloads::{HandshakeDone, HandshakeReconnect, HandshakeStart, KeyUpdate, Keepalive, Kickoff},
};
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::sim_env::SimEnv;

/// Gateway behaviour switches.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Ciphers the gateway accepts
    pub crypt_types: Vec<CryptType>,
    /// Send every received message straight back
    pub echo: bool,
    /// Honour resumption requests
    pub accept_reconnect: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self { crypt_types: CryptType::ALL.to_vec(), echo: true, accept_reconnect: true }
    }
}

#[derive(Debug)]
struct StoredSession {
    crypt: CryptType,
    secret: Secret,
}

#[derive(Debug)]
struct Connection {
    session_id: u64,
    keys: KeySchedule,
    pending_update: Option<u8>,
}

/// Simulated gateway for one client at a time.
#[derive(Debug)]
pub struct SimGateway {
    env: SimEnv,
    options: GatewayOptions,
    inbound: BytesMut,
    outbound: BytesMut,
    conn: Option<Connection>,
    store: HashMap<u64, StoredSession>,
    next_session_id: u64,
    received: Vec<Bytes>,
    kicked: Option<CloseReason>,
}

impl SimGateway {
    /// Gateway with default options and seed.
    pub fn new(env: SimEnv) -> Self {
        Self::with_options(env, GatewayOptions::default())
    }

    /// Gateway with explicit options.
    pub fn with_options(env: SimEnv, options: GatewayOptions) -> Self {
        Self {
            env,
            options,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            conn: None,
            store: HashMap::new(),
            next_session_id: 1000,
            received: Vec::new(),
            kicked: None,
        }
    }

    /// Feed bytes from the client and process every complete record.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inbound.extend_from_slice(bytes);
        while let Some(record) = Record::split_from(&mut self.inbound)? {
            trace!(kind = %record.kind(), len = record.body.len(), "gateway received");
            self.handle(record)?;
        }
        Ok(())
    }

    /// Bytes the gateway wants to send.
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Forget the current connection, as if the transport dropped. The
    /// resumption store survives.
    pub fn drop_connection(&mut self) {
        self.conn = None;
        self.inbound.clear();
        self.outbound.clear();
    }

    /// Forget all resumable sessions.
    pub fn expire_sessions(&mut self) {
        self.store.clear();
    }

    /// Change behaviour between connections.
    pub fn options_mut(&mut self) -> &mut GatewayOptions {
        &mut self.options
    }

    /// Send an application message to the client.
    pub fn post(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send(&Payload::Post(Bytes::copy_from_slice(data)))
    }

    /// Send a ping.
    pub fn ping(&mut self, timestamp_ms: u64) -> Result<(), Error> {
        self.send(&Payload::Ping(Keepalive { timestamp_ms }))
    }

    /// Close the connection with `reason`.
    pub fn kickoff(&mut self, reason: CloseReason) -> Result<(), Error> {
        self.send(&Payload::Kickoff(Kickoff { reason: reason.0 }))?;
        self.conn = None;
        Ok(())
    }

    /// Propose the next key epoch.
    pub fn request_key_update(&mut self) -> Result<(), Error> {
        let conn = self.conn.as_mut().ok_or(Error::Handshake)?;
        let target = conn.keys.epoch().wrapping_add(1);
        conn.pending_update = Some(target);
        self.send(&Payload::KeyUpdate(KeyUpdate { epoch: target }))
    }

    /// Identifier of the connected session.
    pub fn session_id(&self) -> Option<u64> {
        self.conn.as_ref().map(|c| c.session_id)
    }

    /// Current key epoch of the connection.
    pub fn epoch(&self) -> Option<u8> {
        self.conn.as_ref().map(|c| c.keys.epoch())
    }

    /// Secret the gateway holds for `session_id`.
    pub fn secret_for(&self, session_id: u64) -> Option<&[u8]> {
        self.store.get(&session_id).map(|s| &s.secret[..])
    }

    /// Application messages received so far.
    pub fn received(&self) -> &[Bytes] {
        &self.received
    }

    /// Reason from the client's last kickoff.
    pub fn kicked(&self) -> Option<CloseReason> {
        self.kicked
    }

    fn handle(&mut self, record: Record) -> Result<(), Error> {
        let kind = record.kind();
        let payload = if kind.is_handshake() {
            Payload::decode_body(kind, record.body)?
        } else {
            let conn = self.conn.as_mut().ok_or(Error::BadProtocol)?;
            let body = conn.keys.open(record)?;
            Payload::decode_body(kind, body)?
        };

        match payload {
            Payload::HandshakeStart(start) => self.on_start(start),
            Payload::HandshakeReconnect(reconnect) => self.on_reconnect(&reconnect),
            Payload::Post(data) => {
                if self.options.echo {
                    self.send(&Payload::Post(data.clone()))?;
                }
                self.received.push(data);
                Ok(())
            },
            Payload::Ping(ping) => self.send(&Payload::Pong(ping)),
            Payload::KeyUpdate(update) => {
                // A proposal crossing our own counts as the switch; our
                // pending update is then settled by this one
                let epoch = self.conn.as_ref().ok_or(Error::BadProtocol)?.keys.epoch();
                if update.epoch != epoch.wrapping_add(1) {
                    return Err(Error::BadProtocol);
                }
                let ack = self.seal(&Payload::KeyUpdateAck(update))?;
                let conn = self.conn.as_mut().ok_or(Error::BadProtocol)?;
                conn.keys.advance()?;
                conn.pending_update = None;
                ack.encode(&mut self.outbound);
                Ok(())
            },
            Payload::KeyUpdateAck(ack) => {
                let conn = self.conn.as_mut().ok_or(Error::BadProtocol)?;
                match conn.pending_update {
                    Some(target) if target == ack.epoch => {
                        conn.keys.advance()?;
                        conn.pending_update = None;
                        Ok(())
                    },
                    None if ack.epoch == conn.keys.epoch() => Ok(()),
                    _ => Err(Error::BadProtocol),
                }
            },
            Payload::Kickoff(kickoff) => {
                debug!(reason = kickoff.reason, "client kicked off");
                self.kicked = Some(CloseReason(kickoff.reason));
                self.conn = None;
                Ok(())
            },
            Payload::Pong(_) => Ok(()),
            Payload::HandshakeDone(_) => Err(Error::BadProtocol),
        }
    }

    fn on_start(&mut self, start: HandshakeStart) -> Result<(), Error> {
        let Some(crypt) = self.negotiable(&start.crypt_type) else {
            return self.refuse(Error::CryptNotSupported, 0, &start.crypt_type);
        };

        let session_id = if start.session_id != 0 && !self.store.contains_key(&start.session_id) {
            start.session_id
        } else {
            self.next_session_id += 1;
            self.next_session_id
        };

        let (secret, public_key) = if crypt.is_encrypted() {
            let key = EphemeralKey::generate(&self.env);
            let shared = key.agree(&start.public_key)?;
            (kex::derive_session_secret(&shared[..], session_id)?, key.public_bytes().to_vec())
        } else {
            (Secret::new(Vec::new()), Vec::new())
        };

        let keys = KeySchedule::new(crypt, Role::Gateway, &secret, &[])?;
        self.conn = Some(Connection { session_id, keys, pending_update: None });
        self.store.insert(session_id, StoredSession { crypt, secret });
        debug!(session_id, crypt = %crypt, "gateway accepted session");

        self.send_plain(&Payload::HandshakeDone(HandshakeDone {
            status: 0,
            session_id,
            crypt_type: crypt.name().to_owned(),
            public_key,
            keybits: crypt.keybits(),
        }))
    }

    fn on_reconnect(&mut self, reconnect: &HandshakeReconnect) -> Result<(), Error> {
        let id = reconnect.session_id;
        if !self.options.accept_reconnect {
            return self.refuse(Error::RefuseReconnect, id, &reconnect.crypt_type);
        }
        let Some(stored) = self.store.get(&id) else {
            return self.refuse(Error::SessionExpired, id, &reconnect.crypt_type);
        };
        if stored.crypt.name() != reconnect.crypt_type {
            return self.refuse(Error::CryptNotSupported, id, &reconnect.crypt_type);
        }
        if kex::verify_reconnect_proof(&stored.secret, id, &reconnect.nonce, &reconnect.proof).is_err()
        {
            return self.refuse(Error::CryptVerify, id, &reconnect.crypt_type);
        }

        let crypt = stored.crypt;
        let keys = KeySchedule::new(crypt, Role::Gateway, &stored.secret, &reconnect.nonce)?;
        self.conn = Some(Connection { session_id: id, keys, pending_update: None });
        debug!(session_id = id, "gateway resumed session");

        self.send_plain(&Payload::HandshakeDone(HandshakeDone {
            status: 0,
            session_id: id,
            crypt_type: crypt.name().to_owned(),
            public_key: Vec::new(),
            keybits: crypt.keybits(),
        }))
    }

    fn negotiable(&self, name: &str) -> Option<CryptType> {
        CryptType::from_name(name).filter(|c| self.options.crypt_types.contains(c))
    }

    fn refuse(&mut self, err: Error, session_id: u64, crypt_type: &str) -> Result<(), Error> {
        debug!(session_id, %err, "gateway refused handshake");
        self.send_plain(&Payload::HandshakeDone(HandshakeDone::refused(
            err.code(),
            session_id,
            crypt_type,
        )))
    }

    fn send_plain(&mut self, payload: &Payload) -> Result<(), Error> {
        payload.to_plain_record()?.encode(&mut self.outbound);
        Ok(())
    }

    fn send(&mut self, payload: &Payload) -> Result<(), Error> {
        let record = self.seal(payload)?;
        record.encode(&mut self.outbound);
        Ok(())
    }

    fn seal(&mut self, payload: &Payload) -> Result<Record, Error> {
        let conn = self.conn.as_mut().ok_or(Error::Handshake)?;
        let body = payload.encode_body()?;
        conn.keys.seal(payload.kind(), &body)
    }
}
