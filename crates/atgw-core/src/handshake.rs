//! Handshake state machine.
//!
//! Owns everything negotiated for a session: identifier, cipher, secret, key
//! strength and the per-connection [`KeySchedule`]. The [`Session`] drives
//! it and turns its results into host events.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ begin_fresh / begin_reconnect ┌─────────────┐ HandshakeDone(0) ┌─────────────┐
//! │ Idle │──────────────────────────────>│ Handshaking │─────────────────>│ Established │
//! └──────┘                               └─────────────┘                  └─────────────┘
//!    ^                                          │                           │        ^
//!    │           HandshakeDone(<0) / error      │                KeyUpdate  │        │ ack
//!    └──────────────────────────────────────────┘                           v        │
//!                                                                      ┌──────────┐  │
//!                                                                      │ Updating │──┘
//!                                                                      └──────────┘
//! ```
//!
//! # Key Update
//!
//! Either side may propose `KeyUpdate { epoch: current + 1 }`. The receiver
//! replies `KeyUpdateAck` under the old key and switches both directions;
//! the proposer switches when the ack arrives. If both sides propose at
//! once, each treats the other's proposal as the switch and the later acks
//! are absorbed.
//!
//! [`Session`]: crate::session::Session

use std::{fmt, time::Instant};

use atgw_proto::{
    Payload, Record, RecordFlags, RecordKind,
    payloads::{HandshakeDone, HandshakeReconnect, HandshakeStart, KeyUpdate},
};
use zeroize::Zeroizing;

use crate::{
    crypto::{
        CryptType, KeySchedule, Role, Secret,
        kex::{self, EphemeralKey, RECONNECT_NONCE_LEN},
    },
    env::Environment,
    error::Error,
};

/// Coarse handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Nothing started
    Idle,
    /// Request sent, awaiting `HandshakeDone`
    Handshaking,
    /// Keys in force
    Established,
}

#[derive(Debug)]
enum Attempt {
    Fresh { key: Option<EphemeralKey> },
    Reconnect { nonce: [u8; RECONNECT_NONCE_LEN] },
}

/// Negotiated session state.
pub struct Handshake {
    phase: HandshakePhase,
    attempt: Option<Attempt>,
    session_id: u64,
    crypt_type: Option<CryptType>,
    secret: Secret,
    keybits: u32,
    keys: Option<KeySchedule>,
    pending_update: Option<u8>,
    started_at: Option<Instant>,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("phase", &self.phase)
            .field("session_id", &self.session_id)
            .field("crypt_type", &self.crypt_type)
            .field("keybits", &self.keybits)
            .field("keys", &self.keys)
            .field("pending_update", &self.pending_update)
            .finish_non_exhaustive()
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Idle handshake with no identity.
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::Idle,
            attempt: None,
            session_id: 0,
            crypt_type: None,
            secret: Zeroizing::new(Vec::new()),
            keybits: 0,
            keys: None,
            pending_update: None,
            started_at: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Session identifier (0 before the first successful handshake).
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Cipher proposed or in force.
    pub fn crypt_type(&self) -> Option<CryptType> {
        self.crypt_type
    }

    /// Session secret (empty until established, and for `"none"`).
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Key strength in bits.
    pub fn keybits(&self) -> u32 {
        self.keybits
    }

    /// Active key epoch.
    pub fn epoch(&self) -> u8 {
        self.keys.as_ref().map_or(0, KeySchedule::epoch)
    }

    /// Whether a locally requested key update awaits its ack.
    pub fn is_updating(&self) -> bool {
        self.pending_update.is_some()
    }

    /// When the current attempt was sent.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Build a fresh-session request.
    ///
    /// `session_id` is the host's proposal; the gateway's answer is
    /// authoritative.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] unless idle.
    pub fn begin_fresh(
        &mut self,
        env: &dyn Environment,
        crypt: CryptType,
        session_id: u64,
    ) -> Result<Record, Error> {
        if self.phase != HandshakePhase::Idle {
            return Err(Error::Busy);
        }

        let key = crypt.is_encrypted().then(|| EphemeralKey::generate(env));
        let public_key = key.as_ref().map(|k| k.public_bytes().to_vec()).unwrap_or_default();
        let record = Payload::HandshakeStart(HandshakeStart {
            session_id,
            crypt_type: crypt.name().to_owned(),
            public_key,
        })
        .to_plain_record()?;

        self.phase = HandshakePhase::Handshaking;
        self.attempt = Some(Attempt::Fresh { key });
        self.crypt_type = Some(crypt);
        self.started_at = Some(env.now());
        Ok(record)
    }

    /// Build a resumption request proving possession of `secret`.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] unless idle.
    pub fn begin_reconnect(
        &mut self,
        env: &dyn Environment,
        session_id: u64,
        crypt: CryptType,
        secret: &[u8],
        keybits: u32,
    ) -> Result<Record, Error> {
        if self.phase != HandshakePhase::Idle {
            return Err(Error::Busy);
        }

        let mut nonce = [0u8; RECONNECT_NONCE_LEN];
        env.random_bytes(&mut nonce);
        let proof = kex::reconnect_proof(secret, session_id, &nonce)?;
        let record = Payload::HandshakeReconnect(HandshakeReconnect {
            session_id,
            crypt_type: crypt.name().to_owned(),
            nonce: nonce.to_vec(),
            proof,
        })
        .to_plain_record()?;

        self.phase = HandshakePhase::Handshaking;
        self.attempt = Some(Attempt::Reconnect { nonce });
        self.session_id = session_id;
        self.crypt_type = Some(crypt);
        self.secret = Zeroizing::new(secret.to_vec());
        self.keybits = keybits;
        self.started_at = Some(env.now());
        Ok(record)
    }

    /// Apply the gateway's answer.
    ///
    /// On failure the handshake returns to idle and the error is the
    /// gateway's status (or the local verification failure).
    pub fn on_done(&mut self, done: HandshakeDone) -> Result<(), Error> {
        if self.phase != HandshakePhase::Handshaking {
            return Err(Error::BadProtocol);
        }
        let attempt = self.attempt.take().ok_or(Error::BadProtocol)?;

        match self.complete(attempt, &done) {
            Ok(()) => {
                self.phase = HandshakePhase::Established;
                self.started_at = None;
                Ok(())
            },
            Err(err) => {
                self.abandon();
                Err(err)
            },
        }
    }

    fn complete(&mut self, attempt: Attempt, done: &HandshakeDone) -> Result<(), Error> {
        if let Some(err) = Error::from_code(done.status) {
            return Err(err);
        }
        let crypt = self.crypt_type.ok_or(Error::BadProtocol)?;
        if done.crypt_type != crypt.name() {
            return Err(Error::CryptNotSupported);
        }

        let keys = match attempt {
            Attempt::Fresh { key } => {
                if done.session_id == 0 {
                    return Err(Error::BadProtocol);
                }
                let secret = match key {
                    Some(key) => {
                        let shared = key.agree(&done.public_key)?;
                        kex::derive_session_secret(&shared[..], done.session_id)?
                    },
                    None => Zeroizing::new(Vec::new()),
                };
                let keys = KeySchedule::new(crypt, Role::Client, &secret, &[])?;
                self.session_id = done.session_id;
                self.secret = secret;
                self.keybits = crypt.keybits();
                keys
            },
            Attempt::Reconnect { nonce } => {
                if done.session_id != self.session_id {
                    return Err(Error::BadProtocol);
                }
                KeySchedule::new(crypt, Role::Client, &self.secret, &nonce)?
            },
        };

        self.keys = Some(keys);
        Ok(())
    }

    /// Drop an in-progress attempt and any keys, returning to idle.
    pub fn abandon(&mut self) {
        self.phase = HandshakePhase::Idle;
        self.attempt = None;
        self.keys = None;
        self.pending_update = None;
        self.started_at = None;
    }

    /// Propose the next key epoch.
    ///
    /// # Errors
    ///
    /// [`Error::Handshake`] before establishment, [`Error::Busy`] while a
    /// previous proposal is unacknowledged.
    pub fn request_update(&mut self) -> Result<Record, Error> {
        if self.phase != HandshakePhase::Established {
            return Err(Error::Handshake);
        }
        if self.pending_update.is_some() {
            return Err(Error::Busy);
        }

        let target = self.epoch().wrapping_add(1);
        let record = self.seal(&Payload::KeyUpdate(KeyUpdate { epoch: target }))?;
        self.pending_update = Some(target);
        Ok(record)
    }

    /// Accept the peer's key update. Returns the ack, sealed under the old
    /// key; both directions use the new key afterwards.
    pub fn on_key_update(&mut self, update: KeyUpdate) -> Result<Record, Error> {
        if self.phase != HandshakePhase::Established {
            return Err(Error::BadProtocol);
        }
        if update.epoch != self.epoch().wrapping_add(1) {
            return Err(Error::BadProtocol);
        }

        let ack = self.seal(&Payload::KeyUpdateAck(update))?;
        self.keys_mut()?.advance()?;
        self.pending_update = None;
        Ok(ack)
    }

    /// Apply the peer's ack. Returns `true` if this switched keys, `false`
    /// if a crossing proposal already did.
    pub fn on_key_update_ack(&mut self, ack: KeyUpdate) -> Result<bool, Error> {
        if self.phase != HandshakePhase::Established {
            return Err(Error::BadProtocol);
        }

        match self.pending_update {
            Some(target) if target == ack.epoch => {
                self.keys_mut()?.advance()?;
                self.pending_update = None;
                Ok(true)
            },
            None if ack.epoch == self.epoch() => Ok(false),
            _ => Err(Error::BadProtocol),
        }
    }

    /// Seal a post-handshake payload under the active send key.
    pub fn seal(&mut self, payload: &Payload) -> Result<Record, Error> {
        let body = payload.encode_body()?;
        self.keys_mut()?.seal(payload.kind(), &body)
    }

    /// Encoded length of a sealed record with `plain_len` body bytes.
    pub fn sealed_len(&self, plain_len: usize) -> Result<usize, Error> {
        self.keys.as_ref().map(|keys| keys.sealed_len(plain_len)).ok_or(Error::Handshake)
    }

    /// Open and decode an inbound record.
    ///
    /// Handshake kinds must be plaintext. A plaintext `Kickoff` is accepted
    /// before keys exist so a gateway can turn a client away early.
    pub fn open(&mut self, record: Record) -> Result<Payload, Error> {
        let kind = record.kind();
        let encrypted = record.header.flags().contains(RecordFlags::ENCRYPTED);

        if kind.is_handshake() {
            if encrypted {
                return Err(Error::CryptVerify);
            }
            return Ok(Payload::decode_body(kind, record.body)?);
        }

        match self.keys.as_mut() {
            Some(keys) => {
                let body = keys.open(record)?;
                Ok(Payload::decode_body(kind, body)?)
            },
            None if kind == RecordKind::Kickoff && !encrypted => {
                Ok(Payload::decode_body(kind, record.body)?)
            },
            None => Err(Error::BadProtocol),
        }
    }

    fn keys_mut(&mut self) -> Result<&mut KeySchedule, Error> {
        self.keys.as_mut().ok_or(Error::Handshake)
    }
}
