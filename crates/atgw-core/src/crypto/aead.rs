//! Record protection.
//!
//! Each connection derives a traffic secret from the session secret (salted
//! with the resumption nonce, if any). Every key epoch then derives one key
//! per direction from the traffic secret:
//!
//! ```text
//! traffic   = HKDF(secret, salt = nonce, "atgw traffic")
//! key[dir]  = HKDF(traffic, "atgw c2s" | "atgw s2c" || epoch)
//! nonce     = epoch || 0^15 || seq (u64 BE)
//! traffic'  = HKDF(traffic, "atgw key update")      on key update
//! ```
//!
//! The record header is the associated data, so a tampered kind, epoch or
//! length fails authentication. Sequence numbers are implicit: a dropped,
//! replayed or reordered record fails to open.

use std::fmt;

use atgw_proto::{Record, RecordFlags, RecordHeader, RecordKind};
use bytes::Bytes;
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{CryptType, Role};
use crate::error::Error;

/// Poly1305 tag length appended to sealed bodies.
pub const TAG_LEN: usize = 16;

const TRAFFIC_INFO: &[u8] = b"atgw traffic";
const KEY_UPDATE_INFO: &[u8] = b"atgw key update";
const CLIENT_TO_GATEWAY: &[u8] = b"atgw c2s";
const GATEWAY_TO_CLIENT: &[u8] = b"atgw s2c";

struct DirectionKey {
    epoch: u8,
    key: Zeroizing<[u8; 32]>,
    seq: u64,
}

impl DirectionKey {
    fn derive(traffic: &[u8; 32], label: &[u8], epoch: u8) -> Result<Self, Error> {
        let mut info = Vec::with_capacity(label.len() + 1);
        info.extend_from_slice(label);
        info.push(epoch);
        Ok(Self { epoch, key: expand(traffic, None, &info)?, seq: 0 })
    }

    fn nonce(&self) -> XNonce {
        let mut nonce = [0u8; 24];
        nonce[0] = self.epoch;
        nonce[16..].copy_from_slice(&self.seq.to_be_bytes());
        XNonce::from(nonce)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()))
    }
}

/// Keys for one connection of a session.
///
/// With [`CryptType::None`] the schedule still tracks epochs so key update
/// behaves the same, but bodies pass through unchanged.
pub struct KeySchedule {
    crypt: CryptType,
    role: Role,
    traffic: Zeroizing<[u8; 32]>,
    epoch: u8,
    send: DirectionKey,
    recv: DirectionKey,
    prev_recv: Option<DirectionKey>,
}

impl KeySchedule {
    /// Derive the epoch-0 schedule from a session secret.
    ///
    /// `salt` is the resumption nonce for a resumed connection and empty for
    /// a fresh one.
    pub fn new(crypt: CryptType, role: Role, secret: &[u8], salt: &[u8]) -> Result<Self, Error> {
        let traffic = expand(secret, Some(salt), TRAFFIC_INFO)?;
        let (send_label, recv_label) = labels(role);
        let send = DirectionKey::derive(&traffic, send_label, 0)?;
        let recv = DirectionKey::derive(&traffic, recv_label, 0)?;
        Ok(Self { crypt, role, traffic, epoch: 0, send, recv, prev_recv: None })
    }

    /// Negotiated cipher.
    pub fn crypt_type(&self) -> CryptType {
        self.crypt
    }

    /// Current key epoch.
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Encoded length of a record carrying `plain_len` body bytes.
    pub fn sealed_len(&self, plain_len: usize) -> usize {
        let tag = if self.crypt.is_encrypted() { TAG_LEN } else { 0 };
        RecordHeader::SIZE + plain_len + tag
    }

    /// Seal `body` as the next outbound record.
    pub fn seal(&mut self, kind: RecordKind, body: &[u8]) -> Result<Record, Error> {
        if !self.crypt.is_encrypted() {
            return Ok(Record::new(kind, RecordFlags::empty(), self.epoch, Bytes::copy_from_slice(body))?);
        }

        let header = RecordHeader::new(kind, RecordFlags::ENCRYPTED, self.epoch, body.len() + TAG_LEN)?;
        let aad = header.to_bytes();
        let sealed = self
            .send
            .cipher()
            .encrypt(&self.send.nonce(), Payload { msg: body, aad: &aad })
            .map_err(|_| Error::CryptOperation)?;
        self.send.seq += 1;

        Ok(Record { header, body: Bytes::from(sealed) })
    }

    /// Open an inbound record, returning its plaintext body.
    ///
    /// Records from the previous epoch are accepted until the first record
    /// of the current epoch arrives.
    ///
    /// # Errors
    ///
    /// [`Error::CryptVerify`] on a flag mismatch, an unknown epoch, or an
    /// authentication failure.
    pub fn open(&mut self, record: Record) -> Result<Bytes, Error> {
        let encrypted = record.header.flags().contains(RecordFlags::ENCRYPTED);
        if encrypted != self.crypt.is_encrypted() {
            return Err(Error::CryptVerify);
        }
        if !encrypted {
            return Ok(record.body);
        }

        let epoch = record.header.epoch();
        let key = if epoch == self.recv.epoch {
            self.prev_recv = None;
            &mut self.recv
        } else {
            match self.prev_recv.as_mut() {
                Some(prev) if prev.epoch == epoch => prev,
                _ => return Err(Error::CryptVerify),
            }
        };

        let aad = record.header.to_bytes();
        let plain = key
            .cipher()
            .decrypt(&key.nonce(), Payload { msg: &record.body, aad: &aad })
            .map_err(|_| Error::CryptVerify)?;
        key.seq += 1;

        Ok(Bytes::from(plain))
    }

    /// Switch both directions to the next epoch.
    pub fn advance(&mut self) -> Result<(), Error> {
        let next = expand(&self.traffic[..], None, KEY_UPDATE_INFO)?;
        let epoch = self.epoch.wrapping_add(1);
        let (send_label, recv_label) = labels(self.role);

        self.send = DirectionKey::derive(&next, send_label, epoch)?;
        let recv = DirectionKey::derive(&next, recv_label, epoch)?;
        self.prev_recv = Some(std::mem::replace(&mut self.recv, recv));
        self.traffic = next;
        self.epoch = epoch;
        Ok(())
    }
}

impl fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySchedule")
            .field("crypt", &self.crypt)
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("send_seq", &self.send.seq)
            .field("recv_seq", &self.recv.seq)
            .field("holds_previous", &self.prev_recv.is_some())
            .finish_non_exhaustive()
    }
}

fn labels(role: Role) -> (&'static [u8], &'static [u8]) {
    match role {
        Role::Client => (CLIENT_TO_GATEWAY, GATEWAY_TO_CLIENT),
        Role::Gateway => (GATEWAY_TO_CLIENT, CLIENT_TO_GATEWAY),
    }
}

fn expand(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut *okm).map_err(|_| Error::CryptOperation)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(crypt: CryptType) -> (KeySchedule, KeySchedule) {
        let secret = [0x5a; 32];
        let salt = [0x01; 16];
        (
            KeySchedule::new(crypt, Role::Client, &secret, &salt).unwrap(),
            KeySchedule::new(crypt, Role::Gateway, &secret, &salt).unwrap(),
        )
    }

    #[test]
    fn sealed_records_open_on_the_other_side() {
        let (mut client, mut gateway) = pair(CryptType::XChaCha20Poly1305);

        for msg in [&b"first"[..], b"second", b""] {
            let record = client.seal(RecordKind::Post, msg).unwrap();
            assert!(record.header.flags().contains(RecordFlags::ENCRYPTED));
            assert_eq!(record.encoded_len(), client.sealed_len(msg.len()));
            assert_eq!(gateway.open(record).unwrap(), Bytes::copy_from_slice(msg));
        }

        let reply = gateway.seal(RecordKind::Post, b"reply").unwrap();
        assert_eq!(client.open(reply).unwrap(), Bytes::from_static(b"reply"));
    }

    #[test]
    fn directions_use_distinct_keys() {
        let (mut client, _) = pair(CryptType::XChaCha20Poly1305);
        let (mut other_client, _) = pair(CryptType::XChaCha20Poly1305);
        let record = client.seal(RecordKind::Post, b"loopback").unwrap();
        assert_eq!(other_client.open(record), Err(Error::CryptVerify));
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let (mut client, mut gateway) = pair(CryptType::XChaCha20Poly1305);
        let record = client.seal(RecordKind::Post, b"payload").unwrap();
        let forged = Record {
            header: RecordHeader::new(
                RecordKind::Ping,
                RecordFlags::ENCRYPTED,
                0,
                record.body.len(),
            )
            .unwrap(),
            body: record.body,
        };
        assert_eq!(gateway.open(forged), Err(Error::CryptVerify));
    }

    #[test]
    fn replayed_record_fails() {
        let (mut client, mut gateway) = pair(CryptType::XChaCha20Poly1305);
        let record = client.seal(RecordKind::Post, b"once").unwrap();
        gateway.open(record.clone()).unwrap();
        assert_eq!(gateway.open(record), Err(Error::CryptVerify));
    }

    #[test]
    fn previous_epoch_opens_until_new_epoch_arrives() {
        let (mut client, mut gateway) = pair(CryptType::XChaCha20Poly1305);

        let late = client.seal(RecordKind::Post, b"old key").unwrap();
        gateway.advance().unwrap();
        assert_eq!(gateway.open(late).unwrap(), Bytes::from_static(b"old key"));

        client.advance().unwrap();
        let fresh = client.seal(RecordKind::Post, b"new key").unwrap();
        assert_eq!(fresh.header.epoch(), 1);
        assert_eq!(gateway.open(fresh).unwrap(), Bytes::from_static(b"new key"));

        let stale = {
            let (mut old_client, _) = pair(CryptType::XChaCha20Poly1305);
            old_client.seal(RecordKind::Post, b"too late").unwrap()
        };
        assert_eq!(gateway.open(stale), Err(Error::CryptVerify));
    }

    #[test]
    fn none_cipher_passes_bodies_through() {
        let (mut client, mut gateway) = pair(CryptType::None);
        let record = client.seal(RecordKind::Post, b"ping-1").unwrap();
        assert!(record.header.flags().is_empty());
        assert_eq!(&record.body[..], b"ping-1");
        assert_eq!(gateway.open(record).unwrap(), Bytes::from_static(b"ping-1"));
    }

    #[test]
    fn unexpected_plaintext_is_rejected() {
        let (_, mut gateway) = pair(CryptType::XChaCha20Poly1305);
        let plain = Record::new(RecordKind::Post, RecordFlags::empty(), 0, &b"clear"[..]).unwrap();
        assert_eq!(gateway.open(plain), Err(Error::CryptVerify));
    }
}
