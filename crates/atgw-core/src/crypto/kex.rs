//! Key agreement and resumption proofs.
//!
//! A fresh session runs one X25519 exchange. The shared secret is expanded
//! with HKDF-SHA256, salted with the session identifier, into the session
//! secret the host may export. Resuming a session never repeats the
//! exchange; the client instead proves it still holds the secret with an
//! HMAC over the session identifier and a fresh nonce.

use std::fmt;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::Secret;
use crate::{env::Environment, error::Error};

type HmacSha256 = Hmac<Sha256>;

/// X25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Session secret length.
pub const SECRET_LEN: usize = 32;
/// Resumption nonce length.
pub const RECONNECT_NONCE_LEN: usize = 16;

const SESSION_SECRET_INFO: &[u8] = b"atgw session secret";
const RECONNECT_PROOF_LABEL: &[u8] = b"atgw reconnect";

/// One-shot X25519 key pair for a fresh handshake.
pub struct EphemeralKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKey {
    /// Generate a key pair from the environment's random source.
    pub fn generate(env: &dyn Environment) -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        env.random_bytes(&mut *bytes);
        let secret = StaticSecret::from(*bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key to send to the peer.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Agree on a shared secret with `peer_public`.
    ///
    /// # Errors
    ///
    /// [`Error::CryptVerify`] if the peer key has the wrong length or is a
    /// low-order point (the exchange would not be contributory).
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error> {
        let peer: [u8; PUBLIC_KEY_LEN] = peer_public.try_into().map_err(|_| Error::CryptVerify)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(Error::CryptVerify);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey").field("public", &hex_prefix(self.public.as_bytes())).finish()
    }
}

/// Expand an X25519 shared secret into the session secret.
pub fn derive_session_secret(shared: &[u8], session_id: u64) -> Result<Secret, Error> {
    let hk = Hkdf::<Sha256>::new(Some(&session_id.to_be_bytes()[..]), shared);
    let mut okm = Zeroizing::new(vec![0u8; SECRET_LEN]);
    hk.expand(SESSION_SECRET_INFO, okm.as_mut_slice()).map_err(|_| Error::CryptOperation)?;
    Ok(okm)
}

/// HMAC proving possession of `secret` for resuming `session_id`.
pub fn reconnect_proof(secret: &[u8], session_id: u64, nonce: &[u8]) -> Result<Vec<u8>, Error> {
    let mac = proof_mac(secret, session_id, nonce)?;
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a resumption proof in constant time.
///
/// # Errors
///
/// [`Error::CryptVerify`] if the proof does not match.
pub fn verify_reconnect_proof(
    secret: &[u8],
    session_id: u64,
    nonce: &[u8],
    proof: &[u8],
) -> Result<(), Error> {
    proof_mac(secret, session_id, nonce)?.verify_slice(proof).map_err(|_| Error::CryptVerify)
}

fn proof_mac(secret: &[u8], session_id: u64, nonce: &[u8]) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::CryptOperation)?;
    mac.update(RECONNECT_PROOF_LABEL);
    mac.update(&session_id.to_be_bytes());
    mac.update(nonce);
    Ok(mac)
}

pub(crate) fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect::<String>() + ".."
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    struct FixedEnv(u8);

    impl Environment for FixedEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn random_bytes(&self, buf: &mut [u8]) {
            buf.fill(self.0);
        }
    }

    #[test]
    fn both_sides_derive_the_same_secret() {
        let client = EphemeralKey::generate(&FixedEnv(1));
        let gateway = EphemeralKey::generate(&FixedEnv(2));

        let a = client.agree(&gateway.public_bytes()).unwrap();
        let b = gateway.agree(&client.public_bytes()).unwrap();
        assert_eq!(*a, *b);

        let secret_a = derive_session_secret(&a[..], 77).unwrap();
        let secret_b = derive_session_secret(&b[..], 77).unwrap();
        assert_eq!(*secret_a, *secret_b);
        assert_eq!(secret_a.len(), SECRET_LEN);

        let other_session = derive_session_secret(&a[..], 78).unwrap();
        assert_ne!(*secret_a, *other_session);
    }

    #[test]
    fn low_order_peer_key_is_rejected() {
        let client = EphemeralKey::generate(&FixedEnv(1));
        assert_eq!(client.agree(&[0u8; 32]), Err(Error::CryptVerify));
        assert_eq!(client.agree(&[9u8; 31]), Err(Error::CryptVerify));
    }

    #[test]
    fn reconnect_proof_binds_session_and_nonce() {
        let secret = [7u8; 32];
        let nonce = [3u8; RECONNECT_NONCE_LEN];
        let proof = reconnect_proof(&secret, 10, &nonce).unwrap();

        assert!(verify_reconnect_proof(&secret, 10, &nonce, &proof).is_ok());
        assert_eq!(verify_reconnect_proof(&secret, 11, &nonce, &proof), Err(Error::CryptVerify));
        assert_eq!(
            verify_reconnect_proof(&[8u8; 32], 10, &nonce, &proof),
            Err(Error::CryptVerify)
        );
    }

    #[test]
    fn debug_does_not_print_private_key() {
        let key = EphemeralKey::generate(&FixedEnv(5));
        let rendered = format!("{key:?}");
        assert!(rendered.starts_with("EphemeralKey { public: "));
        assert!(rendered.ends_with("..\" }"));
    }
}
