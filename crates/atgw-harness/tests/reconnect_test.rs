//! Session resumption on a new transport.

use std::sync::Arc;

use atgw_core::{CloseReason, Error, Session, SessionConfig};
use atgw_harness::{Link, Recorder, RecordingHandler, SessionEvent, WriteMode};
use bytes::Bytes;

/// Establish an encrypted session, exchange one message, then lose the
/// transport. Returns the link plus the identity needed to resume.
fn established_then_dropped(seed: u64) -> (Link, u64, Vec<u8>, u32) {
    let mut link = Link::new(seed).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();
    link.session.post_message(b"before").unwrap();
    link.pump().unwrap();

    let id = link.session.session_id();
    let secret = link.session.secret().to_vec();
    let keybits = link.session.keybits();
    link.session.close(CloseReason::RESET).unwrap();
    assert!(CloseReason::RESET.is_reconnectable());

    link.reconnect_transport(SessionConfig::default()).unwrap();
    (link, id, secret, keybits)
}

#[test]
fn resumed_session_keeps_identity_and_carries_messages() {
    let (mut link, id, secret, keybits) = established_then_dropped(11);

    link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits).unwrap();
    link.pump().unwrap();

    assert!(link.session.is_handshake_done());
    assert_eq!(link.session.session_id(), id);
    assert_eq!(link.session.secret(), &secret[..]);
    assert_eq!(link.session.keybits(), 256);

    link.session.post_message(b"after").unwrap();
    link.pump().unwrap();
    assert_eq!(link.client_messages(), vec![Bytes::from_static(b"after")]);
    assert_eq!(
        link.gateway.received(),
        &[Bytes::from_static(b"before"), Bytes::from_static(b"after")][..]
    );
}

#[test]
fn gateway_refusal_fails_handshake() {
    let (mut link, id, secret, keybits) = established_then_dropped(12);
    link.gateway.options_mut().accept_reconnect = false;

    link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits).unwrap();
    link.pump().unwrap();

    let events = link.recorder.take_events();
    assert!(events.contains(&SessionEvent::HandshakeDone(Err(Error::RefuseReconnect))));
    assert_eq!(events.last(), Some(&SessionEvent::Close(CloseReason::HANDSHAKE)));
    assert!(!link.session.is_handshake_done());
}

#[test]
fn expired_session_is_reported() {
    let (mut link, id, secret, keybits) = established_then_dropped(13);
    link.gateway.expire_sessions();

    link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits).unwrap();
    link.pump().unwrap();

    assert!(
        link.recorder
            .events()
            .contains(&SessionEvent::HandshakeDone(Err(Error::SessionExpired)))
    );
}

#[test]
fn wrong_secret_is_rejected_by_gateway() {
    let (mut link, id, _, keybits) = established_then_dropped(14);

    link.session.reconnect_session(id, "xchacha20-poly1305", &[7u8; 32], keybits).unwrap();
    link.pump().unwrap();

    assert!(
        link.recorder.events().contains(&SessionEvent::HandshakeDone(Err(Error::CryptVerify)))
    );
    assert!(link.session.is_closed());
}

#[test]
fn host_refusal_stops_before_any_write() {
    let (mut link, id, secret, keybits) = established_then_dropped(15);

    let recorder = Recorder::new();
    let handler = RecordingHandler::new(recorder.clone(), WriteMode::Sync)
        .reconnect_result(Err(Error::Rejected(-1)));
    link.session =
        Session::new(SessionConfig::default(), Arc::new(link.env.clone()), Box::new(handler))
            .unwrap();

    assert_eq!(
        link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits),
        Err(Error::RefuseReconnect)
    );
    assert!(!link.session.is_handshake_done());
    assert!(recorder.events().is_empty());
}

#[test]
fn resumed_connection_uses_fresh_traffic_keys() {
    let (mut link, id, secret, keybits) = established_then_dropped(16);
    link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits).unwrap();
    link.pump().unwrap();

    link.session.post_message(b"same plaintext").unwrap();
    let first = link.recorder.take_wire();

    link.session.close(CloseReason::RESET).unwrap();
    link.reconnect_transport(SessionConfig::default()).unwrap();
    link.session.reconnect_session(id, "xchacha20-poly1305", &secret, keybits).unwrap();
    link.pump().unwrap();

    link.session.post_message(b"same plaintext").unwrap();
    let second = link.recorder.take_wire();

    assert_eq!(first.len(), second.len());
    assert_ne!(first, second);
}
