//! End-to-end session lifecycle against the simulated gateway.
//!
//! Covers both ciphers, synchronous and pending write completion, message
//! ordering, and the close paths initiated by either side.

use atgw_core::{CloseReason, CryptType, Error, SessionState};
use atgw_harness::{Link, SessionEvent, WriteMode};
use bytes::Bytes;

#[test]
fn encrypted_session_echoes_messages_in_order() {
    let mut link = Link::new(1).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();

    assert!(link.session.is_handshake_done());
    assert_eq!(link.session.state(), SessionState::Established);
    assert_eq!(link.session.crypt_type(), Some(CryptType::XChaCha20Poly1305));
    assert_eq!(link.session.keybits(), 256);
    assert_eq!(link.gateway.session_id(), Some(link.session.session_id()));

    // Both sides derived the same secret without sending it
    let secret = link.gateway.secret_for(link.session.session_id()).unwrap();
    assert_eq!(secret, link.session.secret());
    assert_eq!(secret.len(), 32);

    for i in 0..10 {
        link.session.post_message(format!("message {i}").as_bytes()).unwrap();
    }
    link.pump().unwrap();

    let expected: Vec<Bytes> = (0..10).map(|i| Bytes::from(format!("message {i}"))).collect();
    assert_eq!(link.gateway.received(), &expected[..]);
    assert_eq!(link.client_messages(), expected);
}

#[test]
fn plaintext_session_uses_gateway_session_id() {
    let mut link = Link::builder(2).proposing(77).build().unwrap();
    link.session.start_session("none").unwrap();
    link.pump().unwrap();

    assert_eq!(link.session.session_id(), 77);
    assert_eq!(link.session.keybits(), 0);
    assert!(link.session.secret().is_empty());
}

#[test]
fn pending_writes_complete_in_order() {
    let mut link = Link::builder(3).write_mode(WriteMode::Async).build().unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    assert!(link.session.is_writing());
    link.pump().unwrap();
    assert!(link.session.is_handshake_done());

    link.session.post_message(b"first").unwrap();
    link.session.post_message(b"second").unwrap();

    // Only one write is with the transport at a time
    let starts = link
        .recorder
        .events()
        .iter()
        .filter(|e| matches!(e, SessionEvent::WriteStart(_)))
        .count();
    assert_eq!(starts, 2);

    link.pump().unwrap();
    assert_eq!(
        link.gateway.received(),
        &[Bytes::from_static(b"first"), Bytes::from_static(b"second")][..]
    );
    assert!(!link.session.is_writing());
}

#[test]
fn handshake_event_fires_before_any_message() {
    let mut link = Link::new(4).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.gateway.receive(&link.recorder.take_wire()).unwrap();
    let mut stream = link.gateway.take_outbound().to_vec();

    // Gateway greets immediately after the handshake answer
    link.gateway.post(b"welcome").unwrap();
    stream.extend_from_slice(&link.gateway.take_outbound());
    link.session.read_from(&stream).unwrap();

    let events: Vec<_> = link
        .recorder
        .take_events()
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::WriteStart(_)))
        .collect();
    assert_eq!(
        events,
        vec![
            SessionEvent::HandshakeDone(Ok(())),
            SessionEvent::Message(Bytes::from_static(b"welcome"))
        ]
    );
}

#[test]
fn client_close_reaches_gateway_once() {
    let mut link = Link::new(5).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();

    link.session.close(CloseReason::LOGOUT).unwrap();
    link.session.close(CloseReason::EOF).unwrap();
    link.pump().unwrap();

    assert_eq!(link.gateway.kicked(), Some(CloseReason::LOGOUT));
    assert_eq!(link.recorder.closes(), vec![CloseReason::LOGOUT]);
    assert!(link.session.is_closed());
    assert_eq!(link.session.post_message(b"late"), Err(Error::Closing));
}

#[test]
fn gateway_kickoff_closes_client() {
    let mut link = Link::new(6).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();

    link.gateway.kickoff(CloseReason::MAINTENANCE).unwrap();
    link.pump().unwrap();

    assert_eq!(link.recorder.closes(), vec![CloseReason::MAINTENANCE]);
    assert!(!link.session.close_reason().unwrap().is_reconnectable());
}

#[test]
fn unsupported_cipher_fails_handshake() {
    let options = atgw_harness::GatewayOptions {
        crypt_types: vec![CryptType::None],
        ..atgw_harness::GatewayOptions::default()
    };
    let mut link = Link::builder(7).gateway(options).build().unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();

    assert_eq!(
        link.recorder.take_events().into_iter().skip(1).collect::<Vec<_>>(),
        vec![
            SessionEvent::HandshakeDone(Err(Error::CryptNotSupported)),
            SessionEvent::Close(CloseReason::HANDSHAKE)
        ]
    );
    assert!(!link.session.is_handshake_done());
}

#[test]
fn ping_round_trip_is_measured() {
    let mut link = Link::new(8).unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();

    link.env.advance(std::time::Duration::from_millis(5));
    link.session.send_ping().unwrap();
    link.gateway.receive(&link.recorder.take_wire()).unwrap();
    link.env.advance(std::time::Duration::from_millis(20));
    let pong = link.gateway.take_outbound();
    link.session.read_from(&pong).unwrap();

    assert_eq!(link.session.last_ping_delta(), std::time::Duration::from_millis(20));
}

#[test]
fn gateway_ping_is_answered() {
    let mut link = Link::new(9).unwrap();
    link.session.start_session("none").unwrap();
    link.pump().unwrap();

    link.gateway.ping(99).unwrap();
    link.pump().unwrap();
    assert!(!link.session.is_closing());
}
