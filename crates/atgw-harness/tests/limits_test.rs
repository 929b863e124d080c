//! Receive and send buffer limits.

use atgw_core::{BufferLimit, CloseReason, Error, SessionConfig};
use atgw_harness::{Link, SessionEvent};
use atgw_proto::{RecordFlags, RecordHeader, RecordKind};

fn established(seed: u64, config: SessionConfig) -> Link {
    let mut link = Link::builder(seed).config(config).build().unwrap();
    link.session.start_session("xchacha20-poly1305").unwrap();
    link.pump().unwrap();
    link.recorder.take_events();
    link
}

#[test]
fn oversized_declaration_closes_with_invalid_data() {
    let config =
        SessionConfig { recv_limit: BufferLimit::new(65_536, 0), ..SessionConfig::default() };
    let mut link = established(31, config);

    // Only the header arrives; the declared body is never buffered
    let header =
        RecordHeader::new(RecordKind::Post, RecordFlags::ENCRYPTED, 0, 10_000_000).unwrap();
    assert_eq!(link.session.read_from(&header.to_bytes()), Err(Error::MsgTooLarge));

    let events = link.recorder.take_events();
    assert!(events.contains(&SessionEvent::Error(Error::MsgTooLarge)));
    assert_eq!(events.last(), Some(&SessionEvent::Close(CloseReason::INVALID_DATA)));
}

#[test]
fn record_spread_over_too_many_reads_is_traffic_extended() {
    let config = SessionConfig { recv_limit: BufferLimit::new(0, 4), ..SessionConfig::default() };
    let mut link = established(32, config);

    link.gateway.post(&[0xab; 64]).unwrap();
    let wire = link.gateway.take_outbound();
    let result = wire.chunks(8).try_for_each(|piece| link.session.read_from(piece));

    assert_eq!(result, Err(Error::InvalidSize));
    assert_eq!(link.recorder.closes(), vec![CloseReason::TRAFFIC_EXTENDED]);
}

#[test]
fn limit_boundary_is_inclusive() {
    let mut link = established(33, SessionConfig::default());
    link.session.set_receive_buffer_limit(64, 0);

    // 48 plaintext bytes plus the 16-byte tag is exactly the limit
    link.gateway.post(&[1; 48]).unwrap();
    link.pump().unwrap();
    assert_eq!(link.client_messages().len(), 1);

    link.gateway.post(&[1; 49]).unwrap();
    assert_eq!(link.pump(), Err(Error::MsgTooLarge));
}

#[test]
fn send_limits_reject_without_closing() {
    let config = SessionConfig { send_limit: BufferLimit::new(256, 0), ..SessionConfig::default() };
    let mut link = established(34, config);

    assert_eq!(link.session.post_message(&[0; 512]), Err(Error::MsgTooLarge));
    assert!(!link.session.is_closing());

    link.session.set_send_buffer_limit(0, 1);
    link.session.post_message(b"fits").unwrap();
    link.pump().unwrap();
    assert_eq!(link.gateway.received().len(), 1);
}

#[test]
fn empty_message_is_accepted_and_dropped() {
    let mut link = established(35, SessionConfig::default());
    link.session.post_message(b"").unwrap();
    assert!(link.recorder.take_wire().is_empty());
}
