//! Ping/pong latency tracking.
//!
//! Pings carry the sender's milliseconds since the session was created; the
//! peer echoes the value in its pong, so the round trip is measured entirely
//! on this side's clock.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use atgw_proto::payloads::Keepalive;

/// Pings awaiting a pong before the oldest is forgotten.
const MAX_OUTSTANDING_PINGS: usize = 16;

/// Keepalive state for one session.
#[derive(Debug, Clone)]
pub struct KeepaliveTracker {
    origin: Instant,
    interval: Option<Duration>,
    anchor: Instant,
    outstanding: VecDeque<u64>,
    last_ping_delta: Duration,
    pings_sent: u64,
}

impl KeepaliveTracker {
    /// Tracker whose timestamps count from `origin`.
    pub fn new(origin: Instant, interval: Option<Duration>) -> Self {
        Self {
            origin,
            interval,
            anchor: origin,
            outstanding: VecDeque::new(),
            last_ping_delta: Duration::ZERO,
            pings_sent: 0,
        }
    }

    /// Restart the automatic ping period from `now` (on establishment).
    pub fn reset(&mut self, now: Instant) {
        self.anchor = now;
        self.outstanding.clear();
    }

    /// Record an outgoing ping and build its body.
    pub fn ping(&mut self, now: Instant) -> Keepalive {
        let timestamp_ms = self.millis(now);
        if self.outstanding.len() == MAX_OUTSTANDING_PINGS {
            self.outstanding.pop_front();
        }
        self.outstanding.push_back(timestamp_ms);
        self.anchor = now;
        self.pings_sent += 1;
        Keepalive { timestamp_ms }
    }

    /// Match a pong against outstanding pings.
    ///
    /// Returns the measured round trip, or `None` for an unsolicited pong.
    pub fn on_pong(&mut self, now: Instant, pong: Keepalive) -> Option<Duration> {
        let pos = self.outstanding.iter().position(|ts| *ts == pong.timestamp_ms)?;
        self.outstanding.drain(..=pos);

        let delta = Duration::from_millis(self.millis(now).saturating_sub(pong.timestamp_ms));
        self.last_ping_delta = delta;
        Some(delta)
    }

    /// Whether the automatic ping period has elapsed.
    pub fn due(&self, now: Instant) -> bool {
        self.interval.is_some_and(|interval| now.saturating_duration_since(self.anchor) >= interval)
    }

    /// Most recent round trip (zero until one completes).
    pub fn last_ping_delta(&self) -> Duration {
        self.last_ping_delta
    }

    /// Pings sent so far.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Pings still awaiting a pong.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_millis() as u64
    }
}
