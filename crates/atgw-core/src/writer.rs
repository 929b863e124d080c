//! Outbound write pipeline.
//!
//! Records are sealed when they are queued, so queue order is both the
//! transmission order and the order of per-direction sequence numbers. At
//! most one job is handed to the transport at a time; the next one starts
//! only after the current one completes, whether the transport finished it
//! inline ([`WriteCompletion::Done`]) or reports it later through
//! `notify_write_done` ([`WriteCompletion::Pending`]).

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{config::BufferLimit, error::Error};

/// How the transport took a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCompletion {
    /// Written synchronously; the next job may start immediately.
    Done,
    /// Accepted; the host will call `notify_write_done` exactly once.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Message,
    Control,
}

#[derive(Debug)]
struct WriteJob {
    data: Bytes,
    kind: JobKind,
}

/// FIFO of sealed records with a single in-flight slot.
#[derive(Debug)]
pub struct WritePipeline {
    queue: VecDeque<WriteJob>,
    in_flight: Option<WriteJob>,
    limit: BufferLimit,
    // Application bytes/messages queued or in flight.
    message_bytes: usize,
    message_count: usize,
    bytes_written: u64,
    jobs_written: u64,
}

impl WritePipeline {
    /// Empty pipeline bounded by `limit`.
    pub fn new(limit: BufferLimit) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            limit,
            message_bytes: 0,
            message_count: 0,
            bytes_written: 0,
            jobs_written: 0,
        }
    }

    /// Check an application message of `framed_len` encoded bytes would fit.
    ///
    /// # Errors
    ///
    /// - [`Error::MsgTooLarge`] if the message alone, or together with what
    ///   is already queued, exceeds the byte limit
    /// - [`Error::Busy`] if the message count limit is reached
    pub fn check_capacity(&self, framed_len: usize) -> Result<(), Error> {
        if self.limit.exceeds_bytes(framed_len)
            || self.limit.exceeds_bytes(self.message_bytes + framed_len)
        {
            return Err(Error::MsgTooLarge);
        }
        if self.limit.exceeds_count(self.message_count + 1) {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Queue a sealed application record.
    pub fn push_message(&mut self, data: Bytes) {
        self.message_bytes += data.len();
        self.message_count += 1;
        self.queue.push_back(WriteJob { data, kind: JobKind::Message });
    }

    /// Queue a sealed control record. Not counted against the limit.
    pub fn push_control(&mut self, data: Bytes) {
        self.queue.push_back(WriteJob { data, kind: JobKind::Control });
    }

    /// Move the next job into the in-flight slot and return its bytes.
    ///
    /// Returns `None` while a job is in flight or when nothing is queued.
    pub fn start_next(&mut self) -> Option<Bytes> {
        if self.in_flight.is_some() {
            return None;
        }
        let job = self.queue.pop_front()?;
        let data = job.data.clone();
        self.in_flight = Some(job);
        Some(data)
    }

    /// Finish the in-flight job.
    ///
    /// # Errors
    ///
    /// [`Error::NotWriting`] if no job is in flight.
    pub fn complete(&mut self) -> Result<(), Error> {
        let job = self.in_flight.take().ok_or(Error::NotWriting)?;
        if job.kind == JobKind::Message {
            self.message_bytes -= job.data.len();
            self.message_count -= 1;
        }
        self.bytes_written += job.data.len() as u64;
        self.jobs_written += 1;
        Ok(())
    }

    /// Drop the in-flight job and everything queued. Returns how many jobs
    /// were discarded.
    pub fn abort(&mut self) -> usize {
        let dropped = self.queue.len() + usize::from(self.in_flight.is_some());
        self.queue.clear();
        self.in_flight = None;
        self.message_bytes = 0;
        self.message_count = 0;
        dropped
    }

    /// Whether a job is awaiting completion.
    pub fn is_writing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Jobs waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Application bytes queued or in flight.
    pub fn message_bytes(&self) -> usize {
        self.message_bytes
    }

    /// Total bytes and jobs completed.
    pub fn written(&self) -> (u64, u64) {
        (self.bytes_written, self.jobs_written)
    }

    /// Replace the send limit. Already queued messages are kept.
    pub fn set_limit(&mut self, limit: BufferLimit) {
        self.limit = limit;
    }

    /// Current send limit.
    pub fn limit(&self) -> BufferLimit {
        self.limit
    }
}
