//! Receive-side buffering.
//!
//! The host pulls a [`ReadBlock`] with `alloc_for_read`, copies transport
//! bytes into it, and hands the block back with `commit`. Committed bytes
//! accumulate until they form complete records.
//!
//! A block carries the identity it was issued with. Only the most recently
//! issued block can be committed; a block from an earlier allocation, or a
//! second commit of the same identity, is rejected instead of silently
//! reading stale memory. Blocks are not `Clone`, and `commit` takes them by
//! value, so a committed block cannot be filled again.

use atgw_proto::{Record, RecordHeader};
use bytes::BytesMut;

use crate::{
    config::{BufferLimit, MAX_READ_BLOCK_SIZE},
    error::Error,
};

/// Memory the host fills with received bytes.
#[derive(Debug)]
pub struct ReadBlock {
    id: u64,
    buf: Box<[u8]>,
}

impl ReadBlock {
    /// Identity assigned at allocation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Usable length.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Writable view for the transport.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Copy as much of `src` as fits; returns the number of bytes copied.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&src[..n]);
        n
    }
}

/// Reassembles committed bytes into records.
#[derive(Debug)]
pub struct ReceiveBuffer {
    pending: BytesMut,
    outstanding: Option<u64>,
    next_block_id: u64,
    block_size: usize,
    limit: BufferLimit,
    // Commits contributing to the record at the head of `pending`.
    spans: usize,
}

impl ReceiveBuffer {
    /// Empty buffer issuing blocks of `block_size` by default.
    pub fn new(block_size: usize, limit: BufferLimit) -> Self {
        Self {
            pending: BytesMut::new(),
            outstanding: None,
            next_block_id: 1,
            block_size,
            limit,
            spans: 0,
        }
    }

    /// Issue a block for the next read.
    ///
    /// `suggested == 0` picks the configured block size; larger requests are
    /// capped at [`MAX_READ_BLOCK_SIZE`]. Issuing a block supersedes any
    /// block still outstanding.
    pub fn alloc(&mut self, suggested: usize) -> ReadBlock {
        let size = if suggested == 0 { self.block_size } else { suggested.min(MAX_READ_BLOCK_SIZE) };
        let id = self.next_block_id;
        self.next_block_id += 1;
        self.outstanding = Some(id);
        ReadBlock { id, buf: vec![0u8; size].into_boxed_slice() }
    }

    /// Whether a block is issued but not yet committed.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Take back `block` with `filled` bytes written.
    ///
    /// # Errors
    ///
    /// - [`Error::Param`] if `block` is not the most recently issued one
    /// - [`Error::InvalidSize`] if `filled` exceeds the block's capacity
    pub fn commit(&mut self, block: ReadBlock, filled: usize) -> Result<(), Error> {
        if self.outstanding != Some(block.id) {
            return Err(Error::Param);
        }
        self.outstanding = None;

        if filled > block.capacity() {
            return Err(Error::InvalidSize);
        }
        if filled == 0 {
            return Ok(());
        }

        if self.pending.is_empty() {
            self.spans = 0;
        }
        self.spans += 1;
        self.pending.extend_from_slice(&block.buf[..filled]);
        Ok(())
    }

    /// Split the next complete record off the buffered bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::MsgTooLarge`] if the record's declared body exceeds the
    ///   receive byte limit
    /// - [`Error::InvalidSize`] if a partial record has spanned more commits
    ///   than the receive count limit allows
    /// - [`Error::BadData`] / [`Error::BadProtocol`] for a malformed header
    pub fn next_record(&mut self) -> Result<Option<Record>, Error> {
        if self.pending.len() >= RecordHeader::SIZE {
            let header = RecordHeader::from_bytes(&self.pending[..])?;
            if self.limit.exceeds_bytes(header.body_len()) {
                return Err(Error::MsgTooLarge);
            }
        }

        match Record::split_from(&mut self.pending)? {
            Some(record) => {
                self.spans = usize::from(!self.pending.is_empty());
                Ok(Some(record))
            },
            None if !self.pending.is_empty() && self.limit.exceeds_count(self.spans) => {
                Err(Error::InvalidSize)
            },
            None => Ok(None),
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Replace the receive limit.
    pub fn set_limit(&mut self, limit: BufferLimit) {
        self.limit = limit;
    }

    /// Current receive limit.
    pub fn limit(&self) -> BufferLimit {
        self.limit
    }

    /// Drop buffered bytes and invalidate any outstanding block.
    pub fn release(&mut self) {
        self.pending = BytesMut::new();
        self.outstanding = None;
        self.spans = 0;
    }
}
