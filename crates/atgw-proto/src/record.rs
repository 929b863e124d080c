//! Records: a header plus its body.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::Result,
    flags::RecordFlags,
    header::RecordHeader,
    kind::RecordKind,
};

/// One framed unit on the wire.
///
/// The body is whatever travels after the header: CBOR for control kinds,
/// raw bytes for [`RecordKind::Post`], or AEAD ciphertext when the header
/// carries [`RecordFlags::ENCRYPTED`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Validated header
    pub header: RecordHeader,
    /// Body bytes, exactly `header.body_len()` long
    pub body: Bytes,
}

impl Record {
    /// Build a record, sizing the header from `body`.
    pub fn new(
        kind: RecordKind,
        flags: RecordFlags,
        epoch: u8,
        body: impl Into<Bytes>,
    ) -> Result<Self> {
        let body = body.into();
        let header = RecordHeader::new(kind, flags, epoch, body.len())?;
        Ok(Self { header, body })
    }

    /// Record kind.
    pub fn kind(&self) -> RecordKind {
        self.header.kind()
    }

    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        RecordHeader::SIZE + self.body.len()
    }

    /// Append the wire encoding to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.body);
    }

    /// Wire encoding as a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out.freeze()
    }

    /// Split one complete record off the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds only part of a record; nothing is
    /// consumed in that case. A malformed header is an error and also
    /// consumes nothing, so callers decide how to tear down.
    pub fn split_from(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < RecordHeader::SIZE {
            return Ok(None);
        }

        let header = RecordHeader::from_bytes(&src[..])?;
        if src.len() < header.record_len() {
            return Ok(None);
        }

        let mut frame = src.split_to(header.record_len()).freeze();
        let body = frame.split_off(RecordHeader::SIZE);
        Ok(Some(Self { header, body }))
    }
}
