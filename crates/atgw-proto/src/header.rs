//! Fixed 12-byte record header.
//!
//! Parsed zero-copy with `zerocopy`; every multi-byte field is big-endian.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::network_endian::{U16, U32},
};

use crate::{
    errors::{ProtocolError, Result},
    flags::RecordFlags,
    kind::RecordKind,
};

/// Upper bound on any record body, regardless of configured receive limits.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct RecordHeader {
    magic: U16,
    version: u8,
    kind: u8,
    flags: u8,
    epoch: u8,
    reserved: U16,
    body_len: U32,
}

impl RecordHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 12;
    /// Protocol magic ("GW").
    pub const MAGIC: u16 = 0x4757;
    /// Protocol version spoken by this crate.
    pub const VERSION: u8 = 1;

    /// Build a header for a body of `body_len` bytes.
    pub fn new(kind: RecordKind, flags: RecordFlags, epoch: u8, body_len: usize) -> Result<Self> {
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge { size: body_len, max: MAX_BODY_SIZE });
        }

        Ok(Self {
            magic: U16::new(Self::MAGIC),
            version: Self::VERSION,
            kind: kind.to_u8(),
            flags: flags.bits(),
            epoch,
            reserved: U16::new(0),
            body_len: U32::new(body_len as u32),
        })
    }

    /// Parse and validate a header from the front of `bytes`.
    ///
    /// Extra trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, _) = Self::read_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { need: Self::SIZE, have: bytes.len() })?;

        if header.magic.get() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic { found: header.magic.get() });
        }
        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        RecordKind::try_from(header.kind)?;

        let size = header.body_len();
        if size > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge { size, max: MAX_BODY_SIZE });
        }

        Ok(header)
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Record kind. Headers built through [`Self::new`] or
    /// [`Self::from_bytes`] always carry a known kind.
    pub fn kind(&self) -> RecordKind {
        RecordKind::try_from(self.kind).unwrap_or(RecordKind::Post)
    }

    /// Header flags; unknown bits are dropped.
    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    /// Key epoch the body was sealed under.
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Declared body length.
    pub fn body_len(&self) -> usize {
        self.body_len.get() as usize
    }

    /// Total encoded record length (header + body).
    pub fn record_len(&self) -> usize {
        Self::SIZE + self.body_len()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn header_layout_is_stable() {
        let header =
            RecordHeader::new(RecordKind::Post, RecordFlags::ENCRYPTED, 3, 0x0102).unwrap();
        assert_eq!(header.to_bytes(), hex!("4757 01 10 01 03 0000 00000102"));
    }

    #[test]
    fn parse_roundtrip_preserves_fields() {
        let header = RecordHeader::new(RecordKind::Ping, RecordFlags::empty(), 7, 9).unwrap();
        let parsed = RecordHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.kind(), RecordKind::Ping);
        assert_eq!(parsed.epoch(), 7);
        assert_eq!(parsed.body_len(), 9);
        assert_eq!(parsed.record_len(), RecordHeader::SIZE + 9);
    }

    #[test]
    fn rejects_short_input() {
        let result = RecordHeader::from_bytes(&[0x47, 0x57, 0x01]);
        assert_eq!(result, Err(ProtocolError::TooShort { need: 12, have: 3 }));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = hex!("dead 01 10 00 00 0000 00000000");
        assert_eq!(
            RecordHeader::from_bytes(&bytes),
            Err(ProtocolError::InvalidMagic { found: 0xdead })
        );
    }

    #[test]
    fn rejects_future_version() {
        let bytes = hex!("4757 02 10 00 00 0000 00000000");
        assert_eq!(RecordHeader::from_bytes(&bytes), Err(ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn rejects_unknown_kind() {
        let bytes = hex!("4757 01 99 00 00 0000 00000000");
        assert_eq!(RecordHeader::from_bytes(&bytes), Err(ProtocolError::UnknownKind(0x99)));
    }

    #[test]
    fn rejects_length_beyond_sanity_bound() {
        let bytes = hex!("4757 01 10 00 00 0000 7fffffff");
        assert!(matches!(
            RecordHeader::from_bytes(&bytes),
            Err(ProtocolError::BodyTooLarge { size: 0x7fff_ffff, .. })
        ));
        assert!(RecordHeader::new(RecordKind::Post, RecordFlags::empty(), 0, MAX_BODY_SIZE + 1)
            .is_err());
    }
}
