//! Fixed-size packet header.
//!
//! ```text
//! offset  size  field
//!      0     4  magic        b"RCA1"
//!      4     2  flags        PacketFlags, little-endian
//!      6     2  attachments  attachment count
//!      8     4  body_length  JSON body length in bytes
//!     12     4  checksum     first 4 bytes of blake3(body ‖ attachments)
//! ```

use crate::error::RcaError;
use crate::flags::PacketFlags;

/// Magic bytes opening every packet.
pub const MAGIC: [u8; 4] = *b"RCA1";

/// Encoded header length in bytes.
pub const HEADER_SIZE: usize = 16;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub attachment_count: u16,
    pub body_length: u32,
    pub checksum: u32,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, attachment_count: u16, body_length: u32, checksum: u32) -> Self {
        Self {
            flags,
            attachment_count,
            body_length,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[6..8].copy_from_slice(&self.attachment_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.body_length.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RcaError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RcaError::InvalidPacketLength {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(RcaError::InvalidMagic);
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        Ok(Self {
            flags: PacketFlags::from_bits_retain(u16_at(4)),
            attachment_count: u16_at(6),
            body_length: u32_at(8),
            checksum: u32_at(12),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_little_endian() {
        let header = PacketHeader::new(PacketFlags::HAS_ATTACHMENTS, 2, 0x0102_0304, 0xAABB_CCDD);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"RCA1");
        assert_eq!(&bytes[4..6], &[1, 0]);
        assert_eq!(&bytes[6..8], &[2, 0]);
        assert_eq!(&bytes[8..12], &[4, 3, 2, 1]);
        assert_eq!(PacketHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = PacketHeader::new(PacketFlags::empty(), 0, 0, 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(PacketHeader::from_bytes(&bytes), Err(RcaError::InvalidMagic)));
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(
            PacketHeader::from_bytes(b"RCA1"),
            Err(RcaError::InvalidPacketLength { expected: 16, actual: 4 })
        ));
    }
}
