use bytes::{BufMut, Bytes, BytesMut};

use crate::error::RcaError;
use crate::flags::PacketFlags;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::message::Message;

/// Upper bound for one encoded packet (header, body and attachments).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length prefix in front of every attachment.
pub const ATTACHMENT_PREFIX_SIZE: usize = 4;

/// A message plus the binary attachments its body refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    message: Message,
    attachments: Vec<Bytes>,
}

impl Packet {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(message: Message, attachments: Vec<Bytes>) -> Self {
        Self {
            message,
            attachments,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn attachments(&self) -> &[Bytes] {
        &self.attachments
    }

    pub fn into_parts(self) -> (Message, Vec<Bytes>) {
        (self.message, self.attachments)
    }

    /// Serialize header, body and attachments into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<(), RcaError> {
        let body = serde_json::to_vec(&self.message)?;
        let total = HEADER_SIZE
            + body.len()
            + self
                .attachments
                .iter()
                .map(|a| ATTACHMENT_PREFIX_SIZE + a.len())
                .sum::<usize>();
        if total > MAX_FRAME_SIZE {
            return Err(RcaError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }
        let count = u16::try_from(self.attachments.len())
            .map_err(|_| RcaError::InvalidArgument("too many attachments".into()))?;

        let mut flags = PacketFlags::empty();
        if count > 0 {
            flags |= PacketFlags::HAS_ATTACHMENTS;
        }
        let header = PacketHeader::new(flags, count, body.len() as u32, checksum(&body, &self.attachments));

        dst.reserve(total);
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&body);
        for attachment in &self.attachments {
            dst.put_u32_le(attachment.len() as u32);
            dst.put_slice(attachment);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, RcaError> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse exactly one packet from `bytes`, verifying its checksum.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, RcaError> {
        let header = PacketHeader::from_bytes(&bytes)?;
        let body_end = HEADER_SIZE + header.body_length as usize;
        if bytes.len() < body_end {
            return Err(RcaError::InvalidPacketLength {
                expected: body_end,
                actual: bytes.len(),
            });
        }
        let body = bytes.slice(HEADER_SIZE..body_end);

        let mut attachments = Vec::with_capacity(header.attachment_count as usize);
        let mut at = body_end;
        for _ in 0..header.attachment_count {
            let len = read_len(&bytes, at)?;
            let start = at + ATTACHMENT_PREFIX_SIZE;
            if bytes.len() < start + len {
                return Err(RcaError::InvalidPacketLength {
                    expected: start + len,
                    actual: bytes.len(),
                });
            }
            attachments.push(bytes.slice(start..start + len));
            at = start + len;
        }
        if at != bytes.len() {
            return Err(RcaError::InvalidPacketLength {
                expected: at,
                actual: bytes.len(),
            });
        }

        if checksum(&body, &attachments) != header.checksum {
            return Err(RcaError::ChecksumMismatch);
        }

        let message = serde_json::from_slice(&body)?;
        Ok(Self {
            message,
            attachments,
        })
    }

    /// Total encoded length of the packet at the front of `src`, or `None`
    /// while the buffer does not yet hold enough bytes to tell.
    pub fn peek_len(src: &[u8]) -> Result<Option<usize>, RcaError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::from_bytes(src)?;
        let mut at = HEADER_SIZE + header.body_length as usize;
        for _ in 0..header.attachment_count {
            if at > MAX_FRAME_SIZE {
                break;
            }
            if src.len() < at + ATTACHMENT_PREFIX_SIZE {
                return Ok(None);
            }
            at += ATTACHMENT_PREFIX_SIZE + read_len(src, at)?;
        }
        if at > MAX_FRAME_SIZE {
            return Err(RcaError::FrameTooLarge {
                size: at,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok((src.len() >= at).then_some(at))
    }
}

/// Attachment length stored at `at`, checked against the buffer.
fn read_len(bytes: &[u8], at: usize) -> Result<usize, RcaError> {
    let prefix = bytes
        .get(at..at + ATTACHMENT_PREFIX_SIZE)
        .ok_or(RcaError::InvalidPacketLength {
            expected: at + ATTACHMENT_PREFIX_SIZE,
            actual: bytes.len(),
        })?;
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RcaError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

fn checksum(body: &[u8], attachments: &[Bytes]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(body);
    for attachment in attachments {
        hasher.update(attachment);
    }
    let hash = hasher.finalize();
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publish() -> Packet {
        Packet::with_attachments(
            Message::Publish {
                topic: "rca.topic.stream".into(),
                data: json!({"name": "view", "content": "rca.bin.0"}),
            },
            vec![Bytes::from_static(b"\xff\xd8jpeg")],
        )
    }

    #[test]
    fn packet_with_attachments_roundtrips() {
        let packet = publish();
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(Packet::peek_len(&bytes).unwrap(), Some(bytes.len()));

        let header = PacketHeader::from_bytes(&bytes).unwrap();
        assert!(header.flags.contains(PacketFlags::HAS_ATTACHMENTS));
        assert_eq!(header.attachment_count, 1);

        assert_eq!(Packet::from_bytes(bytes).unwrap(), packet);
    }

    #[test]
    fn plain_packet_has_no_flags() {
        let bytes = Packet::new(Message::Result { id: 1, result: json!(null) })
            .to_bytes()
            .unwrap();
        assert!(PacketHeader::from_bytes(&bytes).unwrap().flags.is_empty());
    }

    #[test]
    fn corrupted_attachment_fails_checksum() {
        let mut bytes = publish().to_bytes().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Packet::from_bytes(Bytes::from(bytes)),
            Err(RcaError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_packet_is_incomplete() {
        let bytes = publish().to_bytes().unwrap();
        assert_eq!(Packet::peek_len(&bytes[..bytes.len() - 1]).unwrap(), None);
        assert_eq!(Packet::peek_len(&bytes[..10]).unwrap(), None);
        assert!(matches!(
            Packet::from_bytes(bytes.slice(..bytes.len() - 1)),
            Err(RcaError::InvalidPacketLength { .. })
        ));
    }

    #[test]
    fn oversized_body_is_rejected_early() {
        let header = PacketHeader::new(PacketFlags::empty(), 0, u32::MAX, 0).to_bytes();
        assert!(matches!(
            Packet::peek_len(&header),
            Err(RcaError::FrameTooLarge { .. })
        ));
    }
}
