//! Journal record framing.
//!
//! Each journal record has the following on-disk format:
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | type     | flags    | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | sequence            | payload (JSON)                            |
//! | 8 bytes             | length bytes                              |
//! +---------------------+-------------------------------------------+
//! ```
//!
//! All integers are big-endian. The checksum covers the payload only.

use crate::error::StorageError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes for journal records: "ANSJ"
pub const JOURNAL_MAGIC: [u8; 4] = *b"ANSJ";

/// Size of the fixed record header.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Maximum payload size (1 MiB). A packet op is a few hundred bytes.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A `PacketOp` applied to the packet table.
    PacketOp = 1,
    /// Next-tag marker written by compaction.
    Checkpoint = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::PacketOp),
            2 => Ok(FrameType::Checkpoint),
            other => Err(other),
        }
    }
}

/// One journal record.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub crc32c: u32,
    pub sequence: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, sequence: u64, payload: Bytes) -> Self {
        Self {
            frame_type,
            flags: 0,
            crc32c: crc32c::crc32c(&payload),
            sequence,
            payload,
        }
    }

    /// Size of the record on disk.
    pub fn disk_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Result<BytesMut, StorageError> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: self.payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.disk_size());
        buf.put_slice(&JOURNAL_MAGIC);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.flags);
        buf.put_u16(0);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(self.crc32c);
        buf.put_u64(self.sequence);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one record from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds less than a full record or starts
    /// with zero padding; nothing is consumed in that case. `offset` is only
    /// used for error reporting.
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, StorageError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != JOURNAL_MAGIC {
            if magic == [0, 0, 0, 0] {
                return Ok(None);
            }
            return Err(StorageError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let frame_type = FrameType::try_from(buf[4]).map_err(|t| StorageError::InvalidHeader {
            offset,
            reason: format!("unknown record type: {}", t),
        })?;
        let flags = buf[5];
        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let expected = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let sequence = u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);

        if payload_len > MAX_FRAME_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: payload_len,
                max: MAX_FRAME_SIZE,
            });
        }
        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let actual = crc32c::crc32c(&payload);
        if actual != expected {
            return Err(StorageError::CorruptedRecord {
                offset,
                expected,
                actual,
            });
        }

        Ok(Some(Self {
            frame_type,
            flags,
            crc32c: expected,
            sequence,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, payload: &str) -> Frame {
        Frame::new(
            FrameType::PacketOp,
            seq,
            Bytes::copy_from_slice(payload.as_bytes()),
        )
    }

    #[test]
    fn test_encode_layout() {
        let encoded = frame(7, "{}").encode().unwrap();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 2);
        assert_eq!(&encoded[0..4], b"ANSJ");
        assert_eq!(encoded[4], 1);
        assert_eq!(&encoded[8..12], &[0, 0, 0, 2]);
        assert_eq!(&encoded[16..24], &7u64.to_be_bytes());
    }

    #[test]
    fn test_decode_consecutive_records() {
        let mut buf = frame(1, r#"{"a":1}"#).encode().unwrap();
        buf.extend_from_slice(&frame(2, r#"{"b":2}"#).encode().unwrap());

        let first = Frame::decode(&mut buf, 0).unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(&first.payload[..], br#"{"a":1}"#);
        let second = Frame::decode(&mut buf, 31).unwrap().unwrap();
        assert_eq!(second.sequence, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_record_is_not_consumed() {
        let encoded = frame(1, "payload").encode().unwrap();
        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Frame::decode(&mut buf, 0).unwrap().is_none());
        assert_eq!(buf.len(), encoded.len() - 1);

        let mut header_only = BytesMut::from(&encoded[..10]);
        assert!(Frame::decode(&mut header_only, 0).unwrap().is_none());
    }

    #[test]
    fn test_zero_padding_reads_as_end() {
        let mut buf = BytesMut::from(&[0u8; 64][..]);
        assert!(Frame::decode(&mut buf, 0).unwrap().is_none());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut encoded = frame(1, "payload").encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let err = Frame::decode(&mut encoded, 48).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedRecord { offset: 48, .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_bad_magic_and_type() {
        let mut encoded = frame(1, "x").encode().unwrap();
        encoded[0] = b'X';
        assert!(matches!(
            Frame::decode(&mut encoded, 0),
            Err(StorageError::InvalidHeader { .. })
        ));

        let mut encoded = frame(1, "x").encode().unwrap();
        encoded[4] = 9;
        assert!(matches!(
            Frame::decode(&mut encoded, 0),
            Err(StorageError::InvalidHeader { .. })
        ));
    }
}
