//! Write batches and commit log framing.
//!
//! ## Frame Format
//!
//! ```text
//! | len (4) | sequence (8) | payload (N) | crc32 (4) |
//! ```
//!
//! `len` is the size of the whole frame including itself and the CRC. The
//! CRC covers every byte before it. The payload is an encoded
//! [`WriteBatch`]:
//!
//! ```text
//! | op_count (4) | op* |
//! op = | tag (1) | key_len (4) | key | [value_len (4) | value] |
//! ```
//!
//! All integers are little-endian. Tag 1 is a put (with value), tag 2 a
//! delete (no value).

use crate::error::{StorageError, StorageResult};
use crate::types::SequenceNumber;

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// Frame header: len (4) + sequence (8).
pub(crate) const FRAME_HEADER_SIZE: usize = 12;
/// Trailing CRC size.
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// A single operation in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Sets `key` to `value`.
    Put {
        /// The key.
        key: Vec<u8>,
        /// The new value.
        value: Vec<u8>,
    },
    /// Removes `key`.
    Delete {
        /// The key.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An ordered list of puts and deletes applied atomically.
///
/// When several operations target the same key, the last one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Returns the queued operations in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    buf.push(TAG_PUT);
                    put_bytes(&mut buf, key);
                    put_bytes(&mut buf, value);
                }
                BatchOp::Delete { key } => {
                    buf.push(TAG_DELETE);
                    put_bytes(&mut buf, key);
                }
            }
        }
        buf
    }

    pub(crate) fn decode(payload: &[u8], offset: u64) -> StorageResult<Self> {
        let mut reader = Reader {
            data: payload,
            pos: 0,
            offset,
        };
        let count = reader.u32()?;
        let mut ops = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let op = match reader.u8()? {
                TAG_PUT => {
                    let key = reader.bytes()?;
                    let value = reader.bytes()?;
                    BatchOp::Put { key, value }
                }
                TAG_DELETE => BatchOp::Delete {
                    key: reader.bytes()?,
                },
                tag => {
                    return Err(StorageError::corrupted(
                        offset,
                        format!("unknown batch op tag {tag}"),
                    ))
                }
            };
            ops.push(op);
        }
        if reader.pos != payload.len() {
            return Err(StorageError::corrupted(
                offset,
                format!(
                    "trailing bytes in batch: decoded {} of {}",
                    reader.pos,
                    payload.len()
                ),
            ));
        }
        Ok(Self { ops })
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    offset: u64,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> StorageResult<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| StorageError::corrupted(self.offset, "batch payload truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Encodes a batch as one commit log frame.
pub(crate) fn encode_frame(sequence: SequenceNumber, batch: &WriteBatch) -> Vec<u8> {
    let payload = batch.encode();
    let frame_len = FRAME_HEADER_SIZE + payload.len() + FRAME_CRC_SIZE;

    let mut buf = Vec::with_capacity(frame_len);
    buf.extend_from_slice(&(frame_len as u32).to_le_bytes());
    buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
    buf.extend_from_slice(&payload);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Outcome of reading one frame from the log.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A complete, valid frame and its total length.
    Frame {
        sequence: SequenceNumber,
        batch: WriteBatch,
        len: usize,
    },
    /// The remaining bytes are a partially written frame.
    Torn,
    /// No bytes remain.
    End,
}

/// Reads the frame starting at `data[0]`, `offset` being its log position.
///
/// A frame that runs past the end of `data` is reported as torn. A frame
/// that is complete but fails its CRC or payload validation is corruption.
pub(crate) fn read_frame(data: &[u8], offset: u64) -> StorageResult<FrameRead> {
    if data.is_empty() {
        return Ok(FrameRead::End);
    }
    if data.len() < 4 {
        return Ok(FrameRead::Torn);
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len < FRAME_HEADER_SIZE + FRAME_CRC_SIZE + 4 {
        return Err(StorageError::corrupted(
            offset,
            format!("frame length {len} is below the minimum"),
        ));
    }
    if len > data.len() {
        return Ok(FrameRead::Torn);
    }

    let frame = &data[..len];
    let body = &frame[..len - FRAME_CRC_SIZE];
    let stored_crc = u32::from_le_bytes([
        frame[len - 4],
        frame[len - 3],
        frame[len - 2],
        frame[len - 1],
    ]);
    let computed_crc = compute_crc32(body);
    if stored_crc != computed_crc {
        return Err(StorageError::corrupted(
            offset,
            format!("checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"),
        ));
    }

    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&body[4..FRAME_HEADER_SIZE]);
    let sequence = SequenceNumber::new(u64::from_le_bytes(seq_bytes));
    let batch = WriteBatch::decode(&body[FRAME_HEADER_SIZE..], offset)?;

    Ok(FrameRead::Frame {
        sequence,
        batch,
        len,
    })
}

/// Computes the IEEE CRC32 checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(b"model:people:foo".to_vec(), b"payload".to_vec());
        batch.delete(b"index:people:age:42:foo".to_vec());
        batch.put(b"count:people".to_vec(), b"1".to_vec());
        batch
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn frame_roundtrip() {
        let batch = sample_batch();
        let frame = encode_frame(SequenceNumber::new(9), &batch);

        match read_frame(&frame, 0).unwrap() {
            FrameRead::Frame {
                sequence,
                batch: decoded,
                len,
            } => {
                assert_eq!(sequence, SequenceNumber::new(9));
                assert_eq!(decoded, batch);
                assert_eq!(len, frame.len());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn short_frame_is_torn() {
        let frame = encode_frame(SequenceNumber::new(1), &sample_batch());
        let cut = &frame[..frame.len() - 3];
        assert!(matches!(read_frame(cut, 0).unwrap(), FrameRead::Torn));
        assert!(matches!(read_frame(&frame[..2], 0).unwrap(), FrameRead::Torn));
        assert!(matches!(read_frame(&[], 0).unwrap(), FrameRead::End));
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut frame = encode_frame(SequenceNumber::new(1), &sample_batch());
        frame[FRAME_HEADER_SIZE + 6] ^= 0xFF;
        let err = read_frame(&frame, 128).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { offset: 128, .. }));
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(9);
        assert!(WriteBatch::decode(&payload, 0).is_err());
    }

    #[test]
    fn batch_bookkeeping() {
        let mut batch = sample_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[1].key(), b"index:people:age:42:foo");

        batch.delete(b"x".to_vec());
        assert_eq!(batch.len(), 4);
        assert!(!batch.is_empty());
    }
}
