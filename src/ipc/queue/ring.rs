/*!
 * Record Ring
 *
 * Variable-length records in a circular byte buffer. Each record is a
 * little-endian u32 length followed by its bytes; both parts may wrap
 * around the end of the buffer.
 */

use crate::ipc::core::types::{IpcError, IpcResult};

/// Bytes of the length prefix in front of every record
pub const LEN_PREFIX: usize = 4;

/// Ring bookkeeping, loaded from and stored to the segment header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingCursor {
    pub head: usize,
    pub tail: usize,
    pub used: usize,
    pub count: u32,
}

impl RingCursor {
    /// Check the cursor against the ring it claims to describe
    pub fn validate(&self, ring_len: usize) -> IpcResult<()> {
        let consistent = self.head < ring_len
            && self.tail < ring_len
            && self.used <= ring_len
            && (self.count == 0) == (self.used == 0)
            && self.used >= self.count as usize * LEN_PREFIX
            && (self.head + self.used) % ring_len == self.tail;
        if consistent {
            Ok(())
        } else {
            Err(IpcError::Corrupted(format!("Inconsistent ring cursor {:?}", self)))
        }
    }

    /// Free bytes
    #[inline]
    pub fn free(&self, ring_len: usize) -> usize {
        ring_len - self.used
    }

    /// Whether a record of `len` bytes fits right now
    #[inline]
    pub fn fits(&self, ring_len: usize, len: usize) -> bool {
        footprint(len) <= self.free(ring_len)
    }
}

/// Ring bytes taken by a record of `len` bytes
#[inline]
pub const fn footprint(len: usize) -> usize {
    LEN_PREFIX + len
}

/// Largest record an empty ring of `ring_len` bytes can hold
#[inline]
pub const fn max_record_len(ring_len: usize) -> usize {
    ring_len.saturating_sub(LEN_PREFIX)
}

/// Append a record at the tail. The caller has checked `fits`.
pub fn push(ring: &mut [u8], cursor: &mut RingCursor, record: &[u8]) {
    debug_assert!(cursor.fits(ring.len(), record.len()));
    let len = record.len() as u32;
    let pos = write_wrapped(ring, cursor.tail, &len.to_le_bytes());
    cursor.tail = write_wrapped(ring, pos, record);
    cursor.used += footprint(record.len());
    cursor.count += 1;
}

/// Remove the record at the head
pub fn pop(ring: &[u8], cursor: &mut RingCursor) -> IpcResult<Option<Vec<u8>>> {
    if cursor.count == 0 {
        return Ok(None);
    }

    let mut prefix = [0u8; LEN_PREFIX];
    let pos = read_wrapped(ring, cursor.head, &mut prefix);
    let len = u32::from_le_bytes(prefix) as usize;
    if footprint(len) > cursor.used {
        return Err(IpcError::Corrupted(format!(
            "Record of {} bytes exceeds {} occupied bytes",
            len, cursor.used
        )));
    }

    let mut record = vec![0u8; len];
    cursor.head = read_wrapped(ring, pos, &mut record);
    cursor.used -= footprint(len);
    cursor.count -= 1;
    if cursor.count == 0 {
        // Rewind so the next records are contiguous
        cursor.head = 0;
        cursor.tail = 0;
    }
    Ok(Some(record))
}

fn write_wrapped(ring: &mut [u8], pos: usize, data: &[u8]) -> usize {
    let first = data.len().min(ring.len() - pos);
    ring[pos..pos + first].copy_from_slice(&data[..first]);
    let rest = data.len() - first;
    ring[..rest].copy_from_slice(&data[first..]);
    (pos + data.len()) % ring.len()
}

fn read_wrapped(ring: &[u8], pos: usize, out: &mut [u8]) -> usize {
    let first = out.len().min(ring.len() - pos);
    out[..first].copy_from_slice(&ring[pos..pos + first]);
    let rest = out.len() - first;
    out[first..].copy_from_slice(&ring[..rest]);
    (pos + out.len()) % ring.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn test_push_pop_wraps_prefix_and_body() {
        let mut ring = vec![0u8; 16];
        let mut cursor = RingCursor::default();

        push(&mut ring, &mut cursor, b"abcdef"); // bytes 0..10
        push(&mut ring, &mut cursor, b""); // bytes 10..14
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"abcdef");

        // Length prefix lands on bytes 14, 15, 0, 1
        push(&mut ring, &mut cursor, b"wxyz");
        assert_eq!(cursor.tail, 6);
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"");
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"wxyz");
        assert_eq!(pop(&ring, &mut cursor).unwrap(), None);
        assert_eq!(cursor, RingCursor::default());
    }

    #[test]
    fn test_body_wraps() {
        let mut ring = vec![0u8; 16];
        let mut cursor = RingCursor::default();

        push(&mut ring, &mut cursor, b"abcd"); // bytes 0..8
        push(&mut ring, &mut cursor, b"e"); // bytes 8..13
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"abcd");
        push(&mut ring, &mut cursor, b"123456"); // 13..16 then 0..7
        assert_eq!(cursor.used, 15);
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"e");
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), b"123456");
    }

    #[test]
    fn test_exact_fill_and_max_record() {
        let mut ring = vec![0u8; 32];
        let mut cursor = RingCursor::default();
        let big = vec![7u8; max_record_len(32)];
        assert!(cursor.fits(32, big.len()));
        push(&mut ring, &mut cursor, &big);
        assert!(!cursor.fits(32, 0));
        assert_eq!(pop(&ring, &mut cursor).unwrap().unwrap(), big);
    }

    #[test]
    fn test_corrupt_length_detected() {
        let mut ring = vec![0u8; 16];
        let mut cursor = RingCursor::default();
        push(&mut ring, &mut cursor, b"ok");
        ring[0..4].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(pop(&ring, &mut cursor), Err(IpcError::Corrupted(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cursor = RingCursor {
            head: 20,
            tail: 0,
            used: 0,
            count: 0,
        };
        assert!(cursor.validate(16).is_err());
        assert!(RingCursor::default().validate(16).is_ok());
    }

    proptest! {
        /// Arbitrary push/pop interleavings behave like a VecDeque
        #[test]
        fn prop_ring_matches_model(
            ops in proptest::collection::vec(
                prop_oneof![
                    proptest::collection::vec(any::<u8>(), 0..40).prop_map(Some),
                    Just(None),
                ],
                1..200,
            )
        ) {
            let ring_len = 97;
            let mut ring = vec![0u8; ring_len];
            let mut cursor = RingCursor::default();
            let mut model: VecDeque<Vec<u8>> = VecDeque::new();

            for op in ops {
                match op {
                    Some(record) => {
                        if cursor.fits(ring_len, record.len()) {
                            push(&mut ring, &mut cursor, &record);
                            model.push_back(record);
                        }
                    }
                    None => {
                        let got = pop(&ring, &mut cursor).unwrap();
                        prop_assert_eq!(got, model.pop_front());
                    }
                }
                prop_assert!(cursor.validate(ring_len).is_ok());
                prop_assert_eq!(cursor.count as usize, model.len());
                let used: usize = model.iter().map(|r| footprint(r.len())).sum();
                prop_assert_eq!(cursor.used, used);
            }
        }
    }
}
