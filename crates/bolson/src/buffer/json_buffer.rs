//! `JsonBuffer`: a staging region for one or more newline-terminated JSON
//! documents, annotated with the sequence range of the records it holds.

use crate::buffer::allocator::Region;
use bolson_types::SeqRange;

/// A contiguous byte region holding zero or more complete, newline-terminated
/// JSON documents, plus the inclusive sequence range they were assigned by
/// the upstream source.
///
/// Invariants (checked by `debug_assert` at the relevant mutation points):
/// - `size <= capacity`
/// - when `size > 0`, `seq_range` is `Some` and `seq_range.len() == num_jsons`
/// - bytes `[0, size)` are exactly `num_jsons` JSON documents separated or
///   terminated by `'\n'`
pub struct JsonBuffer {
    region: Region,
    size: usize,
    seq_range: Option<SeqRange>,
    num_jsons: usize,
}

impl JsonBuffer {
    pub fn new(region: Region) -> Self {
        JsonBuffer {
            region,
            size: 0,
            seq_range: None,
            num_jsons: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_jsons(&self) -> usize {
        self.num_jsons
    }

    pub fn seq_range(&self) -> Option<SeqRange> {
        self.seq_range
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.region.as_slice()[..self.size]
    }

    /// Whether appending `extra` bytes plus a newline terminator would
    /// overflow the buffer's capacity.
    pub fn would_overflow(&self, extra: usize) -> bool {
        self.size + extra + 1 > self.capacity()
    }

    /// Appends one JSON document's bytes (without its terminator) followed
    /// by `'\n'`, and extends `seq_range` to include `seq`.
    ///
    /// Panics if the append would overflow; callers must check
    /// `would_overflow` first (mirroring the reference Ingest loop, which
    /// always flushes and reacquires before a would-be-overflowing append).
    pub fn append(&mut self, seq: u64, bytes: &[u8]) {
        assert!(
            !self.would_overflow(bytes.len()),
            "append would overflow JsonBuffer"
        );
        let dst = self.region.as_mut_slice();
        dst[self.size..self.size + bytes.len()].copy_from_slice(bytes);
        dst[self.size + bytes.len()] = b'\n';
        self.size += bytes.len() + 1;
        self.num_jsons += 1;
        self.seq_range = Some(match self.seq_range {
            None => SeqRange::new(seq, seq),
            Some(r) => SeqRange::new(r.first, seq),
        });
    }

    /// Clears the valid prefix and sequence range. Must be called while
    /// holding the pool's lock for this buffer's slot.
    pub fn reset(&mut self) {
        self.size = 0;
        self.num_jsons = 0;
        self.seq_range = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::Allocator;
    use bolson_types::AllocatorKind;

    fn buf(capacity: usize) -> JsonBuffer {
        let a = Allocator::new(AllocatorKind::System, 0);
        JsonBuffer::new(a.allocate(capacity).unwrap())
    }

    #[test]
    fn append_tracks_seq_range_and_count() {
        let mut b = buf(64);
        b.append(5, br#"{"a":1}"#);
        b.append(6, br#"{"a":2}"#);
        assert_eq!(b.num_jsons(), 2);
        assert_eq!(b.seq_range(), Some(SeqRange::new(5, 6)));
        assert_eq!(b.data(), b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn reset_clears_state() {
        let mut b = buf(64);
        b.append(0, br#"{}"#);
        b.reset();
        assert!(b.is_empty());
        assert_eq!(b.seq_range(), None);
        assert_eq!(b.num_jsons(), 0);
    }

    #[test]
    fn would_overflow_accounts_for_terminator() {
        let b = buf(4);
        assert!(!b.would_overflow(3));
        assert!(b.would_overflow(4));
    }
}
