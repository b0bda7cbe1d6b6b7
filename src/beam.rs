//! Bounded sorted candidate set driving best-first graph search.
//!
//! The beam buffer keeps up to `capacity` candidates sorted by distance
//! and tracks which of them have already been expanded ("checked"). The
//! graph walker alternates `pop()` (take the closest unchecked candidate
//! as the next frontier vertex) with `insert()` (offer each scored
//! neighbor), and reads `top_dist()` as its pruning threshold.
//!
//! Both operations are constant-amortized: `insert` binary-searches with
//! a branchless ladder (log2(C) comparisons, no mispredicted branches on
//! uniformly distributed distances) and shifts with one `memmove`;
//! `pop` advances a cursor over an already-sorted prefix.
//!
//! The checked flag is the high bit of the stored id, owned by an opaque
//! newtype so it can never leak: ids returned by [`BeamBuffer::pop`],
//! [`BeamBuffer::next_id`], and [`BeamBuffer::copy_results`] always have
//! the bit masked off, and ids offered to [`BeamBuffer::insert`] are
//! masked on the way in. Consequently ids must fit in 31 bits.

use crate::error::{CaqError, Result};
use crate::memory::{AlignedBuffer, Pod};

/// Identifier of a stored vector. The high bit is reserved by the beam
/// buffer; valid ids fit in 31 bits.
pub type PointId = u32;

const CHECKED_BIT: u32 = 1 << 31;
const ID_MASK: u32 = CHECKED_BIT - 1;

/// A scored candidate: id plus estimated distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: PointId,
    pub distance: f32,
}

impl Candidate {
    #[inline]
    pub fn new(id: PointId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Use total_cmp for IEEE 754 total ordering (NaN-safe); ties
        // break on id for stability.
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Stored id with the checked flag folded into the high bit. Internal to
/// the buffer; accessors strip the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotId(u32);

impl SlotId {
    #[inline]
    fn new(id: PointId) -> Self {
        Self(id & ID_MASK)
    }

    #[inline]
    fn get(self) -> PointId {
        self.0 & ID_MASK
    }

    #[inline]
    fn is_checked(self) -> bool {
        self.0 & CHECKED_BIT != 0
    }

    #[inline]
    fn mark_checked(&mut self) {
        self.0 |= CHECKED_BIT;
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: SlotId,
    distance: f32,
}

// SAFETY: plain u32 + f32 pair; the all-zero pattern is a valid slot.
unsafe impl Pod for Slot {}

/// Sorted bounded beam set with pop-unchecked-min.
///
/// Invariants, maintained across every operation:
/// - entries `[0, size)` are sorted by distance ascending;
/// - `cur <= size`, and every entry at an index below `cur` is checked;
/// - when full, `top_dist()` is the largest kept distance, else `+inf`.
#[derive(Debug)]
pub struct BeamBuffer {
    // capacity + 1 slots; the sentinel absorbs the shift when full.
    data: AlignedBuffer<Slot>,
    size: usize,
    cur: usize,
    capacity: usize,
}

impl BeamBuffer {
    /// Create a buffer holding up to `capacity` candidates (at least 1).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CaqError::InvalidParameter(
                "beam capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            data: AlignedBuffer::new(capacity + 1)?,
            size: 0,
            cur: 0,
            capacity,
        })
    }

    /// Offer a candidate. No effect when the buffer is full and `dist`
    /// does not beat the current worst kept distance. The high bit of
    /// `id` is masked off.
    pub fn insert(&mut self, id: PointId, dist: f32) {
        debug_assert!(!dist.is_nan());
        if self.size == self.capacity && dist >= self.top_dist() {
            return;
        }

        let lo = self.search(dist);
        let size = self.size;
        self.data.as_mut_slice().copy_within(lo..size, lo + 1);
        self.data[lo] = Slot {
            id: SlotId::new(id),
            distance: dist,
        };
        self.size += usize::from(self.size < self.capacity);
        self.cur = self.cur.min(lo);
    }

    /// Leftmost index whose distance is `>= dist`, by branchless ladder:
    /// each iteration halves the remaining range and folds the comparison
    /// into an arithmetic offset.
    #[inline]
    fn search(&self, dist: f32) -> usize {
        let data = self.data.as_slice();
        let mut lo = 0usize;
        let mut len = self.size;
        while len > 1 {
            let half = len >> 1;
            len -= half;
            lo += usize::from(data[lo + half - 1].distance < dist) * half;
        }
        if lo < self.size && data[lo].distance < dist {
            lo + 1
        } else {
            lo
        }
    }

    /// Take the unchecked candidate with the smallest distance, mark it
    /// checked, and advance the cursor past any checked run.
    ///
    /// # Panics
    ///
    /// Panics (debug) if `has_next()` is false.
    pub fn pop(&mut self) -> PointId {
        debug_assert!(self.has_next(), "pop() on a drained beam buffer");
        let id = self.data[self.cur].id.get();
        self.data[self.cur].id.mark_checked();
        self.cur += 1;
        while self.cur < self.size && self.data[self.cur].id.is_checked() {
            self.cur += 1;
        }
        id
    }

    /// Whether an unchecked candidate remains.
    #[inline]
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.cur < self.size
    }

    /// Id the next `pop()` will return, without mutating.
    #[inline]
    #[must_use]
    pub fn next_id(&self) -> PointId {
        self.data[self.cur].id.get()
    }

    /// Pruning threshold: the worst kept distance when full, else `+inf`.
    #[inline]
    #[must_use]
    pub fn top_dist(&self) -> f32 {
        if self.size == self.capacity {
            self.data[self.size - 1].distance
        } else {
            f32::INFINITY
        }
    }

    /// Number of kept candidates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no candidates are kept.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Capacity the buffer was created (or last resized) with.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write the kept ids, closest first, into `out`. Checked bits are
    /// stripped. Returns the number written.
    pub fn copy_results(&self, out: &mut [PointId]) -> usize {
        let n = self.size.min(out.len());
        for (dst, slot) in out.iter_mut().zip(self.data.iter()).take(n) {
            *dst = slot.id.get();
        }
        n
    }

    /// Forget all candidates; capacity is retained.
    pub fn clear(&mut self) {
        self.size = 0;
        self.cur = 0;
    }

    /// Reallocate for a new capacity. Prior contents are discarded.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(CaqError::InvalidParameter(
                "beam capacity must be at least 1".into(),
            ));
        }
        self.data = AlignedBuffer::new(capacity + 1)?;
        self.capacity = capacity;
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(buf: &BeamBuffer) -> Vec<PointId> {
        let mut out = vec![0; buf.len()];
        buf.copy_results(&mut out);
        out
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut buf = BeamBuffer::new(8).unwrap();
        for (id, d) in [(1, 5.0), (2, 1.0), (3, 3.0), (4, 4.0), (5, 2.0)] {
            buf.insert(id, d);
        }
        assert_eq!(ids(&buf), vec![2, 5, 3, 4, 1]);
    }

    #[test]
    fn full_buffer_rejects_worse_or_equal() {
        let mut buf = BeamBuffer::new(2).unwrap();
        buf.insert(1, 1.0);
        buf.insert(2, 2.0);
        buf.insert(3, 2.0); // equal to top: rejected
        assert_eq!(ids(&buf), vec![1, 2]);
        buf.insert(4, 1.5); // beats top: evicts id 2
        assert_eq!(ids(&buf), vec![1, 4]);
        assert!((buf.top_dist() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn top_dist_is_infinite_until_full() {
        let mut buf = BeamBuffer::new(3).unwrap();
        assert_eq!(buf.top_dist(), f32::INFINITY);
        buf.insert(1, 1.0);
        buf.insert(2, 2.0);
        assert_eq!(buf.top_dist(), f32::INFINITY);
        buf.insert(3, 3.0);
        assert_eq!(buf.top_dist(), 3.0);
    }

    #[test]
    fn pop_returns_min_unchecked() {
        let mut buf = BeamBuffer::new(4).unwrap();
        buf.insert(10, 2.0);
        buf.insert(11, 1.0);
        buf.insert(12, 3.0);
        assert_eq!(buf.next_id(), 11);
        assert_eq!(buf.pop(), 11);
        assert_eq!(buf.pop(), 10);
        assert_eq!(buf.pop(), 12);
        assert!(!buf.has_next());
    }

    #[test]
    fn checked_bit_is_masked_on_insert() {
        let mut buf = BeamBuffer::new(2).unwrap();
        buf.insert(7 | (1 << 31), 1.0);
        assert_eq!(buf.next_id(), 7);
        assert_eq!(buf.pop(), 7);
        let mut out = [0u32; 2];
        buf.copy_results(&mut out);
        assert_eq!(out[0] & (1 << 31), 0);
    }

    #[test]
    fn clear_resets_cursor() {
        let mut buf = BeamBuffer::new(2).unwrap();
        buf.insert(1, 1.0);
        buf.pop();
        buf.clear();
        assert!(buf.is_empty());
        assert!(!buf.has_next());
        buf.insert(2, 0.5);
        assert_eq!(buf.pop(), 2);
    }

    #[test]
    fn resize_discards_contents() {
        let mut buf = BeamBuffer::new(2).unwrap();
        buf.insert(1, 1.0);
        buf.resize(5).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 5);
        assert_eq!(buf.top_dist(), f32::INFINITY);
    }
}
