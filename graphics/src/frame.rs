//! Frame-in-flight rotation and per-frame staging bookkeeping.

use crate::error::{GraphicsError, GraphicsResult};

/// Round-robin frame slot rotation.
///
/// The slot index starts at 0 and `begin` advances before returning, so the
/// first frame records into slot 1. `in_frame` is true between `begin` and `end`.
#[derive(Debug, Clone)]
pub struct FrameRing {
    index: usize,
    count: usize,
    in_frame: bool,
}

impl FrameRing {
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "frame ring needs at least one slot");
        Self {
            index: 0,
            count,
            in_frame: false,
        }
    }

    /// Advance to the next slot and open a frame on it.
    pub fn begin(&mut self) -> usize {
        assert!(!self.in_frame, "begin_frame called twice without end_frame");
        self.index = self.next();
        self.in_frame = true;
        self.index
    }

    /// Close the current frame.
    pub fn end(&mut self) {
        assert!(self.in_frame, "end_frame called without begin_frame");
        self.in_frame = false;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn next(&self) -> usize {
        (self.index + 1) % self.count
    }

    pub fn previous(&self) -> usize {
        (self.index + self.count - 1) % self.count
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }
}

/// Write cursor over one frame's fixed-size staging buffer.
#[derive(Debug, Clone)]
pub struct StagingArena {
    capacity: u64,
    offset: u64,
}

impl StagingArena {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            offset: 0,
        }
    }

    /// Claim `size` bytes and return their offset.
    ///
    /// Successive reservations never overlap until [`reset`](Self::reset).
    pub fn reserve(&mut self, size: u64) -> GraphicsResult<u64> {
        self.reserve_aligned(size, 1)
    }

    /// Claim `size` bytes starting at a multiple of `alignment`.
    ///
    /// Image copies need offsets aligned to the texel block size.
    pub fn reserve_aligned(&mut self, size: u64, alignment: u64) -> GraphicsResult<u64> {
        debug_assert!(alignment.is_power_of_two());
        let start = self.offset.next_multiple_of(alignment);
        let remaining = self.capacity.saturating_sub(start);
        if size > remaining {
            return Err(GraphicsError::StagingExhausted {
                requested: size,
                remaining,
            });
        }
        self.offset = start + size;
        Ok(start)
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ring_cycles_round_robin() {
        let mut ring = FrameRing::new(2);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(ring.begin());
            assert_eq!(ring.next(), (ring.index() + 1) % 2);
            assert_eq!(ring.previous(), (ring.index() + 1) % 2);
            ring.end();
        }
        assert_eq!(seen, vec![1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_frame_ring_three_slots() {
        let mut ring = FrameRing::new(3);
        ring.begin();
        assert_eq!(ring.index(), 1);
        assert_eq!(ring.previous(), 0);
        assert_eq!(ring.next(), 2);
    }

    #[test]
    #[should_panic(expected = "begin_frame called twice")]
    fn test_nested_begin_panics() {
        let mut ring = FrameRing::new(2);
        ring.begin();
        ring.begin();
    }

    #[test]
    #[should_panic(expected = "without begin_frame")]
    fn test_end_without_begin_panics() {
        FrameRing::new(2).end();
    }

    #[test]
    fn test_staging_reservations_do_not_overlap() {
        let mut arena = StagingArena::new(100);
        let a = arena.reserve(40).unwrap();
        let b = arena.reserve(60).unwrap();
        assert_eq!((a, b), (0, 40));
        assert_eq!(arena.remaining(), 0);

        let err = arena.reserve(1).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::StagingExhausted {
                requested: 1,
                remaining: 0
            }
        );

        arena.reset();
        assert_eq!(arena.reserve(10).unwrap(), 0);
    }

    #[test]
    fn test_aligned_reservation_skips_padding() {
        let mut arena = StagingArena::new(64);
        arena.reserve(3).unwrap();
        assert_eq!(arena.reserve_aligned(16, 16).unwrap(), 16);
        assert_eq!(arena.offset(), 32);
        assert!(arena.reserve_aligned(40, 16).is_err());
    }

    #[test]
    fn test_failed_reservation_leaves_offset_untouched() {
        let mut arena = StagingArena::new(16);
        arena.reserve(8).unwrap();
        assert!(arena.reserve(9).is_err());
        assert_eq!(arena.offset(), 8);
        assert_eq!(arena.reserve(8).unwrap(), 8);
    }
}
