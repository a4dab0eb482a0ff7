//! Byte-range bookkeeping over a fixed address space.
//!
//! A [`VirtualBlock`] owns no memory. It hands out non-overlapping ranges of
//! `[0, capacity)` and takes them back, merging adjacent free ranges so a fully
//! freed block can satisfy a single allocation of its whole capacity again.

use std::collections::{BTreeMap, HashMap};

use crate::error::{GraphicsError, GraphicsResult};

/// Opaque token identifying one live range of a [`VirtualBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubAllocationHandle(u64);

/// A live range: where it starts and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    pub offset: u64,
    pub size: u64,
}

impl SubAllocation {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// First-fit allocator over `[0, capacity)`.
#[derive(Debug)]
pub struct VirtualBlock {
    capacity: u64,
    /// Free ranges keyed by start offset; never adjacent to each other.
    free: BTreeMap<u64, u64>,
    live: HashMap<SubAllocationHandle, SubAllocation>,
    used: u64,
    next_id: u64,
}

impl VirtualBlock {
    pub fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            free,
            live: HashMap::new(),
            used: 0,
            next_id: 0,
        }
    }

    /// Reserve `size` bytes at the lowest offset that fits.
    pub fn allocate(&mut self, size: u64) -> GraphicsResult<(u64, SubAllocationHandle)> {
        self.allocate_aligned(size, 1)
    }

    /// Reserve `size` bytes at the lowest offset that is a multiple of `alignment`.
    pub fn allocate_aligned(
        &mut self,
        size: u64,
        alignment: u64,
    ) -> GraphicsResult<(u64, SubAllocationHandle)> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "sub-allocation size cannot be zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }

        let found = self.free.iter().find_map(|(&start, &len)| {
            let aligned = start.checked_next_multiple_of(alignment)?;
            let fits = (aligned - start).checked_add(size).is_some_and(|n| n <= len);
            fits.then_some((start, len, aligned))
        });

        let Some((start, len, offset)) = found else {
            return Err(GraphicsError::SubAllocationExhausted {
                requested: size,
                largest_free: self.largest_free(),
            });
        };

        self.free.remove(&start);
        if offset > start {
            self.free.insert(start, offset - start);
        }
        let end = offset + size;
        let free_end = start + len;
        if end < free_end {
            self.free.insert(end, free_end - end);
        }

        let handle = SubAllocationHandle(self.next_id);
        self.next_id += 1;
        self.live.insert(handle, SubAllocation { offset, size });
        self.used += size;
        Ok((offset, handle))
    }

    /// Return a range to the free list, merging it with free neighbours.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live (double free or foreign handle).
    pub fn free(&mut self, handle: SubAllocationHandle) {
        let Some(allocation) = self.live.remove(&handle) else {
            panic!("freeing {handle:?} which is not a live sub-allocation");
        };
        self.used -= allocation.size;

        let mut start = allocation.offset;
        let mut end = allocation.end();

        if let Some((&prev_start, &prev_len)) = self.free.range(..start).next_back()
            && prev_start + prev_len == start
        {
            self.free.remove(&prev_start);
            start = prev_start;
        }
        if let Some(next_len) = self.free.remove(&end) {
            end += next_len;
        }

        self.free.insert(start, end - start);
    }

    /// Look up a live range.
    pub fn get(&self, handle: SubAllocationHandle) -> Option<SubAllocation> {
        self.live.get(&handle).copied()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn allocation_count(&self) -> usize {
        self.live.len()
    }

    /// Size of the biggest single free range.
    pub fn largest_free(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Number of disjoint free ranges; 1 for an empty block.
    pub fn free_range_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(block: &VirtualBlock, handles: &[SubAllocationHandle]) {
        let mut ranges: Vec<SubAllocation> =
            handles.iter().filter_map(|h| block.get(*h)).collect();
        ranges.sort_by_key(|r| r.offset);
        for pair in ranges.windows(2) {
            assert!(pair[0].end() <= pair[1].offset, "{pair:?} overlap");
        }
        let total: u64 = ranges.iter().map(|r| r.size).sum();
        assert!(total <= block.capacity());
        assert_eq!(total, block.used());
    }

    #[test]
    fn test_huge_aligned_request_reports_exhaustion() {
        let mut block = VirtualBlock::new(4096);
        block.allocate(1).unwrap();
        assert_eq!(
            block.allocate_aligned(u64::MAX, 4),
            Err(GraphicsError::SubAllocationExhausted {
                requested: u64::MAX,
                largest_free: 4095,
            })
        );
        // The failed request left the free list untouched.
        assert_eq!(block.allocate_aligned(4092, 4).unwrap().0, 4);
    }

    #[test]
    fn test_first_fit_reuses_freed_hole() {
        let mut block = VirtualBlock::new(4096);
        let (a_off, a) = block.allocate(1024).unwrap();
        let (b_off, b) = block.allocate(2048).unwrap();
        assert_eq!((a_off, b_off), (0, 1024));

        block.free(a);
        let (c_off, c) = block.allocate(512).unwrap();
        assert!(c_off + 512 <= 1024, "C must land in A's hole, got {c_off}");

        block.free(b);
        block.free(c);
        assert_eq!(block.free_range_count(), 1);
        let (full, _) = block.allocate(4096).unwrap();
        assert_eq!(full, 0);
    }

    #[test]
    fn test_exhaustion_reports_largest_free() {
        let mut block = VirtualBlock::new(100);
        let (_, a) = block.allocate(40).unwrap();
        block.allocate(40).unwrap();
        block.free(a);

        let err = block.allocate(50).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::SubAllocationExhausted {
                requested: 50,
                largest_free: 40
            }
        );
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut block = VirtualBlock::new(16);
        assert!(matches!(
            block.allocate(0),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_alignment_keeps_padding_free() {
        let mut block = VirtualBlock::new(256);
        block.allocate(10).unwrap();
        let (off, _) = block.allocate_aligned(16, 64).unwrap();
        assert_eq!(off, 64);
        // The 54 bytes of padding are still usable.
        let (small, _) = block.allocate(54).unwrap();
        assert_eq!(small, 10);
    }

    #[test]
    fn test_coalesces_both_neighbours() {
        let mut block = VirtualBlock::new(300);
        let (_, a) = block.allocate(100).unwrap();
        let (_, b) = block.allocate(100).unwrap();
        let (_, c) = block.allocate(100).unwrap();
        block.free(a);
        block.free(c);
        assert_eq!(block.free_range_count(), 2);
        block.free(b);
        assert_eq!(block.free_range_count(), 1);
        assert_eq!(block.largest_free(), 300);
    }

    #[test]
    #[should_panic(expected = "not a live sub-allocation")]
    fn test_double_free_panics() {
        let mut block = VirtualBlock::new(64);
        let (_, a) = block.allocate(8).unwrap();
        block.free(a);
        block.free(a);
    }

    #[test]
    fn test_mixed_sequence_never_overlaps() {
        let mut block = VirtualBlock::new(1 << 16);
        let mut live = Vec::new();
        // Deterministic pseudo-random walk.
        let mut state = 0x2545_f491_u64;
        for step in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if live.is_empty() || state % 3 != 0 {
                let size = 1 + state % 700;
                if let Ok((_, h)) = block.allocate(size) {
                    live.push(h);
                }
            } else {
                let idx = (state as usize / 3) % live.len();
                block.free(live.swap_remove(idx));
            }
            if step % 100 == 0 {
                assert_disjoint(&block, &live);
            }
        }
        assert_disjoint(&block, &live);
        for h in live.drain(..) {
            block.free(h);
        }
        assert_eq!(block.used(), 0);
        assert_eq!(block.largest_free(), 1 << 16);
    }
}
