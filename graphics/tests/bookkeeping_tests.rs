//! Device-free tests for the CPU-side bookkeeping behind the core.
//!
//! These drive the frame ring, staging arena, deletion queues, sub-allocator
//! and bindless slot table the same way the core does, without a GPU.

use ash::vk;
use ash::vk::Handle;
use rstest::rstest;

use lilium_gpu::frame::{FrameRing, StagingArena};
use lilium_gpu::{
    BindlessSlot, BindlessSlots, FrameDeletionQueues, GraphicsError, PendingObject,
    ResourceReleaser, SubAllocationHandle, VirtualBlock,
};

/// Records the raw handles it is asked to destroy.
#[derive(Default)]
struct Destroyed {
    objects: Vec<u64>,
    memory: Vec<u32>,
}

impl ResourceReleaser<u32> for Destroyed {
    fn destroy_object(&mut self, object: PendingObject) {
        self.objects.push(object.raw());
    }
    fn free_memory(&mut self, memory: u32) {
        self.memory.push(memory);
    }
    fn free_descriptor_set(&mut self, _pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        self.objects.push(set.as_raw());
    }
}

/// The begin-frame half of the core's cycle: rotate, then release the slot.
fn begin(ring: &mut FrameRing, queues: &FrameDeletionQueues<u32>, released: &mut Destroyed) -> usize {
    let slot = ring.begin();
    queues.set_current_slot(slot);
    // SAFETY: no GPU work exists in these tests
    unsafe { queues.cleanup_slot(slot, released) };
    slot
}

// ============================================================================
// Frame Rotation
// ============================================================================

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_frame_ring_visits_every_slot(#[case] count: usize) {
    let mut ring = FrameRing::new(count);
    let mut visits = vec![0; count];
    for _ in 0..count * 4 {
        let slot = ring.begin();
        visits[slot] += 1;
        assert_eq!(ring.previous(), (slot + count - 1) % count);
        ring.end();
    }
    assert!(visits.iter().all(|&v| v == 4));
}

#[test]
#[should_panic(expected = "begin_frame called twice")]
fn test_frame_ring_rejects_nested_begin() {
    let mut ring = FrameRing::new(2);
    ring.begin();
    ring.begin();
}

// ============================================================================
// Deferred Deletion
// ============================================================================

#[test]
fn test_deletion_waits_for_slot_reuse() {
    let mut ring = FrameRing::new(2);
    let queues = FrameDeletionQueues::<u32>::new(2);
    let mut released = Destroyed::default();

    let first = begin(&mut ring, &queues, &mut released);
    queues.queue_object_deletion(PendingObject::Buffer(vk::Buffer::from_raw(0x42)));
    queues.queue_memory_free(7);
    ring.end();

    let second = begin(&mut ring, &queues, &mut released);
    assert_ne!(first, second);
    assert!(released.objects.is_empty());
    assert_eq!(queues.pending_count(), 2);
    ring.end();

    let third = begin(&mut ring, &queues, &mut released);
    assert_eq!(third, first);
    assert_eq!(released.objects, vec![0x42]);
    assert_eq!(released.memory, vec![7]);
    assert_eq!(queues.pending_count(), 0);
    ring.end();
}

#[test]
fn test_deletions_land_in_their_own_slot() {
    let mut ring = FrameRing::new(2);
    let queues = FrameDeletionQueues::<u32>::new(2);
    let mut released = Destroyed::default();

    for frame in 0..4u64 {
        begin(&mut ring, &queues, &mut released);
        queues.queue_object_deletion(PendingObject::Image(vk::Image::from_raw(frame + 1)));
        ring.end();
    }

    // Frames 1 and 2 have had their slots reopened; 3 and 4 have not.
    assert_eq!(released.objects, vec![1, 2]);
    assert_eq!(queues.pending_count(), 2);

    // SAFETY: no GPU work exists in these tests
    unsafe { queues.flush_all(&mut released) };
    assert_eq!(released.objects.len(), 4);
}

// ============================================================================
// Staging Arena
// ============================================================================

#[test]
fn test_staging_reservations_never_overlap() {
    let mut arena = StagingArena::new(1024);
    let mut ranges = Vec::new();
    for size in [3u64, 17, 64, 1, 100] {
        let offset = arena.reserve_aligned(size, 4).unwrap();
        assert_eq!(offset % 4, 0);
        ranges.push((offset, offset + size));
    }
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0);
    }
}

#[test]
fn test_staging_exhaustion_then_reset() {
    let mut arena = StagingArena::new(256);
    arena.reserve(200).unwrap();
    assert_eq!(
        arena.reserve(100),
        Err(GraphicsError::StagingExhausted {
            requested: 100,
            remaining: 56,
        })
    );
    assert_eq!(arena.offset(), 200);

    arena.reset();
    assert_eq!(arena.reserve(256).unwrap(), 0);
    assert_eq!(arena.remaining(), 0);
}

// ============================================================================
// Virtual Block
// ============================================================================

#[test]
fn test_virtual_block_reuses_freed_range() {
    let mut block = VirtualBlock::new(4096);
    let (a_offset, a) = block.allocate(1024).unwrap();
    let (b_offset, _b) = block.allocate(2048).unwrap();
    assert_eq!((a_offset, b_offset), (0, 1024));

    block.free(a);
    let (c_offset, _c) = block.allocate(512).unwrap();
    assert_eq!(c_offset, 0);

    // 512 free at the front and 1024 at the back, but not 4096 contiguous.
    assert!(matches!(
        block.allocate(4096),
        Err(GraphicsError::SubAllocationExhausted {
            requested: 4096,
            largest_free: 1024,
        })
    ));
}

#[test]
fn test_virtual_block_live_ranges_are_disjoint() {
    let mut block = VirtualBlock::new(1 << 16);
    let mut live: Vec<SubAllocationHandle> = Vec::new();

    // Interleave allocations and frees in a fixed pseudo-random pattern.
    let mut seed = 0x2545_f491_u64;
    for step in 0..500 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        if step % 3 == 2 && !live.is_empty() {
            let index = (seed as usize) % live.len();
            block.free(live.swap_remove(index));
        } else {
            let size = 1 + seed % 700;
            let alignment = 1 << (seed % 5);
            if let Ok((offset, handle)) = block.allocate_aligned(size, alignment) {
                assert_eq!(offset % alignment, 0);
                live.push(handle);
            }
        }

        let mut ranges: Vec<_> = live.iter().filter_map(|&h| block.get(h)).collect();
        ranges.sort_by_key(|r| r.offset);
        for pair in ranges.windows(2) {
            assert!(pair[0].end() <= pair[1].offset, "overlap at step {step}");
        }
        assert_eq!(block.used(), ranges.iter().map(|r| r.size).sum::<u64>());
    }

    for handle in live {
        block.free(handle);
    }
    assert_eq!(block.free_range_count(), 1);
    assert_eq!(block.allocate(1 << 16).unwrap().0, 0);
}

// ============================================================================
// Bindless Slots
// ============================================================================

#[test]
fn test_bindless_slots_unique_while_live() {
    let mut slots = BindlessSlots::new(128);
    let mut live: Vec<BindlessSlot> = (0..100).map(|i| slots.allocate(i).unwrap()).collect();

    for slot in live.drain(10..40) {
        slots.free(slot);
    }
    live.extend((0..30).map(|i| slots.allocate(1000 + i).unwrap()));

    let mut indices: Vec<u32> = live.iter().map(|s| s.index()).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), live.len());
    // Freed slots are handed out again before fresh ones.
    assert_eq!(indices.last(), Some(&99));
}

#[test]
fn test_bindless_slots_dirty_tracking() {
    let mut slots = BindlessSlots::new(4);
    assert!(!slots.is_dirty());

    let slot = slots.allocate("albedo").unwrap();
    assert!(slots.take_dirty());
    assert!(!slots.is_dirty());

    slots.set(slot, "normal");
    assert!(slots.is_dirty());
    assert_eq!(slots.get(slot), Some(&"normal"));
}
