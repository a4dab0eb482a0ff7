//! Deferred destruction of GPU objects.
//!
//! GPU commands are executed asynchronously. When a resource is dropped on the
//! CPU, a command buffer submitted for an earlier frame may still reference it,
//! so the native handle cannot be destroyed on the spot.
//!
//! Each frame-in-flight slot owns a [`DeletionQueue`]. Drops that happen while
//! slot N is recording land in slot N's queue. The queue is flushed at the start
//! of the next `begin_frame` that reuses slot N, right after slot N's fence has
//! been waited on, which proves the GPU is done with everything recorded there.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 FrameDeletionQueues                  │
//! │   ┌──────────────┐          ┌──────────────┐         │
//! │   │    Slot 0    │          │    Slot 1    │         │
//! │   │ objects      │          │ objects      │         │
//! │   │ memory       │          │ memory       │         │
//! │   │ desc. sets   │          │ desc. sets   │         │
//! │   └──────────────┘          └──────────────┘         │
//! └──────────────────────────────────────────────────────┘
//!
//! Drop(resource) during slot N     -> push onto slot N
//! begin_frame() reaching slot N    -> wait fence N, cleanup slot N
//! cleanup order                    -> objects, then memory, then sets
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

/// A native object awaiting destruction, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingObject {
    Buffer(vk::Buffer),
    Image(vk::Image),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    ShaderModule(vk::ShaderModule),
    Event(vk::Event),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
}

impl PendingObject {
    /// The Vulkan object type tag.
    pub fn object_type(&self) -> vk::ObjectType {
        match self {
            Self::Buffer(_) => vk::ObjectType::BUFFER,
            Self::Image(_) => vk::ObjectType::IMAGE,
            Self::ImageView(_) => vk::ObjectType::IMAGE_VIEW,
            Self::Sampler(_) => vk::ObjectType::SAMPLER,
            Self::Pipeline(_) => vk::ObjectType::PIPELINE,
            Self::PipelineLayout(_) => vk::ObjectType::PIPELINE_LAYOUT,
            Self::DescriptorSetLayout(_) => vk::ObjectType::DESCRIPTOR_SET_LAYOUT,
            Self::DescriptorPool(_) => vk::ObjectType::DESCRIPTOR_POOL,
            Self::ShaderModule(_) => vk::ObjectType::SHADER_MODULE,
            Self::Event(_) => vk::ObjectType::EVENT,
            Self::Fence(_) => vk::ObjectType::FENCE,
            Self::Semaphore(_) => vk::ObjectType::SEMAPHORE,
        }
    }

    /// The raw 64-bit handle value.
    pub fn raw(&self) -> u64 {
        match self {
            Self::Buffer(h) => h.as_raw(),
            Self::Image(h) => h.as_raw(),
            Self::ImageView(h) => h.as_raw(),
            Self::Sampler(h) => h.as_raw(),
            Self::Pipeline(h) => h.as_raw(),
            Self::PipelineLayout(h) => h.as_raw(),
            Self::DescriptorSetLayout(h) => h.as_raw(),
            Self::DescriptorPool(h) => h.as_raw(),
            Self::ShaderModule(h) => h.as_raw(),
            Self::Event(h) => h.as_raw(),
            Self::Fence(h) => h.as_raw(),
            Self::Semaphore(h) => h.as_raw(),
        }
    }
}

/// Performs the actual release calls when a queue is cleaned up.
///
/// `M` is the memory allocation type; the GPU implementation uses
/// gpu-allocator's [`Allocation`].
pub trait ResourceReleaser<M> {
    fn destroy_object(&mut self, object: PendingObject);
    fn free_memory(&mut self, memory: M);
    fn free_descriptor_set(&mut self, pool: vk::DescriptorPool, set: vk::DescriptorSet);
}

/// One frame slot's pending deletions.
pub struct DeletionQueue<M> {
    objects: Vec<PendingObject>,
    memory: Vec<M>,
    descriptor_sets: Vec<(vk::DescriptorPool, vk::DescriptorSet)>,
}

impl<M> DeletionQueue<M> {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            memory: Vec::new(),
            descriptor_sets: Vec::new(),
        }
    }

    /// Record a native object to destroy.
    pub fn queue_object_deletion(&mut self, object: PendingObject) {
        self.objects.push(object);
    }

    /// Record a memory allocation to return to the allocator.
    pub fn queue_memory_free(&mut self, memory: M) {
        self.memory.push(memory);
    }

    /// Record a descriptor set to return to its pool.
    pub fn queue_descriptor_set_free(&mut self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        self.descriptor_sets.push((pool, set));
    }

    /// Total number of pending requests across all three lists.
    pub fn len(&self) -> usize {
        self.objects.len() + self.memory.len() + self.descriptor_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute every pending request and leave the queue empty.
    ///
    /// Objects go first since they may still be bound to the memory freed next.
    pub fn cleanup(&mut self, releaser: &mut impl ResourceReleaser<M>) {
        for object in self.objects.drain(..) {
            releaser.destroy_object(object);
        }
        for memory in self.memory.drain(..) {
            releaser.free_memory(memory);
        }
        for (pool, set) in self.descriptor_sets.drain(..) {
            releaser.free_descriptor_set(pool, set);
        }
    }
}

impl<M> Default for DeletionQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for DeletionQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("objects", &self.objects.len())
            .field("memory", &self.memory.len())
            .field("descriptor_sets", &self.descriptor_sets.len())
            .finish()
    }
}

/// Per-slot deletion queues shared by every resource created from one device.
///
/// Resources push onto whichever slot is current; the frame loop selects the
/// current slot and flushes slots once their fence has signaled.
pub struct FrameDeletionQueues<M> {
    slots: Vec<Mutex<DeletionQueue<M>>>,
    current: AtomicUsize,
}

impl<M> FrameDeletionQueues<M> {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count > 0, "at least one deletion slot is required");
        Self {
            slots: (0..slot_count).map(|_| Mutex::new(DeletionQueue::new())).collect(),
            current: AtomicUsize::new(0),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot that newly queued deletions land in.
    pub fn current_slot(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn set_current_slot(&self, slot: usize) {
        assert!(slot < self.slots.len(), "deletion slot {slot} out of range");
        self.current.store(slot, Ordering::Release);
    }

    pub fn queue_object_deletion(&self, object: PendingObject) {
        self.slots[self.current_slot()]
            .lock()
            .queue_object_deletion(object);
    }

    pub fn queue_memory_free(&self, memory: M) {
        self.slots[self.current_slot()]
            .lock()
            .queue_memory_free(memory);
    }

    pub fn queue_descriptor_set_free(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        self.slots[self.current_slot()]
            .lock()
            .queue_descriptor_set_free(pool, set);
    }

    /// Flush one slot.
    ///
    /// # Safety
    ///
    /// The GPU must have finished every submission recorded while `slot` was
    /// current, typically proven by waiting on that slot's fence.
    pub unsafe fn cleanup_slot(&self, slot: usize, releaser: &mut impl ResourceReleaser<M>) {
        // Released outside the lock so drops triggered by the releaser can queue again.
        let mut pending = std::mem::take(&mut *self.slots[slot].lock());
        if !pending.is_empty() {
            log::trace!("Deletion slot {slot}: releasing {} requests", pending.len());
        }
        pending.cleanup(releaser);
    }

    /// Flush every slot regardless of frame timing.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn flush_all(&self, releaser: &mut impl ResourceReleaser<M>) {
        for slot in 0..self.slots.len() {
            // SAFETY: caller guarantees the device is idle
            unsafe { self.cleanup_slot(slot, releaser) };
        }
    }

    /// Number of requests waiting across all slots.
    pub fn pending_count(&self) -> usize {
        self.slots.iter().map(|q| q.lock().len()).sum()
    }
}

impl<M> std::fmt::Debug for FrameDeletionQueues<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDeletionQueues")
            .field("current_slot", &self.current_slot())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

/// Releases queued requests against a live Vulkan device.
pub struct VulkanReleaser<'a> {
    device: &'a ash::Device,
    allocator: &'a Mutex<Allocator>,
    descriptor_pool: &'a Mutex<vk::DescriptorPool>,
}

impl<'a> VulkanReleaser<'a> {
    /// `descriptor_pool` is locked around every set free, since pools need
    /// external synchronization against concurrent allocation.
    pub fn new(
        device: &'a ash::Device,
        allocator: &'a Mutex<Allocator>,
        descriptor_pool: &'a Mutex<vk::DescriptorPool>,
    ) -> Self {
        Self {
            device,
            allocator,
            descriptor_pool,
        }
    }
}

impl ResourceReleaser<Allocation> for VulkanReleaser<'_> {
    fn destroy_object(&mut self, object: PendingObject) {
        let device = self.device;
        // SAFETY: queues are only flushed once the GPU is done with their slot
        unsafe {
            match object {
                PendingObject::Buffer(h) => device.destroy_buffer(h, None),
                PendingObject::Image(h) => device.destroy_image(h, None),
                PendingObject::ImageView(h) => device.destroy_image_view(h, None),
                PendingObject::Sampler(h) => device.destroy_sampler(h, None),
                PendingObject::Pipeline(h) => device.destroy_pipeline(h, None),
                PendingObject::PipelineLayout(h) => device.destroy_pipeline_layout(h, None),
                PendingObject::DescriptorSetLayout(h) => {
                    device.destroy_descriptor_set_layout(h, None)
                }
                PendingObject::DescriptorPool(h) => device.destroy_descriptor_pool(h, None),
                PendingObject::ShaderModule(h) => device.destroy_shader_module(h, None),
                PendingObject::Event(h) => device.destroy_event(h, None),
                PendingObject::Fence(h) => device.destroy_fence(h, None),
                PendingObject::Semaphore(h) => device.destroy_semaphore(h, None),
            }
        }
    }

    fn free_memory(&mut self, memory: Allocation) {
        if let Err(e) = self.allocator.lock().free(memory) {
            log::error!("Failed to free allocation: {}", e);
        }
    }

    fn free_descriptor_set(&mut self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        let _pool = self.descriptor_pool.lock();
        // SAFETY: the set is no longer referenced by in-flight work
        if let Err(e) = unsafe { self.device.free_descriptor_sets(pool, &[set]) } {
            log::error!("Failed to free descriptor set: {:?}", e);
        }
    }
}
