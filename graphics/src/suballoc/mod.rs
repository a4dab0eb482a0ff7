//! One large GPU buffer handed out as independently-lived byte ranges.
//!
//! Used for vertex, index, and material storage so that meshes do not each
//! need their own buffer object. The backing buffer never grows; size it for
//! peak usage.

mod virtual_block;

use std::sync::Arc;

use parking_lot::Mutex;

pub use virtual_block::{SubAllocation, SubAllocationHandle, VirtualBlock};

use crate::core::Core;
use crate::error::GraphicsResult;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// A backing [`Buffer`] plus the range bookkeeping over it.
///
/// Allocation and free may be called from any thread. Uploading into an
/// allocated range goes through [`Core::queue_buffer_upload`] as usual.
///
/// ```ignore
/// let vertices = SubAllocatedBuffer::new(&core, 64 << 20, BufferUsage::VERTEX, "vertices")?;
/// let (offset, handle) = vertices.allocate(bytes.len() as u64)?;
/// core.queue_buffer_upload(vertices.buffer(), bytes, offset)?;
/// // ...
/// vertices.free(handle);
/// ```
pub struct SubAllocatedBuffer {
    buffer: Arc<Buffer>,
    block: Mutex<VirtualBlock>,
}

impl SubAllocatedBuffer {
    pub fn new(core: &Core, size: u64, usage: BufferUsage, label: &str) -> GraphicsResult<Self> {
        let buffer = core.create_buffer(&BufferDescriptor::new(size, usage).with_label(label))?;
        log::debug!("Sub-allocated buffer '{label}' created with {size} bytes");
        Ok(Self::from_buffer(buffer))
    }

    /// Manage the whole of an existing buffer.
    pub fn from_buffer(buffer: Arc<Buffer>) -> Self {
        let block = VirtualBlock::new(buffer.size());
        Self {
            buffer,
            block: Mutex::new(block),
        }
    }

    /// Reserve `size` bytes; returns the offset into [`buffer`](Self::buffer).
    pub fn allocate(&self, size: u64) -> GraphicsResult<(u64, SubAllocationHandle)> {
        self.block.lock().allocate(size)
    }

    /// Reserve `size` bytes at an offset that is a multiple of `alignment`.
    pub fn allocate_aligned(
        &self,
        size: u64,
        alignment: u64,
    ) -> GraphicsResult<(u64, SubAllocationHandle)> {
        self.block.lock().allocate_aligned(size, alignment)
    }

    /// Return a range for reuse. The backing buffer is not shrunk.
    pub fn free(&self, handle: SubAllocationHandle) {
        self.block.lock().free(handle);
    }

    pub fn get(&self, handle: SubAllocationHandle) -> Option<SubAllocation> {
        self.block.lock().get(handle)
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Bytes currently held by live allocations.
    pub fn used(&self) -> u64 {
        self.block.lock().used()
    }

    pub fn capacity(&self) -> u64 {
        self.block.lock().capacity()
    }

    pub fn allocation_count(&self) -> usize {
        self.block.lock().allocation_count()
    }
}

impl std::fmt::Debug for SubAllocatedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let block = self.block.lock();
        f.debug_struct("SubAllocatedBuffer")
            .field("label", &self.buffer.label())
            .field("capacity", &block.capacity())
            .field("used", &block.used())
            .field("allocations", &block.allocation_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(SubAllocatedBuffer: Send, Sync);
