//! GPU buffer resource.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::deletion::{PendingObject, ResourceReleaser};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{BufferDescriptor, BufferUsage};
use crate::vk_check;
use crate::vulkan::conversion::convert_buffer_usage;
use crate::vulkan::layout::stage_for_access;
use crate::vulkan::{CommandBuffer, DeviceContext};

/// Last recorded access, used as the source half of the next barrier.
#[derive(Debug, Clone, Copy)]
struct AccessState {
    access: vk::AccessFlags2,
    stage: vk::PipelineStageFlags2,
}

/// A GPU buffer resource.
///
/// Buffers are created by [`Core::create_buffer`](crate::Core::create_buffer)
/// and shared as `Arc<Buffer>`. Dropping the last reference queues the native
/// buffer and its memory for deferred destruction.
///
/// # Example
///
/// ```ignore
/// let buffer = core.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// core.queue_buffer_upload(&buffer, bytemuck::cast_slice(&vertices), 0)?;
/// ```
pub struct Buffer {
    context: Arc<DeviceContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    descriptor: BufferDescriptor,
    state: Mutex<AccessState>,
}

impl Buffer {
    /// Create a buffer (called by Core).
    pub(crate) fn new(
        context: &Arc<DeviceContext>,
        descriptor: &BufferDescriptor,
    ) -> GraphicsResult<Self> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let device = context.device();
        let buffer = vk_check!(unsafe { device.create_buffer(&buffer_info, None) });
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let label = descriptor.label.as_deref().unwrap_or("buffer");
        let allocation = context.allocate_memory(
            label,
            requirements,
            memory_location(descriptor.mappable),
            true,
        );
        vk_check!(unsafe {
            device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        });

        if let Some(label) = &descriptor.label {
            context.set_object_name(buffer, label);
        }

        Ok(Self {
            context: Arc::clone(context),
            buffer,
            allocation: Some(allocation),
            descriptor: descriptor.clone(),
            state: Mutex::new(AccessState {
                access: vk::AccessFlags2::HOST_WRITE,
                stage: vk::PipelineStageFlags2::HOST,
            }),
        })
    }

    /// Host-visible scratch buffer used for staging uploads.
    pub(crate) fn new_staging(
        context: &Arc<DeviceContext>,
        size: u64,
        label: &str,
    ) -> GraphicsResult<Self> {
        Self::new(
            context,
            &BufferDescriptor::new(size, BufferUsage::empty())
                .with_label(label)
                .mappable(),
        )
    }

    /// Get the raw Vulkan buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn is_mappable(&self) -> bool {
        self.descriptor.mappable
    }

    /// The mapped contents of a mappable buffer.
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut()?.mapped_slice_mut()
    }

    /// Copy `data` into a mappable buffer at `offset`.
    ///
    /// The caller is responsible for not overwriting bytes the GPU is still reading.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        check_range(self.size(), offset, data.len() as u64)?;
        let ptr = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "buffer {:?} is not host-mappable",
                    self.label()
                ))
            })?;

        // SAFETY: the range was checked against the buffer size and the mapping
        // covers the whole allocation
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().cast::<u8>().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` from a mappable buffer.
    ///
    /// The caller is responsible for waiting until GPU writes have completed.
    pub fn read_mapped(&self, offset: u64, len: u64) -> GraphicsResult<Vec<u8>> {
        check_range(self.size(), offset, len)?;
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "buffer {:?} is not host-mappable",
                    self.label()
                ))
            })?;
        Ok(mapped[offset as usize..(offset + len) as usize].to_vec())
    }

    /// Record a copy of `size` bytes from this buffer into `dst`.
    pub fn copy_to(
        &self,
        cmd: &CommandBuffer,
        dst: &Buffer,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.context
                .device()
                .cmd_copy_buffer(cmd.handle(), self.buffer, dst.buffer, &[region])
        };
    }

    /// Barrier from the last recorded access to `access`, at the stage `access` implies.
    pub fn acquire(&self, cmd: &CommandBuffer, access: vk::AccessFlags2) {
        self.acquire_with_stage(cmd, access, stage_for_access(access));
    }

    /// Barrier from the last recorded access to `access` at `stage`.
    pub fn acquire_with_stage(
        &self,
        cmd: &CommandBuffer,
        access: vk::AccessFlags2,
        stage: vk::PipelineStageFlags2,
    ) {
        let mut state = self.state.lock();
        let barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(state.stage)
            .src_access_mask(state.access)
            .dst_stage_mask(stage)
            .dst_access_mask(access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        cmd.pipeline_barrier(&dependency);

        *state = AccessState { access, stage };
    }

    /// Record that a queued operation will leave the buffer in this access state.
    pub(crate) fn assume_access(&self, access: vk::AccessFlags2, stage: vk::PipelineStageFlags2) {
        *self.state.lock() = AccessState { access, stage };
    }

    /// Destroy the buffer now instead of deferring.
    ///
    /// # Safety
    ///
    /// The GPU must not be using the buffer.
    pub(crate) unsafe fn destroy_immediately(mut self) {
        let mut releaser = self.context.releaser();
        releaser.destroy_object(PendingObject::Buffer(self.buffer));
        if let Some(allocation) = self.allocation.take() {
            releaser.free_memory(allocation);
        }
        drop(releaser);
        self.buffer = vk::Buffer::null();
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.buffer == vk::Buffer::null() {
            return;
        }
        let deletion = self.context.deletion();
        deletion.queue_object_deletion(PendingObject::Buffer(self.buffer));
        if let Some(allocation) = self.allocation.take() {
            deletion.queue_memory_free(allocation);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

fn memory_location(mappable: bool) -> MemoryLocation {
    if mappable {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Fails unless `[offset, offset + len)` lies inside a buffer of `size` bytes.
pub(crate) fn check_range(size: u64, offset: u64, len: u64) -> GraphicsResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GraphicsError::InvalidParameter(format!(
            "range {offset}..+{len} exceeds buffer size {size}"
        ))),
    }
}
