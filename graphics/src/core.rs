//! The graphics core: device ownership, frame orchestration, and upload batching.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::{CoreConfig, NUM_FRAMES_IN_FLIGHT};
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::{FrameRing, StagingArena};
use crate::resources::{
    Buffer, DescriptorSet, DescriptorSetLayout, Sampler, Texture, check_range,
};
use crate::swapchain::{Surface, Swapchain};
use crate::types::{BufferDescriptor, MipRegion, SamplerDescriptor, TextureDescriptor, mip_regions};
use crate::vulkan::{CommandBuffer, DeviceContext, DeviceInfo, Fence, ImageLayout, Semaphore};
use crate::{frame_mark, profile_function, profile_scope};

/// Staging-to-buffer copy recorded at the end of the frame.
struct BufferUpload {
    dst: Arc<Buffer>,
    staging_offset: u64,
    dst_offset: u64,
    size: u64,
}

/// Buffer-to-image copy of a packed mip chain, with the layout it starts from.
struct TextureUpload {
    /// `None` copies from the slot's staging buffer.
    src: Option<Arc<Buffer>>,
    texture: Arc<Texture>,
    src_offset: u64,
    from: ImageLayout,
    regions: Vec<MipRegion>,
}

/// Uploads queued against one frame slot.
struct PendingUploads {
    arena: StagingArena,
    buffers: Vec<BufferUpload>,
    textures: Vec<TextureUpload>,
}

impl PendingUploads {
    fn clear(&mut self) {
        self.arena.reset();
        self.buffers.clear();
        self.textures.clear();
    }
}

/// Everything one frame-in-flight slot owns.
struct FrameSlot {
    graphics: CommandBuffer,
    upload: CommandBuffer,
    upload_complete: Semaphore,
    frame_complete: Semaphore,
    /// Whether the last submit on this slot signaled `frame_complete`.
    completion_signaled: bool,
    fence: Fence,
    staging: Buffer,
    uploads: Mutex<PendingUploads>,
}

impl FrameSlot {
    fn new(context: &Arc<DeviceContext>, index: usize, staging_size: u64) -> GraphicsResult<Self> {
        let staging = Buffer::new_staging(context, staging_size, &format!("staging {index}"))?;
        let slot = Self {
            graphics: CommandBuffer::allocate(context),
            upload: CommandBuffer::allocate(context),
            upload_complete: Semaphore::new(context),
            frame_complete: Semaphore::new(context),
            completion_signaled: false,
            fence: Fence::new(context, true),
            staging,
            uploads: Mutex::new(PendingUploads {
                arena: StagingArena::new(staging_size),
                buffers: Vec::new(),
                textures: Vec::new(),
            }),
        };
        context.set_object_name(slot.graphics.handle(), &format!("frame {index} graphics"));
        context.set_object_name(slot.upload.handle(), &format!("frame {index} upload"));
        context.set_object_name(slot.fence.handle(), &format!("frame {index} fence"));
        Ok(slot)
    }
}

/// Owns the device and drives the per-frame GPU work cycle.
///
/// A frame is bracketed by [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame). Uploads queued in between run before the
/// frame's graphics work; uploads queued outside a frame are picked up by the
/// next one.
///
/// # Example
///
/// ```ignore
/// let mut core = Core::new(CoreConfig::new())?;
/// let mesh = core.create_buffer_with_data(
///     &BufferDescriptor::new(bytes.len() as u64, BufferUsage::VERTEX),
///     bytes,
/// )?;
///
/// loop {
///     core.begin_frame();
///     let cmd = core.frame_command_buffer();
///     // record...
///     core.end_frame();
/// }
/// ```
///
/// Frames whose image is presented end with
/// [`end_frame_for_present`](Self::end_frame_for_present) instead, so the
/// completion semaphore is only signaled when a present will wait on it.
pub struct Core {
    frames: Vec<FrameSlot>,
    ring: FrameRing,
    context: Arc<DeviceContext>,
}

impl Core {
    /// Bring up the device and the per-frame resources.
    pub fn new(config: CoreConfig) -> GraphicsResult<Self> {
        profile_function!();

        let context = DeviceContext::new(&config)?;
        let frames = (0..NUM_FRAMES_IN_FLIGHT)
            .map(|index| FrameSlot::new(&context, index, config.staging_buffer_size))
            .collect::<GraphicsResult<Vec<_>>>()?;

        log::info!(
            "Core created: {} frames in flight, {} byte staging buffer per frame",
            NUM_FRAMES_IN_FLIGHT,
            config.staging_buffer_size
        );

        Ok(Self {
            frames,
            ring: FrameRing::new(NUM_FRAMES_IN_FLIGHT),
            context,
        })
    }

    /// Instance extensions needed to create a surface for `display`.
    ///
    /// Pass the result to [`CoreConfig::with_instance_extensions`].
    pub fn required_surface_extensions(
        display: RawDisplayHandle,
    ) -> GraphicsResult<Vec<&'static CStr>> {
        let names = ash_window::enumerate_required_extensions(display).map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Unsupported display for surface creation: {e:?}"
            ))
        })?;
        // SAFETY: ash-window returns pointers to static extension name constants
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect())
    }

    /// The shared device context, for builders and wrappers constructed directly.
    pub fn handles(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.context.info()
    }

    // Resources

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<Arc<Buffer>> {
        Ok(Arc::new(Buffer::new(&self.context, descriptor)?))
    }

    /// Create a buffer and queue `data` to be uploaded at offset 0.
    pub fn create_buffer_with_data(
        &self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> GraphicsResult<Arc<Buffer>> {
        check_range(descriptor.size, 0, data.len() as u64)?;
        let buffer = self.create_buffer(descriptor)?;
        self.queue_buffer_upload(&buffer, data, 0)?;
        Ok(buffer)
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<Arc<Texture>> {
        Ok(Arc::new(Texture::new(&self.context, descriptor)?))
    }

    pub fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Arc<Sampler> {
        Arc::new(Sampler::new(&self.context, descriptor))
    }

    pub fn create_descriptor_set(&self, layout: &Arc<DescriptorSetLayout>) -> DescriptorSet {
        DescriptorSet::new(&self.context, layout, None)
    }

    /// Allocate a set whose variable-count binding holds `count` descriptors.
    pub fn create_descriptor_set_variable(
        &self,
        layout: &Arc<DescriptorSetLayout>,
        count: u32,
    ) -> DescriptorSet {
        DescriptorSet::new(&self.context, layout, Some(count))
    }

    /// Release a buffer.
    ///
    /// Inside a frame this defers like a plain drop. Outside a frame it waits
    /// for in-flight work and destroys the buffer now, unless other references
    /// to it are still alive.
    pub fn destroy_buffer(&self, buffer: Arc<Buffer>) {
        if self.ring.in_frame() {
            return;
        }
        if let Ok(buffer) = Arc::try_unwrap(buffer) {
            self.wait_for_frames();
            // SAFETY: every submitted frame has completed and this was the last reference
            unsafe { buffer.destroy_immediately() };
        }
    }

    /// Release a texture. Same policy as [`destroy_buffer`](Self::destroy_buffer).
    pub fn destroy_texture(&self, texture: Arc<Texture>) {
        if self.ring.in_frame() {
            return;
        }
        if let Ok(texture) = Arc::try_unwrap(texture) {
            self.wait_for_frames();
            // SAFETY: every submitted frame has completed and this was the last reference
            unsafe { texture.destroy_immediately() };
        }
    }

    fn wait_for_frames(&self) {
        for frame in &self.frames {
            frame.fence.wait();
        }
    }

    // Uploads

    /// Slot that queued uploads belong to.
    ///
    /// Outside a frame that is the slot the next `begin_frame` opens; its fence
    /// is waited so the staging buffer is no longer read by the GPU.
    fn upload_slot(&self) -> &FrameSlot {
        if self.ring.in_frame() {
            &self.frames[self.ring.index()]
        } else {
            let frame = &self.frames[self.ring.next()];
            frame.fence.wait();
            frame
        }
    }

    /// Stage `data` for a copy into `buffer` at `dst_offset`.
    ///
    /// Fails with [`GraphicsError::StagingExhausted`] when this frame's staging
    /// buffer cannot hold the data; retry on a later frame.
    pub fn queue_buffer_upload(
        &self,
        buffer: &Arc<Buffer>,
        data: &[u8],
        dst_offset: u64,
    ) -> GraphicsResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as u64;
        check_range(buffer.size(), dst_offset, size)?;

        let frame = self.upload_slot();
        let mut uploads = frame.uploads.lock();
        let staging_offset = uploads.arena.reserve(size)?;
        frame.staging.write_mapped(staging_offset, data)?;

        buffer.assume_access(vk::AccessFlags2::TRANSFER_WRITE, vk::PipelineStageFlags2::TRANSFER);
        uploads.buffers.push(BufferUpload {
            dst: Arc::clone(buffer),
            staging_offset,
            dst_offset,
            size,
        });
        Ok(())
    }

    /// Stage a packed mip chain for upload into `texture`.
    ///
    /// `data` holds `mip_count` levels (all of the texture's by default) back
    /// to back, largest first, every layer of a level together. The texture
    /// ends up shader-readable.
    pub fn queue_texture_upload(
        &self,
        texture: &Arc<Texture>,
        data: &[u8],
        mip_count: Option<u32>,
    ) -> GraphicsResult<()> {
        let regions = texture_regions(texture, mip_count)?;
        let total: u64 = regions.iter().map(|r| r.size).sum();
        if (data.len() as u64) < total {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture upload needs {total} bytes, got {}",
                data.len()
            )));
        }

        let frame = self.upload_slot();
        let mut uploads = frame.uploads.lock();
        let alignment = u64::from(texture.format().block_size().max(4).next_power_of_two());
        let staging_offset = uploads.arena.reserve_aligned(total, alignment)?;
        frame
            .staging
            .write_mapped(staging_offset, &data[..total as usize])?;

        let from = texture.assume_layout(ImageLayout::ShaderReadOnly);
        uploads.textures.push(TextureUpload {
            src: None,
            texture: Arc::clone(texture),
            src_offset: staging_offset,
            from,
            regions,
        });
        Ok(())
    }

    /// Copy a packed mip chain already in device memory into `texture`.
    pub fn queue_buffer_to_texture_copy(
        &self,
        buffer: &Arc<Buffer>,
        texture: &Arc<Texture>,
        buffer_offset: u64,
    ) -> GraphicsResult<()> {
        let regions = texture_regions(texture, None)?;
        let total: u64 = regions.iter().map(|r| r.size).sum();
        check_range(buffer.size(), buffer_offset, total)?;

        let frame = self.upload_slot();
        let from = texture.assume_layout(ImageLayout::ShaderReadOnly);
        frame.uploads.lock().textures.push(TextureUpload {
            src: Some(Arc::clone(buffer)),
            texture: Arc::clone(texture),
            src_offset: buffer_offset,
            from,
            regions,
        });
        Ok(())
    }

    /// Bytes already staged for the upload slot.
    pub fn staging_used(&self) -> u64 {
        self.upload_slot().uploads.lock().arena.offset()
    }

    // Frame cycle

    /// Open the next frame slot.
    ///
    /// Blocks until the GPU has finished the last frame recorded on that slot,
    /// then releases everything queued for deletion on it.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn begin_frame(&mut self) {
        profile_function!();

        let slot = self.ring.begin();
        let frame = &self.frames[slot];

        {
            profile_scope!("wait_frame_fence");
            frame.fence.wait();
        }
        frame.fence.reset();

        self.context.deletion().set_current_slot(slot);
        // SAFETY: the slot's fence was just waited on
        unsafe { self.context.cleanup_frame_slot(slot) };

        frame.upload.reset();
        frame.graphics.reset();
        frame.upload.begin();
        frame.graphics.begin();
    }

    /// Record queued uploads, submit uploads then graphics work, and close the frame.
    ///
    /// Graphics work waits on the uploads and signals the slot's fence. Use
    /// [`end_frame_for_present`](Self::end_frame_for_present) when the frame
    /// is followed by [`Swapchain::present`].
    ///
    /// # Panics
    ///
    /// Panics if no frame is open.
    pub fn end_frame(&mut self) {
        self.submit_frame(false);
    }

    /// Like [`end_frame`](Self::end_frame), but also signals the slot's
    /// completion semaphore for the present that must follow.
    ///
    /// # Panics
    ///
    /// Panics if no frame is open.
    pub fn end_frame_for_present(&mut self) {
        self.submit_frame(true);
    }

    fn submit_frame(&mut self, signal_completion: bool) {
        profile_function!();

        self.ring.end();
        let frame = &mut self.frames[self.ring.index()];
        frame.completion_signaled = signal_completion;
        let frame = &*frame;
        let mut uploads = frame.uploads.lock();

        {
            profile_scope!("record_uploads");
            record_uploads(&frame.upload, &frame.staging, &uploads);
        }
        frame.upload.end();
        frame.graphics.end();

        let upload_cmds = [vk::CommandBufferSubmitInfo::default().command_buffer(frame.upload.handle())];
        let upload_signal = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.upload_complete.handle())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let graphics_cmds =
            [vk::CommandBufferSubmitInfo::default().command_buffer(frame.graphics.handle())];
        let graphics_wait = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.upload_complete.handle())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let completion_signal = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.frame_complete.handle())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        // A binary semaphore must not be signaled again before a wait consumes it.
        let graphics_signal: &[vk::SemaphoreSubmitInfo] =
            if signal_completion { &completion_signal } else { &[] };

        let submits = [
            vk::SubmitInfo2::default()
                .command_buffer_infos(&upload_cmds)
                .signal_semaphore_infos(&upload_signal),
            vk::SubmitInfo2::default()
                .wait_semaphore_infos(&graphics_wait)
                .command_buffer_infos(&graphics_cmds)
                .signal_semaphore_infos(graphics_signal),
        ];
        {
            profile_scope!("queue_submit");
            self.context
                .submit(self.context.queues().graphics, &submits, frame.fence.handle());
        }

        uploads.clear();
        drop(uploads);
        frame_mark!();
    }

    pub fn in_frame(&self) -> bool {
        self.ring.in_frame()
    }

    /// Command buffer for the current frame's graphics work.
    pub fn frame_command_buffer(&self) -> &CommandBuffer {
        &self.frames[self.ring.index()].graphics
    }

    /// Signaled when the current frame's graphics work completes.
    ///
    /// Only frames closed with [`end_frame_for_present`](Self::end_frame_for_present)
    /// signal it.
    pub fn frame_completion_semaphore(&self) -> &Semaphore {
        &self.frames[self.ring.index()].frame_complete
    }

    /// Whether the last closed frame signaled its completion semaphore.
    pub fn frame_completion_signaled(&self) -> bool {
        !self.ring.in_frame() && self.frames[self.ring.index()].completion_signaled
    }

    pub fn frame_index(&self) -> usize {
        self.ring.index()
    }

    pub fn next_frame_index(&self) -> usize {
        self.ring.next()
    }

    pub fn previous_frame_index(&self) -> usize {
        self.ring.previous()
    }

    pub fn num_frames_in_flight(&self) -> usize {
        self.ring.count()
    }

    /// Run a one-off command buffer and block until it completes.
    pub fn immediate_submit(&self, record: impl FnOnce(&CommandBuffer)) {
        self.context.immediate_submit(record);
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) {
        self.context.wait_idle();
    }

    // Presentation

    /// Create a surface for a window.
    ///
    /// The instance must have been created with
    /// [`required_surface_extensions`](Self::required_surface_extensions).
    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<Surface> {
        // SAFETY: the caller keeps the window alive for the surface's lifetime
        let surface = unsafe {
            ash_window::create_surface(
                self.context.entry(),
                self.context.instance(),
                display,
                window,
                None,
            )
        }
        .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to create surface: {e:?}")))?;
        Ok(Surface::new(&self.context, surface))
    }

    pub fn create_swapchain(&self, surface: Surface, width: u32, height: u32, vsync: bool) -> Swapchain {
        Swapchain::new(&self.context, surface, width, height, vsync)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.context.wait_idle();
        // Frame objects queue their deletions as they drop; the context flushes
        // them once the last reference to it goes.
        log::debug!("Core destroyed");
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("device", &self.context.info().name)
            .field("frame_index", &self.ring.index())
            .field("in_frame", &self.ring.in_frame())
            .finish()
    }
}

fn texture_regions(texture: &Texture, mip_count: Option<u32>) -> GraphicsResult<Vec<MipRegion>> {
    let mips = mip_count.unwrap_or_else(|| texture.mip_level_count());
    if mips == 0 || mips > texture.mip_level_count() {
        return Err(GraphicsError::InvalidParameter(format!(
            "mip count {mips} out of range for {:?} with {} levels",
            texture.label(),
            texture.mip_level_count()
        )));
    }
    if texture.format().is_depth_stencil() {
        return Err(GraphicsError::InvalidParameter(format!(
            "cannot upload texel data into depth texture {:?}",
            texture.label()
        )));
    }
    Ok(mip_regions(
        texture.size(),
        texture.image_layers(),
        texture.format(),
        mips,
    ))
}

fn record_uploads(cmd: &CommandBuffer, staging: &Buffer, uploads: &PendingUploads) {
    for upload in &uploads.buffers {
        staging.copy_to(cmd, &upload.dst, upload.size, upload.staging_offset, upload.dst_offset);
    }

    let device = cmd.context().device();
    for upload in &uploads.textures {
        let texture = &upload.texture;
        let src = match upload.src.as_deref() {
            Some(buffer) => {
                // May have been written by a staged copy earlier in this batch.
                buffer.acquire(cmd, vk::AccessFlags2::TRANSFER_READ);
                buffer
            }
            None => staging,
        };
        let regions: Vec<vk::BufferImageCopy> = upload
            .regions
            .iter()
            .map(|region| vk::BufferImageCopy {
                buffer_offset: upload.src_offset + region.offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: texture.aspect(),
                    mip_level: region.level,
                    base_array_layer: 0,
                    layer_count: texture.image_layers(),
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: region.extent.width,
                    height: region.extent.height,
                    depth: region.extent.depth,
                },
            })
            .collect();

        texture.write_layout_transition(cmd, upload.from, ImageLayout::TransferDst);
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd.handle(),
                src.handle(),
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
        texture.write_layout_transition(cmd, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly);
    }
}
