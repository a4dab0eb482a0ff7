//! GPU texture resource.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::deletion::{PendingObject, ResourceReleaser};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{Extent3d, TextureDescriptor, TextureDimension, TextureFormat};
use crate::vk_check;
use crate::vulkan::conversion::{
    aspect_mask, base_texture_usage, convert_image_type, convert_sample_count,
    convert_texture_format, convert_view_type,
};
use crate::vulkan::{CommandBuffer, DeviceContext, ImageLayout};

/// Layout and last access, the source half of the next barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayoutState {
    layout: ImageLayout,
    access: vk::AccessFlags2,
    stage: vk::PipelineStageFlags2,
}

/// A GPU texture resource.
///
/// Owned textures hold their image memory. Borrowed textures wrap an image
/// owned elsewhere (a swapchain) and only destroy their view.
///
/// # Example
///
/// ```ignore
/// let texture = core.create_texture(
///     &TextureDescriptor::new_2d(512, 512, TextureFormat::Rgba8UnormSrgb)
///         .with_full_mip_chain()
///         .with_label("albedo"),
/// )?;
/// core.queue_texture_upload(&texture, &pixels, None)?;
/// ```
pub struct Texture {
    context: Arc<DeviceContext>,
    image: vk::Image,
    view: vk::ImageView,
    /// `None` for borrowed textures.
    allocation: Option<Allocation>,
    borrowed: bool,
    descriptor: TextureDescriptor,
    vk_format: vk::Format,
    usage: vk::ImageUsageFlags,
    state: Mutex<LayoutState>,
}

impl Texture {
    /// Create an owned texture (called by Core).
    pub(crate) fn new(
        context: &Arc<DeviceContext>,
        descriptor: &TextureDescriptor,
    ) -> GraphicsResult<Self> {
        validate_descriptor(descriptor)?;

        let vk_format = convert_texture_format(descriptor.format);
        let image_type = convert_image_type(descriptor.dimension);
        let flags = if descriptor.dimension.is_cube() {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let mut usage = base_texture_usage(descriptor.format, descriptor.render_target);
        if context.image_format_supported(
            vk_format,
            image_type,
            usage | vk::ImageUsageFlags::STORAGE,
            flags,
        ) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        // validate_descriptor already rejected unsupported counts
        let samples = convert_sample_count(descriptor.sample_count)
            .unwrap_or(vk::SampleCountFlags::TYPE_1);

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth: descriptor.size.depth.max(1),
            })
            .mip_levels(descriptor.mip_level_count)
            .array_layers(descriptor.image_layers())
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let device = context.device();
        let image = vk_check!(unsafe { device.create_image(&image_info, None) });
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let label = descriptor.label.as_deref().unwrap_or("texture");
        let allocation =
            context.allocate_memory(label, requirements, MemoryLocation::GpuOnly, false);
        vk_check!(unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())
        });

        let view = create_view(
            context,
            image,
            vk_format,
            convert_view_type(descriptor.dimension),
            full_range(descriptor),
        );

        if let Some(label) = &descriptor.label {
            context.set_object_name(image, label);
            context.set_object_name(view, label);
        }

        Ok(Self {
            context: Arc::clone(context),
            image,
            view,
            allocation: Some(allocation),
            borrowed: false,
            descriptor: descriptor.clone(),
            vk_format,
            usage,
            state: Mutex::new(LayoutState {
                layout: ImageLayout::Undefined,
                access: vk::AccessFlags2::NONE,
                stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            }),
        })
    }

    /// Wrap an image owned elsewhere. Only the view is destroyed on drop.
    pub(crate) fn borrowed(
        context: &Arc<DeviceContext>,
        image: vk::Image,
        vk_format: vk::Format,
        format: TextureFormat,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        let descriptor = TextureDescriptor::new_2d(width, height, format);
        let view = create_view(
            context,
            image,
            vk_format,
            vk::ImageViewType::TYPE_2D,
            full_range(&descriptor),
        );

        Self {
            context: Arc::clone(context),
            image,
            view,
            allocation: None,
            borrowed: true,
            descriptor,
            vk_format,
            usage,
            state: Mutex::new(LayoutState {
                layout: ImageLayout::Undefined,
                access: vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            }),
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// View covering every mip level and layer.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    pub fn width(&self) -> u32 {
        self.descriptor.size.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.size.height
    }

    pub fn depth(&self) -> u32 {
        self.descriptor.size.depth.max(1)
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn vk_format(&self) -> vk::Format {
        self.vk_format
    }

    pub fn dimension(&self) -> TextureDimension {
        self.descriptor.dimension
    }

    pub fn mip_level_count(&self) -> u32 {
        self.descriptor.mip_level_count
    }

    /// Array layers of the native image (cube faces included).
    pub fn image_layers(&self) -> u32 {
        self.descriptor.image_layers()
    }

    pub fn sample_count(&self) -> u32 {
        self.descriptor.sample_count
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Whether the texture can be bound as a storage image.
    pub fn supports_storage(&self) -> bool {
        self.usage.contains(vk::ImageUsageFlags::STORAGE)
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_mask(self.descriptor.format)
    }

    /// Whether the image is owned by someone else (a swapchain).
    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Layout the texture was last transitioned to.
    pub fn layout(&self) -> ImageLayout {
        self.state.lock().layout
    }

    /// Subresource range covering the whole image.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        full_range(&self.descriptor)
    }

    /// Transition the whole image to `layout` with that layout's usual access.
    pub fn transition(&self, cmd: &CommandBuffer, layout: ImageLayout) {
        self.acquire(cmd, layout, layout.access(), layout.stage());
    }

    /// Barrier from the tracked state to (`layout`, `access`, `stage`).
    pub fn acquire(
        &self,
        cmd: &CommandBuffer,
        layout: ImageLayout,
        access: vk::AccessFlags2,
        stage: vk::PipelineStageFlags2,
    ) {
        let mut state = self.state.lock();
        let next = LayoutState {
            layout,
            access,
            stage,
        };
        self.record_barrier(cmd, *state, next);
        *state = next;
    }

    /// Record an explicit `from` to `to` transition.
    ///
    /// The tracked state is neither read nor updated; pair this with
    /// [`assume_layout`](Self::assume_layout) when the barrier is recorded out
    /// of submission order.
    pub fn write_layout_transition(&self, cmd: &CommandBuffer, from: ImageLayout, to: ImageLayout) {
        let prev = LayoutState {
            layout: from,
            access: from.access(),
            stage: from.stage(),
        };
        let next = LayoutState {
            layout: to,
            access: to.access(),
            stage: to.stage(),
        };
        self.record_barrier(cmd, prev, next);
    }

    /// Record that queued work will leave the texture in `layout`.
    pub(crate) fn assume_layout(&self, layout: ImageLayout) -> ImageLayout {
        let mut state = self.state.lock();
        let previous = state.layout;
        *state = LayoutState {
            layout,
            access: layout.access(),
            stage: layout.stage(),
        };
        previous
    }

    fn record_barrier(&self, cmd: &CommandBuffer, from: LayoutState, to: LayoutState) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(from.stage)
            .src_access_mask(from.access)
            .dst_stage_mask(to.stage)
            .dst_access_mask(to.access)
            .old_layout(from.layout.to_vk())
            .new_layout(to.layout.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range());
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        cmd.pipeline_barrier(&dependency);
    }

    /// Create a view onto a subset of mips and layers.
    pub fn create_view(
        &self,
        view_type: vk::ImageViewType,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> GraphicsResult<TextureView> {
        if base_mip + mip_count > self.mip_level_count()
            || base_layer + layer_count > self.image_layers()
            || mip_count == 0
            || layer_count == 0
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "view mips {base_mip}..+{mip_count}, layers {base_layer}..+{layer_count} \
                 out of range for {:?}",
                self.label()
            )));
        }

        let range = vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: base_mip,
            level_count: mip_count,
            base_array_layer: base_layer,
            layer_count,
        };
        let view = create_view(&self.context, self.image, self.vk_format, view_type, range);
        Ok(TextureView {
            context: Arc::clone(&self.context),
            view,
        })
    }

    /// Destroy the texture now instead of deferring.
    ///
    /// # Safety
    ///
    /// The GPU must not be using the texture.
    pub(crate) unsafe fn destroy_immediately(mut self) {
        let mut releaser = self.context.releaser();
        releaser.destroy_object(PendingObject::ImageView(self.view));
        if !self.borrowed {
            releaser.destroy_object(PendingObject::Image(self.image));
        }
        if let Some(allocation) = self.allocation.take() {
            releaser.free_memory(allocation);
        }
        drop(releaser);
        self.view = vk::ImageView::null();
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.view == vk::ImageView::null() {
            return;
        }
        let deletion = self.context.deletion();
        deletion.queue_object_deletion(PendingObject::ImageView(self.view));
        if !self.borrowed {
            deletion.queue_object_deletion(PendingObject::Image(self.image));
        }
        if let Some(allocation) = self.allocation.take() {
            deletion.queue_memory_free(allocation);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("dimension", &self.descriptor.dimension)
            .field("mips", &self.descriptor.mip_level_count)
            .field("borrowed", &self.borrowed)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);

/// A view onto part of a texture. The texture must outlive it.
pub struct TextureView {
    context: Arc<DeviceContext>,
    view: vk::ImageView,
}

impl TextureView {
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for TextureView {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::ImageView(self.view));
    }
}

fn create_view(
    context: &DeviceContext,
    image: vk::Image,
    format: vk::Format,
    view_type: vk::ImageViewType,
    range: vk::ImageSubresourceRange,
) -> vk::ImageView {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(range);
    vk_check!(unsafe { context.device().create_image_view(&view_info, None) })
}

fn full_range(descriptor: &TextureDescriptor) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(descriptor.format),
        base_mip_level: 0,
        level_count: descriptor.mip_level_count,
        base_array_layer: 0,
        layer_count: descriptor.image_layers(),
    }
}

/// Reject descriptors that would be invalid native create calls.
pub(crate) fn validate_descriptor(descriptor: &TextureDescriptor) -> GraphicsResult<()> {
    let size = descriptor.size;
    if size.width == 0 || size.height == 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture size {}x{} has a zero dimension",
            size.width, size.height
        )));
    }
    if descriptor.dimension == TextureDimension::D3 {
        if size.depth == 0 {
            return Err(GraphicsError::InvalidParameter(
                "volume texture depth cannot be zero".to_string(),
            ));
        }
        if descriptor.layers > 1 {
            return Err(GraphicsError::InvalidParameter(format!(
                "volume textures cannot have array layers, got {}",
                descriptor.layers
            )));
        }
    } else if size.depth > 1 {
        return Err(GraphicsError::InvalidParameter(format!(
            "depth {} is only valid for volume textures",
            size.depth
        )));
    }
    let max_mips = descriptor.max_mip_levels();
    if descriptor.mip_level_count == 0 || descriptor.mip_level_count > max_mips {
        return Err(GraphicsError::InvalidParameter(format!(
            "mip level count {} outside 1..={} for {}x{}x{}",
            descriptor.mip_level_count, max_mips, size.width, size.height, size.depth
        )));
    }
    if convert_sample_count(descriptor.sample_count).is_none() {
        return Err(GraphicsError::InvalidParameter(format!(
            "unsupported sample count {}",
            descriptor.sample_count
        )));
    }
    if descriptor.sample_count > 1 && descriptor.mip_level_count > 1 {
        return Err(GraphicsError::InvalidParameter(
            "multisampled textures cannot have mip levels".to_string(),
        ));
    }
    if descriptor.dimension.is_cube() && size.width != size.height {
        return Err(GraphicsError::InvalidParameter(format!(
            "cube faces must be square, got {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_descriptor() {
        let desc = TextureDescriptor::new_2d(256, 256, TextureFormat::Rgba8Unorm)
            .with_full_mip_chain();
        assert!(validate_descriptor(&desc).is_ok());

        let too_many_mips = desc.clone().with_mip_levels(10);
        assert!(validate_descriptor(&too_many_mips).is_err());

        let zero = TextureDescriptor::new_2d(0, 16, TextureFormat::Rgba8Unorm);
        assert!(validate_descriptor(&zero).is_err());

        let bad_samples = TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm)
            .with_sample_count(3);
        assert!(validate_descriptor(&bad_samples).is_err());
    }

    #[test]
    fn test_volume_mips_count_depth() {
        let desc = TextureDescriptor::new_3d(4, 4, 16, TextureFormat::Rgba8Unorm);
        assert!(validate_descriptor(&desc.clone().with_mip_levels(5)).is_ok());
        assert!(validate_descriptor(&desc.with_mip_levels(6)).is_err());
    }

    #[test]
    fn test_volume_rejects_layers_and_flat_rejects_depth() {
        let layered = TextureDescriptor::new_3d(8, 8, 8, TextureFormat::Rgba8Unorm).with_layers(4);
        assert!(matches!(
            validate_descriptor(&layered),
            Err(GraphicsError::InvalidParameter(_))
        ));

        let mut deep = TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm);
        deep.size.depth = 4;
        assert!(matches!(
            validate_descriptor(&deep),
            Err(GraphicsError::InvalidParameter(_))
        ));

        let volume = TextureDescriptor::new_3d(8, 8, 8, TextureFormat::Rgba8Unorm);
        assert!(validate_descriptor(&volume).is_ok());
    }

    #[test]
    fn test_cube_must_be_square() {
        let mut desc = TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float);
        assert!(validate_descriptor(&desc).is_ok());
        desc.size.height = 32;
        assert!(validate_descriptor(&desc).is_err());
    }

    #[test]
    fn test_full_range_covers_cube_faces() {
        let desc = TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float)
            .with_layers(2)
            .with_full_mip_chain();
        let range = full_range(&desc);
        assert_eq!(range.layer_count, 12);
        assert_eq!(range.level_count, 7);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
