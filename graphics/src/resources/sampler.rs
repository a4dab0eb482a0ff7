//! GPU sampler resource.

use std::sync::Arc;

use ash::vk;

use crate::deletion::PendingObject;
use crate::types::{AddressMode, FilterMode, MipmapMode, SamplerDescriptor};
use crate::vk_check;
use crate::vulkan::DeviceContext;
use crate::vulkan::conversion::{convert_address_mode, convert_filter_mode, convert_mipmap_mode};

/// A GPU texture sampler.
///
/// # Example
///
/// ```ignore
/// let sampler = SamplerBuilder::new()
///     .filter(FilterMode::Nearest)
///     .address_mode(AddressMode::ClampToEdge)
///     .build(core.handles());
/// ```
pub struct Sampler {
    context: Arc<DeviceContext>,
    sampler: vk::Sampler,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    /// Create a sampler. Anisotropy is clamped to what the device supports.
    pub fn new(context: &Arc<DeviceContext>, descriptor: &SamplerDescriptor) -> Self {
        let max_anisotropy = if context.features().sampler_anisotropy {
            descriptor
                .max_anisotropy
                .min(context.limits().max_sampler_anisotropy)
        } else {
            1.0
        };
        let address_mode = convert_address_mode(descriptor.address_mode);

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_mode(descriptor.mipmap_mode))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .min_lod(0.0)
            .max_lod(descriptor.max_lod)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        let sampler = vk_check!(unsafe { context.device().create_sampler(&sampler_info, None) });

        Self {
            context: Arc::clone(context),
            sampler,
            descriptor: descriptor.clone(),
        }
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::Sampler(self.sampler));
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .field("address_mode", &self.descriptor.address_mode)
            .finish()
    }
}

// Ensure Sampler is Send + Sync
static_assertions::assert_impl_all!(Sampler: Send, Sync);

/// Fluent construction of a [`Sampler`].
#[derive(Debug, Clone, Default)]
pub struct SamplerBuilder {
    descriptor: SamplerDescriptor,
}

impl SamplerBuilder {
    /// Linear filtering, repeat addressing, no anisotropy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both magnification and minification filters.
    pub fn filter(mut self, filter: FilterMode) -> Self {
        self.descriptor.mag_filter = filter;
        self.descriptor.min_filter = filter;
        self
    }

    pub fn mag_filter(mut self, filter: FilterMode) -> Self {
        self.descriptor.mag_filter = filter;
        self
    }

    pub fn min_filter(mut self, filter: FilterMode) -> Self {
        self.descriptor.min_filter = filter;
        self
    }

    pub fn mipmap_mode(mut self, mode: MipmapMode) -> Self {
        self.descriptor.mipmap_mode = mode;
        self
    }

    pub fn address_mode(mut self, mode: AddressMode) -> Self {
        self.descriptor.address_mode = mode;
        self
    }

    pub fn max_anisotropy(mut self, anisotropy: f32) -> Self {
        self.descriptor.max_anisotropy = anisotropy.max(1.0);
        self
    }

    pub fn max_lod(mut self, lod: f32) -> Self {
        self.descriptor.max_lod = lod;
        self
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn build(&self, context: &Arc<DeviceContext>) -> Sampler {
        Sampler::new(context, &self.descriptor)
    }
}
