//! Descriptor set layouts, descriptor sets, and batched descriptor writes.

use std::sync::Arc;

use ash::vk;

use crate::deletion::PendingObject;
use crate::resources::{Buffer, Sampler, Texture};
use crate::vk_check;
use crate::vulkan::{DeviceContext, ImageLayout};

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingInfo {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

/// Fluent accumulation of descriptor set layout bindings.
///
/// Flag methods apply to the most recently added binding.
///
/// ```ignore
/// let layout = DescriptorSetLayoutBuilder::new()
///     .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)
///     .binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4096, vk::ShaderStageFlags::FRAGMENT)
///     .partially_bound()
///     .update_after_bind()
///     .build(core.handles());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<BindingInfo>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(BindingInfo {
            binding,
            descriptor_type,
            count,
            stages,
            flags: vk::DescriptorBindingFlags::empty(),
        });
        self
    }

    /// Unused array elements need not be written.
    pub fn partially_bound(self) -> Self {
        self.with_last_flag(vk::DescriptorBindingFlags::PARTIALLY_BOUND)
    }

    /// Elements may be rewritten while the set is bound by pending work.
    pub fn update_after_bind(self) -> Self {
        self.with_last_flag(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND)
    }

    /// The array length is chosen at allocation time, up to `count`.
    pub fn variable_descriptor_count(self) -> Self {
        self.with_last_flag(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
    }

    fn with_last_flag(mut self, flag: vk::DescriptorBindingFlags) -> Self {
        let last = self
            .bindings
            .last_mut();
        assert!(last.is_some(), "binding flag set before any binding was added");
        if let Some(binding) = last {
            binding.flags |= flag;
        }
        self
    }

    pub fn bindings(&self) -> &[BindingInfo] {
        &self.bindings
    }

    /// Layout flags implied by the binding flags.
    pub fn create_flags(&self) -> vk::DescriptorSetLayoutCreateFlags {
        if self
            .bindings
            .iter()
            .any(|b| b.flags.contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND))
        {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        }
    }

    pub fn build(&self, context: &Arc<DeviceContext>) -> Arc<DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();
        let binding_flags: Vec<vk::DescriptorBindingFlags> =
            self.bindings.iter().map(|b| b.flags).collect();

        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(self.create_flags())
            .bindings(&vk_bindings)
            .push_next(&mut flags_info);

        let layout = vk_check!(unsafe {
            context
                .device()
                .create_descriptor_set_layout(&create_info, None)
        });

        Arc::new(DescriptorSetLayout {
            context: Arc::clone(context),
            layout,
            bindings: self.bindings.clone(),
        })
    }
}

/// The schema of a descriptor set.
pub struct DescriptorSetLayout {
    context: Arc<DeviceContext>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<BindingInfo>,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &[BindingInfo] {
        &self.bindings
    }

    pub fn binding(&self, index: u32) -> Option<&BindingInfo> {
        self.bindings.iter().find(|b| b.binding == index)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::DescriptorSetLayout(self.layout));
    }
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// A descriptor set allocated from the shared pool.
///
/// Dropping it queues the set to be returned to the pool.
pub struct DescriptorSet {
    context: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    layout: Arc<DescriptorSetLayout>,
}

impl DescriptorSet {
    pub(crate) fn new(
        context: &Arc<DeviceContext>,
        layout: &Arc<DescriptorSetLayout>,
        variable_count: Option<u32>,
    ) -> Self {
        let (pool, set) = context.allocate_descriptor_set(layout.handle(), variable_count);
        Self {
            context: Arc::clone(context),
            pool,
            set,
            layout: Arc::clone(layout),
        }
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Start a batch of writes to this set.
    pub fn updater(&self) -> DescriptorSetUpdater<'_> {
        DescriptorSetUpdater::new(self)
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_descriptor_set_free(self.pool, self.set);
    }
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DescriptorSet").field(&self.set).finish()
    }
}

enum PendingWrite {
    Image {
        binding: u32,
        element: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    Buffer {
        binding: u32,
        element: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
}

/// Collects descriptor writes and submits them in one update call.
///
/// Binding types come from the set's layout.
pub struct DescriptorSetUpdater<'a> {
    set: &'a DescriptorSet,
    writes: Vec<PendingWrite>,
}

impl<'a> DescriptorSetUpdater<'a> {
    pub fn new(set: &'a DescriptorSet) -> Self {
        Self {
            set,
            writes: Vec::new(),
        }
    }

    fn descriptor_type(&self, binding: u32) -> vk::DescriptorType {
        match self.set.layout.binding(binding) {
            Some(info) => info.descriptor_type,
            None => panic!("binding {binding} is not part of the descriptor set layout"),
        }
    }

    /// Write element 0 of `binding`, in the layout the binding type implies.
    pub fn add_texture(self, binding: u32, texture: &Texture, sampler: Option<&Sampler>) -> Self {
        self.add_texture_with_layout(binding, 0, texture, sampler, ImageLayout::Undefined)
    }

    /// Write `element` of `binding`.
    ///
    /// With [`ImageLayout::Undefined`] the layout is chosen from the binding
    /// type: general for storage images, shader-read-only otherwise.
    pub fn add_texture_with_layout(
        mut self,
        binding: u32,
        element: u32,
        texture: &Texture,
        sampler: Option<&Sampler>,
        layout: ImageLayout,
    ) -> Self {
        let descriptor_type = self.descriptor_type(binding);
        let layout = resolve_image_layout(descriptor_type, layout);
        let info = vk::DescriptorImageInfo {
            sampler: sampler.map_or(vk::Sampler::null(), Sampler::handle),
            image_view: texture.view(),
            image_layout: layout.to_vk(),
        };
        self.writes.push(PendingWrite::Image {
            binding,
            element,
            descriptor_type,
            info,
        });
        self
    }

    /// Write a whole buffer to element 0 of `binding`.
    pub fn add_buffer(mut self, binding: u32, buffer: &Buffer) -> Self {
        let descriptor_type = self.descriptor_type(binding);
        self.writes.push(PendingWrite::Buffer {
            binding,
            element: 0,
            descriptor_type,
            info: vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            },
        });
        self
    }

    /// Number of writes collected so far.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Issue every collected write in a single call.
    pub fn update(self) {
        if self.writes.is_empty() {
            return;
        }

        let vk_writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Image {
                    binding,
                    element,
                    descriptor_type,
                    info,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(self.set.set)
                    .dst_binding(*binding)
                    .dst_array_element(*element)
                    .descriptor_type(*descriptor_type)
                    .image_info(std::slice::from_ref(info)),
                PendingWrite::Buffer {
                    binding,
                    element,
                    descriptor_type,
                    info,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(self.set.set)
                    .dst_binding(*binding)
                    .dst_array_element(*element)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info)),
            })
            .collect();

        unsafe {
            self.set
                .context
                .device()
                .update_descriptor_sets(&vk_writes, &[])
        };
    }
}

fn resolve_image_layout(descriptor_type: vk::DescriptorType, layout: ImageLayout) -> ImageLayout {
    match layout {
        ImageLayout::Undefined if descriptor_type == vk::DescriptorType::STORAGE_IMAGE => {
            ImageLayout::General
        }
        ImageLayout::Undefined => ImageLayout::ShaderReadOnly,
        other => other,
    }
}
