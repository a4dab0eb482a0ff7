//! The device context shared by every GPU object.
//!
//! [`DeviceContext`] is created once by [`Core::new`](crate::Core::new) and
//! handed to every resource as an `Arc`. It is read-only after construction;
//! the pools, allocator, and queues that need external synchronization sit
//! behind their own locks.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use super::allocator;
use super::command::CommandBuffer;
use super::debug::DebugMessenger;
use super::device::{self, FeatureSupport, QueueFamilies};
use super::instance;
use crate::config::{CoreConfig, DescriptorPoolSizes, NUM_FRAMES_IN_FLIGHT};
use crate::deletion::{FrameDeletionQueues, VulkanReleaser};
use crate::error::{GraphicsError, GraphicsResult};
use crate::{profile_function, vk_check};

/// Queue handles and the families they were taken from.
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub async_compute: vk::Queue,
    pub families: QueueFamilies,
}

/// Information about the selected GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Driver-reported device name.
    pub name: String,
    /// Discrete, integrated, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Nanoseconds per GPU timestamp tick.
    pub timestamp_period: f32,
    /// Vulkan API version supported by the device.
    pub api_version: u32,
}

/// Device, queues, pools, and allocator shared by all GPU objects.
pub struct DeviceContext {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queues: Queues,
    /// Held around every submit/present/wait-idle on any queue.
    submit_lock: Mutex<()>,
    /// Pool for the per-frame command buffers. Only the frame thread records
    /// into buffers from this pool.
    command_pool: Mutex<vk::CommandPool>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    deletion: FrameDeletionQueues<Allocation>,
    info: DeviceInfo,
    features: FeatureSupport,
    limits: vk::PhysicalDeviceLimits,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("info", &self.info)
            .field("queues", &self.queues)
            .field("validation", &self.debug_messenger.is_some())
            .finish()
    }
}

impl DeviceContext {
    /// Load Vulkan, create the instance and device, and set up the shared pools.
    pub fn new(config: &CoreConfig) -> GraphicsResult<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let created = instance::create_instance(&entry, config)?;
        let instance = created.instance;

        let debug_messenger = if created.validation {
            match DebugMessenger::new(&entry, &instance, config.debug_receiver.clone()) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        match Self::with_instance(entry, instance, debug_messenger, config) {
            Ok(context) => Ok(Arc::new(context)),
            Err((e, instance, messenger)) => {
                unsafe {
                    if let Some(messenger) = &messenger {
                        messenger.destroy();
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn with_instance(
        entry: ash::Entry,
        instance: ash::Instance,
        debug_messenger: Option<DebugMessenger>,
        config: &CoreConfig,
    ) -> Result<Self, (GraphicsError, ash::Instance, Option<DebugMessenger>)> {
        let selected = match device::select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => return Err((e, instance, debug_messenger)),
        };
        let device = match device::create_logical_device(&instance, &selected) {
            Ok(device) => device,
            Err(e) => return Err((e, instance, debug_messenger)),
        };
        let allocator =
            match allocator::create_allocator(&instance, selected.physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err((e, instance, debug_messenger));
                }
            };

        let families = selected.queue_families;
        let queues = unsafe {
            Queues {
                graphics: device.get_device_queue(families.graphics, 0),
                present: device.get_device_queue(families.present, 0),
                async_compute: device.get_device_queue(families.async_compute, 0),
                families,
            }
        };

        let command_pool = create_command_pool(
            &device,
            families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        );
        let descriptor_pool = create_descriptor_pool(&device, &config.descriptor_pool);

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let debug_utils = debug_messenger
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let properties = unsafe { instance.get_physical_device_properties(selected.physical_device) };
        let info = DeviceInfo {
            name: device::device_name(&properties),
            device_type: properties.device_type,
            timestamp_period: properties.limits.timestamp_period,
            api_version: properties.api_version,
        };

        log::info!(
            "Selected GPU: {} ({:?}), queue families: graphics {}, async compute {}, present {}",
            info.name,
            info.device_type,
            families.graphics,
            families.async_compute,
            families.present
        );
        log::info!(
            "Vulkan core initialized (validation: {})",
            debug_messenger.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            debug_utils,
            physical_device: selected.physical_device,
            device,
            queues,
            submit_lock: Mutex::new(()),
            command_pool: Mutex::new(command_pool),
            descriptor_pool: Mutex::new(descriptor_pool),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            surface_loader,
            swapchain_loader,
            deletion: FrameDeletionQueues::new(NUM_FRAMES_IN_FLIGHT),
            info,
            features: selected.features,
            limits: properties.limits,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn features(&self) -> &FeatureSupport {
        &self.features
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Whether validation and debug labels are active.
    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub(crate) fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Deletion queues every GPU object pushes onto when dropped.
    pub fn deletion(&self) -> &FrameDeletionQueues<Allocation> {
        &self.deletion
    }

    /// Allocate device memory; aborts when the driver is out of memory.
    #[track_caller]
    pub(crate) fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Allocation {
        allocator::allocate(&self.allocator, name, requirements, location, linear)
    }

    /// A releaser that destroys objects on the spot.
    pub(crate) fn releaser(&self) -> VulkanReleaser<'_> {
        VulkanReleaser::new(&self.device, &self.allocator, &self.descriptor_pool)
    }

    /// Release everything queued on `slot`.
    ///
    /// # Safety
    ///
    /// The GPU must be done with every submission made while `slot` was current.
    pub(crate) unsafe fn cleanup_frame_slot(&self, slot: usize) {
        let mut releaser = self.releaser();
        // SAFETY: forwarded from the caller
        unsafe { self.deletion.cleanup_slot(slot, &mut releaser) };
    }

    /// Attach a debug name to a Vulkan object. No-op without validation.
    pub fn set_object_name<H: Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("Failed to set object name {:?}: {:?}", name, e);
        }
    }

    /// Allocate primary command buffers from the frame command pool.
    pub(crate) fn allocate_command_buffers(&self, count: u32) -> Vec<vk::CommandBuffer> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        vk_check!(unsafe { self.device.allocate_command_buffers(&alloc_info) })
    }

    /// Allocate a descriptor set from the shared pool.
    ///
    /// `variable_count` sets the length of a variable-count trailing binding.
    pub(crate) fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> (vk::DescriptorPool, vk::DescriptorSet) {
        let pool = self.descriptor_pool.lock();
        let layouts = [layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

        let mut alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            alloc_info = alloc_info.push_next(&mut variable_info);
        }

        let sets = vk_check!(unsafe { self.device.allocate_descriptor_sets(&alloc_info) });
        (*pool, sets[0])
    }

    /// Submit work to `queue`, signaling `fence` when it completes.
    pub fn submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo2<'_>], fence: vk::Fence) {
        let _lock = self.submit_lock.lock();
        vk_check!(unsafe { self.device.queue_submit2(queue, submits, fence) });
    }

    /// Present under the queue lock. `Ok(true)` means the swapchain is suboptimal.
    pub(crate) fn queue_present(&self, present_info: &vk::PresentInfoKHR<'_>) -> ash::prelude::VkResult<bool> {
        let _lock = self.submit_lock.lock();
        unsafe {
            self.swapchain_loader
                .queue_present(self.queues.present, present_info)
        }
    }

    /// Record and run a one-off command buffer, blocking until it finishes.
    ///
    /// Uses a transient pool of its own, so it may be called from any thread.
    pub fn immediate_submit(self: &Arc<Self>, record: impl FnOnce(&CommandBuffer)) {
        profile_function!();

        let pool = create_command_pool(
            &self.device,
            self.queues.families.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        );
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = vk_check!(unsafe { self.device.allocate_command_buffers(&alloc_info) })[0];

        let cmd = CommandBuffer::from_raw(Arc::clone(self), handle);
        cmd.begin();
        record(&cmd);
        cmd.end();

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(handle)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos);
        {
            let _lock = self.submit_lock.lock();
            vk_check!(unsafe {
                self.device
                    .queue_submit2(self.queues.graphics, &[submit], vk::Fence::null())
            });
            vk_check!(unsafe { self.device.queue_wait_idle(self.queues.graphics) });
        }

        // Destroying the pool frees its command buffer.
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    /// Whether an image with these parameters can be created.
    pub fn image_format_supported(
        &self,
        format: vk::Format,
        image_type: vk::ImageType,
        usage: vk::ImageUsageFlags,
        flags: vk::ImageCreateFlags,
    ) -> bool {
        unsafe {
            self.instance.get_physical_device_image_format_properties(
                self.physical_device,
                format,
                image_type,
                vk::ImageTiling::OPTIMAL,
                usage,
                flags,
            )
        }
        .is_ok()
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) {
        let _lock = self.submit_lock.lock();
        vk_check!(unsafe { self.device.device_wait_idle() });
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            {
                let mut releaser =
                    VulkanReleaser::new(&self.device, &self.allocator, &self.descriptor_pool);
                self.deletion.flush_all(&mut releaser);
            }

            // The allocator frees its memory blocks, so it must go before the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device
                .destroy_descriptor_pool(*self.descriptor_pool.get_mut(), None);
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);
            self.device.destroy_device(None);

            if let Some(messenger) = &self.debug_messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan device destroyed");
    }
}

fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> vk::CommandPool {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .flags(flags)
        .queue_family_index(queue_family);
    vk_check!(unsafe { device.create_command_pool(&pool_info, None) })
}

fn create_descriptor_pool(device: &ash::Device, sizes: &DescriptorPoolSizes) -> vk::DescriptorPool {
    let pool_sizes = descriptor_pool_sizes(sizes);
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
                | vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
        )
        .max_sets(sizes.max_sets)
        .pool_sizes(&pool_sizes);
    vk_check!(unsafe { device.create_descriptor_pool(&pool_info, None) })
}

/// Pool sizes with zero-count entries removed, which Vulkan rejects.
fn descriptor_pool_sizes(sizes: &DescriptorPoolSizes) -> Vec<vk::DescriptorPoolSize> {
    [
        (
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            sizes.combined_image_samplers,
        ),
        (vk::DescriptorType::STORAGE_IMAGE, sizes.storage_images),
        (vk::DescriptorType::STORAGE_BUFFER, sizes.storage_buffers),
        (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    })
    .collect()
}
