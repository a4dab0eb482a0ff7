//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::{GraphicsError, GraphicsResult};

/// Queue family indices chosen for a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Supports graphics and compute; also used for transfer and present.
    pub graphics: u32,
    /// Compute-only family when the device has one, otherwise `graphics`.
    pub async_compute: u32,
    /// Present family, equal to `graphics`.
    pub present: u32,
}

impl QueueFamilies {
    /// Pick families from the per-family capability flags.
    ///
    /// Returns `None` when no family supports both graphics and compute.
    pub fn select(families: &[vk::QueueFlags]) -> Option<Self> {
        let graphics = families
            .iter()
            .position(|f| f.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))?
            as u32;

        let async_compute = families
            .iter()
            .position(|f| f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32)
            .unwrap_or(graphics);

        Some(Self {
            graphics,
            async_compute,
            present: graphics,
        })
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.async_compute, self.present] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Optional device features the core relies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSupport {
    pub descriptor_binding_partially_bound: bool,
    pub descriptor_binding_variable_descriptor_count: bool,
    pub runtime_descriptor_array: bool,
    pub shader_sampled_image_array_non_uniform_indexing: bool,
    pub descriptor_binding_sampled_image_update_after_bind: bool,
    pub descriptor_binding_storage_image_update_after_bind: bool,
    pub descriptor_binding_storage_buffer_update_after_bind: bool,
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
    pub multiview: bool,
    pub sampler_anisotropy: bool,
}

impl FeatureSupport {
    /// Query what `physical_device` supports.
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();

        let sampler_anisotropy = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features11)
                .push_next(&mut features12)
                .push_next(&mut features13);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
            features2.features.sampler_anisotropy == vk::TRUE
        };

        Self {
            descriptor_binding_partially_bound: features12.descriptor_binding_partially_bound
                == vk::TRUE,
            descriptor_binding_variable_descriptor_count: features12
                .descriptor_binding_variable_descriptor_count
                == vk::TRUE,
            runtime_descriptor_array: features12.runtime_descriptor_array == vk::TRUE,
            shader_sampled_image_array_non_uniform_indexing: features12
                .shader_sampled_image_array_non_uniform_indexing
                == vk::TRUE,
            descriptor_binding_sampled_image_update_after_bind: features12
                .descriptor_binding_sampled_image_update_after_bind
                == vk::TRUE,
            descriptor_binding_storage_image_update_after_bind: features12
                .descriptor_binding_storage_image_update_after_bind
                == vk::TRUE,
            descriptor_binding_storage_buffer_update_after_bind: features12
                .descriptor_binding_storage_buffer_update_after_bind
                == vk::TRUE,
            synchronization2: features13.synchronization2 == vk::TRUE,
            dynamic_rendering: features13.dynamic_rendering == vk::TRUE,
            multiview: features11.multiview == vk::TRUE,
            sampler_anisotropy,
        }
    }

    /// Names of required features this device lacks. Anisotropy is optional.
    pub fn missing(&self) -> Vec<&'static str> {
        let required = [
            (
                self.descriptor_binding_partially_bound,
                "descriptorBindingPartiallyBound",
            ),
            (
                self.descriptor_binding_variable_descriptor_count,
                "descriptorBindingVariableDescriptorCount",
            ),
            (self.runtime_descriptor_array, "runtimeDescriptorArray"),
            (
                self.shader_sampled_image_array_non_uniform_indexing,
                "shaderSampledImageArrayNonUniformIndexing",
            ),
            (
                self.descriptor_binding_sampled_image_update_after_bind,
                "descriptorBindingSampledImageUpdateAfterBind",
            ),
            (
                self.descriptor_binding_storage_image_update_after_bind,
                "descriptorBindingStorageImageUpdateAfterBind",
            ),
            (
                self.descriptor_binding_storage_buffer_update_after_bind,
                "descriptorBindingStorageBufferUpdateAfterBind",
            ),
            (self.synchronization2, "synchronization2"),
            (self.dynamic_rendering, "dynamicRendering"),
            (self.multiview, "multiview"),
        ];

        required
            .into_iter()
            .filter_map(|(supported, name)| (!supported).then_some(name))
            .collect()
    }
}

/// The physical device picked for rendering.
#[derive(Debug, Clone, Copy)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub features: FeatureSupport,
}

/// Select the best physical device for rendering.
///
/// Devices without a graphics+compute family or missing required features are
/// skipped. Discrete GPUs are preferred over integrated ones.
pub fn select_physical_device(instance: &ash::Instance) -> GraphicsResult<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;
    let mut rejections = Vec::new();

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = device_name(&properties);

        if properties.api_version < super::instance::REQUIRED_API_VERSION {
            rejections.push(format!("{name}: Vulkan 1.3 not supported"));
            continue;
        }

        let family_flags: Vec<vk::QueueFlags> =
            unsafe { instance.get_physical_device_queue_family_properties(device) }
                .iter()
                .map(|f| f.queue_flags)
                .collect();
        let Some(queue_families) = QueueFamilies::select(&family_flags) else {
            rejections.push(format!("{name}: no graphics+compute queue family"));
            continue;
        };

        let features = FeatureSupport::query(instance, device);
        let missing = features.missing();
        if !missing.is_empty() {
            rejections.push(format!("{name}: missing features {missing:?}"));
            continue;
        }

        let score = score_device(&properties);
        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            name,
            properties.device_type,
            score
        );

        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    queue_families,
                    features,
                },
            ));
        }
    }

    for rejection in &rejections {
        log::info!("Skipping GPU {}", rejection);
    }

    best.map(|(_, device)| device).ok_or_else(|| {
        GraphicsError::InitializationFailed(format!(
            "No suitable GPU found ({})",
            rejections.join("; ")
        ))
    })
}

fn score_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let type_score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 10,
    };
    type_score + properties.limits.max_image_dimension2_d / 1024
}

/// Human-readable device name.
pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string())
}

/// Create a logical device with the required features and extensions.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> GraphicsResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selected
        .queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let features =
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(selected.features.sampler_anisotropy);

    let mut vulkan_11_features = vk::PhysicalDeviceVulkan11Features::default().multiview(true);

    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .runtime_descriptor_array(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true);

    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_11_features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    let device = unsafe { instance.create_device(selected.physical_device, &create_info, None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_selection_prefers_dedicated_compute() {
        let families = [
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.async_compute, 2);
        assert_eq!(selected.present, 1);
        assert_eq!(selected.unique(), vec![1, 2]);
    }

    #[test]
    fn test_queue_selection_falls_back_to_graphics() {
        let families = [vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected.async_compute, 0);
        assert_eq!(selected.unique(), vec![0]);
    }

    #[test]
    fn test_graphics_only_family_rejected() {
        assert!(QueueFamilies::select(&[vk::QueueFlags::GRAPHICS]).is_none());
    }

    #[test]
    fn test_missing_features_listed() {
        let mut support = FeatureSupport {
            descriptor_binding_partially_bound: true,
            descriptor_binding_variable_descriptor_count: true,
            runtime_descriptor_array: true,
            shader_sampled_image_array_non_uniform_indexing: true,
            descriptor_binding_sampled_image_update_after_bind: true,
            descriptor_binding_storage_image_update_after_bind: true,
            descriptor_binding_storage_buffer_update_after_bind: true,
            synchronization2: true,
            dynamic_rendering: true,
            multiview: true,
            sampler_anisotropy: false,
        };
        assert!(support.missing().is_empty());

        support.multiview = false;
        support.dynamic_rendering = false;
        assert_eq!(support.missing(), vec!["dynamicRendering", "multiview"]);
    }
}
