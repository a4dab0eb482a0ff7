//! GPU memory allocator integration using gpu-allocator.

use std::panic::Location;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use crate::error::{GraphicsError, GraphicsResult};

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> GraphicsResult<Allocator> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Allocate memory for a buffer or image.
///
/// Running out of device memory leaves nothing to recover, so failure is
/// logged with the caller's location and the process aborts.
#[track_caller]
pub fn allocate(
    allocator: &Mutex<Allocator>,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> Allocation {
    let result = allocator.lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });

    match result {
        Ok(allocation) => allocation,
        Err(e) => {
            let caller = Location::caller();
            log::error!(
                "Memory allocation '{}' ({} bytes) failed: {} ({}:{})",
                name,
                requirements.size,
                e,
                caller.file(),
                caller.line()
            );
            std::process::abort()
        }
    }
}
