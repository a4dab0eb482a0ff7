//! # Lilium GPU
//!
//! The low-level GPU layer of the Lilium renderer, built on Vulkan 1.3.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Core`] - Device ownership, the frame-in-flight cycle, and batched uploads
//! - [`resources`] - Owning wrappers for buffers, textures, samplers, descriptor
//!   sets and pipelines, destroyed through per-frame [`deletion`] queues
//! - [`SubAllocatedBuffer`] - One large buffer carved into independently-lived ranges
//! - [`BindlessTextureManager`] - A slot table of textures behind one descriptor set
//! - [`Swapchain`] - Presentable images for a window surface
//!
//! ## Example
//!
//! ```ignore
//! use lilium_gpu::{BufferDescriptor, BufferUsage, Core, CoreConfig};
//!
//! let mut core = Core::new(CoreConfig::new())?;
//! let vertices = core.create_buffer_with_data(
//!     &BufferDescriptor::new(bytes.len() as u64, BufferUsage::VERTEX),
//!     bytes,
//! )?;
//!
//! core.begin_frame();
//! let cmd = core.frame_command_buffer();
//! cmd.bind_vertex_buffer(0, &vertices, 0);
//! core.end_frame();
//! ```

pub mod bindless;
pub mod config;
pub mod core;
pub mod deletion;
pub mod error;
pub mod frame;
pub mod profiling;
pub mod resources;
pub mod suballoc;
pub mod swapchain;
pub mod types;
pub mod vulkan;

pub use ash::vk;

// Re-export main types for convenience
pub use bindless::{BindlessSlot, BindlessSlots, BindlessTextureManager, DEFAULT_BINDLESS_CAPACITY};
pub use config::{
    CoreConfig, DebugMessageReceiver, DebugSeverity, DescriptorPoolSizes, NUM_FRAMES_IN_FLIGHT,
};
pub use crate::core::Core;
pub use deletion::{DeletionQueue, FrameDeletionQueues, PendingObject, ResourceReleaser};
pub use error::{GraphicsError, GraphicsResult};
pub use resources::{
    Buffer, ComputePipelineBuilder, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorSetUpdater, Pipeline, PipelineBuilder, PipelineLayout,
    PipelineLayoutBuilder, Sampler, SamplerBuilder, ShaderModule, Texture, TextureView,
};
pub use suballoc::{SubAllocatedBuffer, SubAllocation, SubAllocationHandle, VirtualBlock};
pub use swapchain::{Surface, Swapchain};
pub use types::{
    AddressMode, BufferDescriptor, BufferUsage, Extent3d, FilterMode, MipmapMode,
    SamplerDescriptor, ScissorRect, TextureDescriptor, TextureDimension, TextureFormat, Viewport,
};
pub use vulkan::{
    ColorAttachment, CommandBuffer, DepthAttachment, DeviceContext, DeviceInfo, Event, Fence,
    ImageLayout, RenderingDesc, Semaphore,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
