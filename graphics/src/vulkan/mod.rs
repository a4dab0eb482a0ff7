//! Vulkan plumbing on top of ash.
//!
//! Instance and device bring-up, the shared [`DeviceContext`], command
//! recording, synchronization objects, and the mappings between crate types
//! and Vulkan enums.

mod allocator;
pub mod command;
pub mod context;
pub(crate) mod conversion;
mod debug;
pub mod device;
pub mod instance;
pub mod layout;
pub mod sync;

pub use command::{ColorAttachment, CommandBuffer, DepthAttachment, RenderingDesc};
pub use context::{DeviceContext, DeviceInfo, Queues};
pub use device::{FeatureSupport, QueueFamilies};
pub use layout::{ImageLayout, stage_for_access};
pub use sync::{Event, Fence, Semaphore};
