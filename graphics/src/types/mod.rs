//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the graphics system.

mod buffer;
mod common;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{Extent3d, ScissorRect, Viewport};
pub use sampler::{AddressMode, FilterMode, MipmapMode, SamplerDescriptor};
pub use texture::{
    MipRegion, TextureDescriptor, TextureDimension, TextureFormat, full_mip_chain, mip_extent,
    mip_regions,
};
