//! GPU resources.
//!
//! Owning wrappers around native objects, created through [`Core`] or the
//! builders in this module:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU image, owned or borrowed from a swapchain
//! - [`Sampler`] - Texture sampler
//! - [`DescriptorSet`] and its [`DescriptorSetLayout`]
//! - [`Pipeline`], [`PipelineLayout`] and [`ShaderModule`]
//!
//! Dropping a wrapper never destroys the native object on the spot. The handle
//! is queued on the current frame slot and destroyed once that slot's fence has
//! been waited on.
//!
//! [`Core`]: crate::Core

mod buffer;
mod descriptor;
mod pipeline;
mod sampler;
mod texture;

pub use buffer::Buffer;
pub(crate) use buffer::check_range;
pub use descriptor::{
    BindingInfo, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorSetUpdater,
};
pub use pipeline::{
    ComputePipelineBuilder, DepthTest, Pipeline, PipelineBuilder, PipelineLayout,
    PipelineLayoutBuilder, ShaderModule,
};
pub use sampler::{Sampler, SamplerBuilder};
pub use texture::{Texture, TextureView};
