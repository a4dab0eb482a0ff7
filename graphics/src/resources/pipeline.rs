//! Shader modules, pipeline layouts, and graphics/compute pipelines.
//!
//! Graphics pipelines target dynamic rendering only; there are no render pass
//! or framebuffer objects. Viewport and scissor are always dynamic state.

use std::io::Cursor;
use std::sync::Arc;

use ash::vk;

use crate::deletion::PendingObject;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::DescriptorSetLayout;
use crate::types::TextureFormat;
use crate::vk_check;
use crate::vulkan::DeviceContext;
use crate::vulkan::conversion::{convert_sample_count, convert_texture_format};

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// A compiled SPIR-V module.
pub struct ShaderModule {
    context: Arc<DeviceContext>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V words.
    pub fn new(context: &Arc<DeviceContext>, code: &[u32]) -> GraphicsResult<Self> {
        if code.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "shader code cannot be empty".to_string(),
            ));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = vk_check!(unsafe { context.device().create_shader_module(&create_info, None) });
        Ok(Self {
            context: Arc::clone(context),
            module,
        })
    }

    /// Create a module from SPIR-V bytes, as read from disk.
    pub fn from_bytes(context: &Arc<DeviceContext>, bytes: &[u8]) -> GraphicsResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| GraphicsError::InvalidParameter(format!("invalid SPIR-V: {e}")))?;
        Self::new(context, &words)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::ShaderModule(self.module));
    }
}

/// Fluent accumulation of push-constant ranges and set layouts.
#[derive(Default)]
pub struct PipelineLayoutBuilder {
    push_constants: Vec<vk::PushConstantRange>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_constants(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constants.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }

    /// Append a set layout; sets are numbered in the order they are added.
    pub fn descriptor_set(mut self, layout: &Arc<DescriptorSetLayout>) -> Self {
        self.set_layouts.push(Arc::clone(layout));
        self
    }

    pub fn build(self, context: &Arc<DeviceContext>) -> Arc<PipelineLayout> {
        let handles: Vec<vk::DescriptorSetLayout> =
            self.set_layouts.iter().map(|l| l.handle()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&handles)
            .push_constant_ranges(&self.push_constants);
        let layout = vk_check!(unsafe { context.device().create_pipeline_layout(&create_info, None) });

        Arc::new(PipelineLayout {
            context: Arc::clone(context),
            layout,
            set_layouts: self.set_layouts,
            push_constants: self.push_constants,
        })
    }
}

/// Descriptor set layouts plus push-constant ranges of a pipeline.
pub struct PipelineLayout {
    context: Arc<DeviceContext>,
    layout: vk::PipelineLayout,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::PipelineLayout(self.layout));
    }
}

/// A graphics or compute pipeline.
pub struct Pipeline {
    context: Arc<DeviceContext>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    layout: Arc<PipelineLayout>,
}

impl Pipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::Pipeline(self.pipeline));
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("bind_point", &self.bind_point)
            .finish()
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);

/// Depth state of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTest {
    pub write: bool,
    pub compare: vk::CompareOp,
}

/// Fluent description of a graphics pipeline.
///
/// ```ignore
/// let pipeline = PipelineBuilder::new(&layout)
///     .shader(vk::ShaderStageFlags::VERTEX, &vs)
///     .shader(vk::ShaderStageFlags::FRAGMENT, &fs)
///     .color_format(TextureFormat::Bgra8UnormSrgb)
///     .alpha_blend()
///     .build(core.handles())?;
/// ```
pub struct PipelineBuilder<'a> {
    layout: Arc<PipelineLayout>,
    stages: Vec<(vk::ShaderStageFlags, &'a ShaderModule)>,
    color_formats: Vec<vk::Format>,
    depth_format: vk::Format,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    alpha_blend: bool,
    depth_test: Option<DepthTest>,
    samples: u32,
    view_mask: u32,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(layout: &Arc<PipelineLayout>) -> Self {
        Self {
            layout: Arc::clone(layout),
            stages: Vec::new(),
            color_formats: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            alpha_blend: false,
            depth_test: None,
            samples: 1,
            view_mask: 0,
        }
    }

    /// Add a shader stage; the entry point is always `main`.
    pub fn shader(mut self, stage: vk::ShaderStageFlags, module: &'a ShaderModule) -> Self {
        self.stages.push((stage, module));
        self
    }

    pub fn color_format(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(convert_texture_format(format));
        self
    }

    /// Color attachment format given directly, e.g. a swapchain surface format.
    pub fn color_format_raw(mut self, format: vk::Format) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn depth_format(mut self, format: TextureFormat) -> Self {
        self.depth_format = convert_texture_format(format);
        self
    }

    pub fn vertex_binding(mut self, binding: u32, stride: u32, rate: vk::VertexInputRate) -> Self {
        self.vertex_bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(binding)
                .stride(stride)
                .input_rate(rate),
        );
        self
    }

    pub fn vertex_attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.vertex_attributes.push(
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(binding)
                .format(format)
                .offset(offset),
        );
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Straight alpha blending on every color attachment.
    pub fn alpha_blend(mut self) -> Self {
        self.alpha_blend = true;
        self
    }

    pub fn depth_test(mut self, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = Some(DepthTest { write, compare });
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Multiview mask, zero for regular rendering.
    pub fn view_mask(mut self, view_mask: u32) -> Self {
        self.view_mask = view_mask;
        self
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if !self.alpha_blend {
            return state.blend_enable(false);
        }
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    pub fn build(self, context: &Arc<DeviceContext>) -> GraphicsResult<Pipeline> {
        if self.stages.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "graphics pipeline needs at least one shader stage".to_string(),
            ));
        }
        let samples = convert_sample_count(self.samples).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unsupported sample count {}", self.samples))
        })?;

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(module.handle())
                    .name(ENTRY_POINT)
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(samples);

        let depth_stencil_state = match self.depth_test {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.write)
                .depth_compare_op(depth.compare),
            None => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(false)
                .depth_write_enable(false),
        }
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

        let color_blend_attachments = vec![self.blend_attachment(); self.color_formats.len()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .view_mask(self.view_mask)
            .color_attachment_formats(&self.color_formats)
            .depth_attachment_format(self.depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            context
                .device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| e);
        let pipeline = vk_check!(pipelines)[0];

        Ok(Pipeline {
            context: Arc::clone(context),
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            layout: self.layout,
        })
    }
}

/// Builds a compute pipeline from one shader module.
pub struct ComputePipelineBuilder<'a> {
    layout: Arc<PipelineLayout>,
    shader: Option<&'a ShaderModule>,
}

impl<'a> ComputePipelineBuilder<'a> {
    pub fn new(layout: &Arc<PipelineLayout>) -> Self {
        Self {
            layout: Arc::clone(layout),
            shader: None,
        }
    }

    pub fn shader(mut self, module: &'a ShaderModule) -> Self {
        self.shader = Some(module);
        self
    }

    pub fn build(self, context: &Arc<DeviceContext>) -> GraphicsResult<Pipeline> {
        let module = self.shader.ok_or_else(|| {
            GraphicsError::InvalidParameter("compute pipeline needs a shader".to_string())
        })?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.handle())
            .name(ENTRY_POINT);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.layout.handle());

        let pipelines = unsafe {
            context
                .device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| e);
        let pipeline = vk_check!(pipelines)[0];

        Ok(Pipeline {
            context: Arc::clone(context),
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            layout: self.layout,
        })
    }
}
