//! Command buffer recording.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use super::context::DeviceContext;
use super::layout::ImageLayout;
use crate::resources::{Buffer, DescriptorSet, Pipeline, PipelineLayout, Texture};
use crate::types::{FilterMode, ScissorRect, Viewport};
use crate::vk_check;

use super::conversion::convert_filter_mode;

/// A colour target for [`CommandBuffer::begin_rendering`].
#[derive(Clone, Copy)]
pub struct ColorAttachment<'a> {
    pub texture: &'a Texture,
    /// Clear to this colour, or load the existing contents when `None`.
    pub clear: Option<[f32; 4]>,
}

/// A depth target for [`CommandBuffer::begin_rendering`].
#[derive(Clone, Copy)]
pub struct DepthAttachment<'a> {
    pub texture: &'a Texture,
    pub clear: Option<f32>,
}

/// Parameters for a dynamic rendering pass.
#[derive(Clone, Copy)]
pub struct RenderingDesc<'a> {
    pub color: &'a [ColorAttachment<'a>],
    pub depth: Option<DepthAttachment<'a>>,
    pub width: u32,
    pub height: u32,
    /// Array layers rendered to; ignored when `view_mask` is non-zero.
    pub layer_count: u32,
    /// Multiview mask, 0 to disable multiview.
    pub view_mask: u32,
}

/// A primary command buffer plus the device it records against.
///
/// Command buffers belong to their pool and are freed with it.
pub struct CommandBuffer {
    context: Arc<DeviceContext>,
    handle: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocate from the frame command pool.
    pub(crate) fn allocate(context: &Arc<DeviceContext>) -> Self {
        let handle = context.allocate_command_buffers(1)[0];
        Self::from_raw(Arc::clone(context), handle)
    }

    pub(crate) fn from_raw(context: Arc<DeviceContext>, handle: vk::CommandBuffer) -> Self {
        Self { context, handle }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub(crate) fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    /// Begin recording for a single submission.
    pub fn begin(&self) {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        vk_check!(unsafe { self.device().begin_command_buffer(self.handle, &begin_info) });
    }

    pub fn end(&self) {
        vk_check!(unsafe { self.device().end_command_buffer(self.handle) });
    }

    pub fn reset(&self) {
        vk_check!(unsafe {
            self.device()
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        });
    }

    /// Record a synchronization2 barrier.
    pub fn pipeline_barrier(&self, dependency: &vk::DependencyInfo<'_>) {
        unsafe { self.device().cmd_pipeline_barrier2(self.handle, dependency) };
    }

    pub fn set_viewport(&self, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device().cmd_set_viewport(self.handle, 0, &[vk_viewport]) };
    }

    pub fn set_scissor(&self, rect: &ScissorRect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        };
        unsafe { self.device().cmd_set_scissor(self.handle, 0, &[scissor]) };
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: &Buffer, offset: u64) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.handle, binding, &[buffer.handle()], &[offset])
        };
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.handle, buffer.handle(), offset, index_type)
        };
    }

    /// Bind a graphics or compute pipeline at its own bind point.
    pub fn bind_pipeline(&self, pipeline: &Pipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(self.handle, pipeline.bind_point(), pipeline.handle())
        };
    }

    pub fn bind_descriptor_set(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        set_index: u32,
        set: &DescriptorSet,
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.handle,
                bind_point,
                layout.handle(),
                set_index,
                &[set.handle()],
                &[],
            )
        };
    }

    /// Push a plain-old-data value as push constants.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) {
        unsafe {
            self.device().cmd_push_constants(
                self.handle,
                layout.handle(),
                stages,
                offset,
                bytemuck::bytes_of(value),
            )
        };
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device().cmd_draw(
                self.handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.device().cmd_dispatch(self.handle, x, y, z) };
    }

    /// Begin a dynamic rendering pass.
    ///
    /// Attachments are transitioned to their attachment layouts first.
    pub fn begin_rendering(&self, desc: &RenderingDesc<'_>) {
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = desc
            .color
            .iter()
            .map(|attachment| {
                attachment
                    .texture
                    .transition(self, ImageLayout::ColorAttachment);
                let (load_op, clear_value) = match attachment.clear {
                    Some(color) => (
                        vk::AttachmentLoadOp::CLEAR,
                        vk::ClearValue {
                            color: vk::ClearColorValue { float32: color },
                        },
                    ),
                    None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
                };
                vk::RenderingAttachmentInfo::default()
                    .image_view(attachment.texture.view())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(clear_value)
            })
            .collect();

        let depth_attachment = desc.depth.map(|attachment| {
            attachment
                .texture
                .transition(self, ImageLayout::DepthStencilAttachment);
            let (load_op, clear_value) = match attachment.clear {
                Some(depth) => (
                    vk::AttachmentLoadOp::CLEAR,
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                    },
                ),
                None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
            };
            vk::RenderingAttachmentInfo::default()
                .image_view(attachment.texture.view())
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_value)
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            })
            .layer_count(desc.layer_count.max(1))
            .view_mask(desc.view_mask)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe { self.device().cmd_begin_rendering(self.handle, &rendering_info) };
    }

    pub fn end_rendering(&self) {
        unsafe { self.device().cmd_end_rendering(self.handle) };
    }

    /// Open a named region for debuggers. No-op without validation.
    pub fn begin_label(&self, name: &str, color: [f32; 4]) {
        let Some(debug_utils) = self.context.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.handle, &label) };
    }

    pub fn end_label(&self) {
        if let Some(debug_utils) = self.context.debug_utils() {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.handle) };
        }
    }

    /// Fill every subresource of a colour texture with one value.
    pub fn clear_color(&self, texture: &Texture, color: [f32; 4]) {
        texture.transition(self, ImageLayout::TransferDst);
        let range = texture.subresource_range();
        unsafe {
            self.device().cmd_clear_color_image(
                self.handle,
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[range],
            )
        };
    }

    /// Scale-copy mip 0 of `src` onto mip 0 of `dst`, all shared layers.
    pub fn blit_texture(&self, src: &Texture, dst: &Texture, filter: FilterMode) {
        src.transition(self, ImageLayout::TransferSrc);
        dst.transition(self, ImageLayout::TransferDst);

        let layer_count = src.image_layers().min(dst.image_layers());
        let corner = |texture: &Texture| vk::Offset3D {
            x: texture.width() as i32,
            y: texture.height() as i32,
            z: texture.depth() as i32,
        };
        let region = vk::ImageBlit2::default()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: src.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count,
            })
            .src_offsets([vk::Offset3D::default(), corner(src)])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count,
            })
            .dst_offsets([vk::Offset3D::default(), corner(dst)]);
        let regions = [region];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src.image())
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst.image())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions)
            .filter(convert_filter_mode(filter));

        unsafe { self.device().cmd_blit_image2(self.handle, &blit_info) };
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommandBuffer").field(&self.handle).finish()
    }
}
