//! Image layouts and the access/stage pairs that go with them.
//!
//! Every buffer and texture remembers the last access it was recorded with.
//! Barriers are then built from "what the resource was last used for" to "what
//! it is about to be used for", using synchronization2 masks throughout.

use ash::vk;

/// Image layout states a texture can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined. Valid only as a barrier source.
    #[default]
    Undefined,
    /// Color attachment writes.
    ColorAttachment,
    /// Depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Depth read-only (sampling + depth testing).
    DepthStencilReadOnly,
    /// Shader sampling.
    ShaderReadOnly,
    /// Transfer source.
    TransferSrc,
    /// Transfer destination.
    TransferDst,
    /// Presentation.
    PresentSrc,
    /// Storage image access.
    General,
}

impl ImageLayout {
    /// Convert to Vulkan image layout.
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
            Self::General => vk::ImageLayout::GENERAL,
        }
    }

    /// Typical access performed on an image in this layout.
    pub fn access(self) -> vk::AccessFlags2 {
        match self {
            Self::Undefined => vk::AccessFlags2::NONE,
            Self::ColorAttachment => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilAttachment => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilReadOnly => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::SHADER_READ
            }
            Self::ShaderReadOnly => vk::AccessFlags2::SHADER_READ,
            Self::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            Self::PresentSrc => vk::AccessFlags2::MEMORY_READ,
            Self::General => vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        }
    }

    /// Pipeline stages that touch an image in this layout.
    pub fn stage(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::Undefined => vk::PipelineStageFlags2::TOP_OF_PIPE,
            Self::PresentSrc => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            _ => stage_for_access(self.access()),
        }
    }

    /// Check if this is a depth/stencil layout.
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::DepthStencilAttachment | Self::DepthStencilReadOnly
        )
    }
}

/// The pipeline stages that produce or consume `access`.
///
/// Falls back to all graphics stages for masks that fit no narrower group.
pub fn stage_for_access(access: vk::AccessFlags2) -> vk::PipelineStageFlags2 {
    const COLOR: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
    );
    const DEPTH: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
    );
    const SHADER: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_READ.as_raw()
            | vk::AccessFlags2::SHADER_WRITE.as_raw()
            | vk::AccessFlags2::UNIFORM_READ.as_raw()
            | vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
    );
    const HOST: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::HOST_READ.as_raw() | vk::AccessFlags2::HOST_WRITE.as_raw(),
    );
    const TRANSFER: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::TRANSFER_READ.as_raw() | vk::AccessFlags2::TRANSFER_WRITE.as_raw(),
    );

    if access.is_empty() {
        vk::PipelineStageFlags2::NONE
    } else if COLOR.contains(access) {
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
    } else if DEPTH.contains(access) {
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
    } else if SHADER.contains(access) {
        vk::PipelineStageFlags2::VERTEX_SHADER
            | vk::PipelineStageFlags2::FRAGMENT_SHADER
            | vk::PipelineStageFlags2::COMPUTE_SHADER
    } else if access == vk::AccessFlags2::INDEX_READ {
        vk::PipelineStageFlags2::INDEX_INPUT
    } else if access == vk::AccessFlags2::VERTEX_ATTRIBUTE_READ {
        vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT
    } else if access == vk::AccessFlags2::INDIRECT_COMMAND_READ {
        vk::PipelineStageFlags2::DRAW_INDIRECT
    } else if HOST.contains(access) {
        vk::PipelineStageFlags2::HOST
    } else if TRANSFER.contains(access) {
        vk::PipelineStageFlags2::TRANSFER
    } else {
        vk::PipelineStageFlags2::ALL_GRAPHICS
    }
}

/// Whether `access` includes any write bit.
pub fn is_write_access(access: vk::AccessFlags2) -> bool {
    access.intersects(
        vk::AccessFlags2::SHADER_WRITE
            | vk::AccessFlags2::SHADER_STORAGE_WRITE
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags2::TRANSFER_WRITE
            | vk::AccessFlags2::HOST_WRITE
            | vk::AccessFlags2::MEMORY_WRITE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_for_access() {
        assert_eq!(
            stage_for_access(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE),
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::SHADER_READ),
            vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::INDEX_READ),
            vk::PipelineStageFlags2::INDEX_INPUT
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::HOST_WRITE),
            vk::PipelineStageFlags2::HOST
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE),
            vk::PipelineStageFlags2::TRANSFER
        );
    }

    #[test]
    fn test_mixed_access_falls_back_to_all_graphics() {
        assert_eq!(
            stage_for_access(vk::AccessFlags2::TRANSFER_WRITE | vk::AccessFlags2::SHADER_READ),
            vk::PipelineStageFlags2::ALL_GRAPHICS
        );
        assert_eq!(
            stage_for_access(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE),
            vk::PipelineStageFlags2::ALL_GRAPHICS
        );
    }

    #[test]
    fn test_layout_stages() {
        assert_eq!(
            ImageLayout::Undefined.stage(),
            vk::PipelineStageFlags2::TOP_OF_PIPE
        );
        assert_eq!(
            ImageLayout::TransferDst.stage(),
            vk::PipelineStageFlags2::TRANSFER
        );
        assert_eq!(
            ImageLayout::ColorAttachment.stage(),
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert!(ImageLayout::DepthStencilReadOnly.is_depth_stencil());
    }

    #[test]
    fn test_write_access() {
        assert!(is_write_access(vk::AccessFlags2::TRANSFER_WRITE));
        assert!(!is_write_access(
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::TRANSFER_READ
        ));
    }
}
