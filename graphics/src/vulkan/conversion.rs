//! Type conversions between Lilium types and Vulkan types.

use ash::vk;

use crate::types::{
    AddressMode, BufferUsage, FilterMode, MipmapMode, TextureDimension, TextureFormat,
};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
///
/// Transfer source and destination are always included so every buffer can
/// take part in uploads and copies.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }

    result
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        // 8-bit formats
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,

        // 16-bit formats
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,

        // 32-bit formats
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,

        // 64-bit formats
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,

        // 128-bit formats
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        // Depth/stencil formats
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,

        // Block-compressed formats
        TextureFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        TextureFormat::Bc1RgbaUnormSrgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        TextureFormat::Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
        TextureFormat::Bc3RgbaUnormSrgb => vk::Format::BC3_SRGB_BLOCK,
        TextureFormat::Bc4RUnorm => vk::Format::BC4_UNORM_BLOCK,
        TextureFormat::Bc5RgUnorm => vk::Format::BC5_UNORM_BLOCK,
        TextureFormat::Bc6hRgbUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        TextureFormat::Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        TextureFormat::Bc7RgbaUnormSrgb => vk::Format::BC7_SRGB_BLOCK,
    }
}

/// Map a surface format back to a TextureFormat, for swapchain images.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8UnormSrgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8UnormSrgb),
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// Aspect flags covering every plane of the format.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Image usage for a texture before storage support is checked.
///
/// Every texture can be sampled and copied; render targets add the attachment
/// usage matching their format.
pub fn base_texture_usage(format: TextureFormat, render_target: bool) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::TRANSFER_SRC;

    if render_target {
        if format.is_depth_stencil() {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    usage
}

/// Vulkan image type for a dimension.
pub fn convert_image_type(dimension: TextureDimension) -> vk::ImageType {
    match dimension {
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
        _ => vk::ImageType::TYPE_2D,
    }
}

/// Vulkan view type for a dimension.
pub fn convert_view_type(dimension: TextureDimension) -> vk::ImageViewType {
    match dimension {
        TextureDimension::D2 => vk::ImageViewType::TYPE_2D,
        TextureDimension::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureDimension::D3 => vk::ImageViewType::TYPE_3D,
        TextureDimension::Cube => vk::ImageViewType::CUBE,
        TextureDimension::CubeArray => vk::ImageViewType::CUBE_ARRAY,
    }
}

/// Convert a sample count to Vulkan flags. Returns `None` for unsupported counts.
pub fn convert_sample_count(count: u32) -> Option<vk::SampleCountFlags> {
    match count {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        16 => Some(vk::SampleCountFlags::TYPE_16),
        32 => Some(vk::SampleCountFlags::TYPE_32),
        64 => Some(vk::SampleCountFlags::TYPE_64),
        _ => None,
    }
}

/// Convert FilterMode to Vulkan filter.
pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

/// Convert MipmapMode to Vulkan mipmap mode.
pub fn convert_mipmap_mode(mode: MipmapMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_always_transferable() {
        let usage = convert_buffer_usage(BufferUsage::empty());
        assert_eq!(
            usage,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
        );

        let usage = convert_buffer_usage(BufferUsage::VERTEX | BufferUsage::INDEX);
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }

    #[test]
    fn test_depth_formats_use_depth_aspect() {
        assert_eq!(
            aspect_mask(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(TextureFormat::Rgba8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_render_target_usage() {
        let color = base_texture_usage(TextureFormat::Rgba16Float, true);
        assert!(color.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED));

        let depth = base_texture_usage(TextureFormat::Depth32Float, true);
        assert!(depth.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!depth.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let plain = base_texture_usage(TextureFormat::Rgba8Unorm, false);
        assert!(!plain.intersects(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        ));
    }

    #[test]
    fn test_view_types() {
        assert_eq!(
            convert_view_type(TextureDimension::Cube),
            vk::ImageViewType::CUBE
        );
        assert_eq!(
            convert_image_type(TextureDimension::Cube),
            vk::ImageType::TYPE_2D
        );
        assert_eq!(
            convert_image_type(TextureDimension::D3),
            vk::ImageType::TYPE_3D
        );
    }

    #[test]
    fn test_sample_counts() {
        assert_eq!(convert_sample_count(4), Some(vk::SampleCountFlags::TYPE_4));
        assert_eq!(convert_sample_count(3), None);
    }

    #[test]
    fn test_swapchain_format_round_trip() {
        for format in [TextureFormat::Bgra8UnormSrgb, TextureFormat::Rgba8Unorm] {
            assert_eq!(
                texture_format_from_vk(convert_texture_format(format)),
                Some(format)
            );
        }
    }
}
