//! Texture types and descriptors.

use super::Extent3d;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 16-bit formats
    /// 16-bit red channel, float.
    R16Float,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// Packed 11/11/10-bit float.
    Rg11b10Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 32-bit depth, float.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,

    // Block-compressed formats (4x4 blocks)
    /// BC1 RGBA, unsigned normalized.
    Bc1RgbaUnorm,
    /// BC1 RGBA, sRGB.
    Bc1RgbaUnormSrgb,
    /// BC3 RGBA, unsigned normalized.
    Bc3RgbaUnorm,
    /// BC3 RGBA, sRGB.
    Bc3RgbaUnormSrgb,
    /// BC4 single channel, unsigned normalized.
    Bc4RUnorm,
    /// BC5 two channels, unsigned normalized.
    Bc5RgUnorm,
    /// BC6H RGB, unsigned float.
    Bc6hRgbUfloat,
    /// BC7 RGBA, unsigned normalized.
    Bc7RgbaUnorm,
    /// BC7 RGBA, sRGB.
    Bc7RgbaUnormSrgb,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth32Float
                | Self::Depth24PlusStencil8
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns true for block-compressed formats.
    pub fn is_compressed(&self) -> bool {
        self.block_dimensions() != (1, 1)
    }

    /// Width and height of one compression block in texels.
    pub fn block_dimensions(&self) -> (u32, u32) {
        match self {
            Self::Bc1RgbaUnorm
            | Self::Bc1RgbaUnormSrgb
            | Self::Bc3RgbaUnorm
            | Self::Bc3RgbaUnormSrgb
            | Self::Bc4RUnorm
            | Self::Bc5RgUnorm
            | Self::Bc6hRgbUfloat
            | Self::Bc7RgbaUnorm
            | Self::Bc7RgbaUnormSrgb => (4, 4),
            _ => (1, 1),
        }
    }

    /// Returns the size in bytes per pixel/block.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rg11b10Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
            Self::Bc1RgbaUnorm | Self::Bc1RgbaUnormSrgb | Self::Bc4RUnorm => 8,
            Self::Bc3RgbaUnorm
            | Self::Bc3RgbaUnormSrgb
            | Self::Bc5RgUnorm
            | Self::Bc6hRgbUfloat
            | Self::Bc7RgbaUnorm
            | Self::Bc7RgbaUnormSrgb => 16,
        }
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    /// Single 2D image.
    #[default]
    D2,
    /// Array of 2D images.
    D2Array,
    /// Volume texture.
    D3,
    /// Six-faced cube map.
    Cube,
    /// Array of cube maps.
    CubeArray,
}

impl TextureDimension {
    /// Returns true for cube and cube array textures.
    pub fn is_cube(&self) -> bool {
        matches!(self, Self::Cube | Self::CubeArray)
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the base mip level.
    pub size: Extent3d,
    /// Array layer count. For cube textures this counts cubes, not faces.
    pub layers: u32,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Texture dimensionality.
    pub dimension: TextureDimension,
    /// Whether the texture is rendered into (colour or depth attachment).
    pub render_target: bool,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            size: Extent3d::new_2d(width, height),
            format,
            ..Default::default()
        }
    }

    /// Create a new 3D texture descriptor.
    pub fn new_3d(width: u32, height: u32, depth: u32, format: TextureFormat) -> Self {
        Self {
            size: Extent3d::new_3d(width, height, depth),
            format,
            dimension: TextureDimension::D3,
            ..Default::default()
        }
    }

    /// Create a new cube map descriptor with square faces.
    pub fn new_cube(size: u32, format: TextureFormat) -> Self {
        Self {
            size: Extent3d::new_2d(size, size),
            format,
            dimension: TextureDimension::Cube,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Turn the texture into an array with the given number of layers.
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self.dimension = match self.dimension {
            TextureDimension::D2 | TextureDimension::D2Array => TextureDimension::D2Array,
            TextureDimension::Cube | TextureDimension::CubeArray => TextureDimension::CubeArray,
            TextureDimension::D3 => TextureDimension::D3,
        };
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Allocate every mip level down to 1x1 (1x1x1 for volumes).
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_level_count = self.max_mip_levels();
        self
    }

    /// Length of the full mip chain; volumes halve their depth too.
    pub fn max_mip_levels(&self) -> u32 {
        match self.dimension {
            TextureDimension::D3 => {
                full_mip_chain(self.size.width.max(self.size.height), self.size.depth)
            }
            _ => full_mip_chain(self.size.width, self.size.height),
        }
    }

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Mark the texture as a render target.
    pub fn as_render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    /// Number of array layers the image is created with (cube faces included).
    pub fn image_layers(&self) -> u32 {
        let layers = self.layers.max(1);
        if self.dimension.is_cube() {
            layers * 6
        } else {
            layers
        }
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            format: TextureFormat::default(),
            dimension: TextureDimension::default(),
            render_target: false,
        }
    }
}

/// Number of mip levels in a full chain for the given base size.
pub fn full_mip_chain(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of a mip level: each dimension halves per level, never below 1.
pub fn mip_extent(base: Extent3d, level: u32) -> Extent3d {
    Extent3d {
        width: (base.width >> level).max(1),
        height: (base.height >> level).max(1),
        depth: (base.depth >> level).max(1),
    }
}

/// One level of a tightly packed mip chain inside an upload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipRegion {
    /// Mip level index.
    pub level: u32,
    /// Byte offset from the start of the packed data.
    pub offset: u64,
    /// Byte size of the level, all layers included.
    pub size: u64,
    /// Texel extent of the level.
    pub extent: Extent3d,
}

/// Lay out `mip_count` levels back to back, largest first.
///
/// Compressed formats round each level up to whole blocks.
pub fn mip_regions(
    base: Extent3d,
    layers: u32,
    format: TextureFormat,
    mip_count: u32,
) -> Vec<MipRegion> {
    let (block_w, block_h) = format.block_dimensions();
    let block_bytes = u64::from(format.block_size());
    let mut offset = 0;

    (0..mip_count)
        .map(|level| {
            let extent = mip_extent(base, level);
            let blocks_x = u64::from(extent.width.div_ceil(block_w));
            let blocks_y = u64::from(extent.height.div_ceil(block_h));
            let size =
                blocks_x * blocks_y * u64::from(extent.depth) * u64::from(layers) * block_bytes;
            let region = MipRegion {
                level,
                offset,
                size,
                extent,
            };
            offset += size;
            region
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain(1, 1), 1);
        assert_eq!(full_mip_chain(256, 256), 9);
        assert_eq!(full_mip_chain(300, 20), 9);
        assert_eq!(full_mip_chain(1024, 512), 11);
    }

    #[test]
    fn test_mip_extent_never_below_one() {
        let base = Extent3d::new_2d(64, 8);
        assert_eq!(mip_extent(base, 0), Extent3d::new_2d(64, 8));
        assert_eq!(mip_extent(base, 3), Extent3d::new_2d(8, 1));
        assert_eq!(mip_extent(base, 6), Extent3d::new_2d(1, 1));
    }

    #[test]
    fn test_mip_regions_are_contiguous() {
        let regions = mip_regions(Extent3d::new_2d(4, 4), 1, TextureFormat::Rgba8Unorm, 3);
        let sizes: Vec<u64> = regions.iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![64, 16, 4]);
        assert_eq!(regions[1].offset, 64);
        assert_eq!(regions[2].offset, 80);
    }

    #[test]
    fn test_mip_regions_compressed_round_up_to_blocks() {
        let regions = mip_regions(Extent3d::new_2d(8, 8), 1, TextureFormat::Bc7RgbaUnorm, 4);
        let sizes: Vec<u64> = regions.iter().map(|r| r.size).collect();
        // 2x2 blocks, then a single block for every level from 4x4 down.
        assert_eq!(sizes, vec![64, 16, 16, 16]);
    }

    #[test]
    fn test_volume_mip_chain_follows_depth() {
        let desc = TextureDescriptor::new_3d(4, 4, 16, TextureFormat::Rgba8Unorm);
        assert_eq!(desc.max_mip_levels(), 5);
        assert_eq!(desc.with_full_mip_chain().mip_level_count, 5);

        // Depth is ignored for 2D textures.
        let mut flat = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm);
        flat.size.depth = 16;
        assert_eq!(flat.max_mip_levels(), 3);
    }

    #[test]
    fn test_cube_layers() {
        let desc = TextureDescriptor::new_cube(128, TextureFormat::Rgba16Float);
        assert_eq!(desc.image_layers(), 6);
        let desc = desc.with_layers(2);
        assert_eq!(desc.dimension, TextureDimension::CubeArray);
        assert_eq!(desc.image_layers(), 12);
    }
}
