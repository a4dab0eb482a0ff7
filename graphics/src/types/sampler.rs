//! Sampler types and descriptors.

/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Linear interpolation between texels.
    #[default]
    Linear,
}

/// Filtering between mip levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipmapMode {
    /// Use the nearest mip level.
    Nearest,
    /// Blend the two nearest mip levels.
    #[default]
    Linear,
}

/// Behaviour for texture coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Tile the texture.
    #[default]
    Repeat,
    /// Tile the texture, mirroring every other repetition.
    MirroredRepeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Clamp to the border colour.
    ClampToBorder,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Mipmap filter.
    pub mipmap_mode: MipmapMode,
    /// Address mode for all coordinates.
    pub address_mode: AddressMode,
    /// Maximum anisotropy level; 1 disables anisotropic filtering.
    pub max_anisotropy: f32,
    /// Maximum LOD clamp.
    pub max_lod: f32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_mode: MipmapMode::Linear,
            address_mode: AddressMode::Repeat,
            max_anisotropy: 1.0,
            max_lod: ash::vk::LOD_CLAMP_NONE,
        }
    }
}
