//! CPU-side texture data

/// RGBA8 texture, uploaded to the GPU lazily on first use
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Tightly packed RGBA8 texels
    pub pixels: Vec<u8>,
    /// Whether the texels are sRGB encoded
    pub srgb: bool,
}

impl Texture {
    /// Create a texture from RGBA8 texels
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>, srgb: bool) -> Self {
        Self { width, height, pixels, srgb }
    }

    /// 1x1 texture of a single colour
    pub fn solid(rgba: [u8; 4], srgb: bool) -> Self {
        Self::rgba8(1, 1, rgba.to_vec(), srgb)
    }

    /// Whether the texel buffer matches the declared extent
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width as usize) * (self.height as usize) * 4
    }
}
