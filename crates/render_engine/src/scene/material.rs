//! Materials
//!
//! The closed set of material kinds the renderer knows how to draw. Passes
//! dispatch on [`MaterialKind`] instead of inspecting concrete types.

use super::handles::TextureKey;

/// Physically based (principled BSDF) material properties
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbrProperties {
    /// Base colour (RGBA)
    pub albedo: [f32; 4],
    /// Metalness in `[0, 1]`
    pub metallic: f32,
    /// Perceptual roughness in `[0, 1]`
    pub roughness: f32,
    /// Ambient occlusion factor
    pub ambient_occlusion: f32,
}

impl Default for PbrProperties {
    fn default() -> Self {
        Self {
            albedo: [0.8, 0.8, 0.8, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            ambient_occlusion: 1.0,
        }
    }
}

/// Flat, unlit material properties
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnlitProperties {
    /// Flat colour (RGBA)
    pub color: [f32; 4],
}

impl Default for UnlitProperties {
    fn default() -> Self {
        Self { color: [1.0; 4] }
    }
}

/// Material kind and its properties blob
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialKind {
    /// Lit through the G-buffer and lighting passes
    PrincipledBsdf(PbrProperties),
    /// Drawn directly onto the lit result
    Unlit(UnlitProperties),
}

/// Optional texture maps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialTextures {
    /// Albedo / base colour map
    pub albedo: Option<TextureKey>,
    /// Tangent-space normal map
    pub normal: Option<TextureKey>,
    /// Metallic (B) / roughness (G) map
    pub metallic_roughness: Option<TextureKey>,
}

/// Material
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Debug name
    pub name: String,
    /// Kind and properties
    pub kind: MaterialKind,
    /// Texture maps
    pub textures: MaterialTextures,
}

impl Material {
    /// Create a principled BSDF material
    pub fn pbr(name: impl Into<String>, properties: PbrProperties) -> Self {
        Self {
            name: name.into(),
            kind: MaterialKind::PrincipledBsdf(properties),
            textures: MaterialTextures::default(),
        }
    }

    /// Create an unlit material
    pub fn unlit(name: impl Into<String>, color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            kind: MaterialKind::Unlit(UnlitProperties { color }),
            textures: MaterialTextures::default(),
        }
    }

    /// Attach texture maps
    pub fn with_textures(mut self, textures: MaterialTextures) -> Self {
        self.textures = textures;
        self
    }

    /// Whether the material goes through the deferred lighting path
    pub fn is_lit(&self) -> bool {
        matches!(self.kind, MaterialKind::PrincipledBsdf(_))
    }
}
