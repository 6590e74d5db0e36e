//! Generational handles for scene objects

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a [`crate::scene::Material`]
    pub struct MaterialKey;
    /// Handle to a [`crate::scene::Primitive`]
    pub struct PrimitiveKey;
    /// Handle to a [`crate::scene::Texture`]
    pub struct TextureKey;
    /// Handle to a [`crate::scene::Light`]
    pub struct LightKey;
    /// Handle to a [`crate::scene::Geometry`]
    pub struct GeometryKey;
}

/// A scene object that was removed and whose GPU state should be released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneObject {
    /// Removed material
    Material(MaterialKey),
    /// Removed primitive
    Primitive(PrimitiveKey),
    /// Removed texture
    Texture(TextureKey),
    /// Removed light
    Light(LightKey),
    /// Removed geometry
    Geometry(GeometryKey),
}
