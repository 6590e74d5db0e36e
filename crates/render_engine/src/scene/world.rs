//! Scene arenas
//!
//! Scene objects are stored in generational arenas. Removing an object
//! queues a [`SceneObject`] notification that the renderer drains once per
//! frame to release the GPU state it associated with the object.

use slotmap::SlotMap;

use crate::foundation::math::{Mat4, Vec3};
use super::handles::{GeometryKey, LightKey, MaterialKey, PrimitiveKey, SceneObject, TextureKey};
use super::light::Light;
use super::material::Material;
use super::primitive::Primitive;
use super::texture::Texture;

/// Where a geometry is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderLayer {
    /// Regular scene geometry
    #[default]
    Standard,
    /// Environment geometry drawn with a rotation-only view behind everything
    Environment,
}

/// A primitive placed in the world with its materials
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Vertex data
    pub primitive: PrimitiveKey,
    /// Materials; the first one decides which passes draw the geometry
    pub materials: Vec<MaterialKey>,
    /// Object-to-world matrix
    pub world_matrix: Mat4,
    /// Whether the geometry is rasterized into shadow maps
    pub cast_shadows: bool,
    /// Render layer
    pub layer: RenderLayer,
    /// Whether the selection outline is drawn around the geometry
    pub selected: bool,
}

impl Geometry {
    /// Create a geometry with a single material
    pub fn new(primitive: PrimitiveKey, material: MaterialKey, world_matrix: Mat4) -> Self {
        Self {
            primitive,
            materials: vec![material],
            world_matrix,
            cast_shadows: true,
            layer: RenderLayer::Standard,
            selected: false,
        }
    }

    /// Place the geometry in the environment layer
    pub fn environment(mut self) -> Self {
        self.layer = RenderLayer::Environment;
        self.cast_shadows = false;
        self
    }

    /// Enable or disable shadow casting
    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    /// First material, if any
    pub fn primary_material(&self) -> Option<MaterialKey> {
        self.materials.first().copied()
    }
}

/// A coloured world-space line segment for the debug pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    /// Start point
    pub from: Vec3,
    /// End point
    pub to: Vec3,
    /// Line colour (RGBA)
    pub color: [f32; 4],
}

/// Scene arenas
#[derive(Debug, Default)]
pub struct Scene {
    materials: SlotMap<MaterialKey, Material>,
    primitives: SlotMap<PrimitiveKey, Primitive>,
    textures: SlotMap<TextureKey, Texture>,
    lights: SlotMap<LightKey, Light>,
    geometries: SlotMap<GeometryKey, Geometry>,
    debug_lines: Vec<DebugLine>,
    removed: Vec<SceneObject>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material
    pub fn add_material(&mut self, material: Material) -> MaterialKey {
        self.materials.insert(material)
    }

    /// Add a primitive
    pub fn add_primitive(&mut self, primitive: Primitive) -> PrimitiveKey {
        self.primitives.insert(primitive)
    }

    /// Add a texture
    pub fn add_texture(&mut self, texture: Texture) -> TextureKey {
        self.textures.insert(texture)
    }

    /// Add a light
    pub fn add_light(&mut self, light: Light) -> LightKey {
        self.lights.insert(light)
    }

    /// Add a geometry
    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryKey {
        self.geometries.insert(geometry)
    }

    /// Remove a material
    pub fn remove_material(&mut self, key: MaterialKey) -> Option<Material> {
        let removed = self.materials.remove(key);
        if removed.is_some() {
            self.removed.push(SceneObject::Material(key));
        }
        removed
    }

    /// Remove a primitive
    pub fn remove_primitive(&mut self, key: PrimitiveKey) -> Option<Primitive> {
        let removed = self.primitives.remove(key);
        if removed.is_some() {
            self.removed.push(SceneObject::Primitive(key));
        }
        removed
    }

    /// Remove a texture
    pub fn remove_texture(&mut self, key: TextureKey) -> Option<Texture> {
        let removed = self.textures.remove(key);
        if removed.is_some() {
            self.removed.push(SceneObject::Texture(key));
        }
        removed
    }

    /// Remove a light
    pub fn remove_light(&mut self, key: LightKey) -> Option<Light> {
        let removed = self.lights.remove(key);
        if removed.is_some() {
            self.removed.push(SceneObject::Light(key));
        }
        removed
    }

    /// Remove a geometry
    pub fn remove_geometry(&mut self, key: GeometryKey) -> Option<Geometry> {
        let removed = self.geometries.remove(key);
        if removed.is_some() {
            self.removed.push(SceneObject::Geometry(key));
        }
        removed
    }

    /// Take the removal notifications queued since the last call
    pub fn drain_removed(&mut self) -> Vec<SceneObject> {
        std::mem::take(&mut self.removed)
    }

    /// Material by key
    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    /// Mutable material by key
    pub fn material_mut(&mut self, key: MaterialKey) -> Option<&mut Material> {
        self.materials.get_mut(key)
    }

    /// Primitive by key
    pub fn primitive(&self, key: PrimitiveKey) -> Option<&Primitive> {
        self.primitives.get(key)
    }

    /// Texture by key
    pub fn texture(&self, key: TextureKey) -> Option<&Texture> {
        self.textures.get(key)
    }

    /// Light by key
    pub fn light(&self, key: LightKey) -> Option<&Light> {
        self.lights.get(key)
    }

    /// Mutable light by key
    pub fn light_mut(&mut self, key: LightKey) -> Option<&mut Light> {
        self.lights.get_mut(key)
    }

    /// Geometry by key
    pub fn geometry(&self, key: GeometryKey) -> Option<&Geometry> {
        self.geometries.get(key)
    }

    /// Mutable geometry by key
    pub fn geometry_mut(&mut self, key: GeometryKey) -> Option<&mut Geometry> {
        self.geometries.get_mut(key)
    }

    /// Select or deselect a geometry for the outline pass
    pub fn set_selected(&mut self, key: GeometryKey, selected: bool) {
        if let Some(geometry) = self.geometries.get_mut(key) {
            geometry.selected = selected;
        }
    }

    /// All lights
    pub fn lights(&self) -> impl Iterator<Item = (LightKey, &Light)> {
        self.lights.iter()
    }

    /// All geometries
    pub fn geometries(&self) -> impl Iterator<Item = (GeometryKey, &Geometry)> {
        self.geometries.iter()
    }

    /// Queue a debug line for the next frames
    pub fn add_debug_line(&mut self, from: Vec3, to: Vec3, color: [f32; 4]) {
        self.debug_lines.push(DebugLine { from, to, color });
    }

    /// Remove all debug lines
    pub fn clear_debug_lines(&mut self) {
        self.debug_lines.clear();
    }

    /// Debug lines
    pub fn debug_lines(&self) -> &[DebugLine] {
        &self.debug_lines
    }
}
