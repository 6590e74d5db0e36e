//! Per-frame scene snapshot
//!
//! [`SceneRenderState`] is rebuilt from the [`Scene`] arenas every frame and
//! never persisted. It groups renderables the way the passes consume them:
//! lights by type, drawables by material then primitive, and a separate
//! shadow-caster list keyed only by primitive so depth is rasterized once per
//! caster regardless of its lighting model.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::foundation::math::Mat4;
use super::handles::{GeometryKey, LightKey, MaterialKey, PrimitiveKey};
use super::light::LightType;
use super::material::MaterialKind;
use super::world::{RenderLayer, Scene};

/// One placed instance of a primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renderable {
    /// Geometry the instance came from
    pub geometry: GeometryKey,
    /// Object-to-world matrix
    pub world_matrix: Mat4,
}

/// Renderables grouped by material, then by primitive
pub type RenderableMap = BTreeMap<MaterialKey, BTreeMap<PrimitiveKey, Vec<Renderable>>>;

/// Renderables grouped by primitive only
pub type PrimitiveMap = BTreeMap<PrimitiveKey, Vec<Renderable>>;

/// Transient per-frame snapshot of what to draw
#[derive(Debug, Default, Clone)]
pub struct SceneRenderState {
    /// Lights grouped by type
    pub lights: BTreeMap<LightType, BTreeSet<LightKey>>,
    /// Principled BSDF geometry (G-buffer + lighting)
    pub lit_renderables: RenderableMap,
    /// Unlit geometry drawn on top of the lit result
    pub unlit_renderables: RenderableMap,
    /// Environment geometry drawn with a rotation-only view
    pub env_renderables: RenderableMap,
    /// Shadow casters, independent of material
    pub shadow_casters: PrimitiveMap,
    /// Selected geometry for the outline pass
    pub selected: PrimitiveMap,
}

impl SceneRenderState {
    /// Walk the scene arenas and group everything the passes need
    ///
    /// Geometry without a resolvable material or primitive is skipped with a
    /// warning.
    pub fn collect(scene: &Scene) -> Self {
        let mut state = Self::default();

        for (key, light) in scene.lights() {
            state.lights.entry(light.light_type()).or_default().insert(key);
        }

        for (key, geometry) in scene.geometries() {
            if scene.primitive(geometry.primitive).is_none() {
                warn!("Geometry {key:?} references a missing primitive, skipping");
                continue;
            }

            let Some(material_key) = geometry.primary_material() else {
                warn!("Geometry {key:?} has no material, skipping");
                continue;
            };
            let Some(material) = scene.material(material_key) else {
                warn!("Geometry {key:?} references a missing material, skipping");
                continue;
            };

            let renderable = Renderable { geometry: key, world_matrix: geometry.world_matrix };

            let target = match (geometry.layer, material.kind) {
                (RenderLayer::Environment, _) => &mut state.env_renderables,
                (RenderLayer::Standard, MaterialKind::PrincipledBsdf(_)) => &mut state.lit_renderables,
                (RenderLayer::Standard, MaterialKind::Unlit(_)) => &mut state.unlit_renderables,
            };
            target
                .entry(material_key)
                .or_default()
                .entry(geometry.primitive)
                .or_default()
                .push(renderable);

            if geometry.layer == RenderLayer::Standard {
                if geometry.cast_shadows {
                    state.shadow_casters.entry(geometry.primitive).or_default().push(renderable);
                }
                if geometry.selected {
                    state.selected.entry(geometry.primitive).or_default().push(renderable);
                }
            }
        }

        state
    }

    /// Lights of one type
    pub fn lights_of(&self, light_type: LightType) -> impl Iterator<Item = LightKey> + '_ {
        self.lights.get(&light_type).into_iter().flat_map(|set| set.iter().copied())
    }

    /// Total number of lights
    pub fn light_count(&self) -> usize {
        self.lights.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::scene::{Geometry, Light, Material, PbrProperties, Primitive};

    #[test]
    fn test_collect_groups_by_material_and_primitive() {
        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let pbr = scene.add_material(Material::pbr("pbr", PbrProperties::default()));
        let flat = scene.add_material(Material::unlit("flat", [1.0; 4]));

        scene.add_geometry(Geometry::new(cube, pbr, Mat4::identity()));
        scene.add_geometry(Geometry::new(cube, pbr, Mat4::new_translation(&Vec3::x())));
        scene.add_geometry(Geometry::new(cube, flat, Mat4::identity()).with_shadows(false));
        scene.add_geometry(Geometry::new(cube, flat, Mat4::identity()).environment());
        scene.add_light(Light::point(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0));
        scene.add_light(Light::directional(-Vec3::y(), Vec3::new(1.0, 1.0, 1.0), 1.0));

        let state = SceneRenderState::collect(&scene);

        assert_eq!(state.lit_renderables[&pbr][&cube].len(), 2);
        assert_eq!(state.unlit_renderables[&flat][&cube].len(), 1);
        assert_eq!(state.env_renderables[&flat][&cube].len(), 1);
        assert_eq!(state.shadow_casters[&cube].len(), 2);
        assert_eq!(state.light_count(), 2);
        assert_eq!(state.lights_of(LightType::Spot).count(), 0);
    }

    #[test]
    fn test_missing_material_is_skipped() {
        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let material = scene.add_material(Material::unlit("flat", [1.0; 4]));
        scene.add_geometry(Geometry::new(cube, material, Mat4::identity()));
        scene.remove_material(material);

        let mut orphan = Geometry::new(cube, material, Mat4::identity());
        orphan.materials.clear();
        scene.add_geometry(orphan);

        let state = SceneRenderState::collect(&scene);
        assert!(state.unlit_renderables.is_empty());
        assert!(state.shadow_casters.is_empty());
    }
}
