//! Light sources
//!
//! Pure data; the lighting pass turns these into per-light uniform blocks and
//! the shadow generator into light-space transforms.

use crate::foundation::math::Vec3;

/// Light types, one lighting pipeline each
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LightType {
    /// Directional light (like sunlight)
    Directional,
    /// Point light (like a lightbulb)
    Point,
    /// Spot light (like a flashlight)
    Spot,
}

impl LightType {
    /// All light types in pass order
    pub const ALL: [LightType; 3] = [LightType::Directional, LightType::Point, LightType::Spot];

    /// Number of shadow-map layers a light of this type needs
    pub fn shadow_layer_count(self) -> u32 {
        match self {
            LightType::Directional => crate::render::shadows::CASCADE_COUNT as u32,
            LightType::Point => 6,
            LightType::Spot => 1,
        }
    }
}

/// Light source
#[derive(Debug, Clone)]
pub struct Light {
    /// Light type
    pub light_type: LightType,
    /// Light position (point/spot)
    pub position: Vec3,
    /// Normalized light direction (directional/spot)
    pub direction: Vec3,
    /// Light colour
    pub color: Vec3,
    /// Light intensity multiplier
    pub intensity: f32,
    /// Radius of influence (point/spot)
    pub radius: f32,
    /// Inner cone angle in radians (spot)
    pub inner_cutoff: f32,
    /// Outer cone angle in radians (spot)
    pub outer_cutoff: f32,
    /// Whether the light renders a shadow map
    pub cast_shadows: bool,
}

impl Light {
    /// Create a directional light
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            position: Vec3::zeros(),
            direction: direction.normalize(),
            color,
            intensity,
            radius: 0.0,
            inner_cutoff: 0.0,
            outer_cutoff: 0.0,
            cast_shadows: false,
        }
    }

    /// Create a point light
    pub fn point(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            direction: Vec3::zeros(),
            color,
            intensity,
            radius,
            inner_cutoff: 0.0,
            outer_cutoff: 0.0,
            cast_shadows: false,
        }
    }

    /// Create a spot light (cone angles in radians)
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
        inner_cutoff: f32,
        outer_cutoff: f32,
    ) -> Self {
        Self {
            light_type: LightType::Spot,
            position,
            direction: direction.normalize(),
            color,
            intensity,
            radius,
            inner_cutoff,
            outer_cutoff: outer_cutoff.max(inner_cutoff),
            cast_shadows: false,
        }
    }

    /// Enable or disable shadow casting
    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    /// Light type
    pub fn light_type(&self) -> LightType {
        self.light_type
    }
}
