//! # Renderer Configuration
//!
//! Configuration for the deferred renderer: frame pacing, shader locations and
//! the per-pass settings (shadows, selection outline, sky, debug drawing).
//!
//! Every section has sensible defaults so a partial TOML/RON file only needs
//! to name the values it overrides.

use serde::{Serialize, Deserialize};
use std::path::PathBuf;

use crate::config::{Config, ConfigError};

/// Upper bound on frames in flight accepted by [`RendererConfig::validate`]
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// # Renderer Configuration
///
/// Top-level settings consumed by [`crate::render::FrameRenderer`] and the
/// Vulkan backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frames that may be in flight on the GPU at once
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Directory holding the compiled SPIR-V shaders
    pub shader_dir: PathBuf,
    /// Clear colour of the lit output before lighting accumulates into it
    pub clear_color: [f32; 4],
    /// Shadow map settings
    pub shadows: ShadowSettings,
    /// Selection outline settings
    pub outline: OutlineSettings,
    /// Procedural sky settings
    pub skybox: SkyboxSettings,
    /// Scene debug drawing settings
    pub debug: DebugSettings,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            frames_in_flight: 2,
            enable_validation: None,
            shader_dir: PathBuf::from("target/shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shadows: ShadowSettings::default(),
            outline: OutlineSettings::default(),
            skybox: SkyboxSettings::default(),
            debug: DebugSettings::default(),
        }
    }

    /// Set frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the compiled shader directory
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Replace the shadow settings
    pub fn with_shadows(mut self, shadows: ShadowSettings) -> Self {
        self.shadows = shadows;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }

        self.shadows.validate()?;

        if self.outline.scale <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "outline scale must exceed 1.0 to produce a ring, got {}",
                self.outline.scale
            )));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Render Engine Application")
    }
}

impl Config for RendererConfig {}

/// Shadow map generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Whether shadow maps are rendered at all (fallback maps are still bound)
    pub enabled: bool,
    /// Edge length of every shadow map layer in texels
    pub resolution: u32,
    /// Blend between logarithmic (1.0) and uniform (0.0) cascade splits
    pub split_lambda: f32,
    /// Near plane of point-light cube face projections
    pub point_near: f32,
    /// Constant depth bias applied while rasterizing shadow depth
    pub depth_bias_constant: f32,
    /// Slope-scaled depth bias applied while rasterizing shadow depth
    pub depth_bias_slope: f32,
}

impl ShadowSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.resolution.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "shadow resolution must be a power of two, got {}",
                self.resolution
            )));
        }
        if !(0.0..=1.0).contains(&self.split_lambda) {
            return Err(ConfigError::Invalid(format!(
                "split lambda must be within [0, 1], got {}",
                self.split_lambda
            )));
        }
        if self.point_near <= 0.0 {
            return Err(ConfigError::Invalid("point shadow near plane must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 2048,
            split_lambda: 0.95,
            point_near: 0.01,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

/// Selection outline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineSettings {
    /// Outline colour (RGBA)
    pub color: [f32; 4],
    /// Scale applied to the selected geometry for the outline draw
    pub scale: f32,
}

impl Default for OutlineSettings {
    fn default() -> Self {
        Self {
            color: [1.0, 0.55, 0.0, 1.0],
            scale: 1.05,
        }
    }
}

/// Procedural gradient sky
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyboxSettings {
    /// Colour straight up
    pub zenith_color: [f32; 3],
    /// Colour at the horizon
    pub horizon_color: [f32; 3],
}

impl Default for SkyboxSettings {
    fn default() -> Self {
        Self {
            zenith_color: [0.18, 0.32, 0.62],
            horizon_color: [0.70, 0.78, 0.88],
        }
    }
}

/// Scene debug drawing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Whether the debug pass draws anything
    pub enabled: bool,
    /// Draw direction arrows and influence circles for lights
    pub draw_light_gizmos: bool,
    /// Capacity of the per-frame debug line vertex buffer
    pub max_line_vertices: u32,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            draw_light_gizmos: false,
            max_line_vertices: 16 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            application_name = "viewer"
            frames_in_flight = 3

            [shadows]
            resolution = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.shadows.resolution, 1024);
        assert!((config.shadows.split_lambda - 0.95).abs() < f32::EPSILON);
        assert!((config.outline.scale - 1.05).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_frames_in_flight_rejected() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_non_power_of_two_shadow_resolution_rejected() {
        let config = RendererConfig::default().with_shadows(ShadowSettings {
            resolution: 1000,
            ..ShadowSettings::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ron_config_parses() {
        let config = RendererConfig::from_ron_str(r#"(application_name: "ron", outline: (scale: 1.1))"#).unwrap();
        assert_eq!(config.application_name, "ron");
        assert!((config.outline.scale - 1.1).abs() < f32::EPSILON);
    }
}
