//! SPIR-V shader library
//!
//! Loads compiled shaders by name from the shader directory
//! (`<dir>/<name>.spv`) and keeps the words around so pipelines can be
//! rebuilt after a resize without touching the file system again.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::render::{RenderError, RenderResult};

/// Shader names, matching the GLSL sources under `resources/shaders`
pub mod names {
    /// Generated full-screen triangle
    pub const FULLSCREEN_VERT: &str = "fullscreen.vert";
    /// G-buffer geometry vertex shader
    pub const GBUFFER_VERT: &str = "gbuffer.vert";
    /// G-buffer fragment shader writing albedo/position/normal/material
    pub const GBUFFER_FRAG: &str = "gbuffer.frag";
    /// Depth-only shadow vertex shader
    pub const SHADOW_DEPTH_VERT: &str = "shadow_depth.vert";
    /// Depth-only shadow fragment shader
    pub const SHADOW_DEPTH_FRAG: &str = "shadow_depth.frag";
    /// Point shadow vertex shader
    pub const SHADOW_DISTANCE_VERT: &str = "shadow_distance.vert";
    /// Point shadow fragment shader writing light distance
    pub const SHADOW_DISTANCE_FRAG: &str = "shadow_distance.frag";
    /// Directional light fragment shader
    pub const LIGHT_DIRECTIONAL_FRAG: &str = "light_directional.frag";
    /// Light volume vertex shader (point/spot)
    pub const LIGHT_VOLUME_VERT: &str = "light_volume.vert";
    /// Point light fragment shader
    pub const LIGHT_POINT_FRAG: &str = "light_point.frag";
    /// Spot light fragment shader
    pub const LIGHT_SPOT_FRAG: &str = "light_spot.frag";
    /// Procedural sky fragment shader
    pub const SKYBOX_FRAG: &str = "skybox.frag";
    /// Unlit vertex shader
    pub const UNLIT_VERT: &str = "unlit.vert";
    /// Unlit fragment shader
    pub const UNLIT_FRAG: &str = "unlit.frag";
    /// Debug line vertex shader
    pub const DEBUG_LINE_VERT: &str = "debug_line.vert";
    /// Debug line fragment shader
    pub const DEBUG_LINE_FRAG: &str = "debug_line.frag";
    /// Outline vertex shader (scaled geometry)
    pub const OUTLINE_VERT: &str = "outline.vert";
    /// Outline fragment shader (flat colour)
    pub const OUTLINE_FRAG: &str = "outline.frag";
    /// Blit fragment shader
    pub const BLIT_FRAG: &str = "blit.frag";
    /// Overlay vertex shader
    pub const OVERLAY_VERT: &str = "overlay.vert";
    /// Overlay fragment shader
    pub const OVERLAY_FRAG: &str = "overlay.frag";

    /// Every shader the passes use
    pub const ALL: [&str; 21] = [
        FULLSCREEN_VERT, GBUFFER_VERT, GBUFFER_FRAG, SHADOW_DEPTH_VERT, SHADOW_DEPTH_FRAG,
        SHADOW_DISTANCE_VERT, SHADOW_DISTANCE_FRAG, LIGHT_DIRECTIONAL_FRAG, LIGHT_VOLUME_VERT,
        LIGHT_POINT_FRAG, LIGHT_SPOT_FRAG, SKYBOX_FRAG, UNLIT_VERT, UNLIT_FRAG, DEBUG_LINE_VERT,
        DEBUG_LINE_FRAG, OUTLINE_VERT, OUTLINE_FRAG, BLIT_FRAG, OVERLAY_VERT, OVERLAY_FRAG,
    ];
}

/// Loaded SPIR-V, by shader name
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    directory: PathBuf,
    code: HashMap<String, Vec<u32>>,
}

impl ShaderLibrary {
    /// Create a library reading from `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), code: HashMap::new() }
    }

    /// Shader directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Register SPIR-V words under `name`, replacing any previous code
    pub fn insert(&mut self, name: impl Into<String>, words: Vec<u32>) {
        self.code.insert(name.into(), words);
    }

    /// Whether `name` is loaded
    pub fn contains(&self, name: &str) -> bool {
        self.code.contains_key(name)
    }

    /// Load every named shader, failing on the first missing one
    pub fn preload(&mut self, names: &[&str]) -> RenderResult<()> {
        for name in names {
            self.load(name)?;
        }
        log::info!("[SHADER] {} shaders loaded from {:?}", self.code.len(), self.directory);
        Ok(())
    }

    /// SPIR-V words of `name`, reading `<dir>/<name>.spv` on first use
    pub fn load(&mut self, name: &str) -> RenderResult<&[u32]> {
        if !self.code.contains_key(name) {
            let words = self.read(name)?;
            self.code.insert(name.to_string(), words);
        }

        self.code
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| RenderError::ShaderLoad { name: name.to_string(), reason: "not loaded".to_string() })
    }

    fn read(&self, name: &str) -> RenderResult<Vec<u32>> {
        let path = self.directory.join(format!("{name}.spv"));
        log::debug!("[SHADER] Loading shader from: {path:?}");

        let mut file = File::open(&path).map_err(|e| RenderError::ShaderLoad {
            name: name.to_string(),
            reason: format!("failed to open {}: {e}", path.display()),
        })?;

        ash::util::read_spv(&mut file).map_err(|e| RenderError::ShaderLoad {
            name: name.to_string(),
            reason: format!("invalid SPIR-V in {}: {e}", path.display()),
        })
    }
}
