//! # Render Engine
//!
//! Deferred Vulkan renderer organised as a fixed sequence of render passes
//! with lazily created, per-object GPU resource bindings.
//!
//! ## Features
//!
//! - **Deferred shading**: G-buffer, additive per-light accumulation
//! - **Shadows**: cascaded directional, cube-map point and spot shadow maps
//! - **Binding caches**: one uniform buffer and one descriptor set per
//!   material, geometry and light, created on first use
//! - **Composite passes**: sky, unlit, debug lines, selection outline, UI overlay
//! - **Headless backend**: every pass runs against an in-memory device in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_engine::prelude::*;
//! use render_engine::render::backends::{HeadlessDevice, RecordingSink};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device = HeadlessDevice::new();
//!     let config = RendererConfig::new("demo");
//!     let shaders = ShaderLibrary::new(&config.shader_dir);
//!     let extent = ash::vk::Extent2D { width: 1280, height: 720 };
//!     let mut renderer = FrameRenderer::new(&mut device, config, shaders, extent, ash::vk::Format::B8G8R8A8_SRGB)?;
//!
//!     let mut scene = Scene::new();
//!     let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
//!     let grey = scene.add_material(Material::pbr("grey", PbrProperties::default()));
//!     scene.add_geometry(Geometry::new(cube, grey, Mat4::identity()));
//!
//!     let camera = Camera::perspective(Vec3::new(0.0, 1.0, 4.0), 60.0, 16.0 / 9.0, 0.1, 100.0);
//!     let target = PresentTarget {
//!         image: ash::vk::Image::null(),
//!         view: ash::vk::ImageView::null(),
//!         format: ash::vk::Format::B8G8R8A8_SRGB,
//!         extent,
//!     };
//!     let mut cmd = RecordingSink::new();
//!     renderer.render_frame(&mut device, &mut cmd, &scene, &camera, &target, None)?;
//!     renderer.destroy(&mut device);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;
pub mod config;
pub mod foundation;
pub mod scene;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::{DebugSettings, OutlineSettings, RendererConfig, ShadowSettings, SkyboxSettings},
        foundation::math::{Mat4, Vec3},
        render::{
            frame::{FrameRenderer, FrameStats, PresentTarget},
            passes::{OverlayDrawCommand, OverlayDrawData, OverlayVertex},
            pipeline::ShaderLibrary,
            CommandSink, GpuDevice, RenderError, RenderResult,
        },
        scene::{
            Camera, Geometry, Light, LightType, Material, MaterialTextures, PbrProperties, Primitive, Scene, Texture,
            Vertex,
        },
    };
}
