//! # Frame Renderer
//!
//! Owns every pass, the mesh and texture caches and the shadow map registry,
//! and records one frame into a [`CommandSink`]:
//!
//! ```text
//! G-buffer ─► shadow maps ─► lighting ─► sky ─► unlit ─► debug ─► outline ─► blit ─► overlay
//! ```
//!
//! The frame-in-flight index advances after every recorded frame. Waiting on
//! the fence of that index before recording is the caller's job.

use ash::vk;

use crate::core::config::RendererConfig;
use crate::render::gpu::{CommandSink, GpuDevice};
use crate::render::passes::{
    BlitPass, CompositeTargets, FrameInputs, GBufferPass, LocalLightingPass, OverlayDrawData, OverlayPass, PassContext,
    RenderPass, SceneDebugPass, SelectionOutlinePass, SkyboxPass, UnlitPass,
};
use crate::render::pipeline::{GraphicsPipelineFactory, ShaderLibrary};
use crate::render::resources::{MeshCache, TextureCache};
use crate::render::shadows::{ShadowMapGenerator, ShadowMapRegistry};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Camera, Scene, SceneObject, SceneRenderState};

/// Caller-owned presentable image the frame ends in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentTarget {
    /// Swapchain image
    pub image: vk::Image,
    /// View of `image`
    pub view: vk::ImageView,
    /// Format of `image`
    pub format: vk::Format,
    /// Size of `image`
    pub extent: vk::Extent2D,
}

/// What one recorded frame drew
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame-in-flight index the frame was recorded for
    pub frame: usize,
    /// Lit geometry draws into the G-buffer
    pub geometry_draws: usize,
    /// Shadow maps rendered
    pub shadow_maps: usize,
    /// Lights accumulated
    pub light_draws: usize,
    /// Sky plus environment draws
    pub sky_draws: usize,
    /// Unlit draws
    pub unlit_draws: usize,
    /// Debug line vertices
    pub debug_vertices: u32,
    /// Outline mask and ring draws
    pub outline_draws: usize,
    /// Overlay draws
    pub overlay_draws: usize,
}

/// Deferred renderer
pub struct FrameRenderer {
    config: RendererConfig,
    shaders: ShaderLibrary,
    factory: GraphicsPipelineFactory,
    extent: vk::Extent2D,
    present_format: vk::Format,
    frame: usize,

    meshes: MeshCache,
    textures: TextureCache,
    shadow_maps: ShadowMapRegistry,

    gbuffer: GBufferPass,
    shadows: ShadowMapGenerator,
    lighting: LocalLightingPass,
    skybox: SkyboxPass,
    unlit: UnlitPass,
    debug: SceneDebugPass,
    outline: SelectionOutlinePass,
    blit: BlitPass,
    overlay: OverlayPass,
}

impl FrameRenderer {
    /// Validate `config`, create the shared caches and initialize every pass
    pub fn new(
        device: &mut dyn GpuDevice,
        config: RendererConfig,
        shaders: ShaderLibrary,
        extent: vk::Extent2D,
        present_format: vk::Format,
    ) -> RenderResult<Self> {
        config.validate()?;
        let frames = config.frames_in_flight;

        let textures = TextureCache::new(device)?;
        let shadow_maps = match ShadowMapRegistry::new(device, config.shadows.resolution, frames) {
            Ok(registry) => registry,
            Err(e) => {
                let mut textures = textures;
                textures.destroy(device);
                return Err(e);
            }
        };

        let mut renderer = Self {
            config,
            shaders,
            factory: GraphicsPipelineFactory::new(),
            extent,
            present_format,
            frame: 0,
            meshes: MeshCache::new(),
            textures,
            shadow_maps,
            gbuffer: GBufferPass::new(),
            shadows: ShadowMapGenerator::new(),
            lighting: LocalLightingPass::new(),
            skybox: SkyboxPass::new(),
            unlit: UnlitPass::new(),
            debug: SceneDebugPass::new(),
            outline: SelectionOutlinePass::new(),
            blit: BlitPass::new(),
            overlay: OverlayPass::new(),
        };

        if let Err(e) = renderer.init_passes(device) {
            log::error!("Renderer initialization failed: {e}");
            renderer.destroy(device);
            return Err(e);
        }

        log::info!(
            "Created renderer '{}' ({}x{}, {present_format:?}, {frames} frames in flight)",
            renderer.config.application_name,
            extent.width,
            extent.height
        );
        Ok(renderer)
    }

    /// Active configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Size of the window-sized attachments
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Format the blit and overlay passes render into
    pub fn present_format(&self) -> vk::Format {
        self.present_format
    }

    /// Frame-in-flight index the next frame is recorded for
    pub fn frame_index(&self) -> usize {
        self.frame
    }

    /// Number of per-light shadow maps
    pub fn shadow_map_count(&self) -> usize {
        self.shadow_maps.len()
    }

    /// Whether every pass is ready to render
    pub fn is_initialized(&self) -> bool {
        self.passes().iter().all(|pass| pass.is_initialized())
    }

    /// Record one frame ending in `target`
    ///
    /// A `target` whose size or format differs from the current attachments
    /// rebuilds every pass first. On error the frame must not be submitted.
    pub fn render_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        scene: &Scene,
        camera: &Camera,
        target: &PresentTarget,
        overlay: Option<&OverlayDrawData>,
    ) -> RenderResult<FrameStats> {
        if target.extent != self.extent || target.format != self.present_format {
            self.rebuild(device, target.extent, target.format)?;
        }

        let frame = self.frame;
        let stats = self.record(device, cmd, scene, camera, target, overlay).map_err(|e| {
            log::error!("Frame {frame} aborted: {e}");
            e
        })?;

        self.frame = (frame + 1) % self.config.frames_in_flight;
        log::trace!("Recorded frame {frame}: {stats:?}");
        Ok(stats)
    }

    fn record(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        scene: &Scene,
        camera: &Camera,
        target: &PresentTarget,
        overlay: Option<&OverlayDrawData>,
    ) -> RenderResult<FrameStats> {
        let frame = self.frame;
        let state = SceneRenderState::collect(scene);
        let inputs = FrameInputs { frame, extent: self.extent, scene, state: &state, camera };
        let mut stats = FrameStats { frame, ..FrameStats::default() };

        stats.geometry_draws = self.gbuffer.render(device, cmd, &inputs, &mut self.meshes, &mut self.textures)?;

        self.shadow_maps.initialize_fallbacks(cmd);
        stats.shadow_maps =
            self.shadows.render(device, cmd, &inputs, &self.config.shadows, &mut self.shadow_maps, &mut self.meshes)?;

        stats.light_draws = self.lighting.render(device, cmd, &inputs, &self.shadow_maps)?;
        stats.sky_draws = self.skybox.render(device, cmd, &inputs, &mut self.meshes, &mut self.textures)?;
        stats.unlit_draws = self.unlit.render(device, cmd, &inputs, &mut self.meshes, &mut self.textures)?;
        stats.debug_vertices = self.debug.render(device, cmd, &inputs)?;
        stats.outline_draws = self.outline.render(device, cmd, &inputs, &mut self.meshes)?;

        self.blit.render(device, cmd, frame, target)?;
        stats.overlay_draws = self.overlay.render(device, cmd, frame, target, overlay, scene, &mut self.textures)?;

        Ok(stats)
    }

    /// Rebuild every window-sized resource for `extent`
    ///
    /// A zero-sized extent (minimized window) is ignored.
    pub fn resize(&mut self, device: &mut dyn GpuDevice, extent: vk::Extent2D) -> RenderResult<()> {
        self.rebuild(device, extent, self.present_format)
    }

    fn rebuild(&mut self, device: &mut dyn GpuDevice, extent: vk::Extent2D, present_format: vk::Format) -> RenderResult<()> {
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Ignoring resize to {}x{}", extent.width, extent.height);
            return Ok(());
        }

        device.wait_idle()?;
        self.clear_passes(device);
        self.extent = extent;
        self.present_format = present_format;
        self.init_passes(device)?;

        log::info!("Resized renderer to {}x{} ({present_format:?})", extent.width, extent.height);
        Ok(())
    }

    /// Release the GPU state of removed scene objects
    ///
    /// Waits for the device to go idle first when there is anything to
    /// release, since in-flight frames may still reference it.
    pub fn process_removals(&mut self, device: &mut dyn GpuDevice, removed: Vec<SceneObject>) -> RenderResult<()> {
        if removed.is_empty() {
            return Ok(());
        }
        device.wait_idle()?;

        for object in removed {
            self.gbuffer.forget(device, object);
            self.lighting.forget(device, object);
            self.skybox.forget(device, object);
            self.unlit.forget(device, object);
            self.overlay.forget(object);

            match object {
                SceneObject::Primitive(key) => self.meshes.forget(device, key),
                SceneObject::Texture(key) => self.textures.forget(device, key),
                SceneObject::Light(key) => self.shadow_maps.forget(device, key),
                SceneObject::Material(_) | SceneObject::Geometry(_) => {}
            }
            log::debug!("Released GPU state of {object:?}");
        }
        Ok(())
    }

    /// Destroy every GPU object the renderer owns
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if let Err(e) = device.wait_idle() {
            log::error!("Device did not go idle before teardown: {e}");
        }
        self.clear_passes(device);
        self.meshes.clear(device);
        self.textures.destroy(device);
        self.shadow_maps.destroy(device);
        log::info!("Destroyed renderer '{}'", self.config.application_name);
    }

    fn passes(&self) -> [&dyn RenderPass; 9] {
        [
            &self.gbuffer,
            &self.shadows,
            &self.lighting,
            &self.skybox,
            &self.unlit,
            &self.debug,
            &self.outline,
            &self.blit,
            &self.overlay,
        ]
    }

    fn clear_passes(&mut self, device: &mut dyn GpuDevice) {
        let passes: [&mut dyn RenderPass; 9] = [
            &mut self.overlay,
            &mut self.blit,
            &mut self.outline,
            &mut self.debug,
            &mut self.unlit,
            &mut self.skybox,
            &mut self.lighting,
            &mut self.shadows,
            &mut self.gbuffer,
        ];
        for pass in passes {
            pass.clear(device);
        }
    }

    fn init_passes(&mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        let extent = self.extent;
        let present_format = self.present_format;
        let frames = self.config.frames_in_flight;
        let mut ctx = PassContext {
            device,
            shaders: &mut self.shaders,
            factory: &mut self.factory,
            config: &self.config,
            frames,
        };

        self.gbuffer.init(&mut ctx, extent)?;
        self.shadows.init(&mut ctx)?;

        let gbuffer = self.gbuffer.targets().ok_or_else(|| RenderError::MissingResource("G-buffer targets".to_string()))?;
        self.lighting.init(&mut ctx, extent, gbuffer)?;

        let lit = self.lighting.output().ok_or_else(|| RenderError::MissingResource("lit colour".to_string()))?;
        let targets = CompositeTargets { lit, depth: &gbuffer.depth };
        self.skybox.init(&mut ctx, &targets)?;
        self.unlit.init(&mut ctx, &targets)?;
        self.debug.init(&mut ctx, &targets)?;
        self.outline.init(&mut ctx, &targets)?;

        self.blit.init(&mut ctx, lit, present_format)?;
        self.overlay.init(&mut ctx, present_format)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::backends::{HeadlessDevice, ObjectKind, RecordingSink};
    use crate::render::passes::test_support::shader_library;
    use crate::render::passes::{OverlayDrawCommand, OverlayVertex};
    use crate::scene::{Geometry, Light, Material, PbrProperties, Primitive};
    use ash::vk::Handle;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 48 };
    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

    fn target(extent: vk::Extent2D) -> PresentTarget {
        PresentTarget {
            image: vk::Image::from_raw(9001),
            view: vk::ImageView::from_raw(9001),
            format: FORMAT,
            extent,
        }
    }

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 2.0, 6.0), 60.0, 64.0 / 48.0, 0.1, 100.0).look_at(Vec3::zeros())
    }

    fn renderer(device: &mut HeadlessDevice) -> FrameRenderer {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = RendererConfig::new("frame test");
        config.shadows.resolution = 64;
        FrameRenderer::new(device, config, shader_library(), EXTENT, FORMAT).unwrap()
    }

    fn lit_cube(scene: &mut Scene, offset: f32) {
        let primitive = scene.add_primitive(Primitive::cube("cube", 0.5));
        let material = scene.add_material(Material::pbr("grey", PbrProperties::default()));
        scene.add_geometry(Geometry::new(primitive, material, Mat4::new_translation(&Vec3::new(offset, 0.0, 0.0))));
    }

    fn populated_scene() -> Scene {
        let mut scene = Scene::new();
        lit_cube(&mut scene, 0.0);
        scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 4.0, 10.0).with_shadows(true));
        scene.add_light(Light::directional(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0));
        scene
    }

    fn render(renderer: &mut FrameRenderer, device: &mut HeadlessDevice, scene: &Scene, extent: vk::Extent2D) -> FrameStats {
        let mut cmd = RecordingSink::new();
        let stats = renderer.render_frame(device, &mut cmd, scene, &camera(), &target(extent), None).unwrap();
        assert!(cmd.is_balanced());
        stats
    }

    #[test]
    fn test_frame_runs_every_pass() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        assert!(renderer.is_initialized());

        let mut cmd = RecordingSink::new();
        let stats = renderer.render_frame(&mut device, &mut cmd, &populated_scene(), &camera(), &target(EXTENT), None).unwrap();

        assert_eq!(stats.geometry_draws, 1);
        assert_eq!(stats.shadow_maps, 1);
        assert_eq!(stats.light_draws, 2);
        assert!(cmd.is_balanced());
        // G-buffer, 6 point-light shadow faces, lighting, sky, unlit, debug, outline, blit, overlay
        assert_eq!(cmd.render_passes().len(), 14);
    }

    #[test]
    fn test_frame_index_cycles() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let scene = populated_scene();

        let frames: Vec<usize> = (0..5).map(|_| render(&mut renderer, &mut device, &scene, EXTENT).frame).collect();
        assert_eq!(frames, vec![0, 1, 0, 1, 0]);
        assert_eq!(renderer.frame_index(), 1);
    }

    #[test]
    fn test_resize_never_reuses_handles() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let scene = populated_scene();
        render(&mut renderer, &mut device, &scene, EXTENT);

        let kinds = [ObjectKind::DescriptorPool, ObjectKind::DescriptorSet, ObjectKind::Pipeline, ObjectKind::Framebuffer];
        let before: Vec<_> = kinds.iter().map(|&kind| device.live_handles(kind)).collect();
        let idle_before = device.wait_idle_calls();

        let resized = vk::Extent2D { width: 128, height: 96 };
        renderer.resize(&mut device, resized).unwrap();
        render(&mut renderer, &mut device, &scene, resized);

        assert_eq!(renderer.extent(), resized);
        assert_eq!(device.wait_idle_calls(), idle_before + 1);
        for (kind, old) in kinds.iter().zip(&before) {
            let new = device.live_handles(*kind);
            assert!(!new.is_empty(), "{kind:?}");
            assert!(new.is_disjoint(old), "{kind:?} handles survived the resize");
        }
        assert_eq!(device.invalid_destroys(), 0);
    }

    #[test]
    fn test_mismatched_target_triggers_rebuild() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let scene = populated_scene();

        let resized = vk::Extent2D { width: 32, height: 32 };
        render(&mut renderer, &mut device, &scene, resized);
        assert_eq!(renderer.extent(), resized);
        assert_eq!(device.wait_idle_calls(), 1);
    }

    #[test]
    fn test_zero_extent_is_ignored() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        renderer.resize(&mut device, vk::Extent2D { width: 0, height: 600 }).unwrap();
        assert_eq!(renderer.extent(), EXTENT);
        assert_eq!(device.wait_idle_calls(), 0);
    }

    #[test]
    fn test_invalid_draws_are_skipped() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let mut scene = populated_scene();

        let empty = scene.add_primitive(Primitive::new("empty", Vec::new(), None));
        let material = scene.add_material(Material::pbr("orphan", PbrProperties::default()));
        scene.add_geometry(Geometry::new(empty, material, Mat4::identity()));

        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let removed = scene.add_material(Material::pbr("removed", PbrProperties::default()));
        scene.add_geometry(Geometry::new(cube, removed, Mat4::identity()));
        scene.remove_material(removed);
        renderer.process_removals(&mut device, scene.drain_removed()).unwrap();

        let stats = render(&mut renderer, &mut device, &scene, EXTENT);
        assert_eq!(stats.geometry_draws, 1);
    }

    #[test]
    fn test_lights_without_shadows_use_fallbacks() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let mut scene = Scene::new();
        lit_cube(&mut scene, 0.0);
        scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 4.0, 10.0));

        let stats = render(&mut renderer, &mut device, &scene, EXTENT);
        assert_eq!(stats.shadow_maps, 0);
        assert_eq!(stats.light_draws, 1);
        assert_eq!(renderer.shadow_map_count(), 0);
    }

    #[test]
    fn test_new_materials_do_not_build_pipelines() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let mut scene = populated_scene();
        render(&mut renderer, &mut device, &scene, EXTENT);
        let pipelines = device.live_count(ObjectKind::Pipeline);

        for i in 1..4 {
            lit_cube(&mut scene, i as f32 * 2.0);
        }
        let stats = render(&mut renderer, &mut device, &scene, EXTENT);

        assert_eq!(stats.geometry_draws, 4);
        assert_eq!(device.live_count(ObjectKind::Pipeline), pipelines);
    }

    #[test]
    fn test_removals_release_gpu_state() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let mut scene = populated_scene();
        render(&mut renderer, &mut device, &scene, EXTENT);
        assert_eq!(renderer.shadow_map_count(), 1);
        let buffers = device.live_count(ObjectKind::Buffer);

        let lights: Vec<_> = scene.lights().map(|(key, _)| key).collect();
        for key in lights {
            scene.remove_light(key);
        }
        let geometries: Vec<_> = scene.geometries().map(|(key, geometry)| (key, geometry.primitive, geometry.materials[0])).collect();
        for (geometry, primitive, material) in geometries {
            scene.remove_geometry(geometry);
            scene.remove_primitive(primitive);
            scene.remove_material(material);
        }
        renderer.process_removals(&mut device, scene.drain_removed()).unwrap();

        assert_eq!(renderer.shadow_map_count(), 0);
        assert!(device.live_count(ObjectKind::Buffer) < buffers);
    }

    #[test]
    fn test_overlay_draws_after_blit() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let vertex = OverlayVertex { position: [4.0, 4.0], uv: [0.0, 0.0], color: u32::MAX };
        let data = OverlayDrawData {
            display_pos: [0.0, 0.0],
            display_size: [64.0, 48.0],
            vertices: vec![vertex; 3],
            indices: vec![0, 1, 2],
            commands: vec![OverlayDrawCommand { clip_rect: [0.0, 0.0, 64.0, 48.0], element_count: 3, first_index: 0, vertex_offset: 0 }],
            font_texture: None,
        };

        let mut cmd = RecordingSink::new();
        let stats = renderer
            .render_frame(&mut device, &mut cmd, &populated_scene(), &camera(), &target(EXTENT), Some(&data))
            .unwrap();
        assert_eq!(stats.overlay_draws, 1);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer(&mut device);
        let scene = populated_scene();
        render(&mut renderer, &mut device, &scene, EXTENT);
        render(&mut renderer, &mut device, &scene, EXTENT);

        renderer.destroy(&mut device);
        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_destroys(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut device = HeadlessDevice::new();
        let config = RendererConfig::new("bad").with_frames_in_flight(0);
        let result = FrameRenderer::new(&mut device, config, shader_library(), EXTENT, FORMAT);
        assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
        assert_eq!(device.total_live(), 0);
    }
}
