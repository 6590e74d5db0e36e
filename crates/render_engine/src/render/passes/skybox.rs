//! Procedural sky and environment geometry
//!
//! The sky is a full-screen triangle at the far plane, tested against the
//! G-buffer depth so it only shows where nothing was drawn. Environment
//! geometry is drawn afterwards with a rotation-only view and its depth
//! forced to the far plane, so it stays centred on the camera and behind
//! everything else.

use ash::vk;

use crate::core::config::SkyboxSettings;
use crate::foundation::math::Vec3;
use crate::render::gpu::{AttachmentDesc, CommandSink, GpuDevice};
use crate::render::pipeline::{names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram};
use crate::render::resources::{DescriptorSetLayoutBuilder, MeshCache, PassTarget, RenderPassObjects, TextureCache, PASS_UNIFORM_BINDING};
use crate::render::uniforms::{CameraUniform, SkyUniform, UnlitPush};
use crate::render::{RenderResult, DEPTH_STENCIL_FORMAT};
use crate::scene::{Camera, SceneObject};

use super::unlit::UnlitBatch;
use super::{composite_target, require, CompositeTargets, FrameInputs, PassContext, RenderPass, COMPOSITE_CLEARS};

const NAME: &str = "skybox";

impl From<&SkyboxSettings> for SkyUniform {
    fn from(settings: &SkyboxSettings) -> Self {
        let [zr, zg, zb] = settings.zenith_color;
        let [hr, hg, hb] = settings.horizon_color;
        Self { zenith: [zr, zg, zb, 1.0], horizon: [hr, hg, hb, 1.0] }
    }
}

/// Camera block with the translation removed from the view
pub fn environment_camera(camera: &Camera, width: u32, height: u32) -> CameraUniform {
    let mut centred = camera.clone();
    centred.target = camera.target - camera.position;
    centred.position = Vec3::zeros();
    CameraUniform::new(&centred, width, height)
}

struct SkyboxResources {
    target: PassTarget,
    camera: RenderPassObjects<CameraUniform>,
    sky_pipeline: GraphicsPipeline,
    sky: SkyUniform,
    environment: UnlitBatch,
}

/// Gradient sky behind the scene plus environment renderables
#[derive(Default)]
pub struct SkyboxPass {
    resources: Option<SkyboxResources>,
}

impl SkyboxPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-screen sky at the far plane, drawn only where depth is still clear
    pub fn sky_descriptor(set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        PipelineDescriptor::new("sky", ShaderProgram::new(names::FULLSCREEN_VERT, names::SKYBOX_FRAG))
            .with_set_layouts(set_layouts)
            .with_push_constants(vk::ShaderStageFlags::FRAGMENT, std::mem::size_of::<SkyUniform>() as u32)
            .with_cull_mode(vk::CullModeFlags::NONE)
            .with_depth_stencil(DepthStencilState::READ_ONLY)
    }

    /// Create the render pass, camera objects and both pipelines
    pub fn init(&mut self, ctx: &mut PassContext<'_>, targets: &CompositeTargets<'_>) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let target = composite_target(
            ctx.device,
            NAME,
            targets,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentDesc::depth_load(DEPTH_STENCIL_FORMAT),
        )?;

        let camera_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let camera = RenderPassObjects::new(ctx.device, "sky camera", camera_layout, ctx.frames, &CameraUniform::default())?;
        let sky_pipeline = ctx.factory.build(ctx.device, ctx.shaders, &Self::sky_descriptor(&[camera.layout()]), target.render_pass())?;

        let environment = UnlitBatch::new(
            ctx,
            "environment",
            target.render_pass(),
            DepthStencilState::READ_ONLY,
            ColorBlendAttachment::OPAQUE,
        )?;

        self.resources = Some(SkyboxResources {
            target,
            camera,
            sky_pipeline,
            sky: SkyUniform::from(&ctx.config.skybox),
            environment,
        });
        log::info!("Initialized {NAME} pass");
        Ok(())
    }

    /// Number of cached environment material and model bindings
    pub fn cached_bindings(&self) -> (usize, usize) {
        self.resources.as_ref().map_or((0, 0), |resources| resources.environment.cached_bindings())
    }

    /// Draw the sky and then the environment layer; returns the number of
    /// environment draws
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        meshes: &mut MeshCache,
        textures: &mut TextureCache,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;
        let frame = inputs.frame;
        let extent = resources.target.extent();
        let rotation_only = environment_camera(inputs.camera, extent.width, extent.height);
        resources.camera.update(device, frame, &rotation_only)?;

        resources.target.begin(cmd, frame, &COMPOSITE_CLEARS);

        let layout = resources.sky_pipeline.layout;
        cmd.bind_pipeline(resources.sky_pipeline.pipeline);
        resources.camera.bind(cmd, layout, 0, frame);
        cmd.push_constants(layout, vk::ShaderStageFlags::FRAGMENT, 0, bytemuck::bytes_of(&resources.sky));
        cmd.draw(3, 1);

        let draws = resources.environment.draw(
            device,
            cmd,
            inputs,
            &inputs.state.env_renderables,
            &rotation_only,
            UnlitPush::ENVIRONMENT,
            meshes,
            textures,
        );
        cmd.end_render_pass();
        draws
    }

    /// Release bindings of a removed scene object
    pub fn forget(&mut self, device: &mut dyn GpuDevice, object: SceneObject) {
        if let Some(resources) = self.resources.as_mut() {
            resources.environment.forget(device, object);
        }
    }
}

impl RenderPass for SkyboxPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.sky_pipeline.destroy(device);
            resources.camera.destroy(device);
            resources.environment.destroy(device);
            resources.target.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::backends::{RecordedCommand, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::render::resources::{AttachmentSpec, FramebufferAttachment};
    use crate::render::LIT_COLOR_FORMAT;
    use crate::scene::{Geometry, Material, Primitive, Scene, SceneRenderState};
    use approx::assert_relative_eq;

    #[test]
    fn test_environment_camera_drops_translation() {
        let camera = Camera::perspective(Vec3::new(5.0, 2.0, -3.0), 60.0, 1.5, 0.1, 100.0).look_at(Vec3::new(5.0, 2.0, -10.0));
        let uniform = environment_camera(&camera, 64, 48);
        let full = CameraUniform::new(&camera, 64, 48);

        for row in 0..3 {
            assert_relative_eq!(uniform.view[3][row], 0.0, epsilon = 1e-5);
            for column in 0..3 {
                assert_relative_eq!(uniform.view[column][row], full.view[column][row], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_sky_then_environment_in_one_pass() {
        let mut fixture = Fixture::new();
        let lit = FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::color("lit", LIT_COLOR_FORMAT), EXTENT, 2).unwrap();
        let depth =
            FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::depth_stencil("depth", DEPTH_STENCIL_FORMAT), EXTENT, 2)
                .unwrap();
        let mut pass = SkyboxPass::new();
        pass.init(&mut fixture.context(), &CompositeTargets { lit: &lit, depth: &depth }).unwrap();

        let mut scene = Scene::new();
        let dome = scene.add_primitive(Primitive::uv_sphere("dome", 50.0, 8, 4));
        let stars = scene.add_material(Material::unlit("stars", [1.0; 4]));
        scene.add_geometry(Geometry::new(dome, stars, Mat4::identity()).environment());

        let state = SceneRenderState::collect(&scene);
        let camera = Camera::default();
        let inputs = FrameInputs { frame: 1, extent: EXTENT, scene: &scene, state: &state, camera: &camera };
        let mut meshes = MeshCache::new();
        let mut textures = TextureCache::new(&mut fixture.device).unwrap();
        let mut cmd = RecordingSink::new();

        let draws = pass.render(&mut fixture.device, &mut cmd, &inputs, &mut meshes, &mut textures).unwrap();

        assert_eq!(draws, 1);
        assert_eq!(cmd.draw_count(), 2);
        assert_eq!(cmd.render_passes().len(), 1);
        assert!(matches!(cmd.commands().iter().find(|c| matches!(c, RecordedCommand::Draw { .. })), Some(RecordedCommand::Draw { vertex_count: 3, .. })));
        let pushes: Vec<_> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PushConstants { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].as_slice(), bytemuck::bytes_of(&SkyUniform::from(&fixture.config.skybox)));
        assert_eq!(pushes[1].as_slice(), bytemuck::bytes_of(&UnlitPush::ENVIRONMENT));

        pass.clear(&mut fixture.device);
        meshes.clear(&mut fixture.device);
        textures.destroy(&mut fixture.device);
        let mut lit = lit;
        let mut depth = depth;
        lit.destroy(&mut fixture.device);
        depth.destroy(&mut fixture.device);
        assert_eq!(fixture.device.total_live(), 0);
    }
}
