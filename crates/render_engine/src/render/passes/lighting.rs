//! # Local Lighting Pass
//!
//! Accumulates the radiance of every light into the lit colour attachment,
//! one draw per light, with ONE/ONE blending so the result is the sum over
//! all lights in any order.
//!
//! - Directional lights draw a full-screen triangle and pick a shadow cascade
//!   from the fragment's view depth.
//! - Point and spot lights draw a unit sphere scaled to the light radius so
//!   only fragments inside the influence volume are shaded. Front faces are
//!   culled so the volume still shades while the camera is inside it.
//!
//! Set 0 holds the camera and the four G-buffer attachments; set 1 holds the
//! light block and its shadow map. Light blocks carry camera-dependent
//! cascades, so every frame in flight gets its own light uniform.

use ash::vk;

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::render::gpu::{AttachmentDesc, ClearValue, CommandSink, GpuDevice, RenderPassDesc};
use crate::render::pipeline::{
    names, ColorBlendAttachment, PipelineCache, PipelineDescriptor, ShaderProgram, VertexLayout,
};
use crate::render::resources::{
    AttachmentSpec, DescriptorSetLayoutBuilder, FrameResourceCache, FramebufferAttachment, GpuMesh, PassTarget,
    RenderPassObjects, UniformMode, OBJECT_UNIFORM_BINDING, PASS_UNIFORM_BINDING,
};
use crate::render::shading;
use crate::render::shadows::{shadow_bias_matrix, ShadowBinding, ShadowMap, ShadowMapRegistry, CASCADE_COUNT};
use crate::render::uniforms::{CameraUniform, DirectionalLightUniform, GpuMat4, PointLightUniform, SpotLightUniform};
use crate::render::{RenderError, RenderResult, LIT_COLOR_FORMAT};
use crate::scene::{Light, LightKey, LightType, Primitive, SceneObject};

use super::{require, FrameInputs, GBufferTargets, PassContext, RenderPass};

const NAME: &str = "local lighting";

/// Binding of the shadow map in every light set
pub const SHADOW_MAP_BINDING: u32 = 1;

/// Light volumes are scaled past the radius so the faceted sphere still
/// covers the whole influence region
pub const VOLUME_MARGIN: f32 = 1.05;

const VOLUME_SEGMENTS: u32 = 16;
const VOLUME_RINGS: u32 = 8;

fn identity() -> GpuMat4 {
    utils::mat4_to_cols(&Mat4::identity())
}

fn radiance(light: &Light, live: bool) -> [f32; 4] {
    let color = light.color * light.intensity;
    [color.x, color.y, color.z, if live { 1.0 } else { 0.0 }]
}

fn volume_matrix(light: &Light) -> GpuMat4 {
    let scale = light.radius * VOLUME_MARGIN;
    utils::mat4_to_cols(&(Mat4::new_translation(&light.position) * Mat4::new_scaling(scale)))
}

/// Directional light block; cascades come from `frame`'s record in the
/// light's shadow map
pub fn directional_uniform(light: &Light, shadow: Option<&ShadowMap>, frame: usize, live: bool) -> DirectionalLightUniform {
    let direction = light.direction.normalize();
    let mut light_space = [identity(); CASCADE_COUNT];
    let mut split_depths = [0.0; CASCADE_COUNT];
    if let Some(map) = shadow {
        for (slot, matrix) in light_space.iter_mut().zip(map.light_space(frame)) {
            *slot = utils::mat4_to_cols(matrix);
        }
        split_depths = map.split_depths(frame);
    }

    DirectionalLightUniform {
        direction: [direction.x, direction.y, direction.z, 0.0],
        color: radiance(light, live),
        light_space,
        split_depths,
    }
}

/// Point light block with `1 / (Kc + Kl d + Kq d²)` coefficients for its radius
pub fn point_uniform(light: &Light, live: bool) -> PointLightUniform {
    let [kc, kl, kq] = shading::attenuation_coefficients(light.radius);
    let p = light.position;
    PointLightUniform {
        volume: volume_matrix(light),
        position: [p.x, p.y, p.z, light.radius],
        color: radiance(light, live),
        attenuation: [kc, kl, kq, 0.0],
    }
}

/// Spot light block; the shadow transform maps into texture space
pub fn spot_uniform(light: &Light, shadow: Option<&ShadowMap>, frame: usize, live: bool) -> SpotLightUniform {
    let [kc, kl, kq] = shading::attenuation_coefficients(light.radius);
    let p = light.position;
    let d: Vec3 = light.direction.normalize();
    let light_space = shadow
        .and_then(|map| map.light_space(frame).first())
        .map_or_else(identity, |matrix| utils::mat4_to_cols(&(shadow_bias_matrix() * matrix)));

    SpotLightUniform {
        volume: volume_matrix(light),
        light_space,
        position: [p.x, p.y, p.z, light.radius],
        direction: [d.x, d.y, d.z, 0.0],
        color: radiance(light, live),
        cone: [light.inner_cutoff.cos(), light.outer_cutoff.cos(), kc, kl],
        attenuation: [kq, 0.0, 0.0, 0.0],
    }
}

struct LightingResources {
    output: FramebufferAttachment,
    target: PassTarget,
    pass_objects: RenderPassObjects<CameraUniform>,
    directional: FrameResourceCache<LightKey, DirectionalLightUniform>,
    point: FrameResourceCache<LightKey, PointLightUniform>,
    spot: FrameResourceCache<LightKey, SpotLightUniform>,
    pipelines: PipelineCache<LightType>,
    volume: GpuMesh,
    clear_color: [f32; 4],
}

/// Deferred light accumulation
#[derive(Default)]
pub struct LocalLightingPass {
    resources: Option<LightingResources>,
}

impl LocalLightingPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline of one light type
    pub fn pipeline_descriptor(light_type: LightType, set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        let descriptor = match light_type {
            LightType::Directional => {
                PipelineDescriptor::new("light directional", ShaderProgram::new(names::FULLSCREEN_VERT, names::LIGHT_DIRECTIONAL_FRAG))
                    .with_cull_mode(vk::CullModeFlags::NONE)
            }
            LightType::Point => PipelineDescriptor::new("light point", ShaderProgram::new(names::LIGHT_VOLUME_VERT, names::LIGHT_POINT_FRAG))
                .with_vertex_layout(VertexLayout::mesh_positions())
                .with_cull_mode(vk::CullModeFlags::FRONT),
            LightType::Spot => PipelineDescriptor::new("light spot", ShaderProgram::new(names::LIGHT_VOLUME_VERT, names::LIGHT_SPOT_FRAG))
                .with_vertex_layout(VertexLayout::mesh_positions())
                .with_cull_mode(vk::CullModeFlags::FRONT),
        };
        descriptor.with_set_layouts(set_layouts).with_color_blend(&[ColorBlendAttachment::ADDITIVE])
    }

    /// Create the lit attachment, descriptor objects, light volume and the
    /// three light pipelines
    pub fn init(&mut self, ctx: &mut PassContext<'_>, extent: vk::Extent2D, gbuffer: &GBufferTargets) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let frames = ctx.frames;

        let output = FramebufferAttachment::new(ctx.device, AttachmentSpec::color("lit colour", LIT_COLOR_FORMAT), extent, frames)?;
        let target = PassTarget::new(
            ctx.device,
            &RenderPassDesc {
                label: NAME,
                color_attachments: vec![AttachmentDesc::color_clear(LIT_COLOR_FORMAT, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
                depth_attachment: None,
            },
            &output.views().iter().map(|&view| vec![view]).collect::<Vec<_>>(),
            extent,
        )?;

        let mut pass_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        for binding in 1..=4 {
            pass_layout = pass_layout.add_combined_image_sampler(binding, vk::ShaderStageFlags::FRAGMENT);
        }
        let pass_layout = pass_layout.build(ctx.device)?;
        let pass_objects = RenderPassObjects::new(ctx.device, "lighting camera", pass_layout, frames, &CameraUniform::default())?;
        for frame in 0..frames {
            pass_objects.write(ctx.device, frame, &gbuffer.sampled_writes(1, frame));
        }

        let light_layout = |device: &mut dyn GpuDevice| {
            DescriptorSetLayoutBuilder::new()
                .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                .add_combined_image_sampler(SHADOW_MAP_BINDING, vk::ShaderStageFlags::FRAGMENT)
                .build(device)
        };
        let directional = FrameResourceCache::with_mode("directional lights", light_layout(ctx.device)?, frames, UniformMode::PerFrame);
        let point = FrameResourceCache::with_mode("point lights", light_layout(ctx.device)?, frames, UniformMode::PerFrame);
        let spot = FrameResourceCache::with_mode("spot lights", light_layout(ctx.device)?, frames, UniformMode::PerFrame);

        let volume = GpuMesh::upload(ctx.device, &Primitive::uv_sphere("light volume", 1.0, VOLUME_SEGMENTS, VOLUME_RINGS))?;

        let mut pipelines = PipelineCache::new();
        let set_layouts = |light_type| {
            let light_layout = match light_type {
                LightType::Directional => directional.layout(),
                LightType::Point => point.layout(),
                LightType::Spot => spot.layout(),
            };
            [pass_objects.layout(), light_layout]
        };
        for light_type in LightType::ALL {
            pipelines.get_or_build(light_type, ctx.device, ctx.factory, ctx.shaders, target.render_pass(), || {
                Self::pipeline_descriptor(light_type, &set_layouts(light_type))
            })?;
        }

        self.resources = Some(LightingResources {
            output,
            target,
            pass_objects,
            directional,
            point,
            spot,
            pipelines,
            volume,
            clear_color: ctx.config.clear_color,
        });
        log::info!("Initialized {NAME} pass ({}x{})", extent.width, extent.height);
        Ok(())
    }

    /// Lit colour attachment of the initialized pass
    pub fn output(&self) -> Option<&FramebufferAttachment> {
        self.resources.as_ref().map(|resources| &resources.output)
    }

    /// Number of pipelines built by this pass
    pub fn pipeline_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |resources| resources.pipelines.len())
    }

    /// Number of cached light bindings of a type
    pub fn cached_lights(&self, light_type: LightType) -> usize {
        self.resources.as_ref().map_or(0, |r| match light_type {
            LightType::Directional => r.directional.len(),
            LightType::Point => r.point.len(),
            LightType::Spot => r.spot.len(),
        })
    }

    /// Descriptor set of `light` for `frame`, if it was bound before
    pub fn light_set(&self, light: LightKey, light_type: LightType, frame: usize) -> Option<vk::DescriptorSet> {
        let resources = self.resources.as_ref()?;
        match light_type {
            LightType::Directional => resources.directional.descriptor_set(light, frame),
            LightType::Point => resources.point.descriptor_set(light, frame),
            LightType::Spot => resources.spot.descriptor_set(light, frame),
        }
    }

    /// Uniform buffer `frame`'s set of `light` reads, if it was bound before
    pub fn light_uniform(&self, light: LightKey, light_type: LightType, frame: usize) -> Option<vk::Buffer> {
        let resources = self.resources.as_ref()?;
        match light_type {
            LightType::Directional => resources.directional.uniform_buffer(light, frame),
            LightType::Point => resources.point.uniform_buffer(light, frame),
            LightType::Spot => resources.spot.uniform_buffer(light, frame),
        }
    }

    /// Draw every light of the frame; returns the number of draws
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        registry: &ShadowMapRegistry,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;
        let frame = inputs.frame;
        let extent = resources.target.extent();
        resources.pass_objects.update(device, frame, &CameraUniform::new(inputs.camera, extent.width, extent.height))?;

        resources.target.begin(cmd, frame, &[ClearValue::Color(resources.clear_color)]);

        let mut draws = 0;
        for (&light_type, keys) in &inputs.state.lights {
            if keys.is_empty() {
                continue;
            }
            let pipeline = resources
                .pipelines
                .get(light_type)
                .ok_or_else(|| RenderError::MissingResource(format!("{light_type:?} lighting pipeline")))?;
            let layout = pipeline.layout;
            cmd.bind_pipeline(pipeline.pipeline);
            resources.pass_objects.bind(cmd, layout, 0, frame);

            for &key in keys {
                let Some(light) = inputs.scene.light(key) else {
                    log::warn!("Light {key:?} is missing, skipping its draw");
                    continue;
                };

                let shadow = registry.binding(key, light_type, light.cast_shadows, frame);
                let map = registry.get(key).filter(|_| shadow.live);
                let images = [shadow.write(SHADOW_MAP_BINDING)];

                match light_type {
                    LightType::Directional => {
                        let uniform = directional_uniform(light, map, frame, shadow.live);
                        resources.directional.bind(device, cmd, layout, 1, frame, key, &uniform, &images)?;
                        cmd.draw(3, 1);
                    }
                    LightType::Point => {
                        let uniform = point_uniform(light, shadow.live);
                        resources.point.bind(device, cmd, layout, 1, frame, key, &uniform, &images)?;
                        resources.volume.draw(cmd, 1);
                    }
                    LightType::Spot => {
                        let uniform = spot_uniform(light, map, frame, shadow.live);
                        resources.spot.bind(device, cmd, layout, 1, frame, key, &uniform, &images)?;
                        resources.volume.draw(cmd, 1);
                    }
                }
                draws += 1;
                log_shadow_state(key, &shadow);
            }
        }

        cmd.end_render_pass();
        log::trace!("{NAME}: {draws} light draws");
        Ok(draws)
    }

    /// Release the bindings of a removed light
    pub fn forget(&mut self, device: &mut dyn GpuDevice, object: SceneObject) {
        let (Some(resources), SceneObject::Light(key)) = (self.resources.as_mut(), object) else {
            return;
        };
        resources.directional.forget(device, key);
        resources.point.forget(device, key);
        resources.spot.forget(device, key);
    }
}

fn log_shadow_state(key: LightKey, shadow: &ShadowBinding) {
    if !shadow.live {
        log::trace!("Light {key:?} samples the fallback shadow map");
    }
}

impl RenderPass for LocalLightingPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.pipelines.destroy_all(device);
            resources.directional.destroy(device);
            resources.point.destroy(device);
            resources.spot.destroy(device);
            resources.pass_objects.destroy(device);
            resources.volume.destroy(device);
            resources.target.destroy(device);
            resources.output.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{ObjectKind, RecordedCommand, RecordingSink};
    use crate::render::gpu::DescriptorWrite;
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::render::passes::GBufferPass;
    use crate::render::pipeline::BlendEquation;
    use crate::render::shadows::LightTransforms;
    use crate::scene::{Camera, Scene, SceneRenderState};
    use approx::assert_relative_eq;
    use ash::vk::Handle;

    struct Setup {
        fixture: Fixture,
        gbuffer: GBufferPass,
        pass: LocalLightingPass,
        registry: ShadowMapRegistry,
    }

    impl Setup {
        fn new() -> Self {
            let mut fixture = Fixture::new();
            let mut gbuffer = GBufferPass::new();
            gbuffer.init(&mut fixture.context(), EXTENT).unwrap();
            let mut pass = LocalLightingPass::new();
            let targets = gbuffer.targets().unwrap();
            pass.init(&mut fixture.context(), EXTENT, targets).unwrap();
            let registry = ShadowMapRegistry::new(&mut fixture.device, 64, 2).unwrap();
            Self { fixture, gbuffer, pass, registry }
        }

        fn render(&mut self, scene: &Scene, frame: usize) -> RecordingSink {
            self.render_from(scene, frame, &Camera::default())
        }

        fn render_from(&mut self, scene: &Scene, frame: usize, camera: &Camera) -> RecordingSink {
            let state = SceneRenderState::collect(scene);
            let inputs = FrameInputs { frame, extent: EXTENT, scene, state: &state, camera };
            let mut cmd = RecordingSink::new();
            self.pass.render(&mut self.fixture.device, &mut cmd, &inputs, &self.registry).unwrap();
            cmd
        }

        fn shadow_view(&self, light: LightKey, light_type: LightType, frame: usize) -> vk::ImageView {
            let set = self.pass.light_set(light, light_type, frame).unwrap();
            match self.fixture.device.descriptor_writes(set).unwrap().get(&SHADOW_MAP_BINDING) {
                Some(DescriptorWrite::CombinedImageSampler { view, .. }) => *view,
                other => panic!("unexpected shadow binding {other:?}"),
            }
        }
    }

    #[test]
    fn test_one_draw_per_light() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0));
        scene.add_light(Light::point(Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0), 1.0, 5.0));
        scene.add_light(Light::point(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0), 1.0, 5.0));

        let cmd = setup.render(&scene, 0);

        assert_eq!(cmd.draw_count(), 3);
        assert!(cmd.is_balanced());
        assert!(cmd.commands().iter().any(|c| matches!(c, RecordedCommand::Draw { vertex_count: 3, instance_count: 1 })));
        assert_eq!(setup.pass.cached_lights(LightType::Point), 2);
        assert_eq!(setup.pass.pipeline_count(), 3);
    }

    #[test]
    fn test_pipelines_blend_additively() {
        let setup = Setup::new();
        for pipeline in setup.fixture.device.live_handles(ObjectKind::Pipeline) {
            let Some(descriptor) = setup.fixture.device.pipeline_descriptor(vk::Pipeline::from_raw(pipeline)) else {
                continue;
            };
            if descriptor.label.starts_with("light") {
                assert_eq!(descriptor.color_blend[0].blend, Some(BlendEquation::ADDITIVE));
            }
        }
    }

    #[test]
    fn test_two_lights_sum_on_one_fragment() {
        let red = shading::reference::light_contribution(&Vec3::new(1.0, 0.0, 0.0), 1.0, 1.0, 1.0, 1.0);
        let green = shading::reference::light_contribution(&Vec3::new(0.0, 1.0, 0.0), 1.0, 1.0, 1.0, 1.0);
        let mut target = [0.0; 4];
        for contribution in [red, green] {
            target = ColorBlendAttachment::ADDITIVE.apply(contribution, target);
        }
        assert_relative_eq!(target[0], 1.0);
        assert_relative_eq!(target[1], 1.0);
        assert_relative_eq!(target[2], 0.0);
    }

    #[test]
    fn test_non_casting_light_binds_fallback() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let light = scene.add_light(Light::point(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0));

        setup.render(&scene, 0);

        let fallback = setup.registry.fallback(LightType::Point).view(0);
        assert_eq!(setup.shadow_view(light, LightType::Point, 0), fallback);
    }

    #[test]
    fn test_shadow_binding_follows_the_light() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let light = scene.add_light(
            Light::spot(Vec3::zeros(), Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0, 0.3, 0.5)
                .with_shadows(true),
        );

        let map = setup.registry.get_or_create(&mut setup.fixture.device, light, LightType::Spot).unwrap();
        map.ensure_initialized(&mut RecordingSink::new(), 0);
        let live_view = map.view(0);

        setup.render(&scene, 0);
        assert_eq!(setup.shadow_view(light, LightType::Spot, 0), live_view);

        if let Some(light) = scene.light_mut(light) {
            light.cast_shadows = false;
        }
        setup.render(&scene, 0);
        let fallback = setup.registry.fallback(LightType::Spot).view(0);
        assert_eq!(setup.shadow_view(light, LightType::Spot, 0), fallback);
    }

    #[test]
    fn test_next_frame_keeps_the_in_flight_shadow_view() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let light = scene.add_light(Light::point(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0).with_shadows(true));

        let map = setup.registry.get_or_create(&mut setup.fixture.device, light, LightType::Point).unwrap();
        let mut init = RecordingSink::new();
        map.ensure_initialized(&mut init, 0);
        map.ensure_initialized(&mut init, 1);
        let views = [map.view(0), map.view(1)];
        assert_ne!(views[0], views[1]);

        setup.render(&scene, 0);
        assert_eq!(setup.shadow_view(light, LightType::Point, 0), views[0]);
        setup.render(&scene, 1);

        assert_eq!(setup.shadow_view(light, LightType::Point, 0), views[0]);
        assert_eq!(setup.shadow_view(light, LightType::Point, 1), views[1]);
    }

    #[test]
    fn test_next_frame_cascades_leave_the_in_flight_uniform_alone() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let light = scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0).with_shadows(true));
        let first_camera = Camera::default();
        let mut moved_camera = Camera::default();
        moved_camera.position += Vec3::new(25.0, 0.0, -10.0);
        moved_camera.target += Vec3::new(25.0, 0.0, -10.0);

        let settings = setup.fixture.config.shadows.clone();
        let map = setup.registry.get_or_create(&mut setup.fixture.device, light, LightType::Directional).unwrap();
        let mut init = RecordingSink::new();
        for (frame, camera) in [(0, &first_camera), (1, &moved_camera)] {
            let transforms = LightTransforms::compute(scene.light(light).unwrap(), camera, settings.split_lambda, settings.point_near);
            map.set_transforms(frame, &transforms.layers, transforms.split_depths);
            map.ensure_initialized(&mut init, frame);
        }

        setup.render_from(&scene, 0, &first_camera);
        let frame0 = setup.pass.light_uniform(light, LightType::Directional, 0).unwrap();
        let before = setup.fixture.device.buffer_contents(frame0).unwrap().to_vec();

        setup.render_from(&scene, 1, &moved_camera);
        let frame1 = setup.pass.light_uniform(light, LightType::Directional, 1).unwrap();

        assert_ne!(frame0, frame1);
        assert_eq!(setup.fixture.device.buffer_contents(frame0).unwrap(), before.as_slice());
        assert_ne!(setup.fixture.device.buffer_contents(frame1).unwrap(), before.as_slice());
        let expected = directional_uniform(scene.light(light).unwrap(), setup.registry.get(light), 0, true);
        assert_eq!(before.as_slice(), bytemuck::bytes_of(&expected));
    }

    #[test]
    fn test_point_uniform_attenuation_and_volume() {
        let light = Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 0.5, 0.0), 2.0, 4.0);
        let uniform = point_uniform(&light, false);

        assert_eq!(uniform.attenuation, [1.0, 0.5, 0.0625, 0.0]);
        assert_eq!(uniform.position, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(uniform.color, [2.0, 1.0, 0.0, 0.0]);
        assert_relative_eq!(uniform.volume[0][0], 4.0 * VOLUME_MARGIN);
        assert_relative_eq!(uniform.volume[3][2], 3.0);
    }

    #[test]
    fn test_spot_uniform_cone_cosines() {
        let light = Light::spot(Vec3::zeros(), Vec3::new(0.0, 0.0, -2.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0, 0.2, 0.4);
        let uniform = spot_uniform(&light, None, 0, true);

        assert_relative_eq!(uniform.cone[0], 0.2f32.cos());
        assert_relative_eq!(uniform.cone[1], 0.4f32.cos());
        assert_relative_eq!(uniform.direction[2], -1.0);
        assert_eq!(uniform.color[3], 1.0);
        assert_eq!(uniform.light_space, identity());
    }

    #[test]
    fn test_forget_and_clear_release_everything() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let light = scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0));
        setup.render(&scene, 0);
        assert_eq!(setup.pass.cached_lights(LightType::Directional), 1);

        setup.pass.forget(&mut setup.fixture.device, SceneObject::Light(light));
        assert_eq!(setup.pass.cached_lights(LightType::Directional), 0);

        setup.pass.clear(&mut setup.fixture.device);
        setup.gbuffer.clear(&mut setup.fixture.device);
        setup.registry.destroy(&mut setup.fixture.device);
        assert_eq!(setup.fixture.device.total_live(), 0);
    }
}
