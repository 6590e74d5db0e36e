//! # Shadow Map Generator
//!
//! Rasterizes shadow-casting geometry once per layer of every shadow map:
//!
//! ```text
//! for each shadow-casting light
//!   compute light-space matrices (cascades / cube faces / spot cone)
//!   for each layer
//!     render casters into the transient attachment (push mvp per draw)
//!     copy the attachment into that layer of the light's shadow map
//! ```
//!
//! Directional and spot lights render depth. Point lights render the
//! distance from the light divided by its radius, so the lighting pass can
//! compare distances without undoing a perspective depth.
//!
//! The transient attachments are reused across layers and lights within a
//! frame; the copy is what lets one shadow map hold every layer at once.

use ash::vk;

use crate::core::config::ShadowSettings;
use crate::foundation::math::{utils, Mat4, Vec3};
use crate::render::gpu::{AttachmentDesc, ClearValue, CommandSink, GpuDevice, RenderPassDesc};
use crate::render::passes::{require, FrameInputs, PassContext, RenderPass};
use crate::render::pipeline::{
    names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram, VertexLayout,
};
use crate::render::resources::{AttachmentSpec, FramebufferAttachment, GpuMesh, MeshCache, PassTarget};
use crate::render::uniforms::{ShadowDepthPush, ShadowDistancePush};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Camera, Light, LightKey, LightType, Renderable};

use super::map::{ShadowMapRegistry, SHADOW_DEPTH_FORMAT, SHADOW_DISTANCE_FORMAT};
use super::{cascades, projections, CASCADE_COUNT};

const NAME: &str = "shadow map generator";

struct GeneratorResources {
    depth: FramebufferAttachment,
    distance: FramebufferAttachment,
    distance_depth: FramebufferAttachment,
    depth_target: PassTarget,
    distance_target: PassTarget,
    depth_pipeline: GraphicsPipeline,
    distance_pipeline: GraphicsPipeline,
}

/// Light-space transforms computed for one light this frame
#[derive(Debug, Clone, PartialEq)]
pub struct LightTransforms {
    /// World to clip of each layer
    pub layers: Vec<Mat4>,
    /// Cascade far bounds (directional only)
    pub split_depths: [f32; CASCADE_COUNT],
}

impl LightTransforms {
    /// Transforms of `light` as seen from `camera`
    pub fn compute(light: &Light, camera: &Camera, split_lambda: f32, near: f32) -> Self {
        match light.light_type {
            LightType::Directional => {
                let cascades = cascades::compute_cascades(camera, &light.direction, split_lambda);
                Self {
                    layers: cascades.iter().map(|cascade| cascade.light_space).collect(),
                    split_depths: cascades.map(|cascade| cascade.split_depth),
                }
            }
            LightType::Point => Self {
                layers: projections::face_matrices(&light.position, near, light.radius).to_vec(),
                split_depths: [0.0; CASCADE_COUNT],
            },
            LightType::Spot => Self {
                layers: vec![projections::spot_matrix(&light.position, &light.direction, light.outer_cutoff, near, light.radius)],
                split_depths: [0.0; CASCADE_COUNT],
            },
        }
    }
}

/// Renders every shadow map of a frame
#[derive(Default)]
pub struct ShadowMapGenerator {
    resources: Option<GeneratorResources>,
}

impl ShadowMapGenerator {
    /// Create an uninitialized generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth-only pipeline for directional and spot maps
    pub fn depth_descriptor(extent: vk::Extent2D, bias_constant: f32, bias_slope: f32) -> PipelineDescriptor {
        PipelineDescriptor::new("shadow depth", ShaderProgram::new(names::SHADOW_DEPTH_VERT, names::SHADOW_DEPTH_FRAG))
            .with_vertex_layout(VertexLayout::mesh_positions())
            .with_push_constants(vk::ShaderStageFlags::VERTEX, std::mem::size_of::<ShadowDepthPush>() as u32)
            .with_depth_stencil(DepthStencilState::OPAQUE)
            .with_depth_bias(bias_constant, bias_slope)
            .with_color_blend(&[])
            .with_static_viewport(extent)
    }

    /// Distance pipeline for point light cubes
    ///
    /// The cube faces are mirrored in Y, which flips winding, so nothing is culled.
    pub fn distance_descriptor(extent: vk::Extent2D) -> PipelineDescriptor {
        PipelineDescriptor::new("shadow distance", ShaderProgram::new(names::SHADOW_DISTANCE_VERT, names::SHADOW_DISTANCE_FRAG))
            .with_vertex_layout(VertexLayout::mesh_positions())
            .with_push_constants(
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                std::mem::size_of::<ShadowDistancePush>() as u32,
            )
            .with_cull_mode(vk::CullModeFlags::NONE)
            .with_depth_stencil(DepthStencilState::OPAQUE)
            .with_color_blend(&[ColorBlendAttachment::OPAQUE])
            .with_static_viewport(extent)
    }

    /// Create transient attachments, render passes and pipelines
    pub fn init(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }

        let config = ctx.config;
        let settings = &config.shadows;
        let extent = vk::Extent2D { width: settings.resolution, height: settings.resolution };
        let frames = ctx.frames;
        let device = &mut *ctx.device;

        let depth = FramebufferAttachment::new(
            device,
            AttachmentSpec::depth_stencil("shadow depth", SHADOW_DEPTH_FORMAT).with_usage(vk::ImageUsageFlags::TRANSFER_SRC),
            extent,
            frames,
        )?;
        let distance = FramebufferAttachment::new(
            device,
            AttachmentSpec::color("shadow distance", SHADOW_DISTANCE_FORMAT).with_usage(vk::ImageUsageFlags::TRANSFER_SRC),
            extent,
            frames,
        )?;
        let distance_depth = FramebufferAttachment::new(
            device,
            AttachmentSpec::depth_stencil("shadow distance depth", SHADOW_DEPTH_FORMAT),
            extent,
            frames,
        )?;

        let depth_target = PassTarget::new(
            device,
            &RenderPassDesc {
                label: "shadow depth",
                color_attachments: Vec::new(),
                depth_attachment: Some(AttachmentDesc::depth_clear(SHADOW_DEPTH_FORMAT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)),
            },
            &depth.views().iter().map(|&view| vec![view]).collect::<Vec<_>>(),
            extent,
        )?;
        let distance_target = PassTarget::new(
            device,
            &RenderPassDesc {
                label: "shadow distance",
                color_attachments: vec![AttachmentDesc::color_clear(SHADOW_DISTANCE_FORMAT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)],
                depth_attachment: Some(AttachmentDesc::depth_clear(
                    SHADOW_DEPTH_FORMAT,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )),
            },
            &distance.views().iter().zip(distance_depth.views()).map(|(&color, &depth)| vec![color, depth]).collect::<Vec<_>>(),
            extent,
        )?;

        let depth_pipeline = ctx.factory.build(
            ctx.device,
            ctx.shaders,
            &Self::depth_descriptor(extent, settings.depth_bias_constant, settings.depth_bias_slope),
            depth_target.render_pass(),
        )?;
        let distance_pipeline =
            ctx.factory.build(ctx.device, ctx.shaders, &Self::distance_descriptor(extent), distance_target.render_pass())?;

        self.resources = Some(GeneratorResources {
            depth,
            distance,
            distance_depth,
            depth_target,
            distance_target,
            depth_pipeline,
            distance_pipeline,
        });
        log::info!("Initialized {NAME} ({}px)", extent.width);
        Ok(())
    }

    /// Render the shadow maps of every shadow-casting light in the frame
    ///
    /// Returns the number of shadow maps rendered.
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        settings: &ShadowSettings,
        registry: &mut ShadowMapRegistry,
        meshes: &mut MeshCache,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;
        if !settings.enabled {
            return Ok(0);
        }

        let casters = collect_casters(device, inputs, meshes)?;
        let mut rendered = 0;

        for (&light_type, keys) in &inputs.state.lights {
            for &key in keys {
                let Some(light) = inputs.scene.light(key) else {
                    log::warn!("Light {key:?} vanished before shadow rendering");
                    continue;
                };
                if !light.cast_shadows {
                    continue;
                }
                render_light(resources, device, cmd, inputs, settings, registry, &casters, key, light_type, light)?;
                rendered += 1;
            }
        }

        log::trace!("Rendered {rendered} shadow maps ({} caster meshes)", casters.len());
        Ok(rendered)
    }
}

fn collect_casters<'s>(
    device: &mut dyn GpuDevice,
    inputs: &FrameInputs<'s>,
    meshes: &mut MeshCache,
) -> RenderResult<Vec<(GpuMesh, &'s [Renderable])>> {
    let mut casters = Vec::with_capacity(inputs.state.shadow_casters.len());
    for (&key, renderables) in &inputs.state.shadow_casters {
        let Some(primitive) = inputs.scene.primitive(key) else {
            log::warn!("Shadow caster primitive {key:?} is missing, skipping");
            continue;
        };
        if let Some(mesh) = meshes.get_or_upload(device, key, primitive)? {
            casters.push((mesh, renderables.as_slice()));
        }
    }
    Ok(casters)
}

fn render_light(
    resources: &GeneratorResources,
    device: &mut dyn GpuDevice,
    cmd: &mut dyn CommandSink,
    inputs: &FrameInputs<'_>,
    settings: &ShadowSettings,
    registry: &mut ShadowMapRegistry,
    casters: &[(GpuMesh, &[Renderable])],
    key: LightKey,
    light_type: LightType,
    light: &Light,
) -> RenderResult<()> {
    let frame = inputs.frame;
    let transforms = LightTransforms::compute(light, inputs.camera, settings.split_lambda, settings.point_near);

    let map = registry.get_or_create(device, key, light_type)?;
    map.set_transforms(frame, &transforms.layers, transforms.split_depths);
    map.ensure_initialized(cmd, frame);
    let (destination, aspect, extent) = (map.image(frame), map.aspect(), map.extent());

    if extent != resources.depth.extent() {
        return Err(RenderError::MissingResource(format!(
            "shadow map of {key:?} is {}px but the generator renders {}px",
            extent.width,
            resources.depth.extent().width
        )));
    }

    for (layer, light_space) in transforms.layers.iter().enumerate() {
        let source = match light_type {
            LightType::Point => {
                render_distance_layer(resources, cmd, frame, casters, light_space, &light.position, light.radius);
                resources.distance.image(frame)
            }
            LightType::Directional | LightType::Spot => {
                render_depth_layer(resources, cmd, frame, casters, light_space);
                resources.depth.image(frame)
            }
        };
        cmd.copy_to_layer(source, aspect, destination, layer as u32, extent);
    }

    Ok(())
}

fn render_depth_layer(
    resources: &GeneratorResources,
    cmd: &mut dyn CommandSink,
    frame: usize,
    casters: &[(GpuMesh, &[Renderable])],
    light_space: &Mat4,
) {
    let target = &resources.depth_target;
    let pipeline = &resources.depth_pipeline;
    cmd.begin_render_pass(target.render_pass(), target.framebuffer(frame), target.extent(), &[ClearValue::FAR_DEPTH]);
    cmd.bind_pipeline(pipeline.pipeline);

    for (mesh, renderables) in casters {
        for renderable in *renderables {
            let push = ShadowDepthPush { mvp: utils::mat4_to_cols(&(light_space * renderable.world_matrix)) };
            cmd.push_constants(pipeline.layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&push));
            mesh.draw(cmd, 1);
        }
    }

    cmd.end_render_pass();
}

fn render_distance_layer(
    resources: &GeneratorResources,
    cmd: &mut dyn CommandSink,
    frame: usize,
    casters: &[(GpuMesh, &[Renderable])],
    face_matrix: &Mat4,
    light_position: &Vec3,
    radius: f32,
) {
    let target = &resources.distance_target;
    let pipeline = &resources.distance_pipeline;
    cmd.begin_render_pass(
        target.render_pass(),
        target.framebuffer(frame),
        target.extent(),
        &[ClearValue::Color([1.0; 4]), ClearValue::FAR_DEPTH],
    );
    cmd.bind_pipeline(pipeline.pipeline);

    for (mesh, renderables) in casters {
        for renderable in *renderables {
            let push = ShadowDistancePush::new(face_matrix, &renderable.world_matrix, light_position, radius);
            cmd.push_constants(
                pipeline.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            mesh.draw(cmd, 1);
        }
    }

    cmd.end_render_pass();
}

impl RenderPass for ShadowMapGenerator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.depth_pipeline.destroy(device);
            resources.distance_pipeline.destroy(device);
            resources.depth_target.destroy(device);
            resources.distance_target.destroy(device);
            resources.depth.destroy(device);
            resources.distance.destroy(device);
            resources.distance_depth.destroy(device);
            log::debug!("Cleared {NAME}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{RecordedCommand, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::scene::{Geometry, Material, PbrProperties, Primitive, Scene, SceneRenderState};

    fn scene_with_caster() -> Scene {
        let mut scene = Scene::new();
        let primitive = scene.add_primitive(Primitive::cube("cube", 0.5));
        let material = scene.add_material(Material::pbr("grey", PbrProperties::default()));
        scene.add_geometry(Geometry::new(primitive, material, Mat4::identity()));
        scene.add_geometry(Geometry::new(primitive, material, Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0))));
        scene
    }

    fn render(fixture: &mut Fixture, scene: &Scene, registry: &mut ShadowMapRegistry) -> (RecordingSink, usize) {
        let mut generator = ShadowMapGenerator::new();
        generator.init(&mut fixture.context()).unwrap();
        let state = SceneRenderState::collect(scene);
        let camera = Camera::default();
        let inputs = FrameInputs { frame: 0, extent: EXTENT, scene, state: &state, camera: &camera };
        let mut meshes = MeshCache::new();
        let mut cmd = RecordingSink::new();
        let settings = fixture.config.shadows.clone();
        let count = generator
            .render(&mut fixture.device, &mut cmd, &inputs, &settings, registry, &mut meshes)
            .unwrap();
        (cmd, count)
    }

    fn copies(cmd: &RecordingSink) -> Vec<u32> {
        cmd.commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::CopyToLayer { layer, .. } => Some(*layer),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_directional_renders_every_cascade() {
        let mut fixture = Fixture::new();
        let mut scene = scene_with_caster();
        scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.2), Vec3::new(1.0, 1.0, 1.0), 1.0).with_shadows(true));
        let mut registry = ShadowMapRegistry::new(&mut fixture.device, fixture.config.shadows.resolution, 2).unwrap();

        let (cmd, count) = render(&mut fixture, &scene, &mut registry);

        assert_eq!(count, 1);
        assert_eq!(copies(&cmd), vec![0, 1, 2, 3]);
        // Two casters per cascade.
        assert_eq!(cmd.draw_count(), 2 * CASCADE_COUNT);
        assert!(cmd.is_balanced());
    }

    #[test]
    fn test_point_light_renders_six_faces_with_distance_push() {
        let mut fixture = Fixture::new();
        let mut scene = scene_with_caster();
        scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0).with_shadows(true));
        let mut registry = ShadowMapRegistry::new(&mut fixture.device, fixture.config.shadows.resolution, 2).unwrap();

        let (cmd, _) = render(&mut fixture, &scene, &mut registry);

        assert_eq!(copies(&cmd), vec![0, 1, 2, 3, 4, 5]);
        let push_size = cmd.commands().iter().find_map(|c| match c {
            RecordedCommand::PushConstants { data, .. } => Some(data.len()),
            _ => None,
        });
        assert_eq!(push_size, Some(std::mem::size_of::<ShadowDistancePush>()));
    }

    #[test]
    fn test_lights_without_shadows_are_skipped() {
        let mut fixture = Fixture::new();
        let mut scene = scene_with_caster();
        scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0));
        let mut registry = ShadowMapRegistry::new(&mut fixture.device, fixture.config.shadows.resolution, 2).unwrap();

        let (cmd, count) = render(&mut fixture, &scene, &mut registry);

        assert_eq!(count, 0);
        assert!(cmd.commands().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_map_stores_light_space_and_splits() {
        let mut fixture = Fixture::new();
        let mut scene = scene_with_caster();
        let key = scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0).with_shadows(true));
        let mut registry = ShadowMapRegistry::new(&mut fixture.device, fixture.config.shadows.resolution, 2).unwrap();

        render(&mut fixture, &scene, &mut registry);

        let map = registry.get(key).unwrap();
        let expected = LightTransforms::compute(
            scene.light(key).unwrap(),
            &Camera::default(),
            fixture.config.shadows.split_lambda,
            fixture.config.shadows.point_near,
        );
        assert_eq!(map.light_space(0), expected.layers.as_slice());
        assert_eq!(map.split_depths(0), expected.split_depths);
        assert_ne!(map.light_space(1), expected.layers.as_slice());
        assert!(map.is_initialized(0));
        assert!(!map.is_initialized(1));
    }

    #[test]
    fn test_clear_releases_generator_objects() {
        let mut fixture = Fixture::new();
        let mut generator = ShadowMapGenerator::new();
        generator.init(&mut fixture.context()).unwrap();
        assert!(generator.is_initialized());

        generator.clear(&mut fixture.device);
        assert!(!generator.is_initialized());
        assert_eq!(fixture.device.total_live(), 0);
    }

    #[test]
    fn test_render_before_init_fails() {
        let mut fixture = Fixture::new();
        let scene = Scene::new();
        let state = SceneRenderState::collect(&scene);
        let camera = Camera::default();
        let inputs = FrameInputs { frame: 0, extent: EXTENT, scene: &scene, state: &state, camera: &camera };
        let mut registry = ShadowMapRegistry::new(&mut fixture.device, 64, 2).unwrap();
        let settings = fixture.config.shadows.clone();

        let result = ShadowMapGenerator::new().render(
            &mut fixture.device,
            &mut RecordingSink::new(),
            &inputs,
            &settings,
            &mut registry,
            &mut MeshCache::new(),
        );
        assert!(matches!(result, Err(RenderError::PassNotInitialized(_))));
    }
}
