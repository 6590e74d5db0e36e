//! # G-Buffer Pass
//!
//! Rasterizes every geometry whose primary material is physically based into
//! four colour attachments plus depth/stencil, in one subpass:
//!
//! | Location | Attachment | Format                | Contents                          |
//! |----------|------------|-----------------------|-----------------------------------|
//! | 0        | albedo     | `R8G8B8A8_UNORM`      | base colour × albedo map          |
//! | 1        | position   | `R32G32B32A32_SFLOAT` | world position, w = 1 on geometry |
//! | 2        | normal     | `R16G16B16A16_SFLOAT` | world normal                      |
//! | 3        | material   | `R8G8B8A8_UNORM`      | metallic, roughness, occlusion    |
//!
//! Descriptor sets: 0 = camera (per pass), 1 = material (per material),
//! 2 = model (per geometry).

use ash::vk;

use crate::render::gpu::{AttachmentDesc, ClearValue, CommandSink, DescriptorWrite, GpuDevice, RenderPassDesc};
use crate::render::pipeline::{
    names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram, VertexLayout,
};
use crate::render::resources::{
    AttachmentSpec, DescriptorSetLayoutBuilder, FrameResourceCache, FramebufferAttachment, MeshCache, PassTarget,
    RenderPassObjects, TextureCache, OBJECT_UNIFORM_BINDING, PASS_UNIFORM_BINDING,
};
use crate::render::uniforms::{CameraUniform, ModelUniform, PbrMaterialUniform};
use crate::render::{RenderError, RenderResult, DEPTH_STENCIL_FORMAT};
use crate::scene::{GeometryKey, MaterialKey, MaterialKind, SceneObject};

use super::{require, FrameInputs, PassContext, RenderPass};

const NAME: &str = "g-buffer";

/// Formats of the four colour attachments, in location order
pub const GBUFFER_FORMATS: [vk::Format; 4] = [
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::R32G32B32A32_SFLOAT,
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R8G8B8A8_UNORM,
];

/// Attachments the G-buffer pass writes and later passes read
#[derive(Debug)]
pub struct GBufferTargets {
    /// Albedo, position, normal, material
    pub colors: [FramebufferAttachment; 4],
    /// Depth/stencil shared with the compositing passes
    pub depth: FramebufferAttachment,
}

impl GBufferTargets {
    fn new(device: &mut dyn GpuDevice, extent: vk::Extent2D, frames: usize) -> RenderResult<Self> {
        let labels = ["gbuffer albedo", "gbuffer position", "gbuffer normal", "gbuffer material"];
        let mut colors = Vec::with_capacity(4);
        for (label, format) in labels.into_iter().zip(GBUFFER_FORMATS) {
            match FramebufferAttachment::new(device, AttachmentSpec::color(label, format), extent, frames) {
                Ok(attachment) => colors.push(attachment),
                Err(e) => {
                    for mut created in colors {
                        created.destroy(device);
                    }
                    return Err(e.into());
                }
            }
        }

        let depth = match FramebufferAttachment::new(device, AttachmentSpec::depth_stencil("gbuffer depth", DEPTH_STENCIL_FORMAT), extent, frames) {
            Ok(depth) => depth,
            Err(e) => {
                for mut created in colors {
                    created.destroy(device);
                }
                return Err(e.into());
            }
        };

        let colors: [FramebufferAttachment; 4] = colors
            .try_into()
            .map_err(|_| RenderError::MissingResource("gbuffer colour attachments".to_string()))?;
        Ok(Self { colors, depth })
    }

    /// Sampler writes of the colour attachments at `first_binding..first_binding + 4`
    pub fn sampled_writes(&self, first_binding: u32, frame: usize) -> [DescriptorWrite; 4] {
        [0u32, 1, 2, 3].map(|i| self.colors[i as usize].sampled_write(first_binding + i, frame))
    }

    fn frame_attachments(&self, frames: usize) -> Vec<Vec<vk::ImageView>> {
        (0..frames)
            .map(|frame| {
                let mut views: Vec<_> = self.colors.iter().map(|color| color.view(frame)).collect();
                views.push(self.depth.view(frame));
                views
            })
            .collect()
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for color in &mut self.colors {
            color.destroy(device);
        }
        self.depth.destroy(device);
    }
}

struct GBufferResources {
    targets: GBufferTargets,
    target: PassTarget,
    camera: RenderPassObjects<CameraUniform>,
    materials: FrameResourceCache<MaterialKey, PbrMaterialUniform>,
    models: FrameResourceCache<GeometryKey, ModelUniform>,
    pipeline: GraphicsPipeline,
}

/// Deferred geometry pass
#[derive(Default)]
pub struct GBufferPass {
    resources: Option<GBufferResources>,
}

impl GBufferPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline writing all four attachments with depth test and write
    pub fn pipeline_descriptor(set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        PipelineDescriptor::new("gbuffer", ShaderProgram::new(names::GBUFFER_VERT, names::GBUFFER_FRAG))
            .with_vertex_layout(VertexLayout::mesh())
            .with_set_layouts(set_layouts)
            .with_depth_stencil(DepthStencilState::OPAQUE)
            .with_color_blend(&[ColorBlendAttachment::OPAQUE; 4])
    }

    /// Create attachments, render pass, descriptor objects and the pipeline
    pub fn init(&mut self, ctx: &mut PassContext<'_>, extent: vk::Extent2D) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let frames = ctx.frames;

        let targets = GBufferTargets::new(ctx.device, extent, frames)?;
        let target = PassTarget::new(
            ctx.device,
            &RenderPassDesc {
                label: NAME,
                color_attachments: GBUFFER_FORMATS
                    .iter()
                    .map(|&format| AttachmentDesc::color_clear(format, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                    .collect(),
                depth_attachment: Some(AttachmentDesc::depth_clear(
                    DEPTH_STENCIL_FORMAT,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )),
            },
            &targets.frame_attachments(frames),
            extent,
        )?;

        let camera_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let camera = RenderPassObjects::new(ctx.device, "gbuffer camera", camera_layout, frames, &CameraUniform::default())?;

        let material_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(3, vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let materials = FrameResourceCache::new("gbuffer materials", material_layout, frames);

        let model_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device)?;
        let models = FrameResourceCache::new("gbuffer models", model_layout, frames);

        let pipeline = ctx.factory.build(
            ctx.device,
            ctx.shaders,
            &Self::pipeline_descriptor(&[camera.layout(), materials.layout(), models.layout()]),
            target.render_pass(),
        )?;

        self.resources = Some(GBufferResources { targets, target, camera, materials, models, pipeline });
        log::info!("Initialized {NAME} pass ({}x{})", extent.width, extent.height);
        Ok(())
    }

    /// Attachments of the initialized pass
    pub fn targets(&self) -> Option<&GBufferTargets> {
        self.resources.as_ref().map(|resources| &resources.targets)
    }

    /// Number of cached material and model bindings
    pub fn cached_bindings(&self) -> (usize, usize) {
        self.resources.as_ref().map_or((0, 0), |r| (r.materials.len(), r.models.len()))
    }

    /// Descriptor set of `material` for `frame`, if it was bound before
    pub fn material_set(&self, material: MaterialKey, frame: usize) -> Option<vk::DescriptorSet> {
        self.resources.as_ref()?.materials.descriptor_set(material, frame)
    }

    /// Rasterize every lit renderable; returns the number of draws
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
        resources.camera.update(device, frame, &CameraUniform::new(inputs.camera, extent.width, extent.height))?;

        let mut clears = vec![ClearValue::Color([0.0; 4]); GBUFFER_FORMATS.len()];
        clears.push(ClearValue::FAR_DEPTH);
        resources.target.begin(cmd, frame, &clears);
        cmd.bind_pipeline(resources.pipeline.pipeline);
        let layout = resources.pipeline.layout;
        resources.camera.bind(cmd, layout, 0, frame);

        let mut draws = 0;
        for (&material_key, primitives) in &inputs.state.lit_renderables {
            let Some(material) = inputs.scene.material(material_key) else {
                log::warn!("Material {material_key:?} is missing, skipping its draws");
                continue;
            };
            let MaterialKind::PrincipledBsdf(properties) = &material.kind else {
                log::warn!("Material '{}' is not physically based, skipping G-buffer draws", material.name);
                continue;
            };

            let images = textures.material_writes(device, inputs.scene, &material.textures, 1)?;
            resources.materials.bind(
                device,
                cmd,
                layout,
                1,
                frame,
                material_key,
                &PbrMaterialUniform::from(properties),
                &images,
            )?;

            for (&primitive_key, renderables) in primitives {
                let Some(primitive) = inputs.scene.primitive(primitive_key) else {
                    log::warn!("Primitive {primitive_key:?} is missing, skipping its draws");
                    continue;
                };
                let Some(mesh) = meshes.get_or_upload(device, primitive_key, primitive)? else {
                    continue;
                };

                for renderable in renderables {
                    resources.models.bind(
                        device,
                        cmd,
                        layout,
                        2,
                        frame,
                        renderable.geometry,
                        &ModelUniform::new(&renderable.world_matrix),
                        &[],
                    )?;
                    mesh.draw(cmd, 1);
                    draws += 1;
                }
            }
        }

        cmd.end_render_pass();
        log::trace!("{NAME}: {draws} draws");
        Ok(draws)
    }

    /// Release bindings of a removed scene object
    pub fn forget(&mut self, device: &mut dyn GpuDevice, object: SceneObject) {
        let Some(resources) = self.resources.as_mut() else { return };
        match object {
            SceneObject::Material(key) => {
                resources.materials.forget(device, key);
            }
            SceneObject::Geometry(key) => {
                resources.models.forget(device, key);
            }
            SceneObject::Primitive(_) | SceneObject::Texture(_) | SceneObject::Light(_) => {}
        }
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.pipeline.destroy(device);
            resources.materials.destroy(device);
            resources.models.destroy(device);
            resources.camera.destroy(device);
            resources.target.destroy(device);
            resources.targets.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::backends::{ObjectKind, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::scene::{Camera, Geometry, Material, PbrProperties, Primitive, Scene, SceneRenderState};

    struct Setup {
        fixture: Fixture,
        pass: GBufferPass,
        meshes: MeshCache,
        textures: TextureCache,
    }

    impl Setup {
        fn new() -> Self {
            let mut fixture = Fixture::new();
            let mut pass = GBufferPass::new();
            pass.init(&mut fixture.context(), EXTENT).unwrap();
            let textures = TextureCache::new(&mut fixture.device).unwrap();
            Self { fixture, pass, meshes: MeshCache::new(), textures }
        }

        fn render(&mut self, scene: &Scene, frame: usize) -> (RecordingSink, usize) {
            let state = SceneRenderState::collect(scene);
            let camera = Camera::default();
            let inputs = FrameInputs { frame, extent: EXTENT, scene, state: &state, camera: &camera };
            let mut cmd = RecordingSink::new();
            let draws = self
                .pass
                .render(&mut self.fixture.device, &mut cmd, &inputs, &mut self.meshes, &mut self.textures)
                .unwrap();
            (cmd, draws)
        }
    }

    fn scene() -> (Scene, MaterialKey) {
        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let sphere = scene.add_primitive(Primitive::uv_sphere("sphere", 0.5, 8, 4));
        let red = scene.add_material(Material::pbr("red", PbrProperties { albedo: [1.0, 0.0, 0.0, 1.0], ..PbrProperties::default() }));
        let blue = scene.add_material(Material::pbr("blue", PbrProperties::default()));
        scene.add_geometry(Geometry::new(cube, red, Mat4::identity()));
        scene.add_geometry(Geometry::new(sphere, red, Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0))));
        scene.add_geometry(Geometry::new(cube, blue, Mat4::new_translation(&Vec3::new(-1.0, 0.0, 0.0))));
        (scene, red)
    }

    #[test]
    fn test_draws_every_lit_renderable() {
        let mut setup = Setup::new();
        let (scene, _) = scene();

        let (cmd, draws) = setup.render(&scene, 0);

        assert_eq!(draws, 3);
        assert_eq!(cmd.draw_count(), 3);
        assert!(cmd.is_balanced());
        assert_eq!(setup.pass.cached_bindings(), (2, 3));
    }

    #[test]
    fn test_material_set_stable_and_uniform_tracks_edits() {
        let mut setup = Setup::new();
        let (mut scene, red) = scene();

        setup.render(&scene, 0);
        let first = setup.pass.material_set(red, 0).unwrap();

        if let Some(material) = scene.material_mut(red) {
            material.kind = MaterialKind::PrincipledBsdf(PbrProperties { albedo: [0.0, 1.0, 0.0, 1.0], ..PbrProperties::default() });
        }
        setup.render(&scene, 0);
        assert_eq!(setup.pass.material_set(red, 0), Some(first));

        let writes = setup.fixture.device.descriptor_writes(first).unwrap();
        let Some(DescriptorWrite::UniformBuffer { buffer, .. }) = writes.get(&OBJECT_UNIFORM_BINDING) else {
            panic!("material set has no uniform");
        };
        let contents = setup.fixture.device.buffer_contents(*buffer).unwrap();
        assert_eq!(&contents[..16], bytemuck::bytes_of(&[0.0f32, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_new_materials_do_not_build_pipelines() {
        let mut setup = Setup::new();
        let (mut scene, _) = scene();
        setup.render(&scene, 0);
        let pipelines = setup.fixture.device.live_count(ObjectKind::Pipeline);

        let cube = scene.add_primitive(Primitive::cube("cube", 1.0));
        for i in 0..5 {
            let material = scene.add_material(Material::pbr(format!("m{i}"), PbrProperties::default()));
            scene.add_geometry(Geometry::new(cube, material, Mat4::identity()));
        }
        setup.render(&scene, 1);

        assert_eq!(setup.fixture.device.live_count(ObjectKind::Pipeline), pipelines);
        assert_eq!(setup.pass.cached_bindings().0, 7);
    }

    #[test]
    fn test_missing_primitive_and_empty_mesh_are_skipped() {
        let mut setup = Setup::new();
        let (mut scene, red) = scene();
        let empty = scene.add_primitive(Primitive::new("empty", Vec::new(), None));
        scene.add_geometry(Geometry::new(empty, red, Mat4::identity()));

        let (cmd, draws) = setup.render(&scene, 0);
        assert_eq!(draws, 3);
        assert!(cmd.is_balanced());
    }

    #[test]
    fn test_forget_and_clear_release_bindings() {
        let mut setup = Setup::new();
        let (mut scene, red) = scene();
        setup.render(&scene, 0);

        scene.remove_material(red);
        for object in scene.drain_removed() {
            setup.pass.forget(&mut setup.fixture.device, object);
        }
        assert_eq!(setup.pass.cached_bindings().0, 1);

        setup.pass.clear(&mut setup.fixture.device);
        setup.meshes.clear(&mut setup.fixture.device);
        setup.textures.destroy(&mut setup.fixture.device);
        assert_eq!(setup.fixture.device.total_live(), 0);
        assert_eq!(setup.fixture.device.invalid_destroys(), 0);
    }
}
