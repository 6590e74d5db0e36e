//! Unlit geometry composited onto the lit result
//!
//! [`UnlitBatch`] draws a [`RenderableMap`] with flat-colour materials. The
//! unlit pass uses it for the standard layer; the skybox pass uses a second
//! batch for environment geometry.

use ash::vk;

use crate::render::gpu::{AttachmentDesc, CommandSink, DescriptorWrite, GpuDevice};
use crate::render::pipeline::{
    names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram, VertexLayout,
};
use crate::render::resources::{
    DescriptorSetLayoutBuilder, FrameResourceCache, MeshCache, PassTarget, RenderPassObjects, TextureCache,
    OBJECT_UNIFORM_BINDING, PASS_UNIFORM_BINDING,
};
use crate::render::uniforms::{CameraUniform, ModelUniform, UnlitMaterialUniform, UnlitPush};
use crate::render::{RenderResult, DEPTH_STENCIL_FORMAT};
use crate::scene::{GeometryKey, MaterialKey, MaterialKind, RenderableMap, SceneObject};

use super::{composite_target, require, CompositeTargets, FrameInputs, PassContext, RenderPass, COMPOSITE_CLEARS};

const NAME: &str = "unlit";

/// Binding of the albedo map in the unlit material set
const ALBEDO_BINDING: u32 = 1;

/// Flat colour of any material kind; physically based materials use their albedo
pub fn unlit_uniform(kind: &MaterialKind) -> UnlitMaterialUniform {
    match kind {
        MaterialKind::Unlit(properties) => UnlitMaterialUniform::from(properties),
        MaterialKind::PrincipledBsdf(properties) => UnlitMaterialUniform { color: properties.albedo },
    }
}

/// Pipeline drawing flat-coloured meshes
pub fn unlit_descriptor(
    label: &'static str,
    set_layouts: &[vk::DescriptorSetLayout],
    depth: DepthStencilState,
    blend: ColorBlendAttachment,
) -> PipelineDescriptor {
    PipelineDescriptor::new(label, ShaderProgram::new(names::UNLIT_VERT, names::UNLIT_FRAG))
        .with_vertex_layout(VertexLayout::mesh())
        .with_set_layouts(set_layouts)
        .with_push_constants(vk::ShaderStageFlags::VERTEX, std::mem::size_of::<UnlitPush>() as u32)
        .with_depth_stencil(depth)
        .with_color_blend(&[blend])
}

/// Camera, material and model bindings plus one pipeline
pub(crate) struct UnlitBatch {
    camera: RenderPassObjects<CameraUniform>,
    materials: FrameResourceCache<MaterialKey, UnlitMaterialUniform>,
    models: FrameResourceCache<GeometryKey, ModelUniform>,
    pipeline: GraphicsPipeline,
}

impl UnlitBatch {
    pub(crate) fn new(
        ctx: &mut PassContext<'_>,
        label: &'static str,
        render_pass: vk::RenderPass,
        depth: DepthStencilState,
        blend: ColorBlendAttachment,
    ) -> RenderResult<Self> {
        let frames = ctx.frames;
        let camera_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device)?;
        let camera = RenderPassObjects::new(ctx.device, label, camera_layout, frames, &CameraUniform::default())?;

        let material_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(ALBEDO_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let materials = FrameResourceCache::new(label, material_layout, frames);

        let model_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device)?;
        let models = FrameResourceCache::new(label, model_layout, frames);

        let descriptor = unlit_descriptor(label, &[camera.layout(), materials.layout(), models.layout()], depth, blend);
        let pipeline = ctx.factory.build(ctx.device, ctx.shaders, &descriptor, render_pass)?;

        Ok(Self { camera, materials, models, pipeline })
    }

    pub(crate) fn cached_bindings(&self) -> (usize, usize) {
        (self.materials.len(), self.models.len())
    }

    /// Draw every renderable of `renderables`; returns the number of draws
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn draw(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        renderables: &RenderableMap,
        camera: &CameraUniform,
        push: UnlitPush,
        meshes: &mut MeshCache,
        textures: &mut TextureCache,
    ) -> RenderResult<usize> {
        if renderables.is_empty() {
            return Ok(0);
        }

        let frame = inputs.frame;
        let layout = self.pipeline.layout;
        self.camera.update(device, frame, camera)?;
        cmd.bind_pipeline(self.pipeline.pipeline);
        self.camera.bind(cmd, layout, 0, frame);
        cmd.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&push));

        let mut draws = 0;
        for (&material_key, primitives) in renderables {
            let Some(material) = inputs.scene.material(material_key) else {
                log::warn!("Material {material_key:?} is missing, skipping its draws");
                continue;
            };

            let albedo = match material.textures.albedo {
                Some(texture) => textures.get_or_upload(device, inputs.scene, texture)?,
                None => None,
            };
            let images = [DescriptorWrite::CombinedImageSampler {
                binding: ALBEDO_BINDING,
                view: albedo.unwrap_or_else(|| textures.white_view()),
                sampler: textures.sampler(),
            }];
            self.materials.bind(device, cmd, layout, 1, frame, material_key, &unlit_uniform(&material.kind), &images)?;

            for (&primitive_key, instances) in primitives {
                let Some(primitive) = inputs.scene.primitive(primitive_key) else {
                    log::warn!("Primitive {primitive_key:?} is missing, skipping its draws");
                    continue;
                };
                let Some(mesh) = meshes.get_or_upload(device, primitive_key, primitive)? else {
                    continue;
                };
                for renderable in instances {
                    let model = ModelUniform::new(&renderable.world_matrix);
                    self.models.bind(device, cmd, layout, 2, frame, renderable.geometry, &model, &[])?;
                    mesh.draw(cmd, 1);
                    draws += 1;
                }
            }
        }

        Ok(draws)
    }

    pub(crate) fn forget(&mut self, device: &mut dyn GpuDevice, object: SceneObject) {
        match object {
            SceneObject::Material(key) => {
                self.materials.forget(device, key);
            }
            SceneObject::Geometry(key) => {
                self.models.forget(device, key);
            }
            _ => {}
        }
    }

    pub(crate) fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.pipeline.destroy(device);
        self.materials.destroy(device);
        self.models.destroy(device);
        self.camera.destroy(device);
    }
}

struct UnlitResources {
    target: PassTarget,
    batch: UnlitBatch,
}

/// Unlit geometry with depth test and write, alpha blended
#[derive(Default)]
pub struct UnlitPass {
    resources: Option<UnlitResources>,
}

impl UnlitPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the render pass over the composite targets and the pipeline
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
        let batch = UnlitBatch::new(ctx, NAME, target.render_pass(), DepthStencilState::OPAQUE, ColorBlendAttachment::ALPHA)?;
        self.resources = Some(UnlitResources { target, batch });
        log::info!("Initialized {NAME} pass");
        Ok(())
    }

    /// Number of cached material and model bindings
    pub fn cached_bindings(&self) -> (usize, usize) {
        self.resources.as_ref().map_or((0, 0), |resources| resources.batch.cached_bindings())
    }

    /// Draw the standard-layer unlit renderables; returns the number of draws
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        meshes: &mut MeshCache,
        textures: &mut TextureCache,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;
        let extent = resources.target.extent();
        let camera = CameraUniform::new(inputs.camera, extent.width, extent.height);

        resources.target.begin(cmd, inputs.frame, &COMPOSITE_CLEARS);
        let draws = resources.batch.draw(
            device,
            cmd,
            inputs,
            &inputs.state.unlit_renderables,
            &camera,
            UnlitPush::SCENE,
            meshes,
            textures,
        );
        cmd.end_render_pass();
        draws
    }

    /// Release bindings of a removed scene object
    pub fn forget(&mut self, device: &mut dyn GpuDevice, object: SceneObject) {
        if let Some(resources) = self.resources.as_mut() {
            resources.batch.forget(device, object);
        }
    }
}

impl RenderPass for UnlitPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.batch.destroy(device);
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
    use crate::scene::{Camera, Geometry, Material, PbrProperties, Primitive, Scene, SceneRenderState, UnlitProperties};

    struct Setup {
        fixture: Fixture,
        lit: FramebufferAttachment,
        depth: FramebufferAttachment,
        pass: UnlitPass,
        meshes: MeshCache,
        textures: TextureCache,
    }

    impl Setup {
        fn new() -> Self {
            let mut fixture = Fixture::new();
            let lit = FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::color("lit", LIT_COLOR_FORMAT), EXTENT, 2).unwrap();
            let depth = FramebufferAttachment::new(
                &mut fixture.device,
                AttachmentSpec::depth_stencil("depth", DEPTH_STENCIL_FORMAT),
                EXTENT,
                2,
            )
            .unwrap();
            let mut pass = UnlitPass::new();
            pass.init(&mut fixture.context(), &CompositeTargets { lit: &lit, depth: &depth }).unwrap();
            let textures = TextureCache::new(&mut fixture.device).unwrap();
            Self { fixture, lit, depth, pass, meshes: MeshCache::new(), textures }
        }

        fn render(&mut self, scene: &Scene) -> RecordingSink {
            let state = SceneRenderState::collect(scene);
            let camera = Camera::default();
            let inputs = FrameInputs { frame: 0, extent: EXTENT, scene, state: &state, camera: &camera };
            let mut cmd = RecordingSink::new();
            self.pass.render(&mut self.fixture.device, &mut cmd, &inputs, &mut self.meshes, &mut self.textures).unwrap();
            cmd
        }
    }

    #[test]
    fn test_unlit_uniform_of_each_kind() {
        let unlit = unlit_uniform(&MaterialKind::Unlit(UnlitProperties { color: [0.1, 0.2, 0.3, 0.4] }));
        assert_eq!(unlit.color, [0.1, 0.2, 0.3, 0.4]);

        let pbr = unlit_uniform(&MaterialKind::PrincipledBsdf(PbrProperties { albedo: [1.0, 0.0, 0.0, 1.0], ..PbrProperties::default() }));
        assert_eq!(pbr.color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_draws_only_unlit_renderables() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let flat = scene.add_material(Material::unlit("flat", [0.0, 1.0, 0.0, 1.0]));
        let lit = scene.add_material(Material::pbr("lit", PbrProperties::default()));
        scene.add_geometry(Geometry::new(cube, flat, Mat4::identity()));
        scene.add_geometry(Geometry::new(cube, flat, Mat4::new_scaling(2.0)));
        scene.add_geometry(Geometry::new(cube, lit, Mat4::identity()));

        let cmd = setup.render(&scene);

        assert_eq!(cmd.draw_count(), 2);
        assert!(cmd.is_balanced());
        assert_eq!(setup.pass.cached_bindings(), (1, 2));
        assert!(cmd
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::PushConstants { data, .. } if data.as_slice() == bytemuck::bytes_of(&UnlitPush::SCENE))));
    }

    #[test]
    fn test_empty_frame_still_runs_the_render_pass() {
        let mut setup = Setup::new();
        let cmd = setup.render(&Scene::new());
        assert_eq!(cmd.render_passes().len(), 1);
        assert_eq!(cmd.draw_count(), 0);
    }

    #[test]
    fn test_clear_releases_pass_objects() {
        let mut setup = Setup::new();
        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let flat = scene.add_material(Material::unlit("flat", [1.0; 4]));
        scene.add_geometry(Geometry::new(cube, flat, Mat4::identity()));
        setup.render(&scene);

        setup.pass.clear(&mut setup.fixture.device);
        assert!(!setup.pass.is_initialized());
        setup.meshes.clear(&mut setup.fixture.device);
        setup.textures.destroy(&mut setup.fixture.device);
        setup.lit.destroy(&mut setup.fixture.device);
        setup.depth.destroy(&mut setup.fixture.device);
        assert_eq!(setup.fixture.device.total_live(), 0);
    }
}
