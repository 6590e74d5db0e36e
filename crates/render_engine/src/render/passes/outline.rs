//! # Selection Outline Pass
//!
//! Two-pass stencil outline around selected geometry:
//!
//! 1. **Mask**: every selected geometry is drawn with colour writes off,
//!    writing 1 into the stencil wherever it covers.
//! 2. **Ring**: the geometry is drawn again scaled up about its origin,
//!    passing only where the stencil is not 1, so just the band outside the
//!    silhouette receives the outline colour.
//!
//! The stencil is cleared when the pass begins; depth is loaded and ignored.
//! This is the last pass writing the lit colour, which it leaves ready for
//! sampling by the blit.

use ash::vk;

use crate::core::config::OutlineSettings;
use crate::foundation::math::{utils, Mat4};
use crate::render::gpu::{AttachmentDesc, CommandSink, GpuDevice};
use crate::render::pipeline::{
    names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram, StencilState,
    VertexLayout,
};
use crate::render::resources::{GpuMesh, MeshCache, PassTarget};
use crate::render::uniforms::OutlinePush;
use crate::render::{RenderResult, DEPTH_STENCIL_FORMAT};

use super::{composite_target, require, CompositeTargets, FrameInputs, PassContext, RenderPass, COMPOSITE_CLEARS};

const NAME: &str = "selection outline";

/// Stencil value marking silhouette pixels
pub const SILHOUETTE_STENCIL: u32 = 1;

const PUSH_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

fn outline_descriptor(label: &'static str, depth_stencil: DepthStencilState, blend: ColorBlendAttachment) -> PipelineDescriptor {
    PipelineDescriptor::new(label, ShaderProgram::new(names::OUTLINE_VERT, names::OUTLINE_FRAG))
        .with_vertex_layout(VertexLayout::mesh_positions())
        .with_push_constants(PUSH_STAGES, std::mem::size_of::<OutlinePush>() as u32)
        .with_cull_mode(vk::CullModeFlags::NONE)
        .with_depth_stencil(depth_stencil)
        .with_color_blend(&[blend])
}

/// Push block of one draw; `scale` is applied in object space
pub fn outline_push(view_projection: &Mat4, world_matrix: &Mat4, scale: f32, color: [f32; 4]) -> OutlinePush {
    let mvp = view_projection * world_matrix * Mat4::new_scaling(scale);
    OutlinePush { mvp: utils::mat4_to_cols(&mvp), color, params: [scale, 0.0, 0.0, 0.0] }
}

struct OutlineResources {
    target: PassTarget,
    mask: GraphicsPipeline,
    ring: GraphicsPipeline,
    settings: OutlineSettings,
}

/// Stencil outline of selected geometry
#[derive(Default)]
pub struct SelectionOutlinePass {
    resources: Option<OutlineResources>,
}

impl SelectionOutlinePass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Silhouette pass: stencil only
    pub fn mask_descriptor() -> PipelineDescriptor {
        let depth_stencil = DepthStencilState { stencil: Some(StencilState::write(SILHOUETTE_STENCIL)), ..DepthStencilState::DISABLED };
        outline_descriptor("outline mask", depth_stencil, ColorBlendAttachment::DISABLED)
    }

    /// Ring pass: colour where the silhouette did not land
    pub fn ring_descriptor() -> PipelineDescriptor {
        let depth_stencil = DepthStencilState { stencil: Some(StencilState::not_equal(SILHOUETTE_STENCIL)), ..DepthStencilState::DISABLED };
        outline_descriptor("outline ring", depth_stencil, ColorBlendAttachment::OPAQUE)
    }

    /// Create the render pass and both pipelines
    pub fn init(&mut self, ctx: &mut PassContext<'_>, targets: &CompositeTargets<'_>) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let depth = AttachmentDesc { stencil_load_op: vk::AttachmentLoadOp::CLEAR, ..AttachmentDesc::depth_load(DEPTH_STENCIL_FORMAT) };
        let target = composite_target(ctx.device, NAME, targets, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, depth)?;
        let mask = ctx.factory.build(ctx.device, ctx.shaders, &Self::mask_descriptor(), target.render_pass())?;
        let ring = ctx.factory.build(ctx.device, ctx.shaders, &Self::ring_descriptor(), target.render_pass())?;

        self.resources = Some(OutlineResources { target, mask, ring, settings: ctx.config.outline.clone() });
        log::info!("Initialized {NAME} pass");
        Ok(())
    }

    /// Outline every selected geometry; returns the number of outlined instances
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        inputs: &FrameInputs<'_>,
        meshes: &mut MeshCache,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;

        let mut selected: Vec<(GpuMesh, Vec<Mat4>)> = Vec::with_capacity(inputs.state.selected.len());
        for (&key, renderables) in &inputs.state.selected {
            let Some(primitive) = inputs.scene.primitive(key) else {
                log::warn!("Selected primitive {key:?} is missing, skipping its outline");
                continue;
            };
            if let Some(mesh) = meshes.get_or_upload(device, key, primitive)? {
                selected.push((mesh, renderables.iter().map(|r| r.world_matrix).collect()));
            }
        }

        let view_projection = inputs.camera.view_projection_matrix();
        let color = resources.settings.color;
        let scale = resources.settings.scale;

        resources.target.begin(cmd, inputs.frame, &COMPOSITE_CLEARS);
        let mut outlined = 0;
        if !selected.is_empty() {
            for (pipeline, scale) in [(&resources.mask, 1.0), (&resources.ring, scale)] {
                cmd.bind_pipeline(pipeline.pipeline);
                for (mesh, worlds) in &selected {
                    for world in worlds {
                        let push = outline_push(&view_projection, world, scale, color);
                        cmd.push_constants(pipeline.layout, PUSH_STAGES, 0, bytemuck::bytes_of(&push));
                        mesh.draw(cmd, 1);
                    }
                }
            }
            outlined = selected.iter().map(|(_, worlds)| worlds.len()).sum();
        }
        cmd.end_render_pass();

        log::trace!("{NAME}: {outlined} instances");
        Ok(outlined)
    }
}

impl RenderPass for SelectionOutlinePass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.mask.destroy(device);
            resources.ring.destroy(device);
            resources.target.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::backends::{RecordedCommand, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::render::resources::{AttachmentSpec, FramebufferAttachment};
    use crate::render::LIT_COLOR_FORMAT;
    use crate::scene::{Camera, Geometry, Material, Primitive, Scene, SceneRenderState};
    use approx::assert_relative_eq;

    const GRID: i32 = 64;

    /// Rasterize a disc of `radius` centred on the grid with both pipelines'
    /// stencil states and return (silhouette, ring) coverage
    fn stencil_outline(radius: f32, scale: f32) -> (Vec<bool>, Vec<bool>) {
        let mask = SelectionOutlinePass::mask_descriptor().depth_stencil;
        let ring = SelectionOutlinePass::ring_descriptor().depth_stencil;
        let covers = |x: i32, y: i32, r: f32| {
            let (dx, dy) = (x as f32 + 0.5 - GRID as f32 / 2.0, y as f32 + 0.5 - GRID as f32 / 2.0);
            dx * dx + dy * dy <= r * r
        };

        let mut stencil = vec![0u32; (GRID * GRID) as usize];
        let mut silhouette = vec![false; stencil.len()];
        let mut outline = vec![false; stencil.len()];
        for y in 0..GRID {
            for x in 0..GRID {
                let i = (y * GRID + x) as usize;
                if covers(x, y, radius) {
                    let state = mask.stencil.unwrap();
                    let (_, written) = state.apply(stencil[i], mask.depth_passes(0.5, 1.0));
                    stencil[i] = written;
                    silhouette[i] = true;
                }
            }
        }
        for y in 0..GRID {
            for x in 0..GRID {
                let i = (y * GRID + x) as usize;
                if covers(x, y, radius * scale) {
                    let (passed, _) = ring.stencil.unwrap().apply(stencil[i], ring.depth_passes(0.5, 1.0));
                    outline[i] = passed;
                }
            }
        }
        (silhouette, outline)
    }

    #[test]
    fn test_ring_never_covers_the_silhouette() {
        let (silhouette, outline) = stencil_outline(20.0, 1.05);

        assert!(outline.iter().any(|&o| o));
        for (inside, ring) in silhouette.iter().zip(&outline) {
            assert!(!(inside & ring));
        }
    }

    #[test]
    fn test_ring_fills_the_scaled_band() {
        let (silhouette, outline) = stencil_outline(20.0, 1.2);
        let ring_pixels = outline.iter().filter(|&&o| o).count();
        let silhouette_pixels = silhouette.iter().filter(|&&s| s).count();

        // Band area is (1.2² − 1) times the disc
        let expected = silhouette_pixels as f32 * (1.2f32 * 1.2 - 1.0);
        assert!((ring_pixels as f32 - expected).abs() < expected * 0.15);
    }

    #[test]
    fn test_mask_writes_no_colour() {
        let mask = SelectionOutlinePass::mask_descriptor();
        assert_eq!(mask.color_blend[0], ColorBlendAttachment::DISABLED);
        assert!(!mask.depth_stencil.depth_write);
    }

    #[test]
    fn test_outline_push_scales_in_object_space() {
        let world = Mat4::new_translation(&Vec3::new(3.0, 0.0, 0.0));
        let push = outline_push(&Mat4::identity(), &world, 1.05, [1.0; 4]);
        assert_relative_eq!(push.mvp[0][0], 1.05);
        assert_relative_eq!(push.mvp[3][0], 3.0);
        assert_relative_eq!(push.params[0], 1.05);
    }

    #[test]
    fn test_mask_then_ring_draws() {
        let mut fixture = Fixture::new();
        let lit = FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::color("lit", LIT_COLOR_FORMAT), EXTENT, 2).unwrap();
        let depth =
            FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::depth_stencil("depth", DEPTH_STENCIL_FORMAT), EXTENT, 2)
                .unwrap();
        let mut pass = SelectionOutlinePass::new();
        pass.init(&mut fixture.context(), &CompositeTargets { lit: &lit, depth: &depth }).unwrap();

        let mut scene = Scene::new();
        let cube = scene.add_primitive(Primitive::cube("cube", 0.5));
        let material = scene.add_material(Material::unlit("flat", [1.0; 4]));
        let picked = scene.add_geometry(Geometry::new(cube, material, Mat4::identity()));
        scene.add_geometry(Geometry::new(cube, material, Mat4::identity()));
        scene.set_selected(picked, true);

        let state = SceneRenderState::collect(&scene);
        let camera = Camera::default();
        let inputs = FrameInputs { frame: 0, extent: EXTENT, scene: &scene, state: &state, camera: &camera };
        let mut meshes = MeshCache::new();
        let mut cmd = RecordingSink::new();

        let outlined = pass.render(&mut fixture.device, &mut cmd, &inputs, &mut meshes).unwrap();

        assert_eq!(outlined, 1);
        assert_eq!(cmd.draw_count(), 2);
        let pipelines: Vec<_> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindPipeline(pipeline) => Some(*pipeline),
                _ => None,
            })
            .collect();
        assert_eq!(pipelines.len(), 2);
        assert_ne!(pipelines[0], pipelines[1]);

        pass.clear(&mut fixture.device);
        meshes.clear(&mut fixture.device);
        let (mut lit, mut depth) = (lit, depth);
        lit.destroy(&mut fixture.device);
        depth.destroy(&mut fixture.device);
        assert_eq!(fixture.device.total_live(), 0);
    }
}
