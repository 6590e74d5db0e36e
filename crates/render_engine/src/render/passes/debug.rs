//! # Scene Debug Pass
//!
//! World-space line segments drawn over the composited scene: the scene's
//! own debug lines plus, optionally, gizmos for every light. Vertices are
//! rebuilt every frame into a host-visible buffer owned by the current
//! frame in flight, so a buffer is never rewritten while the GPU may still
//! read it.

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::core::config::DebugSettings;
use crate::foundation::math::{constants, utils, Vec3};
use crate::render::gpu::{AttachmentDesc, BufferDesc, CommandSink, GpuDevice};
use crate::render::pipeline::{
    names, ColorBlendAttachment, DepthStencilState, GraphicsPipeline, PipelineDescriptor, ShaderProgram, VertexLayout,
};
use crate::render::resources::{DescriptorSetLayoutBuilder, PassTarget, RenderPassObjects, PASS_UNIFORM_BINDING};
use crate::render::uniforms::CameraUniform;
use crate::render::{RenderError, RenderResult, DEPTH_STENCIL_FORMAT};
use crate::scene::{Light, LightType, Scene, SceneRenderState};

use super::{composite_target, require, CompositeTargets, FrameInputs, PassContext, RenderPass, COMPOSITE_CLEARS};

const NAME: &str = "scene debug";

const CIRCLE_SEGMENTS: usize = 24;
const ARROW_LENGTH: f32 = 2.0;

/// One end of a debug line
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugVertex {
    /// World position
    pub position: [f32; 3],
    /// RGBA colour
    pub color: [f32; 4],
}

impl DebugVertex {
    fn new(position: &Vec3, color: [f32; 4]) -> Self {
        Self { position: [position.x, position.y, position.z], color }
    }
}

fn push_line(vertices: &mut Vec<DebugVertex>, from: &Vec3, to: &Vec3, color: [f32; 4]) {
    vertices.push(DebugVertex::new(from, color));
    vertices.push(DebugVertex::new(to, color));
}

fn push_circle(vertices: &mut Vec<DebugVertex>, center: &Vec3, axis: &Vec3, radius: f32, color: [f32; 4]) {
    let axis = axis.normalize();
    let u = utils::stable_up(&axis).cross(&axis).normalize();
    let v = axis.cross(&u);
    let point = |i: usize| {
        let angle = i as f32 / CIRCLE_SEGMENTS as f32 * 2.0 * constants::PI;
        center + (u * angle.cos() + v * angle.sin()) * radius
    };
    for i in 0..CIRCLE_SEGMENTS {
        push_line(vertices, &point(i), &point(i + 1), color);
    }
}

fn push_arrow(vertices: &mut Vec<DebugVertex>, from: &Vec3, to: &Vec3, color: [f32; 4]) {
    push_line(vertices, from, to, color);
    let shaft = to - from;
    let length = shaft.norm();
    if length <= f32::EPSILON {
        return;
    }
    let direction = shaft / length;
    let side = utils::stable_up(&direction).cross(&direction).normalize();
    let back = to - direction * (length * 0.2);
    push_line(vertices, to, &(back + side * (length * 0.1)), color);
    push_line(vertices, to, &(back - side * (length * 0.1)), color);
}

/// Line gizmo of one light
///
/// Directional lights get an arrow ending at the origin, point lights three
/// great circles of their radius, spot lights an arrow along the axis and a
/// circle where the outer cone meets the radius.
pub fn light_gizmo(light: &Light, vertices: &mut Vec<DebugVertex>) {
    let c = light.color;
    let color = [c.x, c.y, c.z, 1.0];
    match light.light_type {
        LightType::Directional => {
            let direction = light.direction.normalize();
            push_arrow(vertices, &(-direction * ARROW_LENGTH), &Vec3::zeros(), color);
        }
        LightType::Point => {
            for axis in [Vec3::x(), Vec3::y(), Vec3::z()] {
                push_circle(vertices, &light.position, &axis, light.radius, color);
            }
        }
        LightType::Spot => {
            let direction = light.direction.normalize();
            let end = light.position + direction * light.radius;
            push_arrow(vertices, &light.position, &end, color);
            push_circle(vertices, &end, &direction, light.radius * light.outer_cutoff.tan(), color);
        }
    }
}

/// Every debug vertex of a frame, in draw order
pub fn collect_vertices(scene: &Scene, state: &SceneRenderState, draw_light_gizmos: bool) -> Vec<DebugVertex> {
    let mut vertices = Vec::with_capacity(scene.debug_lines().len() * 2);
    for line in scene.debug_lines() {
        push_line(&mut vertices, &line.from, &line.to, line.color);
    }
    if draw_light_gizmos {
        for keys in state.lights.values() {
            for light in keys.iter().filter_map(|&key| scene.light(key)) {
                light_gizmo(light, &mut vertices);
            }
        }
    }
    vertices
}

struct DebugResources {
    target: PassTarget,
    camera: RenderPassObjects<CameraUniform>,
    pipeline: GraphicsPipeline,
    vertex_buffers: Vec<vk::Buffer>,
    capacity: u32,
    settings: DebugSettings,
}

/// Debug lines and light gizmos
#[derive(Default)]
pub struct SceneDebugPass {
    resources: Option<DebugResources>,
}

impl SceneDebugPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth-tested, non-writing line list
    pub fn pipeline_descriptor(set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        PipelineDescriptor::new("debug lines", ShaderProgram::new(names::DEBUG_LINE_VERT, names::DEBUG_LINE_FRAG))
            .with_topology(vk::PrimitiveTopology::LINE_LIST)
            .with_vertex_layout(VertexLayout::debug_line())
            .with_set_layouts(set_layouts)
            .with_cull_mode(vk::CullModeFlags::NONE)
            .with_depth_stencil(DepthStencilState::READ_ONLY)
            .with_color_blend(&[ColorBlendAttachment::ALPHA])
    }

    /// Create the render pass, camera objects, pipeline and per-frame vertex buffers
    pub fn init(&mut self, ctx: &mut PassContext<'_>, targets: &CompositeTargets<'_>) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let settings = ctx.config.debug.clone();
        let target = composite_target(
            ctx.device,
            NAME,
            targets,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentDesc::depth_load(DEPTH_STENCIL_FORMAT),
        )?;

        let camera_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device)?;
        let camera = RenderPassObjects::new(ctx.device, "debug camera", camera_layout, ctx.frames, &CameraUniform::default())?;
        let pipeline = ctx.factory.build(ctx.device, ctx.shaders, &Self::pipeline_descriptor(&[camera.layout()]), target.render_pass())?;

        let capacity = settings.max_line_vertices.max(2) & !1;
        let size = capacity as vk::DeviceSize * std::mem::size_of::<DebugVertex>() as vk::DeviceSize;
        let mut vertex_buffers = Vec::with_capacity(ctx.frames);
        for _ in 0..ctx.frames {
            let buffer = ctx
                .device
                .create_buffer(&BufferDesc { label: "debug vertices", size, usage: vk::BufferUsageFlags::VERTEX_BUFFER })
                .map_err(|e| RenderError::allocation("debug vertex buffer", e))?;
            vertex_buffers.push(buffer);
        }

        self.resources = Some(DebugResources { target, camera, pipeline, vertex_buffers, capacity, settings });
        log::info!("Initialized {NAME} pass ({capacity} vertices per frame)");
        Ok(())
    }

    /// Vertex capacity of each frame's buffer
    pub fn capacity(&self) -> u32 {
        self.resources.as_ref().map_or(0, |resources| resources.capacity)
    }

    /// Draw this frame's debug lines; returns the number of vertices drawn
    ///
    /// The render pass is always recorded so the attachments end in the
    /// layouts the following passes expect, even when nothing is drawn.
    pub fn render(&mut self, device: &mut dyn GpuDevice, cmd: &mut dyn CommandSink, inputs: &FrameInputs<'_>) -> RenderResult<u32> {
        let resources = require(&mut self.resources, NAME)?;
        let frame = inputs.frame;

        let mut vertices = if resources.settings.enabled {
            collect_vertices(inputs.scene, inputs.state, resources.settings.draw_light_gizmos)
        } else {
            Vec::new()
        };
        if vertices.len() > resources.capacity as usize {
            log::warn!(
                "{} debug vertices exceed the per-frame capacity of {}, truncating",
                vertices.len(),
                resources.capacity
            );
            vertices.truncate(resources.capacity as usize);
        }
        let count = vertices.len() as u32;

        resources.target.begin(cmd, frame, &COMPOSITE_CLEARS);
        if count > 0 {
            let extent = resources.target.extent();
            let buffer = resources.vertex_buffers[frame % resources.vertex_buffers.len()];
            let written = device
                .write_buffer(buffer, 0, bytemuck::cast_slice(&vertices))
                .map_err(RenderError::from)
                .and_then(|()| resources.camera.update(device, frame, &CameraUniform::new(inputs.camera, extent.width, extent.height)));
            if let Err(e) = written {
                cmd.end_render_pass();
                return Err(e);
            }

            let layout = resources.pipeline.layout;
            cmd.bind_pipeline(resources.pipeline.pipeline);
            resources.camera.bind(cmd, layout, 0, frame);
            cmd.bind_vertex_buffer(buffer);
            cmd.draw(count, 1);
        }
        cmd.end_render_pass();

        log::trace!("{NAME}: {count} vertices");
        Ok(count)
    }
}

impl RenderPass for SceneDebugPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            for buffer in resources.vertex_buffers.drain(..) {
                device.destroy_buffer(buffer);
            }
            resources.pipeline.destroy(device);
            resources.camera.destroy(device);
            resources.target.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{ObjectKind, RecordedCommand, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::render::resources::{AttachmentSpec, FramebufferAttachment};
    use crate::render::LIT_COLOR_FORMAT;
    use crate::scene::Camera;
    use approx::assert_relative_eq;

    struct Setup {
        fixture: Fixture,
        lit: FramebufferAttachment,
        depth: FramebufferAttachment,
        pass: SceneDebugPass,
    }

    impl Setup {
        fn new(settings: DebugSettings) -> Self {
            let mut fixture = Fixture::new();
            fixture.config.debug = settings;
            let lit = FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::color("lit", LIT_COLOR_FORMAT), EXTENT, 2).unwrap();
            let depth = FramebufferAttachment::new(
                &mut fixture.device,
                AttachmentSpec::depth_stencil("depth", DEPTH_STENCIL_FORMAT),
                EXTENT,
                2,
            )
            .unwrap();
            let mut pass = SceneDebugPass::new();
            pass.init(&mut fixture.context(), &CompositeTargets { lit: &lit, depth: &depth }).unwrap();
            Self { fixture, lit, depth, pass }
        }

        fn render(&mut self, scene: &Scene, frame: usize) -> (RecordingSink, u32) {
            let state = SceneRenderState::collect(scene);
            let camera = Camera::default();
            let inputs = FrameInputs { frame, extent: EXTENT, scene, state: &state, camera: &camera };
            let mut cmd = RecordingSink::new();
            let count = self.pass.render(&mut self.fixture.device, &mut cmd, &inputs).unwrap();
            (cmd, count)
        }
    }

    fn enabled(max_line_vertices: u32, draw_light_gizmos: bool) -> DebugSettings {
        DebugSettings { enabled: true, draw_light_gizmos, max_line_vertices }
    }

    #[test]
    fn test_debug_lines_reach_the_frame_buffer() {
        let mut setup = Setup::new(enabled(64, false));
        let mut scene = Scene::new();
        scene.add_debug_line(Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0), [1.0, 0.0, 0.0, 1.0]);
        scene.add_debug_line(Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0), [0.0, 1.0, 0.0, 1.0]);

        let (cmd, count) = setup.render(&scene, 1);

        assert_eq!(count, 4);
        assert!(cmd.commands().iter().any(|c| matches!(c, RecordedCommand::Draw { vertex_count: 4, instance_count: 1 })));
        let buffer = setup.pass.resources.as_ref().unwrap().vertex_buffers[1];
        let contents = setup.fixture.device.buffer_contents(buffer).unwrap();
        let first = DebugVertex { position: [1.0, 0.0, 0.0], color: [1.0, 0.0, 0.0, 1.0] };
        assert_eq!(&contents[28..56], bytemuck::bytes_of(&first));
    }

    #[test]
    fn test_overflow_is_truncated() {
        let mut setup = Setup::new(enabled(6, false));
        let mut scene = Scene::new();
        for i in 0..10 {
            scene.add_debug_line(Vec3::zeros(), Vec3::new(i as f32, 1.0, 0.0), [1.0; 4]);
        }

        let (_, count) = setup.render(&scene, 0);
        assert_eq!(count, 6);
    }

    #[test]
    fn test_disabled_pass_keeps_the_render_pass() {
        let mut setup = Setup::new(DebugSettings { enabled: false, ..DebugSettings::default() });
        let mut scene = Scene::new();
        scene.add_debug_line(Vec3::zeros(), Vec3::x(), [1.0; 4]);

        let (cmd, count) = setup.render(&scene, 0);
        assert_eq!(count, 0);
        assert_eq!(cmd.render_passes().len(), 1);
        assert_eq!(cmd.draw_count(), 0);
    }

    #[test]
    fn test_light_gizmo_shapes() {
        let mut vertices = Vec::new();
        light_gizmo(&Light::point(Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 2.0), &mut vertices);
        assert_eq!(vertices.len(), 3 * CIRCLE_SEGMENTS * 2);
        for vertex in &vertices {
            let p = Vec3::from(vertex.position);
            assert_relative_eq!((p - Vec3::new(1.0, 0.0, 0.0)).norm(), 2.0, epsilon = 1e-4);
        }

        vertices.clear();
        light_gizmo(&Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0), &mut vertices);
        assert_eq!(vertices.len(), 6);
        assert_eq!(vertices[1].position, [0.0, 0.0, 0.0]);
        assert_relative_eq!(vertices[0].position[1], ARROW_LENGTH);
    }

    #[test]
    fn test_gizmos_follow_settings() {
        let mut scene = Scene::new();
        scene.add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0));
        let state = SceneRenderState::collect(&scene);

        assert!(collect_vertices(&scene, &state, false).is_empty());
        assert_eq!(collect_vertices(&scene, &state, true).len(), 6);
    }

    #[test]
    fn test_clear_releases_buffers() {
        let mut setup = Setup::new(enabled(64, true));
        assert_eq!(setup.fixture.device.live_count(ObjectKind::Buffer), 4);

        setup.pass.clear(&mut setup.fixture.device);
        setup.lit.destroy(&mut setup.fixture.device);
        setup.depth.destroy(&mut setup.fixture.device);
        assert_eq!(setup.fixture.device.total_live(), 0);
    }
}
