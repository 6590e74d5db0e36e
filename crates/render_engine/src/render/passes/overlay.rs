//! # Overlay Pass
//!
//! Immediate-mode UI draw data (ImGui style) composited onto the
//! presentable image after the blit. Each draw command carries a clip
//! rectangle that becomes the scissor. The pass is recorded every frame,
//! with or without draw data, because it also moves the image into
//! `PRESENT_SRC_KHR`.

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::render::frame::PresentTarget;
use crate::render::gpu::{AttachmentDesc, BufferDesc, CommandSink, DescriptorWrite, GpuDevice};
use crate::render::pipeline::{names, ColorBlendAttachment, GraphicsPipeline, PipelineDescriptor, ShaderProgram, VertexLayout};
use crate::render::resources::{DescriptorLayout, DescriptorSetLayoutBuilder, TextureCache};
use crate::render::uniforms::OverlayPush;
use crate::render::{RenderError, RenderResult, VulkanResult};
use crate::scene::{Scene, SceneObject, TextureKey};

use super::blit::PresentFramebuffers;
use super::{require, PassContext, RenderPass};

const NAME: &str = "overlay";

const FONT_BINDING: u32 = 0;

/// UI vertex in display pixels
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    /// Position in display pixels
    pub position: [f32; 2],
    /// Font/texture coordinate
    pub uv: [f32; 2],
    /// Packed RGBA8 colour
    pub color: u32,
}

/// One indexed draw of the overlay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayDrawCommand {
    /// Clip rectangle in display pixels as (min x, min y, max x, max y)
    pub clip_rect: [f32; 4],
    /// Number of indices
    pub element_count: u32,
    /// First index in the index buffer
    pub first_index: u32,
    /// Added to every index
    pub vertex_offset: i32,
}

/// A frame of UI geometry
#[derive(Debug, Clone, Default)]
pub struct OverlayDrawData {
    /// Top-left of the display in UI coordinates
    pub display_pos: [f32; 2],
    /// Display size in pixels
    pub display_size: [f32; 2],
    /// Vertices of every command
    pub vertices: Vec<OverlayVertex>,
    /// Indices of every command
    pub indices: Vec<u32>,
    /// Draws in submission order
    pub commands: Vec<OverlayDrawCommand>,
    /// Font atlas; white when unset
    pub font_texture: Option<TextureKey>,
}

impl OverlayDrawData {
    /// Whether there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() || self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Scissor of `clip_rect` inside a target of `extent`, or `None` when empty
pub fn clip_to_scissor(clip_rect: [f32; 4], display_pos: [f32; 2], extent: vk::Extent2D) -> Option<vk::Rect2D> {
    let min_x = (clip_rect[0] - display_pos[0]).max(0.0);
    let min_y = (clip_rect[1] - display_pos[1]).max(0.0);
    let max_x = (clip_rect[2] - display_pos[0]).min(extent.width as f32);
    let max_y = (clip_rect[3] - display_pos[1]).min(extent.height as f32);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D { x: min_x as i32, y: min_y as i32 },
        extent: vk::Extent2D { width: (max_x - min_x) as u32, height: (max_y - min_y) as u32 },
    })
}

/// Host-visible buffer that is recreated larger when a write does not fit
struct GrowableBuffer {
    label: &'static str,
    usage: vk::BufferUsageFlags,
    buffer: vk::Buffer,
    capacity: vk::DeviceSize,
}

impl GrowableBuffer {
    fn new(label: &'static str, usage: vk::BufferUsageFlags) -> Self {
        Self { label, usage, buffer: vk::Buffer::null(), capacity: 0 }
    }

    fn write(&mut self, device: &mut dyn GpuDevice, bytes: &[u8]) -> VulkanResult<vk::Buffer> {
        let size = bytes.len() as vk::DeviceSize;
        if size > self.capacity {
            if self.capacity > 0 {
                device.destroy_buffer(self.buffer);
                self.buffer = vk::Buffer::null();
                self.capacity = 0;
            }
            let capacity = size.next_power_of_two().max(1024);
            self.buffer = device.create_buffer(&BufferDesc { label: self.label, size: capacity, usage: self.usage })?;
            self.capacity = capacity;
            log::debug!("Grew {} to {capacity} bytes", self.label);
        }
        device.write_buffer(self.buffer, 0, bytes)?;
        Ok(self.buffer)
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if self.capacity > 0 {
            device.destroy_buffer(self.buffer);
        }
        self.buffer = vk::Buffer::null();
        self.capacity = 0;
    }
}

struct FrameBuffers {
    vertices: GrowableBuffer,
    indices: GrowableBuffer,
}

struct OverlayResources {
    present: PresentFramebuffers,
    layout: DescriptorLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    bound_views: Vec<vk::ImageView>,
    pipeline: GraphicsPipeline,
    frames: Vec<FrameBuffers>,
}

/// UI overlay on the presentable image
#[derive(Default)]
pub struct OverlayPass {
    resources: Option<OverlayResources>,
}

impl OverlayPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Alpha-blended, unculled, scissored triangles
    pub fn pipeline_descriptor(set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        PipelineDescriptor::new("overlay", ShaderProgram::new(names::OVERLAY_VERT, names::OVERLAY_FRAG))
            .with_vertex_layout(VertexLayout::overlay())
            .with_set_layouts(set_layouts)
            .with_push_constants(vk::ShaderStageFlags::VERTEX, std::mem::size_of::<OverlayPush>() as u32)
            .with_cull_mode(vk::CullModeFlags::NONE)
            .with_color_blend(&[ColorBlendAttachment::ALPHA])
    }

    /// Create the present render pass, texture sets and the pipeline
    pub fn init(&mut self, ctx: &mut PassContext<'_>, present_format: vk::Format) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let present = PresentFramebuffers::new(
            ctx.device,
            NAME,
            AttachmentDesc::color_load(present_format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR),
        )?;

        let layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(FONT_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let (pool, sets) = layout
            .allocate(ctx.device, ctx.frames as u32)
            .map_err(|e| RenderError::allocation("overlay descriptor sets", e))?;

        let pipeline = ctx.factory.build(ctx.device, ctx.shaders, &Self::pipeline_descriptor(&[layout.handle()]), present.render_pass())?;

        let frames = (0..ctx.frames)
            .map(|_| FrameBuffers {
                vertices: GrowableBuffer::new("overlay vertices", vk::BufferUsageFlags::VERTEX_BUFFER),
                indices: GrowableBuffer::new("overlay indices", vk::BufferUsageFlags::INDEX_BUFFER),
            })
            .collect();

        self.resources = Some(OverlayResources {
            present,
            layout,
            pool,
            bound_views: vec![vk::ImageView::null(); sets.len()],
            sets,
            pipeline,
            frames,
        });
        log::info!("Initialized {NAME} pass");
        Ok(())
    }

    /// Composite `data` onto `target`; returns the number of draws
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        frame: usize,
        target: &PresentTarget,
        data: Option<&OverlayDrawData>,
        scene: &Scene,
        textures: &mut TextureCache,
    ) -> RenderResult<usize> {
        let resources = require(&mut self.resources, NAME)?;
        let framebuffer = resources.present.get_or_create(device, target)?;
        let slot = frame % resources.sets.len();

        let data = data.filter(|data| !data.is_empty());
        let buffers = match data {
            Some(data) => {
                let font = match data.font_texture {
                    Some(key) => textures.get_or_upload(device, scene, key)?,
                    None => None,
                };
                let view = font.unwrap_or_else(|| textures.white_view());
                if resources.bound_views[slot] != view {
                    device.update_descriptor_set(
                        resources.sets[slot],
                        &[DescriptorWrite::CombinedImageSampler { binding: FONT_BINDING, view, sampler: textures.sampler() }],
                    );
                    resources.bound_views[slot] = view;
                }

                let upload = &mut resources.frames[slot];
                let vertices = upload
                    .vertices
                    .write(device, bytemuck::cast_slice(&data.vertices))
                    .map_err(|e| RenderError::allocation("overlay vertex buffer", e))?;
                let indices = upload
                    .indices
                    .write(device, bytemuck::cast_slice(&data.indices))
                    .map_err(|e| RenderError::allocation("overlay index buffer", e))?;
                Some((data, vertices, indices))
            }
            None => None,
        };

        cmd.begin_render_pass(resources.present.render_pass(), framebuffer, target.extent, &[]);
        let mut draws = 0;
        if let Some((data, vertices, indices)) = buffers {
            let layout = resources.pipeline.layout;
            cmd.bind_pipeline(resources.pipeline.pipeline);
            cmd.set_viewport(target.extent);
            cmd.bind_descriptor_set(layout, 0, resources.sets[slot]);
            let push = OverlayPush::new(data.display_pos, data.display_size);
            cmd.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&push));
            cmd.bind_vertex_buffer(vertices);
            cmd.bind_index_buffer(indices);

            for command in &data.commands {
                if command.element_count == 0 {
                    continue;
                }
                let Some(scissor) = clip_to_scissor(command.clip_rect, data.display_pos, target.extent) else {
                    continue;
                };
                cmd.set_scissor(scissor);
                cmd.draw_indexed(command.element_count, command.first_index, command.vertex_offset, 1);
                draws += 1;
            }
        }
        cmd.end_render_pass();

        log::trace!("{NAME}: {draws} draws");
        Ok(draws)
    }

    /// Force the texture sets to be rewritten after a texture was released
    pub fn forget(&mut self, object: SceneObject) {
        if let (Some(resources), SceneObject::Texture(_)) = (self.resources.as_mut(), object) {
            resources.bound_views.fill(vk::ImageView::null());
        }
    }
}

impl RenderPass for OverlayPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            for buffers in &mut resources.frames {
                buffers.vertices.destroy(device);
                buffers.indices.destroy(device);
            }
            resources.pipeline.destroy(device);
            device.destroy_descriptor_pool(resources.pool);
            resources.layout.destroy(device);
            resources.present.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{ObjectKind, RecordedCommand, RecordingSink};
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use ash::vk::Handle;

    fn target() -> PresentTarget {
        PresentTarget {
            image: vk::Image::from_raw(7001),
            view: vk::ImageView::from_raw(7001),
            format: vk::Format::B8G8R8A8_UNORM,
            extent: EXTENT,
        }
    }

    fn quad(clip_rect: [f32; 4]) -> OverlayDrawData {
        let corner = |x: f32, y: f32| OverlayVertex { position: [x, y], uv: [0.0, 0.0], color: 0xffff_ffff };
        OverlayDrawData {
            display_pos: [0.0, 0.0],
            display_size: [EXTENT.width as f32, EXTENT.height as f32],
            vertices: vec![corner(0.0, 0.0), corner(10.0, 0.0), corner(10.0, 10.0), corner(0.0, 10.0)],
            indices: vec![0, 1, 2, 0, 2, 3],
            commands: vec![
                OverlayDrawCommand { clip_rect, element_count: 6, first_index: 0, vertex_offset: 0 },
                OverlayDrawCommand { clip_rect: [100.0, 100.0, 200.0, 200.0], element_count: 6, first_index: 0, vertex_offset: 0 },
                OverlayDrawCommand { clip_rect, element_count: 0, first_index: 0, vertex_offset: 0 },
            ],
            font_texture: None,
        }
    }

    struct Setup {
        fixture: Fixture,
        pass: OverlayPass,
        textures: TextureCache,
        scene: Scene,
    }

    impl Setup {
        fn new() -> Self {
            let mut fixture = Fixture::new();
            let mut pass = OverlayPass::new();
            pass.init(&mut fixture.context(), vk::Format::B8G8R8A8_UNORM).unwrap();
            let textures = TextureCache::new(&mut fixture.device).unwrap();
            Self { fixture, pass, textures, scene: Scene::new() }
        }

        fn render(&mut self, frame: usize, data: Option<&OverlayDrawData>) -> (RecordingSink, usize) {
            let mut cmd = RecordingSink::new();
            let draws = self
                .pass
                .render(&mut self.fixture.device, &mut cmd, frame, &target(), data, &self.scene, &mut self.textures)
                .unwrap();
            (cmd, draws)
        }
    }

    #[test]
    fn test_clip_rect_becomes_scissor() {
        let scissor = clip_to_scissor([-5.0, 4.0, 20.0, 500.0], [0.0, 0.0], EXTENT).unwrap();
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 4);
        assert_eq!(scissor.extent.width, 20);
        assert_eq!(scissor.extent.height, EXTENT.height - 4);

        assert!(clip_to_scissor([70.0, 0.0, 90.0, 10.0], [0.0, 0.0], EXTENT).is_none());
    }

    #[test]
    fn test_offscreen_and_empty_commands_are_skipped() {
        let mut setup = Setup::new();
        let (cmd, draws) = setup.render(0, Some(&quad([2.0, 2.0, 12.0, 12.0])));

        assert_eq!(draws, 1);
        assert!(cmd.commands().iter().any(|c| matches!(c, RecordedCommand::SetScissor(2, 2, 10, 10))));
        assert!(cmd.commands().iter().any(|c| matches!(c, RecordedCommand::DrawIndexed { index_count: 6, .. })));
    }

    #[test]
    fn test_without_data_the_pass_still_runs() {
        let mut setup = Setup::new();
        let (cmd, draws) = setup.render(0, None);
        assert_eq!(draws, 0);
        assert_eq!(cmd.render_passes().len(), 1);
        assert!(cmd.is_balanced());
    }

    #[test]
    fn test_buffers_grow_and_are_reused() {
        let mut setup = Setup::new();
        let small = quad([0.0, 0.0, 64.0, 48.0]);
        setup.render(0, Some(&small));
        setup.render(0, Some(&small));
        assert_eq!(setup.fixture.device.created_count(ObjectKind::Buffer), 2);

        let mut large = small.clone();
        large.vertices = vec![OverlayVertex::default(); 4096];
        setup.render(0, Some(&large));
        assert_eq!(setup.fixture.device.live_count(ObjectKind::Buffer), 2);
        assert_eq!(setup.fixture.device.created_count(ObjectKind::Buffer), 3);

        setup.pass.clear(&mut setup.fixture.device);
        setup.textures.destroy(&mut setup.fixture.device);
        assert_eq!(setup.fixture.device.total_live(), 0);
    }
}
