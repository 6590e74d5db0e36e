//! # Blit Pass
//!
//! Copies the lit colour onto the presentable image through a full-screen
//! triangle, applying exposure and gamma on the way. Presentable images are
//! owned by the caller, so framebuffers are created lazily per image view
//! and kept until the pass is cleared.

use std::collections::BTreeMap;

use ash::vk;

use crate::render::frame::PresentTarget;
use crate::render::gpu::{AttachmentDesc, ClearValue, CommandSink, FramebufferDesc, GpuDevice, RenderPassDesc};
use crate::render::pipeline::{names, GraphicsPipeline, PipelineDescriptor, ShaderProgram};
use crate::render::resources::{DescriptorSetLayoutBuilder, FramebufferAttachment, RenderPassObjects, PASS_UNIFORM_BINDING};
use crate::render::uniforms::BlitUniform;
use crate::render::{RenderError, RenderResult};

use super::{require, PassContext, RenderPass};

const NAME: &str = "blit";

/// Binding of the lit colour in the blit set
pub const LIT_BINDING: u32 = 1;

/// Exposure applied before gamma
pub const DEFAULT_EXPOSURE: f32 = 1.0;

/// Whether writes to `format` are sRGB-encoded by the hardware
pub fn is_srgb(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32 | vk::Format::R8G8B8_SRGB | vk::Format::B8G8R8_SRGB
    )
}

/// One render pass over caller-owned presentable images
pub(crate) struct PresentFramebuffers {
    render_pass: vk::RenderPass,
    framebuffers: BTreeMap<vk::ImageView, vk::Framebuffer>,
}

impl PresentFramebuffers {
    pub(crate) fn new(device: &mut dyn GpuDevice, label: &'static str, attachment: AttachmentDesc) -> RenderResult<Self> {
        let render_pass = device.create_render_pass(&RenderPassDesc {
            label,
            color_attachments: vec![attachment],
            depth_attachment: None,
        })?;
        Ok(Self { render_pass, framebuffers: BTreeMap::new() })
    }

    pub(crate) fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub(crate) fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Framebuffer of `target`, created on first use
    pub(crate) fn get_or_create(&mut self, device: &mut dyn GpuDevice, target: &PresentTarget) -> RenderResult<vk::Framebuffer> {
        if let Some(&framebuffer) = self.framebuffers.get(&target.view) {
            return Ok(framebuffer);
        }
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc {
                render_pass: self.render_pass,
                attachments: vec![target.view],
                extent: target.extent,
            })
            .map_err(|e| RenderError::allocation("present framebuffer", e))?;
        self.framebuffers.insert(target.view, framebuffer);
        log::debug!("Created present framebuffer for {:?}", target.view);
        Ok(framebuffer)
    }

    pub(crate) fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for (_, framebuffer) in std::mem::take(&mut self.framebuffers) {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_render_pass(self.render_pass);
        self.render_pass = vk::RenderPass::null();
    }
}

struct BlitResources {
    present: PresentFramebuffers,
    objects: RenderPassObjects<BlitUniform>,
    pipeline: GraphicsPipeline,
    uniform: BlitUniform,
}

/// Lit colour to presentable image
#[derive(Default)]
pub struct BlitPass {
    resources: Option<BlitResources>,
}

impl BlitPass {
    /// Create an uninitialized pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-screen triangle sampling the lit colour
    pub fn pipeline_descriptor(set_layouts: &[vk::DescriptorSetLayout]) -> PipelineDescriptor {
        PipelineDescriptor::new("blit", ShaderProgram::new(names::FULLSCREEN_VERT, names::BLIT_FRAG))
            .with_set_layouts(set_layouts)
            .with_cull_mode(vk::CullModeFlags::NONE)
    }

    /// Create the present render pass, the sampling set and the pipeline
    pub fn init(&mut self, ctx: &mut PassContext<'_>, lit: &FramebufferAttachment, present_format: vk::Format) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let present = PresentFramebuffers::new(
            ctx.device,
            NAME,
            AttachmentDesc::color_clear(present_format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        )?;

        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(LIT_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(ctx.device)?;
        let uniform = BlitUniform::new(DEFAULT_EXPOSURE, is_srgb(present_format));
        let objects = RenderPassObjects::new(ctx.device, "blit", layout, ctx.frames, &uniform)?;
        for frame in 0..ctx.frames {
            objects.write(ctx.device, frame, &[lit.sampled_write(LIT_BINDING, frame)]);
        }

        let pipeline = ctx.factory.build(ctx.device, ctx.shaders, &Self::pipeline_descriptor(&[objects.layout()]), present.render_pass())?;

        self.resources = Some(BlitResources { present, objects, pipeline, uniform });
        log::info!("Initialized {NAME} pass ({present_format:?})");
        Ok(())
    }

    /// Number of presentable images seen since init
    pub fn framebuffer_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |resources| resources.present.len())
    }

    /// Draw the lit colour of `frame` onto `target`
    pub fn render(&mut self, device: &mut dyn GpuDevice, cmd: &mut dyn CommandSink, frame: usize, target: &PresentTarget) -> RenderResult<()> {
        let resources = require(&mut self.resources, NAME)?;
        let framebuffer = resources.present.get_or_create(device, target)?;
        resources.objects.update(device, frame, &resources.uniform)?;

        cmd.begin_render_pass(resources.present.render_pass(), framebuffer, target.extent, &[ClearValue::Color([0.0, 0.0, 0.0, 1.0])]);
        cmd.set_viewport(target.extent);
        cmd.set_scissor(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: target.extent });
        cmd.bind_pipeline(resources.pipeline.pipeline);
        resources.objects.bind(cmd, resources.pipeline.layout, 0, frame);
        cmd.draw(3, 1);
        cmd.end_render_pass();
        Ok(())
    }
}

impl RenderPass for BlitPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn clear(&mut self, device: &mut dyn GpuDevice) {
        if let Some(mut resources) = self.resources.take() {
            resources.pipeline.destroy(device);
            resources.objects.destroy(device);
            resources.present.destroy(device);
            log::debug!("Cleared {NAME} pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::RecordingSink;
    use crate::render::gpu::DescriptorWrite;
    use crate::render::passes::test_support::{Fixture, EXTENT};
    use crate::render::resources::AttachmentSpec;
    use crate::render::LIT_COLOR_FORMAT;
    use ash::vk::Handle;

    fn present(view: u64) -> PresentTarget {
        PresentTarget {
            image: vk::Image::from_raw(view),
            view: vk::ImageView::from_raw(view),
            format: vk::Format::B8G8R8A8_SRGB,
            extent: EXTENT,
        }
    }

    #[test]
    fn test_srgb_formats() {
        assert!(is_srgb(vk::Format::B8G8R8A8_SRGB));
        assert!(!is_srgb(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(BlitUniform::new(1.0, false).params[1], 1.0 / 2.2);
    }

    #[test]
    fn test_framebuffer_per_present_view() {
        let mut fixture = Fixture::new();
        let mut lit = FramebufferAttachment::new(&mut fixture.device, AttachmentSpec::color("lit", LIT_COLOR_FORMAT), EXTENT, 2).unwrap();
        let mut pass = BlitPass::new();
        pass.init(&mut fixture.context(), &lit, vk::Format::B8G8R8A8_SRGB).unwrap();

        let mut cmd = RecordingSink::new();
        for (frame, view) in [(0, 1001), (1, 1002), (0, 1001)] {
            pass.render(&mut fixture.device, &mut cmd, frame, &present(view)).unwrap();
        }

        assert_eq!(pass.framebuffer_count(), 2);
        assert_eq!(cmd.draw_count(), 3);
        assert!(cmd.is_balanced());

        let sets = cmd.bound_sets(0);
        let writes = fixture.device.descriptor_writes(sets[1]).unwrap();
        assert_eq!(writes.get(&LIT_BINDING), Some(&lit.sampled_write(LIT_BINDING, 1)));
        assert!(matches!(writes.get(&PASS_UNIFORM_BINDING), Some(DescriptorWrite::UniformBuffer { .. })));

        pass.clear(&mut fixture.device);
        lit.destroy(&mut fixture.device);
        assert_eq!(fixture.device.total_live(), 0);
    }
}
