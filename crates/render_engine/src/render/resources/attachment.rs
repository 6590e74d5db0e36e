//! Framebuffer attachments and pass render targets
//!
//! A [`FramebufferAttachment`] holds one image and view per frame in flight
//! so a frame never renders into an image the previous frame is still
//! sampling. Attachments are owned by the pass that creates them and are
//! destroyed and recreated on resize.

use ash::vk;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{
    ClearValue, CommandSink, DescriptorWrite, FramebufferDesc, GpuDevice, ImageDesc, ImageViewDesc, RenderPassDesc,
    SamplerDesc,
};

/// What kind of attachment to create
#[derive(Debug, Clone, Copy)]
pub struct AttachmentSpec {
    /// Debug label
    pub label: &'static str,
    /// Format
    pub format: vk::Format,
    /// Usage beyond attachment use
    pub usage: vk::ImageUsageFlags,
    /// View aspect
    pub aspect: vk::ImageAspectFlags,
}

impl AttachmentSpec {
    /// Sampled colour attachment
    pub const fn color(label: &'static str, format: vk::Format) -> Self {
        Self {
            label,
            format,
            usage: vk::ImageUsageFlags::from_raw(
                vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::SAMPLED.as_raw(),
            ),
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Depth/stencil attachment
    pub const fn depth_stencil(label: &'static str, format: vk::Format) -> Self {
        Self {
            label,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::from_raw(
                vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
            ),
        }
    }

    /// Add usage flags
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }
}

/// Per-frame images + views + a sampler
#[derive(Debug)]
pub struct FramebufferAttachment {
    label: &'static str,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    sampler: vk::Sampler,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl FramebufferAttachment {
    /// Create `frames` images of `extent`
    pub fn new(
        device: &mut dyn GpuDevice,
        spec: AttachmentSpec,
        extent: vk::Extent2D,
        frames: usize,
    ) -> VulkanResult<Self> {
        let sampler = device.create_sampler(&SamplerDesc::NEAREST_CLAMP)?;
        let mut attachment = Self {
            label: spec.label,
            images: Vec::with_capacity(frames),
            views: Vec::with_capacity(frames),
            sampler,
            format: spec.format,
            extent,
        };

        for _ in 0..frames {
            if let Err(e) = attachment.push_frame(device, spec) {
                attachment.destroy(device);
                return Err(e);
            }
        }

        log::debug!("Created attachment '{}' {}x{} x{frames}", spec.label, extent.width, extent.height);
        Ok(attachment)
    }

    fn push_frame(&mut self, device: &mut dyn GpuDevice, spec: AttachmentSpec) -> VulkanResult<()> {
        let image = device.create_image(&ImageDesc::texture_2d(spec.label, self.extent, spec.format, spec.usage))?;
        self.images.push(image);
        let view = device.create_image_view(&ImageViewDesc {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: spec.format,
            aspect: spec.aspect,
            base_layer: 0,
            layer_count: 1,
        })?;
        self.views.push(view);
        Ok(())
    }

    /// Image of `frame`
    pub fn image(&self, frame: usize) -> vk::Image {
        self.images[frame % self.images.len()]
    }

    /// View of `frame`
    pub fn view(&self, frame: usize) -> vk::ImageView {
        self.views[frame % self.views.len()]
    }

    /// Views of every frame
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Sampler for reading the attachment in later passes
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Descriptor write sampling `frame`'s image at `binding`
    pub fn sampled_write(&self, binding: u32, frame: usize) -> DescriptorWrite {
        DescriptorWrite::CombinedImageSampler { binding, view: self.view(frame), sampler: self.sampler }
    }

    /// Destroy views, images and sampler
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
        device.destroy_sampler(self.sampler);
        self.sampler = vk::Sampler::null();
        log::debug!("Destroyed attachment '{}'", self.label);
    }
}

/// Render pass with one framebuffer per frame in flight
#[derive(Debug)]
pub struct PassTarget {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl PassTarget {
    /// Create the render pass and a framebuffer per entry of `frame_attachments`
    pub fn new(
        device: &mut dyn GpuDevice,
        desc: &RenderPassDesc,
        frame_attachments: &[Vec<vk::ImageView>],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let render_pass = device.create_render_pass(desc)?;
        let mut target = Self { render_pass, framebuffers: Vec::with_capacity(frame_attachments.len()), extent };

        for attachments in frame_attachments {
            match device.create_framebuffer(&FramebufferDesc { render_pass, attachments: attachments.clone(), extent }) {
                Ok(framebuffer) => target.framebuffers.push(framebuffer),
                Err(e) => {
                    target.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(target)
    }

    /// Render pass handle
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffer of `frame`
    pub fn framebuffer(&self, frame: usize) -> vk::Framebuffer {
        self.framebuffers[frame % self.framebuffers.len()]
    }

    /// Extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Begin the render pass for `frame` and set a full-extent viewport and scissor
    pub fn begin(&self, cmd: &mut dyn CommandSink, frame: usize, clear_values: &[ClearValue]) {
        cmd.begin_render_pass(self.render_pass, self.framebuffer(frame), self.extent, clear_values);
        cmd.set_viewport(self.extent);
        cmd.set_scissor(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent });
    }

    /// Destroy framebuffers and the render pass
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_render_pass(self.render_pass);
        self.render_pass = vk::RenderPass::null();
    }
}
