//! Vulkan implementation of [`CommandSink`]

use ash::{vk, Device};

use crate::render::gpu::{ClearValue, CommandSink, ImageLayers};

/// Records into one primary command buffer
pub struct VulkanCommandRecorder {
    device: Device,
    command_buffer: vk::CommandBuffer,
}

impl VulkanCommandRecorder {
    /// Wrap a command buffer that is already in the recording state
    pub fn new(device: Device, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }

    /// Recorded command buffer
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn barrier(
        &self,
        layers: ImageLayers,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src: (vk::PipelineStageFlags, vk::AccessFlags),
        dst: (vk::PipelineStageFlags, vk::AccessFlags),
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(layers.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: layers.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: layers.base_layer,
                layer_count: layers.layer_count,
            })
            .src_access_mask(src.1)
            .dst_access_mask(dst.1)
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src.0,
                dst.0,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

const SHADER_READ: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ);
const TRANSFER_WRITE: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE);

impl CommandSink for VulkanCommandRecorder {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    ) {
        let clear_values: Vec<vk::ClearValue> = clear_values.iter().map(|value| value.to_vk()).collect();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, offset, data);
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]) };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.device.cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0) };
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32, instance_count: u32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                0,
            );
        }
    }

    fn copy_to_layer(
        &mut self,
        source: vk::Image,
        aspect: vk::ImageAspectFlags,
        destination: vk::Image,
        layer: u32,
        extent: vk::Extent2D,
    ) {
        let target = ImageLayers { image: destination, aspect, base_layer: layer, layer_count: 1 };
        self.barrier(
            target,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            SHADER_READ,
            TRANSFER_WRITE,
        );

        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers { aspect_mask: aspect, mip_level: 0, base_array_layer: 0, layer_count: 1 },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers { aspect_mask: aspect, mip_level: 0, base_array_layer: layer, layer_count: 1 },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
        };
        unsafe {
            self.device.cmd_copy_image(
                self.command_buffer,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        self.barrier(
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            TRANSFER_WRITE,
            SHADER_READ,
        );
    }

    fn clear_image(&mut self, layers: ImageLayers, value: ClearValue) {
        self.barrier(
            layers,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
            TRANSFER_WRITE,
        );

        let range = vk::ImageSubresourceRange {
            aspect_mask: layers.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: layers.base_layer,
            layer_count: layers.layer_count,
        };
        unsafe {
            match value {
                ClearValue::Color(float32) => self.device.cmd_clear_color_image(
                    self.command_buffer,
                    layers.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue { float32 },
                    &[range],
                ),
                ClearValue::DepthStencil { depth, stencil } => self.device.cmd_clear_depth_stencil_image(
                    self.command_buffer,
                    layers.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearDepthStencilValue { depth, stencil },
                    &[range],
                ),
            }
        }

        self.barrier(
            layers,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            TRANSFER_WRITE,
            SHADER_READ,
        );
    }
}
