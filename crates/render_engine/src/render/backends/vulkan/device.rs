//! Vulkan implementation of [`GpuDevice`]
//!
//! Every buffer is backed by host-visible, host-coherent memory so uniform,
//! vertex and index data can be written in place; images live in
//! device-local memory and textures are uploaded through a staging buffer on
//! the graphics queue.

use std::collections::HashMap;
use std::ffi::CStr;

use ash::vk;

use crate::render::gpu::{
    AttachmentDesc, BufferDesc, DescriptorBinding, DescriptorWrite, FramebufferDesc, GpuDevice,
    GraphicsPipelineCreate, ImageDesc, ImageViewDesc, PipelineLayoutDesc, RenderPassDesc, SamplerDesc,
};
use crate::render::pipeline::{VertexLayout, ViewportMode};
use super::context::{VulkanContext, VulkanError, VulkanResult};

const SHADER_ENTRY: &[u8] = b"main\0";

#[derive(Debug, Clone, Copy)]
struct BufferAllocation {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

/// `GpuDevice` over an `ash` logical device
pub struct VulkanDevice {
    context: VulkanContext,
    buffers: HashMap<vk::Buffer, BufferAllocation>,
    images: HashMap<vk::Image, vk::DeviceMemory>,
}

impl VulkanDevice {
    /// Wrap a context
    pub fn new(context: VulkanContext) -> Self {
        Self {
            context,
            buffers: HashMap::new(),
            images: HashMap::new(),
        }
    }

    /// Underlying context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Logical device handle, for command recording
    pub fn raw(&self) -> &ash::Device {
        &self.context.device
    }

    fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<(vk::Buffer, vk::DeviceMemory)> {
        let device = &self.context.device;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(VulkanError::Api)?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match self.context.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.map_err(VulkanError::Api)?;
        Ok((buffer, memory))
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let device = &self.context.device;
        unsafe {
            let ptr = device
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    fn submit_one_time(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> VulkanResult<()> {
        let device = &self.context.device;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.context.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)?;
        let command_buffer = command_buffers[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result = unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .and_then(|()| {
                    record(device, command_buffer);
                    device.end_command_buffer(command_buffer)
                })
                .and_then(|()| {
                    let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                    device.queue_submit(self.context.graphics_queue, &[submit], vk::Fence::null())
                })
                .and_then(|()| device.queue_wait_idle(self.context.graphics_queue))
        };

        unsafe { device.free_command_buffers(self.context.command_pool, &command_buffers) };
        result.map_err(VulkanError::Api)
    }

    fn attachment_description(attachment: &AttachmentDesc) -> vk::AttachmentDescription {
        vk::AttachmentDescription::builder()
            .format(attachment.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(attachment.load_op)
            .store_op(attachment.store_op)
            .stencil_load_op(attachment.stencil_load_op)
            .stencil_store_op(attachment.stencil_store_op)
            .initial_layout(attachment.initial_layout)
            .final_layout(attachment.final_layout)
            .build()
    }
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> VulkanResult<vk::Buffer> {
        let (buffer, memory) = self.allocate_buffer(desc.size, desc.usage)?;
        self.buffers.insert(buffer, BufferAllocation { memory, size: desc.size });
        log::debug!("Created buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let allocation = self.buffers.get(&buffer).copied().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("write to unknown buffer {buffer:?}"),
        })?;
        if offset + data.len() as vk::DeviceSize > allocation.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {offset} overflows buffer of {}", data.len(), allocation.size),
            });
        }
        self.write_memory(allocation.memory, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Some(allocation) = self.buffers.remove(&buffer) {
            unsafe {
                self.context.device.destroy_buffer(buffer, None);
                self.context.device.free_memory(allocation.memory, None);
            }
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let device = &self.context.device;
        let flags = if desc.cube_compatible {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.map_err(VulkanError::Api)?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = self
            .context
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)?;
        unsafe { device.bind_image_memory(image, memory, 0) }.map_err(VulkanError::Api)?;

        self.images.insert(image, memory);
        log::debug!(
            "Created image '{}' {}x{} x{} ({:?})",
            desc.label, desc.extent.width, desc.extent.height, desc.array_layers, desc.format
        );
        Ok(image)
    }

    fn upload_image(&mut self, image: vk::Image, extent: vk::Extent2D, texels: &[u8]) -> VulkanResult<()> {
        let size = texels.len() as vk::DeviceSize;
        let (staging, memory) = self.allocate_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC)?;

        let result = self.write_memory(memory, 0, texels).and_then(|()| {
            self.submit_one_time(|device, command_buffer| {
                let range = vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                let to_transfer = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(range)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .build();
                let to_shader = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(range)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .build();
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
                    .build();

                unsafe {
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_transfer],
                    );
                    device.cmd_copy_buffer_to_image(
                        command_buffer,
                        staging,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_shader],
                    );
                }
            })
        });

        unsafe {
            self.context.device.destroy_buffer(staging, None);
            self.context.device.free_memory(memory, None);
        }
        result
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if let Some(memory) = self.images.remove(&image) {
            unsafe {
                self.context.device.destroy_image(image, None);
                self.context.device.free_memory(memory, None);
            }
        }
    }

    fn create_image_view(&mut self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: desc.base_layer,
                layer_count: desc.layer_count,
            });

        unsafe { self.context.device.create_image_view(&view_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.context.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .max_lod(0.0);

        unsafe { self.context.device.create_sampler(&sampler_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.context.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        unsafe { self.context.device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        unsafe { self.context.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(&mut self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(sizes)
            .max_sets(max_sets);

        unsafe { self.context.device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        unsafe { self.context.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);

        unsafe { self.context.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        for write in writes {
            match *write {
                DescriptorWrite::UniformBuffer { binding, buffer, range } => {
                    let info = [vk::DescriptorBufferInfo { buffer, offset: 0, range }];
                    let write = vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&info)
                        .build();
                    unsafe { self.context.device.update_descriptor_sets(&[write], &[]) };
                }
                DescriptorWrite::CombinedImageSampler { binding, view, sampler } => {
                    let info = [vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }];
                    let write = vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&info)
                        .build();
                    unsafe { self.context.device.update_descriptor_sets(&[write], &[]) };
                }
            }
        }
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let mut attachments: Vec<vk::AttachmentDescription> =
            desc.color_attachments.iter().map(Self::attachment_description).collect();

        let color_refs: Vec<vk::AttachmentReference> = (0..desc.color_attachments.len() as u32)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
            attachments.push(Self::attachment_description(depth));
            vk::AttachmentReference {
                attachment: color_refs.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass.build()];

        let stages = vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::TRANSFER;
        let access = vk::AccessFlags::SHADER_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags::TRANSFER_READ
            | vk::AccessFlags::TRANSFER_WRITE;
        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(stages)
                .dst_stage_mask(stages)
                .src_access_mask(access)
                .dst_access_mask(access)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(stages)
                .dst_stage_mask(stages)
                .src_access_mask(access)
                .dst_access_mask(access)
                .build(),
        ];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { self.context.device.create_render_pass(&render_pass_info, None) }
            .map_err(VulkanError::Api)?;
        log::debug!("Created render pass '{}'", desc.label);
        Ok(render_pass)
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        unsafe { self.context.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer> {
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(desc.render_pass)
            .attachments(&desc.attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);

        unsafe { self.context.device.create_framebuffer(&framebuffer_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.context.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let module_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.context.device.create_shader_module(&module_info, None) }.map_err(|e| {
            log::error!("[SHADER] vkCreateShaderModule failed: {e:?}");
            VulkanError::Api(e)
        })
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        unsafe { self.context.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> VulkanResult<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&desc.set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);

        unsafe { self.context.device.create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        unsafe { self.context.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&mut self, create: &GraphicsPipelineCreate<'_>) -> VulkanResult<vk::Pipeline> {
        let descriptor = create.descriptor;
        let entry = CStr::from_bytes_with_nul(SHADER_ENTRY)
            .map_err(|e| VulkanError::InvalidOperation { reason: e.to_string() })?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(create.vertex_module)
                .name(entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(create.fragment_module)
                .name(entry)
                .build(),
        ];

        let bindings: Vec<vk::VertexInputBindingDescription> =
            descriptor.vertex_layouts.iter().map(VertexLayout::binding_description).collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> =
            descriptor.vertex_layouts.iter().flat_map(VertexLayout::attribute_descriptions).collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(descriptor.topology)
            .primitive_restart_enable(false);

        let (viewports, scissors) = match descriptor.viewport {
            ViewportMode::Static(extent) => (
                vec![vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
                vec![vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent }],
            ),
            ViewportMode::Dynamic => (Vec::new(), Vec::new()),
        };
        let viewport_state = if viewports.is_empty() {
            vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1)
        } else {
            vk::PipelineViewportStateCreateInfo::builder().viewports(&viewports).scissors(&scissors)
        };

        let raster = &descriptor.rasterization;
        let bias = raster.depth_bias;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(raster.polygon_mode)
            .line_width(raster.line_width)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(bias.is_some())
            .depth_bias_constant_factor(bias.map_or(0.0, |b| b.constant))
            .depth_bias_slope_factor(bias.map_or(0.0, |b| b.slope));

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = &descriptor.depth_stencil;
        let stencil = depth.stencil.map_or_else(vk::StencilOpState::default, |s| vk::StencilOpState {
            fail_op: s.fail_op,
            pass_op: s.pass_op,
            depth_fail_op: s.depth_fail_op,
            compare_op: s.compare_op,
            compare_mask: s.compare_mask,
            write_mask: s.write_mask,
            reference: s.reference,
        });
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth.depth_test)
            .depth_write_enable(depth.depth_write)
            .depth_compare_op(depth.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(depth.stencil.is_some())
            .front(stencil)
            .back(stencil);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = descriptor
            .color_blend
            .iter()
            .map(|attachment| {
                let equation = attachment.blend;
                vk::PipelineColorBlendAttachmentState {
                    blend_enable: vk::Bool32::from(equation.is_some()),
                    src_color_blend_factor: equation.map_or(vk::BlendFactor::ONE, |e| e.src_color),
                    dst_color_blend_factor: equation.map_or(vk::BlendFactor::ZERO, |e| e.dst_color),
                    color_blend_op: equation.map_or(vk::BlendOp::ADD, |e| e.color_op),
                    src_alpha_blend_factor: equation.map_or(vk::BlendFactor::ONE, |e| e.src_alpha),
                    dst_alpha_blend_factor: equation.map_or(vk::BlendFactor::ZERO, |e| e.dst_alpha),
                    alpha_blend_op: equation.map_or(vk::BlendOp::ADD, |e| e.alpha_op),
                    color_write_mask: attachment.write_mask,
                }
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = descriptor.all_dynamic_states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(create.layout)
            .render_pass(create.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.context
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation { reason: "no pipeline returned".to_string() })
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.context.device.destroy_pipeline(pipeline, None) };
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        unsafe { self.context.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device.device_wait_idle();
            for (buffer, allocation) in self.buffers.drain() {
                self.context.device.destroy_buffer(buffer, None);
                self.context.device.free_memory(allocation.memory, None);
            }
            for (image, memory) in self.images.drain() {
                self.context.device.destroy_image(image, None);
                self.context.device.free_memory(memory, None);
            }
        }
    }
}
