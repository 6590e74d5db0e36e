//! # GPU Backend Seam
//!
//! The render core talks to the GPU exclusively through two traits:
//!
//! - [`GpuDevice`] creates, writes and destroys GPU objects.
//! - [`CommandSink`] records the commands of one frame.
//!
//! Both are expressed in `ash::vk` handle and enum types so the Vulkan
//! backend is a thin translation, while the headless backend can mint
//! handles and record commands for tests and tools that run without a GPU.
//!
//! Objects are destroyed explicitly. Destroying a descriptor pool implicitly
//! frees every descriptor set allocated from it, as in Vulkan.

use ash::vk;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::pipeline::PipelineDescriptor;

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label
    pub label: &'static str,
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// Usage flags
    pub usage: vk::BufferUsageFlags,
}

/// Image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Debug label
    pub label: &'static str,
    /// Extent of every layer
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Number of array layers
    pub array_layers: u32,
    /// Whether the image may be viewed as a cube
    pub cube_compatible: bool,
}

impl ImageDesc {
    /// Single-layer 2D image
    pub fn texture_2d(label: &'static str, extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self { label, extent, format, usage, array_layers: 1, cube_compatible: false }
    }
}

/// Image view creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewDesc {
    /// Viewed image
    pub image: vk::Image,
    /// View type
    pub view_type: vk::ImageViewType,
    /// View format
    pub format: vk::Format,
    /// Aspect
    pub aspect: vk::ImageAspectFlags,
    /// First layer
    pub base_layer: u32,
    /// Number of layers
    pub layer_count: u32,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    /// Minification and magnification filter
    pub filter: vk::Filter,
    /// Address mode on all axes
    pub address_mode: vk::SamplerAddressMode,
}

impl SamplerDesc {
    /// Linear filtering, repeat addressing
    pub const LINEAR_REPEAT: Self = Self { filter: vk::Filter::LINEAR, address_mode: vk::SamplerAddressMode::REPEAT };
    /// Nearest filtering, clamped to edge
    pub const NEAREST_CLAMP: Self = Self { filter: vk::Filter::NEAREST, address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE };
    /// Linear filtering, clamped to edge
    pub const LINEAR_CLAMP: Self = Self { filter: vk::Filter::LINEAR, address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE };
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Shader stages that read the binding
    pub stages: vk::ShaderStageFlags,
}

/// A descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform buffer range
    UniformBuffer {
        /// Binding index
        binding: u32,
        /// Buffer
        buffer: vk::Buffer,
        /// Range in bytes from offset 0
        range: vk::DeviceSize,
    },
    /// Combined image sampler in `SHADER_READ_ONLY_OPTIMAL`
    CombinedImageSampler {
        /// Binding index
        binding: u32,
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
    },
}

impl DescriptorWrite {
    /// Binding index the write targets
    pub fn binding(&self) -> u32 {
        match *self {
            Self::UniformBuffer { binding, .. } | Self::CombinedImageSampler { binding, .. } => binding,
        }
    }
}

/// Attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Format
    pub format: vk::Format,
    /// Load op for colour/depth
    pub load_op: vk::AttachmentLoadOp,
    /// Store op for colour/depth
    pub store_op: vk::AttachmentStoreOp,
    /// Load op for stencil
    pub stencil_load_op: vk::AttachmentLoadOp,
    /// Store op for stencil
    pub stencil_store_op: vk::AttachmentStoreOp,
    /// Layout the attachment is in when the pass begins
    pub initial_layout: vk::ImageLayout,
    /// Layout the attachment is left in
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Colour attachment cleared at the start of the pass
    pub fn color_clear(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// Colour attachment composited onto (loaded, not cleared)
    pub fn color_load(format: vk::Format, initial_layout: vk::ImageLayout, final_layout: vk::ImageLayout) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            initial_layout,
            ..Self::color_clear(format, final_layout)
        }
    }

    /// Depth/stencil attachment cleared at the start of the pass
    pub fn depth_clear(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// Depth/stencil attachment loaded from a previous pass
    pub fn depth_load(format: vk::Format) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::LOAD,
            stencil_store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

/// Single-subpass render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Debug label
    pub label: &'static str,
    /// Colour attachments, in location order
    pub color_attachments: Vec<AttachmentDesc>,
    /// Optional depth/stencil attachment, placed after the colour attachments
    pub depth_attachment: Option<AttachmentDesc>,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: vk::RenderPass,
    /// Attachments in render pass order
    pub attachments: Vec<vk::ImageView>,
    /// Extent
    pub extent: vk::Extent2D,
}

/// Pipeline layout creation parameters
#[derive(Debug, Clone)]
pub struct PipelineLayoutDesc {
    /// Descriptor set layouts by set index
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

/// Everything needed to turn a [`PipelineDescriptor`] into a pipeline object
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineCreate<'a> {
    /// Fixed-function state and shader program
    pub descriptor: &'a PipelineDescriptor,
    /// Vertex shader module
    pub vertex_module: vk::ShaderModule,
    /// Fragment shader module
    pub fragment_module: vk::ShaderModule,
    /// Pipeline layout built from the descriptor's set layouts
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is used in
    pub render_pass: vk::RenderPass,
}

/// Clear value for render pass attachments and image clears
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Colour clear
    Color([f32; 4]),
    /// Depth/stencil clear
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

impl ClearValue {
    /// Depth 1.0, stencil 0
    pub const FAR_DEPTH: Self = Self::DepthStencil { depth: 1.0, stencil: 0 };

    /// Convert into the Vulkan union
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// Range of layers of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayers {
    /// Image
    pub image: vk::Image,
    /// Aspect
    pub aspect: vk::ImageAspectFlags,
    /// First layer
    pub base_layer: u32,
    /// Number of layers
    pub layer_count: u32,
}

/// GPU object creation and destruction
pub trait GpuDevice {
    /// Create a host-visible buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> VulkanResult<vk::Buffer>;
    /// Copy `data` into the buffer at `offset`
    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;
    /// Destroy a buffer and its memory
    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    /// Create an image
    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<vk::Image>;
    /// Upload tightly packed texels into layer 0 and leave it shader-readable
    fn upload_image(&mut self, image: vk::Image, extent: vk::Extent2D, texels: &[u8]) -> VulkanResult<()>;
    /// Destroy an image and its memory
    fn destroy_image(&mut self, image: vk::Image);
    /// Create an image view
    fn create_image_view(&mut self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&mut self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);
    /// Create a descriptor pool
    fn create_descriptor_pool(&mut self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool, freeing its sets
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);
    /// Allocate one set per layout from `pool`
    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;
    /// Write bindings of a descriptor set
    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    /// Create a render pass
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    /// Create a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);
    /// Create a pipeline layout
    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(&mut self, create: &GraphicsPipelineCreate<'_>) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> VulkanResult<()>;
}

/// Command recording for one frame
pub trait CommandSink {
    /// Begin a render pass over the whole framebuffer
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    );
    /// End the current render pass
    fn end_render_pass(&mut self);
    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    /// Bind a descriptor set at `set_index`
    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet);
    /// Upload push constants
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);
    /// Bind a vertex buffer at binding 0
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    /// Bind a `u32` index buffer
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);
    /// Set a full-extent viewport
    fn set_viewport(&mut self, extent: vk::Extent2D);
    /// Set the scissor rectangle
    fn set_scissor(&mut self, scissor: vk::Rect2D);
    /// Non-indexed draw
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    /// Indexed draw
    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32, instance_count: u32);
    /// Copy a rendered attachment (left in `TRANSFER_SRC_OPTIMAL`) into one
    /// layer of a shader-readable image, which is shader-readable again after
    fn copy_to_layer(&mut self, source: vk::Image, aspect: vk::ImageAspectFlags, destination: vk::Image, layer: u32, extent: vk::Extent2D);
    /// Transition layers from `UNDEFINED`, clear them and leave them shader-readable
    fn clear_image(&mut self, layers: ImageLayers, value: ClearValue);
}
