//! Headless backend
//!
//! Implements the GPU seam without a GPU: handles are minted from a
//! monotonically increasing counter (never reused), live objects are tracked
//! by kind, buffer contents and descriptor writes are kept for inspection,
//! and commands are recorded into a list.
//!
//! Descriptor pools enforce their `max_sets` capacity, and pool exhaustion
//! can be forced to exercise allocation failure paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ash::vk::{self, Handle};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::gpu::{
    BufferDesc, ClearValue, CommandSink, DescriptorBinding, DescriptorWrite, FramebufferDesc, GpuDevice,
    GraphicsPipelineCreate, ImageDesc, ImageLayers, ImageViewDesc, PipelineLayoutDesc, RenderPassDesc, SamplerDesc,
};
use crate::render::pipeline::PipelineDescriptor;

/// Kind of a tracked GPU object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// Buffer
    Buffer,
    /// Image
    Image,
    /// Image view
    ImageView,
    /// Sampler
    Sampler,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor pool
    DescriptorPool,
    /// Descriptor set
    DescriptorSet,
    /// Render pass
    RenderPass,
    /// Framebuffer
    Framebuffer,
    /// Shader module
    ShaderModule,
    /// Pipeline layout
    PipelineLayout,
    /// Pipeline
    Pipeline,
}

#[derive(Debug, Default)]
struct PoolState {
    max_sets: u32,
    sets: Vec<u64>,
}

/// GPU device that records instead of executing
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: u64,
    live: BTreeMap<ObjectKind, BTreeSet<u64>>,
    created: BTreeMap<ObjectKind, usize>,
    buffers: HashMap<u64, Vec<u8>>,
    images: HashMap<u64, ImageDesc>,
    pools: HashMap<u64, PoolState>,
    set_writes: HashMap<u64, BTreeMap<u32, DescriptorWrite>>,
    pipelines: HashMap<u64, PipelineDescriptor>,
    invalid_destroys: usize,
    wait_idle_calls: usize,
    exhaust_descriptor_pools: bool,
}

impl HeadlessDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    fn mint<H: Handle>(&mut self, kind: ObjectKind) -> H {
        self.next_handle += 1;
        self.live.entry(kind).or_default().insert(self.next_handle);
        *self.created.entry(kind).or_default() += 1;
        H::from_raw(self.next_handle)
    }

    fn release<H: Handle>(&mut self, kind: ObjectKind, handle: H) -> bool {
        let raw = handle.as_raw();
        if raw == 0 {
            return false;
        }
        let removed = self.live.get_mut(&kind).is_some_and(|set| set.remove(&raw));
        if !removed {
            log::warn!("Headless: destroying unknown {kind:?} {raw:#x}");
            self.invalid_destroys += 1;
        }
        removed
    }

    /// Force every descriptor set allocation to fail with `ERROR_OUT_OF_POOL_MEMORY`
    pub fn set_descriptor_pool_exhaustion(&mut self, exhausted: bool) {
        self.exhaust_descriptor_pools = exhausted;
    }

    /// Number of live objects of `kind`
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.live.get(&kind).map_or(0, BTreeSet::len)
    }

    /// Raw handles of live objects of `kind`
    pub fn live_handles(&self, kind: ObjectKind) -> BTreeSet<u64> {
        self.live.get(&kind).cloned().unwrap_or_default()
    }

    /// Total objects of `kind` ever created
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    /// Number of live objects across all kinds
    pub fn total_live(&self) -> usize {
        self.live.values().map(BTreeSet::len).sum()
    }

    /// Destroy calls on handles that were not live
    pub fn invalid_destroys(&self) -> usize {
        self.invalid_destroys
    }

    /// Number of `wait_idle` calls
    pub fn wait_idle_calls(&self) -> usize {
        self.wait_idle_calls
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        self.buffers.get(&buffer.as_raw()).map(Vec::as_slice)
    }

    /// Creation parameters of an image
    pub fn image_desc(&self, image: vk::Image) -> Option<&ImageDesc> {
        self.images.get(&image.as_raw())
    }

    /// Latest write per binding of a descriptor set
    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Option<&BTreeMap<u32, DescriptorWrite>> {
        self.set_writes.get(&set.as_raw())
    }

    /// Descriptor a pipeline was created from
    pub fn pipeline_descriptor(&self, pipeline: vk::Pipeline) -> Option<&PipelineDescriptor> {
        self.pipelines.get(&pipeline.as_raw())
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> VulkanResult<vk::Buffer> {
        if desc.size == 0 {
            return Err(VulkanError::InvalidOperation { reason: format!("zero-sized buffer '{}'", desc.label) });
        }
        let buffer: vk::Buffer = self.mint(ObjectKind::Buffer);
        self.buffers.insert(buffer.as_raw(), vec![0; desc.size as usize]);
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let contents = self
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or_else(|| VulkanError::InvalidOperation { reason: format!("write to unknown buffer {buffer:?}") })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {start} overflows buffer of {}", data.len(), contents.len()),
            });
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if self.release(ObjectKind::Buffer, buffer) {
            self.buffers.remove(&buffer.as_raw());
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let image: vk::Image = self.mint(ObjectKind::Image);
        self.images.insert(image.as_raw(), *desc);
        Ok(image)
    }

    fn upload_image(&mut self, image: vk::Image, extent: vk::Extent2D, texels: &[u8]) -> VulkanResult<()> {
        let expected = (extent.width * extent.height * 4) as usize;
        if !self.images.contains_key(&image.as_raw()) || texels.len() != expected {
            return Err(VulkanError::InvalidOperation { reason: format!("invalid upload into {image:?}") });
        }
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if self.release(ObjectKind::Image, image) {
            self.images.remove(&image.as_raw());
        }
    }

    fn create_image_view(&mut self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        if !self.images.contains_key(&desc.image.as_raw()) {
            return Err(VulkanError::InvalidOperation { reason: format!("view of unknown image {:?}", desc.image) });
        }
        Ok(self.mint(ObjectKind::ImageView))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.release(ObjectKind::ImageView, view);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        Ok(self.mint(ObjectKind::Sampler))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.release(ObjectKind::Sampler, sampler);
    }

    fn create_descriptor_set_layout(&mut self, _bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(self.mint(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.release(ObjectKind::DescriptorSetLayout, layout);
    }

    fn create_descriptor_pool(&mut self, max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.mint(ObjectKind::DescriptorPool);
        self.pools.insert(pool.as_raw(), PoolState { max_sets, sets: Vec::new() });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        if self.release(ObjectKind::DescriptorPool, pool) {
            if let Some(state) = self.pools.remove(&pool.as_raw()) {
                for set in state.sets {
                    self.release(ObjectKind::DescriptorSet, vk::DescriptorSet::from_raw(set));
                    self.set_writes.remove(&set);
                }
            }
        }
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        if self.exhaust_descriptor_pools {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let state = self
            .pools
            .get(&pool.as_raw())
            .ok_or_else(|| VulkanError::InvalidOperation { reason: format!("allocation from unknown pool {pool:?}") })?;
        if state.sets.len() + layouts.len() > state.max_sets as usize {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let sets: Vec<vk::DescriptorSet> = layouts.iter().map(|_| self.mint(ObjectKind::DescriptorSet)).collect();
        if let Some(state) = self.pools.get_mut(&pool.as_raw()) {
            state.sets.extend(sets.iter().map(|set| set.as_raw()));
        }
        Ok(sets)
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let bindings = self.set_writes.entry(set.as_raw()).or_default();
        for write in writes {
            bindings.insert(write.binding(), *write);
        }
    }

    fn create_render_pass(&mut self, _desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        Ok(self.mint(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.release(ObjectKind::RenderPass, render_pass);
    }

    fn create_framebuffer(&mut self, _desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer> {
        Ok(self.mint(ObjectKind::Framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.release(ObjectKind::Framebuffer, framebuffer);
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(VulkanError::InvalidOperation { reason: "empty SPIR-V".to_string() });
        }
        Ok(self.mint(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.release(ObjectKind::ShaderModule, module);
    }

    fn create_pipeline_layout(&mut self, _desc: &PipelineLayoutDesc) -> VulkanResult<vk::PipelineLayout> {
        Ok(self.mint(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.release(ObjectKind::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(&mut self, create: &GraphicsPipelineCreate<'_>) -> VulkanResult<vk::Pipeline> {
        let pipeline: vk::Pipeline = self.mint(ObjectKind::Pipeline);
        self.pipelines.insert(pipeline.as_raw(), create.descriptor.clone());
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        if self.release(ObjectKind::Pipeline, pipeline) {
            self.pipelines.remove(&pipeline.as_raw());
        }
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        self.wait_idle_calls += 1;
        Ok(())
    }
}

/// One recorded command
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    /// Render pass begin
    BeginRenderPass {
        /// Render pass
        render_pass: vk::RenderPass,
        /// Framebuffer
        framebuffer: vk::Framebuffer,
        /// Render area
        extent: vk::Extent2D,
        /// Clear values
        clear_values: Vec<ClearValue>,
    },
    /// Render pass end
    EndRenderPass,
    /// Pipeline bind
    BindPipeline(vk::Pipeline),
    /// Descriptor set bind
    BindDescriptorSet {
        /// Pipeline layout
        layout: vk::PipelineLayout,
        /// Set index
        set_index: u32,
        /// Bound set
        set: vk::DescriptorSet,
    },
    /// Push constant upload
    PushConstants {
        /// Pipeline layout
        layout: vk::PipelineLayout,
        /// Byte offset
        offset: u32,
        /// Bytes
        data: Vec<u8>,
    },
    /// Vertex buffer bind
    BindVertexBuffer(vk::Buffer),
    /// Index buffer bind
    BindIndexBuffer(vk::Buffer),
    /// Viewport
    SetViewport(vk::Extent2D),
    /// Scissor as `(x, y, width, height)`
    SetScissor(i32, i32, u32, u32),
    /// Non-indexed draw
    Draw {
        /// Vertex count
        vertex_count: u32,
        /// Instance count
        instance_count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Index count
        index_count: u32,
        /// First index
        first_index: u32,
        /// Instance count
        instance_count: u32,
    },
    /// Attachment copied into an image layer
    CopyToLayer {
        /// Source attachment image
        source: vk::Image,
        /// Destination image
        destination: vk::Image,
        /// Destination layer
        layer: u32,
    },
    /// Image layers cleared
    ClearImage {
        /// Cleared layers
        layers: ImageLayers,
        /// Clear value
        value: ClearValue,
    },
}

/// Command sink that records into a list
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Vec<RecordedCommand>,
    open_render_pass: bool,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded commands
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Forget recorded commands
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// Number of draw calls (indexed or not)
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
            .count()
    }

    /// Render passes begun, in order
    pub fn render_passes(&self) -> Vec<vk::RenderPass> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BeginRenderPass { render_pass, .. } => Some(*render_pass),
                _ => None,
            })
            .collect()
    }

    /// Descriptor sets bound at `set_index`, in order
    pub fn bound_sets(&self, set_index: u32) -> Vec<vk::DescriptorSet> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BindDescriptorSet { set_index: index, set, .. } if *index == set_index => Some(*set),
                _ => None,
            })
            .collect()
    }

    /// Whether every begun render pass was ended
    pub fn is_balanced(&self) -> bool {
        !self.open_render_pass
    }
}

impl CommandSink for RecordingSink {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    ) {
        self.open_render_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values: clear_values.to_vec(),
        });
    }

    fn end_render_pass(&mut self) {
        self.open_render_pass = false;
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        self.commands.push(RecordedCommand::BindDescriptorSet { layout, set_index, set });
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, _stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.commands.push(RecordedCommand::PushConstants { layout, offset, data: data.to_vec() });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(RecordedCommand::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(RecordedCommand::BindIndexBuffer(buffer));
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        self.commands.push(RecordedCommand::SetViewport(extent));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.commands.push(RecordedCommand::SetScissor(
            scissor.offset.x,
            scissor.offset.y,
            scissor.extent.width,
            scissor.extent.height,
        ));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(RecordedCommand::Draw { vertex_count, instance_count });
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, _vertex_offset: i32, instance_count: u32) {
        self.commands.push(RecordedCommand::DrawIndexed { index_count, first_index, instance_count });
    }

    fn copy_to_layer(&mut self, source: vk::Image, _aspect: vk::ImageAspectFlags, destination: vk::Image, layer: u32, _extent: vk::Extent2D) {
        self.commands.push(RecordedCommand::CopyToLayer { source, destination, layer });
    }

    fn clear_image(&mut self, layers: ImageLayers, value: ClearValue) {
        self.commands.push(RecordedCommand::ClearImage { layers, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_never_reused() {
        let mut device = HeadlessDevice::new();
        let desc = BufferDesc { label: "test", size: 16, usage: vk::BufferUsageFlags::UNIFORM_BUFFER };
        let first = device.create_buffer(&desc).unwrap();
        device.destroy_buffer(first);
        let second = device.create_buffer(&desc).unwrap();

        assert_ne!(first, second);
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);
        assert_eq!(device.created_count(ObjectKind::Buffer), 2);
    }

    #[test]
    fn test_pool_capacity_and_implicit_free() {
        let mut device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(2, &[]).unwrap();

        assert_eq!(device.allocate_descriptor_sets(pool, &[layout, layout]).unwrap().len(), 2);
        let overflow = device.allocate_descriptor_sets(pool, &[layout]).unwrap_err();
        assert!(overflow.is_exhaustion());

        device.destroy_descriptor_pool(pool);
        assert_eq!(device.live_count(ObjectKind::DescriptorSet), 0);
        assert_eq!(device.invalid_destroys(), 0);
    }

    #[test]
    fn test_double_destroy_is_counted() {
        let mut device = HeadlessDevice::new();
        let sampler = device.create_sampler(&SamplerDesc::LINEAR_CLAMP).unwrap();
        device.destroy_sampler(sampler);
        device.destroy_sampler(sampler);
        assert_eq!(device.invalid_destroys(), 1);
    }

    #[test]
    fn test_buffer_writes_are_kept() {
        let mut device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc { label: "test", size: 8, usage: vk::BufferUsageFlags::UNIFORM_BUFFER })
            .unwrap();
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_buffer(buffer, 6, &[0; 4]).is_err());
    }
}
