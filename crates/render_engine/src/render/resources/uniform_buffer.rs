//! Typed uniform buffers

use std::marker::PhantomData;

use ash::vk;
use bytemuck::Pod;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{BufferDesc, DescriptorWrite, GpuDevice};

/// Host-visible uniform buffer holding one `T`
#[derive(Debug)]
pub struct UniformBuffer<T: Pod> {
    buffer: vk::Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create the buffer and upload `value`
    pub fn new(device: &mut dyn GpuDevice, label: &'static str, value: &T) -> VulkanResult<Self> {
        let buffer = device.create_buffer(&BufferDesc {
            label,
            size: std::mem::size_of::<T>() as vk::DeviceSize,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
        })?;

        let uniform = Self { buffer, _marker: PhantomData };
        if let Err(e) = uniform.update(device, value) {
            device.destroy_buffer(buffer);
            return Err(e);
        }
        Ok(uniform)
    }

    /// Overwrite the buffer with `value`
    pub fn update(&self, device: &mut dyn GpuDevice, value: &T) -> VulkanResult<()> {
        device.write_buffer(self.buffer, 0, bytemuck::bytes_of(value))
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size of `T` in bytes
    pub fn range(&self) -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }

    /// Descriptor write binding the whole buffer
    pub fn descriptor_write(&self, binding: u32) -> DescriptorWrite {
        DescriptorWrite::UniformBuffer { binding, buffer: self.buffer, range: self.range() }
    }

    /// Destroy the buffer
    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_buffer(self.buffer);
    }
}
