//! Descriptor set layouts and pool sizing
//!
//! Layouts are built once per pass (or per binding cache) and must outlive
//! every pipeline built against them.

use ash::vk;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{DescriptorBinding, GpuDevice};

/// Descriptor set layout builder
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            stages,
        });
        self
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stages,
        });
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &mut dyn GpuDevice) -> VulkanResult<DescriptorLayout> {
        let handle = device.create_descriptor_set_layout(&self.bindings)?;
        Ok(DescriptorLayout { handle, bindings: self.bindings })
    }
}

/// Descriptor set layout with the bindings it was built from
#[derive(Debug, Clone)]
pub struct DescriptorLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorLayout {
    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Bindings of the layout
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Pool sizes for `set_count` sets of this layout
    pub fn pool_sizes(&self, set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += set_count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: set_count,
                }),
            }
        }
        sizes
    }

    /// Create a pool holding exactly `set_count` sets and allocate them
    pub fn allocate(
        &self,
        device: &mut dyn GpuDevice,
        set_count: u32,
    ) -> VulkanResult<(vk::DescriptorPool, Vec<vk::DescriptorSet>)> {
        let pool = device.create_descriptor_pool(set_count, &self.pool_sizes(set_count))?;
        let layouts = vec![self.handle; set_count as usize];
        match device.allocate_descriptor_sets(pool, &layouts) {
            Ok(sets) => Ok((pool, sets)),
            Err(e) => {
                device.destroy_descriptor_pool(pool);
                Err(e)
            }
        }
    }

    /// Destroy the layout
    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_descriptor_set_layout(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{HeadlessDevice, ObjectKind};

    #[test]
    fn test_pool_sizes_group_by_type() {
        let mut device = HeadlessDevice::new();
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT)
            .build(&mut device)
            .unwrap();

        let sizes = layout.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        let samplers = sizes.iter().find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER).unwrap();
        assert_eq!(samplers.descriptor_count, 6);
    }

    #[test]
    fn test_failed_allocation_releases_pool() {
        let mut device = HeadlessDevice::new();
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&mut device)
            .unwrap();

        device.set_descriptor_pool_exhaustion(true);
        assert!(layout.allocate(&mut device, 2).is_err());
        assert_eq!(device.live_count(ObjectKind::DescriptorPool), 0);
    }
}
