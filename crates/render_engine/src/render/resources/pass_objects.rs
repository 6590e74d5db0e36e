//! Per-pass descriptor objects
//!
//! Every pass owns one descriptor set layout, one pool sized for the frames
//! in flight, one uniform buffer per frame and one descriptor set per frame.
//! All of it is created in the pass's `init` and destroyed in its `clear`.

use ash::vk;
use bytemuck::Pod;

use crate::render::gpu::{CommandSink, DescriptorWrite, GpuDevice};
use crate::render::resources::{DescriptorLayout, UniformBuffer};
use crate::render::{RenderError, RenderResult};

/// Binding of the pass uniform inside the pass set
pub const PASS_UNIFORM_BINDING: u32 = 0;

/// Layout, pool, uniforms and sets of one pass
#[derive(Debug)]
pub struct RenderPassObjects<T: Pod> {
    label: &'static str,
    layout: DescriptorLayout,
    pool: vk::DescriptorPool,
    uniforms: Vec<UniformBuffer<T>>,
    sets: Vec<vk::DescriptorSet>,
}

impl<T: Pod> RenderPassObjects<T> {
    /// Allocate `frames` sets of `layout` and point binding 0 at each frame's uniform
    ///
    /// Takes ownership of `layout`; it is destroyed together with the pool.
    pub fn new(
        device: &mut dyn GpuDevice,
        label: &'static str,
        layout: DescriptorLayout,
        frames: usize,
        initial: &T,
    ) -> RenderResult<Self> {
        let (pool, sets) = match layout.allocate(device, frames as u32) {
            Ok(allocation) => allocation,
            Err(e) => {
                layout.destroy(device);
                return Err(RenderError::allocation(format!("{label} descriptor sets"), e));
            }
        };

        let mut objects = Self { label, layout, pool, uniforms: Vec::with_capacity(frames), sets };
        for set in objects.sets.clone() {
            match UniformBuffer::new(device, label, initial) {
                Ok(uniform) => {
                    device.update_descriptor_set(set, &[uniform.descriptor_write(PASS_UNIFORM_BINDING)]);
                    objects.uniforms.push(uniform);
                }
                Err(e) => {
                    objects.destroy(device);
                    return Err(RenderError::allocation(format!("{label} uniform buffer"), e));
                }
            }
        }

        log::debug!("Created pass objects for '{label}' ({frames} frames)");
        Ok(objects)
    }

    /// Write `value` into the uniform of `frame`
    pub fn update(&self, device: &mut dyn GpuDevice, frame: usize, value: &T) -> RenderResult<()> {
        let uniform = &self.uniforms[frame % self.uniforms.len()];
        uniform.update(device, value)?;
        Ok(())
    }

    /// Write extra bindings (usually attachment samplers) into the set of `frame`
    pub fn write(&self, device: &mut dyn GpuDevice, frame: usize, writes: &[DescriptorWrite]) {
        device.update_descriptor_set(self.set(frame), writes);
    }

    /// Bind the set of `frame` at `set_index`
    pub fn bind(&self, cmd: &mut dyn CommandSink, pipeline_layout: vk::PipelineLayout, set_index: u32, frame: usize) {
        cmd.bind_descriptor_set(pipeline_layout, set_index, self.set(frame));
    }

    /// Descriptor set of `frame`
    pub fn set(&self, frame: usize) -> vk::DescriptorSet {
        self.sets[frame % self.sets.len()]
    }

    /// Set layout handle
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Destroy uniforms, pool (and with it the sets) and layout
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for uniform in self.uniforms.drain(..) {
            uniform.destroy(device);
        }
        device.destroy_descriptor_pool(self.pool);
        self.sets.clear();
        self.layout.destroy(device);
        log::debug!("Destroyed pass objects for '{}'", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{HeadlessDevice, ObjectKind};
    use crate::render::resources::DescriptorSetLayoutBuilder;

    fn layout(device: &mut HeadlessDevice) -> DescriptorLayout {
        DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(PASS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .build(device)
            .unwrap()
    }

    #[test]
    fn test_one_set_and_uniform_per_frame() {
        let mut device = HeadlessDevice::new();
        let layout = layout(&mut device);
        let objects = RenderPassObjects::new(&mut device, "test", layout, 3, &[1.0f32; 4]).unwrap();

        assert_eq!(device.live_count(ObjectKind::DescriptorSet), 3);
        assert_eq!(device.live_count(ObjectKind::Buffer), 3);
        assert_ne!(objects.set(0), objects.set(1));
        assert_eq!(objects.set(3), objects.set(0));
    }

    #[test]
    fn test_update_touches_only_its_frame() {
        let mut device = HeadlessDevice::new();
        let layout = layout(&mut device);
        let objects = RenderPassObjects::new(&mut device, "test", layout, 2, &[0.0f32; 4]).unwrap();

        objects.update(&mut device, 1, &[2.0f32; 4]).unwrap();

        let frame0 = device.buffer_contents(objects.uniforms[0].handle()).unwrap();
        let frame1 = device.buffer_contents(objects.uniforms[1].handle()).unwrap();
        assert_eq!(frame0, bytemuck::bytes_of(&[0.0f32; 4]));
        assert_eq!(frame1, bytemuck::bytes_of(&[2.0f32; 4]));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = HeadlessDevice::new();
        let layout = layout(&mut device);
        let mut objects = RenderPassObjects::new(&mut device, "test", layout, 2, &[0.0f32; 4]).unwrap();
        objects.destroy(&mut device);

        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_destroys(), 0);
    }
}
