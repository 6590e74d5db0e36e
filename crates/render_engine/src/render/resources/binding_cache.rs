//! # Per-Object Binding Cache
//!
//! Associates GPU binding state with scene objects (materials, geometries,
//! lights) without owning them. Each entry holds a descriptor pool sized for
//! the frames in flight, the uniform buffer(s) with the object's latest
//! property snapshot, and one descriptor set per frame.
//!
//! ## Lifecycle
//!
//! ```text
//! bind(key, frame) ──► entry missing? ──► allocate pool + uniforms + sets, write bindings
//!     │                                                  │
//!     └──────────────► update uniform of frame ◄─────────┘
//!                           │
//!                           ▼
//!          frame's image bindings changed? ──► rewrite set[frame] only
//!                           │
//!                           ▼
//!                  bind set[frame] at slot
//! ```
//!
//! Entries are keyed by generational scene keys, so a removed object can never
//! alias a newer one allocated in the same slot. Entries are released by
//! [`FrameResourceCache::forget`] when the scene reports a removal, or all at
//! once when the owning pass is torn down.
//!
//! A set is only ever written while recording its own frame, so a set still
//! read by an in-flight frame is never touched.
//!
//! [`UniformMode::Shared`] gives every frame's set the same uniform buffer,
//! which holds for data that does not change between frames in flight
//! (material properties, model transforms). [`UniformMode::PerFrame`] gives
//! each set its own buffer, for data that follows the camera.

use ash::vk;
use bytemuck::Pod;
use slotmap::{Key, SecondaryMap};

use crate::render::gpu::{CommandSink, DescriptorWrite, GpuDevice};
use crate::render::resources::{DescriptorLayout, UniformBuffer};
use crate::render::{RenderError, RenderResult};

/// Binding of the per-object uniform in every cached set
pub const OBJECT_UNIFORM_BINDING: u32 = 0;

/// How the uniform of an entry is replicated across frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformMode {
    /// One buffer referenced by every frame's set
    Shared,
    /// One buffer per frame in flight
    PerFrame,
}

#[derive(Debug)]
struct CacheEntry<U: Pod> {
    pool: vk::DescriptorPool,
    uniforms: Vec<UniformBuffer<U>>,
    sets: Vec<vk::DescriptorSet>,
    images: Vec<Vec<DescriptorWrite>>,
}

impl<U: Pod> CacheEntry<U> {
    fn uniform(&self, frame: usize) -> &UniformBuffer<U> {
        &self.uniforms[frame % self.uniforms.len()]
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        for uniform in &self.uniforms {
            uniform.destroy(device);
        }
        device.destroy_descriptor_pool(self.pool);
    }
}

/// Lazily created descriptor sets and uniforms per scene object
#[derive(Debug)]
pub struct FrameResourceCache<K: Key, U: Pod> {
    label: &'static str,
    layout: DescriptorLayout,
    frames: usize,
    mode: UniformMode,
    entries: SecondaryMap<K, CacheEntry<U>>,
}

impl<K: Key, U: Pod> FrameResourceCache<K, U> {
    /// Create an empty cache sharing one uniform per entry; `layout` is owned
    /// and destroyed with the cache
    pub fn new(label: &'static str, layout: DescriptorLayout, frames: usize) -> Self {
        Self::with_mode(label, layout, frames, UniformMode::Shared)
    }

    /// Create an empty cache with the given uniform replication
    pub fn with_mode(label: &'static str, layout: DescriptorLayout, frames: usize, mode: UniformMode) -> Self {
        Self { label, layout, frames, mode, entries: SecondaryMap::new() }
    }

    /// Set layout every entry is allocated with
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Uniform replication of the entries
    pub fn mode(&self) -> UniformMode {
        self.mode
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` has an entry
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(key)
    }

    /// Descriptor set of `key` for `frame`, if the entry exists
    pub fn descriptor_set(&self, key: K, frame: usize) -> Option<vk::DescriptorSet> {
        self.entries.get(key).map(|entry| entry.sets[frame % entry.sets.len()])
    }

    /// Uniform buffer `frame`'s set of `key` references, if the entry exists
    pub fn uniform_buffer(&self, key: K, frame: usize) -> Option<vk::Buffer> {
        self.entries.get(key).map(|entry| entry.uniform(frame).handle())
    }

    /// Bind the descriptor set of `key` for `frame` at `set_index`
    ///
    /// Creates the entry on first use, writes `value` into the uniform of
    /// `frame` every call, and rewrites the image bindings of `frame`'s set
    /// when `images` differs from what that set currently references.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceExhausted`] when the descriptor pool or
    /// the uniform buffer cannot be allocated.
    pub fn bind(
        &mut self,
        device: &mut dyn GpuDevice,
        cmd: &mut dyn CommandSink,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        frame: usize,
        key: K,
        value: &U,
        images: &[DescriptorWrite],
    ) -> RenderResult<vk::DescriptorSet> {
        let set = self.prepare(device, frame, key, value, images)?;
        cmd.bind_descriptor_set(pipeline_layout, set_index, set);
        Ok(set)
    }

    /// Everything [`Self::bind`] does except recording the bind
    pub fn prepare(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        key: K,
        value: &U,
        images: &[DescriptorWrite],
    ) -> RenderResult<vk::DescriptorSet> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.uniform(frame).update(device, value)?;
            let index = frame % entry.sets.len();
            if entry.images[index] != images {
                device.update_descriptor_set(entry.sets[index], images);
                entry.images[index] = images.to_vec();
                log::trace!("Rewrote image bindings of {:?} for frame {index} in '{}'", key, self.label);
            }
            return Ok(entry.sets[index]);
        }

        let entry = self.create_entry(device, value, images)?;
        let set = entry.sets[frame % entry.sets.len()];
        if self.entries.insert(key, entry).is_some() {
            log::warn!("Replaced live binding entry for {:?} in '{}'", key, self.label);
        }

        if let Some(entry) = self.entries.get(key) {
            log::debug!(
                "Created binding entry for {:?} in '{}' ({} sets, {} uniforms)",
                key,
                self.label,
                entry.sets.len(),
                entry.uniforms.len()
            );
            Ok(set)
        } else {
            Err(RenderError::MissingResource(format!("stale key {key:?} in '{}'", self.label)))
        }
    }

    fn create_entry(
        &self,
        device: &mut dyn GpuDevice,
        value: &U,
        images: &[DescriptorWrite],
    ) -> RenderResult<CacheEntry<U>> {
        let (pool, sets) = self
            .layout
            .allocate(device, self.frames as u32)
            .map_err(|e| RenderError::allocation(format!("{} descriptor sets", self.label), e))?;

        let uniform_count = match self.mode {
            UniformMode::Shared => 1,
            UniformMode::PerFrame => sets.len(),
        };
        let mut uniforms = Vec::with_capacity(uniform_count);
        for _ in 0..uniform_count {
            match UniformBuffer::new(device, self.label, value) {
                Ok(uniform) => uniforms.push(uniform),
                Err(e) => {
                    for uniform in &uniforms {
                        uniform.destroy(device);
                    }
                    device.destroy_descriptor_pool(pool);
                    return Err(RenderError::allocation(format!("{} uniform buffer", self.label), e));
                }
            }
        }

        // Sets of other frames are not in flight yet, so they start out with the same images.
        for (index, &set) in sets.iter().enumerate() {
            let mut writes = Vec::with_capacity(images.len() + 1);
            writes.push(uniforms[index % uniforms.len()].descriptor_write(OBJECT_UNIFORM_BINDING));
            writes.extend_from_slice(images);
            device.update_descriptor_set(set, &writes);
        }

        let images = vec![images.to_vec(); sets.len()];
        Ok(CacheEntry { pool, uniforms, sets, images })
    }

    /// Release the entry of a removed object
    pub fn forget(&mut self, device: &mut dyn GpuDevice, key: K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.destroy(device);
                log::debug!("Evicted binding entry for {:?} from '{}'", key, self.label);
                true
            }
            None => false,
        }
    }

    /// Release every entry, keeping the layout
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, entry) in self.entries.drain() {
            entry.destroy(device);
        }
    }

    /// Release every entry and the layout
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.clear(device);
        self.layout.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{HeadlessDevice, ObjectKind, RecordingSink};
    use crate::render::resources::DescriptorSetLayoutBuilder;
    use crate::scene::MaterialKey;
    use slotmap::SlotMap;

    fn cache(device: &mut HeadlessDevice, frames: usize) -> FrameResourceCache<MaterialKey, [f32; 4]> {
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build(device)
            .unwrap();
        FrameResourceCache::new("materials", layout, frames)
    }

    fn contents(device: &HeadlessDevice, buffer: vk::Buffer) -> Vec<u8> {
        device.buffer_contents(buffer).unwrap().to_vec()
    }

    #[test]
    fn test_bind_is_idempotent_and_updates_uniform() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let layout = vk::PipelineLayout::null();

        let first = cache.bind(&mut device, &mut cmd, layout, 1, 0, key, &[1.0, 0.0, 0.0, 1.0], &[]).unwrap();
        let buffer = cache.uniform_buffer(key, 0).unwrap();
        assert_eq!(contents(&device, buffer), bytemuck::bytes_of(&[1.0f32, 0.0, 0.0, 1.0]));

        let second = cache.bind(&mut device, &mut cmd, layout, 1, 0, key, &[0.0, 1.0, 0.0, 1.0], &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(contents(&device, buffer), bytemuck::bytes_of(&[0.0f32, 1.0, 0.0, 1.0]));

        assert_eq!(cache.len(), 1);
        assert_eq!(device.live_count(ObjectKind::DescriptorPool), 1);
        assert_eq!(device.live_count(ObjectKind::DescriptorSet), 2);
        assert_eq!(cmd.bound_sets(1), vec![first, first]);
    }

    #[test]
    fn test_frames_get_distinct_sets_sharing_one_uniform() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 3);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let layout = vk::PipelineLayout::null();

        let sets: Vec<_> = (0..3)
            .map(|frame| cache.bind(&mut device, &mut cmd, layout, 1, frame, key, &[0.5; 4], &[]).unwrap())
            .collect();
        assert_ne!(sets[0], sets[1]);
        assert_ne!(sets[1], sets[2]);

        let buffer = cache.uniform_buffer(key, 0).unwrap();
        assert_eq!(cache.uniform_buffer(key, 2), Some(buffer));
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);
        for set in sets {
            let writes = device.descriptor_writes(set).unwrap();
            assert!(matches!(
                writes.get(&OBJECT_UNIFORM_BINDING),
                Some(DescriptorWrite::UniformBuffer { buffer: b, .. }) if *b == buffer
            ));
        }
    }

    fn image(raw: u64) -> DescriptorWrite {
        use ash::vk::Handle;
        DescriptorWrite::CombinedImageSampler {
            binding: 1,
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::from_raw(raw),
        }
    }

    #[test]
    fn test_changed_images_rewrite_only_that_frame() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let layout = vk::PipelineLayout::null();

        cache.bind(&mut device, &mut cmd, layout, 1, 0, key, &[0.0; 4], &[image(100)]).unwrap();
        cache.bind(&mut device, &mut cmd, layout, 1, 0, key, &[0.0; 4], &[image(200)]).unwrap();

        let set = |frame| cache.descriptor_set(key, frame).unwrap();
        assert_eq!(device.descriptor_writes(set(0)).unwrap().get(&1), Some(&image(200)));
        assert_eq!(device.descriptor_writes(set(1)).unwrap().get(&1), Some(&image(100)));
    }

    #[test]
    fn test_next_frame_images_leave_the_in_flight_set_alone() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let layout = vk::PipelineLayout::null();

        // Each frame samples its own image, as a shadow-casting light does.
        for _ in 0..2 {
            for frame in 0..2 {
                cache.bind(&mut device, &mut cmd, layout, 1, frame, key, &[0.0; 4], &[image(100 + frame as u64)]).unwrap();
            }
        }

        for frame in 0..2 {
            let set = cache.descriptor_set(key, frame).unwrap();
            assert_eq!(device.descriptor_writes(set).unwrap().get(&1), Some(&image(100 + frame as u64)));
        }
    }

    #[test]
    fn test_per_frame_uniforms_keep_earlier_frames_intact() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(&mut device)
            .unwrap();
        let mut cache: FrameResourceCache<MaterialKey, [f32; 4]> =
            FrameResourceCache::with_mode("lights", layout, 2, UniformMode::PerFrame);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let pipeline_layout = vk::PipelineLayout::null();

        let set0 = cache.bind(&mut device, &mut cmd, pipeline_layout, 1, 0, key, &[1.0; 4], &[]).unwrap();
        let set1 = cache.bind(&mut device, &mut cmd, pipeline_layout, 1, 1, key, &[2.0; 4], &[]).unwrap();

        let (buffer0, buffer1) = (cache.uniform_buffer(key, 0).unwrap(), cache.uniform_buffer(key, 1).unwrap());
        assert_ne!(buffer0, buffer1);
        assert_eq!(device.live_count(ObjectKind::Buffer), 2);
        assert_eq!(contents(&device, buffer0), bytemuck::bytes_of(&[1.0f32; 4]));
        assert_eq!(contents(&device, buffer1), bytemuck::bytes_of(&[2.0f32; 4]));

        for (set, buffer) in [(set0, buffer0), (set1, buffer1)] {
            assert!(matches!(
                device.descriptor_writes(set).unwrap().get(&OBJECT_UNIFORM_BINDING),
                Some(DescriptorWrite::UniformBuffer { buffer: b, .. }) if *b == buffer
            ));
        }

        cache.destroy(&mut device);
        assert_eq!(device.total_live(), 0);
    }

    #[test]
    fn test_forget_evicts_and_new_key_never_aliases() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let layout = vk::PipelineLayout::null();

        let old = keys.insert(());
        let old_set = cache.bind(&mut device, &mut cmd, layout, 1, 0, old, &[0.0; 4], &[]).unwrap();
        keys.remove(old);
        assert!(cache.forget(&mut device, old));
        assert!(!cache.forget(&mut device, old));
        assert_eq!(device.live_count(ObjectKind::DescriptorPool), 0);
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);

        let new = keys.insert(());
        let new_set = cache.bind(&mut device, &mut cmd, layout, 1, 0, new, &[0.0; 4], &[]).unwrap();
        assert_ne!(old_set, new_set);
        assert!(cache.descriptor_set(old, 0).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        let key = keys.insert(());

        device.set_descriptor_pool_exhaustion(true);
        let result = cache.bind(&mut device, &mut cmd, vk::PipelineLayout::null(), 1, 0, key, &[0.0; 4], &[]);

        assert!(matches!(result, Err(RenderError::ResourceExhausted { .. })));
        assert!(cache.is_empty());
        assert_eq!(device.live_count(ObjectKind::DescriptorPool), 0);
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = HeadlessDevice::new();
        let mut cmd = RecordingSink::new();
        let mut cache = cache(&mut device, 2);
        let mut keys: SlotMap<MaterialKey, ()> = SlotMap::with_key();
        for _ in 0..4 {
            let key = keys.insert(());
            cache.bind(&mut device, &mut cmd, vk::PipelineLayout::null(), 1, 0, key, &[0.0; 4], &[]).unwrap();
        }

        cache.destroy(&mut device);
        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_destroys(), 0);
    }
}
