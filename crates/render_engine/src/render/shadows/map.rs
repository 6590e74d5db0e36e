//! # Shadow Maps and Registry
//!
//! A [`ShadowMap`] is the persistent, sampled side of a light's shadow: one
//! layered image per frame in flight plus, per frame, the light-space
//! matrices that were used to fill that frame's image. The [`ShadowMapRegistry`] owns one map per shadow-casting
//! light and a 1x1 fallback per light type. Lights that do not cast shadows
//! (or whose map is not live this frame) are bound to the fallback, so the
//! lighting shaders never branch on whether a map exists.
//!
//! Images start out `UNDEFINED`. The first time a frame's image is used it
//! is cleared to "fully lit" and left in `SHADER_READ_ONLY_OPTIMAL`, the
//! layout every later copy starts from and ends in.

use ash::vk;
use slotmap::SecondaryMap;

use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{ClearValue, CommandSink, DescriptorWrite, GpuDevice, ImageDesc, ImageLayers, ImageViewDesc, SamplerDesc};
use crate::render::{RenderError, RenderResult};
use crate::scene::{LightKey, LightType};

use super::CASCADE_COUNT;

/// Format of directional and spot shadow maps
pub const SHADOW_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Format of point light distance cubes
pub const SHADOW_DISTANCE_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

/// Per-light shadow map
#[derive(Debug)]
pub struct ShadowMap {
    light_type: LightType,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    initialized: Vec<bool>,
    transforms: Vec<FrameTransforms>,
}

#[derive(Debug, Clone)]
struct FrameTransforms {
    light_space: Vec<Mat4>,
    split_depths: [f32; CASCADE_COUNT],
}

impl ShadowMap {
    /// Create `frames` layered images for a light of `light_type`
    pub fn new(device: &mut dyn GpuDevice, light_type: LightType, resolution: u32, frames: usize) -> VulkanResult<Self> {
        let layer_count = light_type.shadow_layer_count();
        let mut map = Self {
            light_type,
            extent: vk::Extent2D { width: resolution, height: resolution },
            images: Vec::with_capacity(frames),
            views: Vec::with_capacity(frames),
            initialized: vec![false; frames],
            transforms: vec![
                FrameTransforms {
                    light_space: vec![Mat4::identity(); layer_count as usize],
                    split_depths: [0.0; CASCADE_COUNT],
                };
                frames.max(1)
            ],
        };

        for _ in 0..frames {
            if let Err(e) = map.push_frame(device) {
                map.destroy(device);
                return Err(e);
            }
        }
        Ok(map)
    }

    fn push_frame(&mut self, device: &mut dyn GpuDevice) -> VulkanResult<()> {
        let format = self.format();
        let image = device.create_image(&ImageDesc {
            label: "shadow map",
            extent: self.extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            array_layers: self.layer_count(),
            cube_compatible: self.light_type == LightType::Point,
        })?;
        self.images.push(image);

        let view_type = match self.light_type {
            LightType::Directional => vk::ImageViewType::TYPE_2D_ARRAY,
            LightType::Point => vk::ImageViewType::CUBE,
            LightType::Spot => vk::ImageViewType::TYPE_2D,
        };
        let view = device.create_image_view(&ImageViewDesc {
            image,
            view_type,
            format,
            aspect: self.aspect(),
            base_layer: 0,
            layer_count: self.layer_count(),
        })?;
        self.views.push(view);
        Ok(())
    }

    /// Light type the map was created for
    pub fn light_type(&self) -> LightType {
        self.light_type
    }

    /// Number of layers (cascades, cube faces or 1)
    pub fn layer_count(&self) -> u32 {
        self.light_type.shadow_layer_count()
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        match self.light_type {
            LightType::Point => SHADOW_DISTANCE_FORMAT,
            LightType::Directional | LightType::Spot => SHADOW_DEPTH_FORMAT,
        }
    }

    /// Aspect copied and sampled
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        match self.light_type {
            LightType::Point => vk::ImageAspectFlags::COLOR,
            LightType::Directional | LightType::Spot => vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Extent of every layer
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Image of `frame`
    pub fn image(&self, frame: usize) -> vk::Image {
        self.images[frame % self.images.len()]
    }

    /// Sampled view of `frame`
    pub fn view(&self, frame: usize) -> vk::ImageView {
        self.views[frame % self.views.len()]
    }

    /// Light-space matrix of each layer, as rendered into `frame`'s image
    pub fn light_space(&self, frame: usize) -> &[Mat4] {
        &self.transforms[frame % self.transforms.len()].light_space
    }

    /// Cascade far bounds in view space used for `frame` (directional maps only)
    pub fn split_depths(&self, frame: usize) -> [f32; CASCADE_COUNT] {
        self.transforms[frame % self.transforms.len()].split_depths
    }

    /// Record the matrices and cascade bounds `frame`'s image is rendered with
    pub fn set_transforms(&mut self, frame: usize, light_space: &[Mat4], split_depths: [f32; CASCADE_COUNT]) {
        let index = frame % self.transforms.len();
        let record = &mut self.transforms[index];
        record.light_space.clear();
        record.light_space.extend_from_slice(light_space);
        record.split_depths = split_depths;
    }

    /// Whether `frame`'s image has left `UNDEFINED`
    pub fn is_initialized(&self, frame: usize) -> bool {
        self.initialized[frame % self.initialized.len()]
    }

    /// Clear `frame`'s image to "nothing occludes" on first use
    pub fn ensure_initialized(&mut self, cmd: &mut dyn CommandSink, frame: usize) {
        let index = frame % self.initialized.len();
        if self.initialized[index] {
            return;
        }

        let value = match self.light_type {
            LightType::Point => ClearValue::Color([1.0; 4]),
            LightType::Directional | LightType::Spot => ClearValue::FAR_DEPTH,
        };
        cmd.clear_image(
            ImageLayers { image: self.images[index], aspect: self.aspect(), base_layer: 0, layer_count: self.layer_count() },
            value,
        );
        self.initialized[index] = true;
    }

    /// Destroy every image and view
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
    }
}

/// Shadow map a light's descriptor set should reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowBinding {
    /// Sampled view
    pub view: vk::ImageView,
    /// Sampler
    pub sampler: vk::Sampler,
    /// Whether this is the light's own map rather than the fallback
    pub live: bool,
}

impl ShadowBinding {
    /// Descriptor write at `binding`
    pub fn write(&self, binding: u32) -> DescriptorWrite {
        DescriptorWrite::CombinedImageSampler { binding, view: self.view, sampler: self.sampler }
    }
}

/// Light to shadow map registry
#[derive(Debug)]
pub struct ShadowMapRegistry {
    resolution: u32,
    frames: usize,
    sampler: vk::Sampler,
    maps: SecondaryMap<LightKey, ShadowMap>,
    fallbacks: Vec<ShadowMap>,
}

impl ShadowMapRegistry {
    /// Create the sampler and one 1x1 fallback per light type
    pub fn new(device: &mut dyn GpuDevice, resolution: u32, frames: usize) -> RenderResult<Self> {
        let sampler = device.create_sampler(&SamplerDesc::NEAREST_CLAMP)?;
        let mut registry = Self { resolution, frames, sampler, maps: SecondaryMap::new(), fallbacks: Vec::new() };

        for light_type in LightType::ALL {
            match ShadowMap::new(device, light_type, 1, 1) {
                Ok(map) => registry.fallbacks.push(map),
                Err(e) => {
                    registry.destroy(device);
                    return Err(RenderError::allocation("fallback shadow map", e));
                }
            }
        }

        log::debug!("Created shadow map registry ({resolution}px, {frames} frames)");
        Ok(registry)
    }

    /// Resolution of per-light maps
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of per-light maps
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether no light has a map
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Map of `light`, if it has one
    pub fn get(&self, light: LightKey) -> Option<&ShadowMap> {
        self.maps.get(light)
    }

    /// Fallback map of a light type
    pub fn fallback(&self, light_type: LightType) -> &ShadowMap {
        let index = LightType::ALL.iter().position(|&t| t == light_type).unwrap_or(0);
        &self.fallbacks[index]
    }

    /// Map of `light`, created on first use or when the light changed type
    pub fn get_or_create(&mut self, device: &mut dyn GpuDevice, light: LightKey, light_type: LightType) -> RenderResult<&mut ShadowMap> {
        let stale = self.maps.get(light).is_some_and(|map| map.light_type() != light_type);
        if stale {
            self.forget(device, light);
        }

        if !self.maps.contains_key(light) {
            let map = ShadowMap::new(device, light_type, self.resolution, self.frames)
                .map_err(|e| RenderError::allocation("shadow map", e))?;
            log::debug!("Created {light_type:?} shadow map for {light:?}");
            if let Some(mut replaced) = self.maps.insert(light, map) {
                replaced.destroy(device);
            }
        }

        self.maps
            .get_mut(light)
            .ok_or_else(|| RenderError::MissingResource(format!("shadow map of stale light {light:?}")))
    }

    /// Shadow map binding of `light` for `frame`
    ///
    /// The light's own map is used when `casts` is set and the map exists
    /// with a matching type; otherwise the fallback of `light_type`.
    pub fn binding(&self, light: LightKey, light_type: LightType, casts: bool, frame: usize) -> ShadowBinding {
        match self.maps.get(light) {
            Some(map) if casts && map.light_type() == light_type && map.is_initialized(frame) => {
                ShadowBinding { view: map.view(frame), sampler: self.sampler, live: true }
            }
            _ => ShadowBinding { view: self.fallback(light_type).view(0), sampler: self.sampler, live: false },
        }
    }

    /// Clear the fallback maps once, before anything samples them
    pub fn initialize_fallbacks(&mut self, cmd: &mut dyn CommandSink) {
        for fallback in &mut self.fallbacks {
            fallback.ensure_initialized(cmd, 0);
        }
    }

    /// Release the map of a removed light
    pub fn forget(&mut self, device: &mut dyn GpuDevice, light: LightKey) {
        if let Some(mut map) = self.maps.remove(light) {
            map.destroy(device);
            log::debug!("Released shadow map of {light:?}");
        }
    }

    /// Release every map, the fallbacks and the sampler
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for (_, mut map) in self.maps.drain() {
            map.destroy(device);
        }
        for mut fallback in self.fallbacks.drain(..) {
            fallback.destroy(device);
        }
        device.destroy_sampler(self.sampler);
    }
}
