//! Scene textures on the GPU
//!
//! Textures are uploaded on first use. Material slots without a texture (or
//! with a malformed one) sample a 1x1 fallback so every material set has
//! the same bindings.

use ash::vk;
use slotmap::SecondaryMap;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{DescriptorWrite, GpuDevice, ImageDesc, ImageViewDesc, SamplerDesc};
use crate::render::{RenderError, RenderResult};
use crate::scene::{MaterialTextures, Scene, Texture, TextureKey};

/// Texels of the fallback for missing normal maps, +Z in tangent space
const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

#[derive(Debug, Clone, Copy)]
struct GpuTexture {
    image: vk::Image,
    view: vk::ImageView,
}

impl GpuTexture {
    fn upload(device: &mut dyn GpuDevice, texture: &Texture) -> VulkanResult<Self> {
        let format = if texture.srgb { vk::Format::R8G8B8A8_SRGB } else { vk::Format::R8G8B8A8_UNORM };
        let extent = vk::Extent2D { width: texture.width, height: texture.height };
        let image = device.create_image(&ImageDesc::texture_2d(
            "texture",
            extent,
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        ))?;

        let view = device.upload_image(image, extent, &texture.pixels).and_then(|()| {
            device.create_image_view(&ImageViewDesc {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                aspect: vk::ImageAspectFlags::COLOR,
                base_layer: 0,
                layer_count: 1,
            })
        });

        match view {
            Ok(view) => Ok(Self { image, view }),
            Err(e) => {
                device.destroy_image(image);
                Err(e)
            }
        }
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
    }
}

/// Lazily uploaded textures plus fallbacks
#[derive(Debug)]
pub struct TextureCache {
    sampler: vk::Sampler,
    white: GpuTexture,
    flat_normal: GpuTexture,
    textures: SecondaryMap<TextureKey, GpuTexture>,
}

impl TextureCache {
    /// Create the sampler and fallback textures
    pub fn new(device: &mut dyn GpuDevice) -> RenderResult<Self> {
        let sampler = device.create_sampler(&SamplerDesc::LINEAR_REPEAT)?;
        let white = match GpuTexture::upload(device, &Texture::solid([255; 4], false)) {
            Ok(texture) => texture,
            Err(e) => {
                device.destroy_sampler(sampler);
                return Err(RenderError::allocation("fallback texture", e));
            }
        };
        let flat_normal = match GpuTexture::upload(device, &Texture::solid(FLAT_NORMAL, false)) {
            Ok(texture) => texture,
            Err(e) => {
                white.destroy(device);
                device.destroy_sampler(sampler);
                return Err(RenderError::allocation("fallback normal map", e));
            }
        };

        Ok(Self { sampler, white, flat_normal, textures: SecondaryMap::new() })
    }

    /// Shared sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// View of the white fallback
    pub fn white_view(&self) -> vk::ImageView {
        self.white.view
    }

    /// Number of uploaded scene textures
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no scene texture is uploaded
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// View of texture `key`, uploading it on first use
    ///
    /// Returns `Ok(None)` when the key is dangling or the texels do not
    /// match the declared extent.
    pub fn get_or_upload(&mut self, device: &mut dyn GpuDevice, scene: &Scene, key: TextureKey) -> RenderResult<Option<vk::ImageView>> {
        if let Some(texture) = self.textures.get(key) {
            return Ok(Some(texture.view));
        }

        let Some(texture) = scene.texture(key) else {
            log::warn!("Texture {key:?} no longer exists, using fallback");
            return Ok(None);
        };
        if !texture.is_well_formed() {
            log::warn!("Texture {key:?} is malformed ({}x{}, {} bytes), using fallback", texture.width, texture.height, texture.pixels.len());
            return Ok(None);
        }

        let uploaded = GpuTexture::upload(device, texture).map_err(|e| RenderError::allocation("texture", e))?;
        self.textures.insert(key, uploaded);
        log::debug!("Uploaded texture {key:?} ({}x{})", texture.width, texture.height);
        Ok(Some(uploaded.view))
    }

    /// Combined image sampler writes for albedo, normal and metallic/roughness
    /// at `first_binding`, `first_binding + 1` and `first_binding + 2`
    pub fn material_writes(
        &mut self,
        device: &mut dyn GpuDevice,
        scene: &Scene,
        textures: &MaterialTextures,
        first_binding: u32,
    ) -> RenderResult<[DescriptorWrite; 3]> {
        let slots = [
            (textures.albedo, self.white.view),
            (textures.normal, self.flat_normal.view),
            (textures.metallic_roughness, self.white.view),
        ];

        let mut views = [vk::ImageView::null(); 3];
        for (view, (key, fallback)) in views.iter_mut().zip(slots) {
            *view = match key {
                Some(key) => self.get_or_upload(device, scene, key)?.unwrap_or(fallback),
                None => fallback,
            };
        }

        let sampler = self.sampler;
        Ok([0u32, 1, 2].map(|offset| DescriptorWrite::CombinedImageSampler {
            binding: first_binding + offset,
            view: views[offset as usize],
            sampler,
        }))
    }

    /// Release the upload of a removed texture
    pub fn forget(&mut self, device: &mut dyn GpuDevice, key: TextureKey) {
        if let Some(texture) = self.textures.remove(key) {
            texture.destroy(device);
        }
    }

    /// Release every texture, the fallbacks and the sampler
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for (_, texture) in self.textures.drain() {
            texture.destroy(device);
        }
        self.white.destroy(device);
        self.flat_normal.destroy(device);
        device.destroy_sampler(self.sampler);
    }
}
