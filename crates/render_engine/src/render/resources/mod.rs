//! GPU resources shared by the passes
//!
//! Descriptor layouts and pools, typed uniform buffers, framebuffer
//! attachments, the per-pass descriptor objects and the per-object caches
//! (bindings, meshes, textures).

pub mod descriptor_set;
pub mod uniform_buffer;
pub mod attachment;
pub mod pass_objects;
pub mod binding_cache;
pub mod mesh_cache;
pub mod texture_cache;

pub use descriptor_set::{DescriptorSetLayoutBuilder, DescriptorLayout};
pub use uniform_buffer::UniformBuffer;
pub use attachment::{AttachmentSpec, FramebufferAttachment, PassTarget};
pub use pass_objects::{RenderPassObjects, PASS_UNIFORM_BINDING};
pub use binding_cache::{FrameResourceCache, UniformMode, OBJECT_UNIFORM_BINDING};
pub use mesh_cache::{GpuMesh, MeshCache};
pub use texture_cache::TextureCache;
