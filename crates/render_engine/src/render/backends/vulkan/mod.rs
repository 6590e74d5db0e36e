//! Vulkan backend
//!
//! Implements [`crate::render::gpu::GpuDevice`] and
//! [`crate::render::gpu::CommandSink`] on top of `ash`. Surface and
//! swapchain management stay with the embedding application, which hands
//! each frame's presentable image to the renderer as a
//! [`crate::render::PresentTarget`].

pub mod context;
pub mod device;
pub mod commands;
pub mod sync;

pub use context::{VulkanContext, VulkanError, VulkanResult};
pub use device::VulkanDevice;
pub use commands::VulkanCommandRecorder;
pub use sync::FrameSync;
