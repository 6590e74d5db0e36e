//! # Deferred Render Core
//!
//! Render-pass orchestration and per-frame GPU resource binding.
//!
//! ## Frame Sequence
//!
//! ```text
//! SceneRenderState ─► GBufferPass ─► ShadowMapGenerator ─► LocalLightingPass
//!                                                                │
//!        OverlayPass ◄─ BlitPass ◄─ SelectionOutlinePass ◄─ SceneDebugPass
//!                                        ▲                       ▲
//!                                        └──── UnlitPass ◄─ SkyboxPass
//! ```
//!
//! Every pass follows the same `init → render* → clear` state machine and owns
//! its attachments, descriptor pools, descriptor sets and pipelines. A window
//! resize waits for the device to go idle, clears every pass and initializes
//! them again.
//!
//! ## Error Taxonomy
//!
//! - GPU object creation failures are returned as [`RenderError`] and abort
//!   the frame.
//! - Logical errors (missing material, empty primitive) are logged and the
//!   offending draw is skipped.
//! - Resize is not an error; see [`FrameRenderer::resize`].

pub mod gpu;
pub mod backends;
pub mod resources;
pub mod uniforms;
pub mod pipeline;
pub mod shadows;
pub mod shading;
pub mod passes;
pub mod frame;

use ash::vk;

pub use backends::vulkan::{VulkanError, VulkanResult};
pub use frame::{FrameRenderer, PresentTarget};
pub use gpu::{CommandSink, GpuDevice};

/// Render core errors
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Fatal GPU failure
    #[error(transparent)]
    Vulkan(VulkanError),

    /// Descriptor pool or device memory ran out
    #[error("GPU resources exhausted while allocating {what}: {source}")]
    ResourceExhausted {
        /// What was being allocated
        what: String,
        /// Underlying failure
        source: VulkanError,
    },

    /// Shader could not be loaded
    #[error("Failed to load shader '{name}': {reason}")]
    ShaderLoad {
        /// Shader name
        name: String,
        /// Reason
        reason: String,
    },

    /// A pass was used before `init` or after `clear`
    #[error("Render pass '{0}' is not initialized")]
    PassNotInitialized(&'static str),

    /// Configuration rejected at renderer construction
    #[error("Invalid renderer configuration: {0}")]
    InvalidConfig(String),

    /// A GPU resource another pass should have produced is missing
    #[error("Missing resource: {0}")]
    MissingResource(String),
}

impl RenderError {
    /// Wrap an allocation failure, classifying exhaustion separately
    pub fn allocation(what: impl Into<String>, error: VulkanError) -> Self {
        if error.is_exhaustion() {
            Self::ResourceExhausted { what: what.into(), source: error }
        } else {
            Self::Vulkan(error)
        }
    }
}

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        Self::allocation("GPU object", error)
    }
}

impl From<crate::config::ConfigError> for RenderError {
    fn from(error: crate::config::ConfigError) -> Self {
        Self::InvalidConfig(error.to_string())
    }
}

/// Result type for the render core
pub type RenderResult<T> = Result<T, RenderError>;

/// Format of every depth/stencil attachment the passes share
pub const DEPTH_STENCIL_FORMAT: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

/// Format of the accumulated lighting output
pub const LIT_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
