//! # Render Passes
//!
//! Every pass follows the same state machine:
//!
//! ```text
//!   new ──► init ──► render ──► render ──► ... ──► clear
//!             ▲                                      │
//!             └──────────── resize ◄─────────────────┘
//! ```
//!
//! `init` creates the pass's attachments, render pass, framebuffers,
//! descriptor objects and fixed pipelines. `clear` destroys all of them
//! (including lazily created per-object bindings and pipeline variants).
//! Rendering an uninitialized pass is [`RenderError::PassNotInitialized`].
//!
//! Passes composite onto each other by loading the previous pass's colour
//! and the G-buffer depth instead of clearing them.

pub mod gbuffer;
pub mod lighting;
pub mod skybox;
pub mod unlit;
pub mod debug;
pub mod outline;
pub mod blit;
pub mod overlay;

use ash::vk;

pub use gbuffer::{GBufferPass, GBufferTargets};
pub use lighting::LocalLightingPass;
pub use skybox::SkyboxPass;
pub use unlit::UnlitPass;
pub use debug::{DebugVertex, SceneDebugPass};
pub use outline::SelectionOutlinePass;
pub use blit::BlitPass;
pub use overlay::{OverlayDrawCommand, OverlayDrawData, OverlayPass, OverlayVertex};

use crate::core::config::RendererConfig;
use crate::render::gpu::{AttachmentDesc, ClearValue, GpuDevice, RenderPassDesc};
use crate::render::pipeline::{GraphicsPipelineFactory, ShaderLibrary};
use crate::render::resources::{FramebufferAttachment, PassTarget};
use crate::render::{RenderError, RenderResult, VulkanResult};
use crate::scene::{Camera, Scene, SceneRenderState};

/// Lifecycle shared by every pass
pub trait RenderPass {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Whether `init` ran and `clear` has not
    fn is_initialized(&self) -> bool;

    /// Destroy every GPU object the pass owns
    fn clear(&mut self, device: &mut dyn GpuDevice);
}

/// Services passes create GPU objects through
pub struct PassContext<'a> {
    /// GPU device
    pub device: &'a mut dyn GpuDevice,
    /// SPIR-V modules
    pub shaders: &'a mut ShaderLibrary,
    /// Pipeline factory
    pub factory: &'a mut GraphicsPipelineFactory,
    /// Renderer configuration
    pub config: &'a RendererConfig,
    /// Frames in flight
    pub frames: usize,
}

/// Per-frame inputs every pass reads
#[derive(Clone, Copy)]
pub struct FrameInputs<'a> {
    /// Frame-in-flight index
    pub frame: usize,
    /// Window-sized render extent
    pub extent: vk::Extent2D,
    /// Scene arenas
    pub scene: &'a Scene,
    /// This frame's snapshot
    pub state: &'a SceneRenderState,
    /// Viewing camera
    pub camera: &'a Camera,
}

/// The lit colour and the G-buffer depth that every compositing pass loads
#[derive(Clone, Copy)]
pub struct CompositeTargets<'a> {
    /// Accumulated lighting output
    pub lit: &'a FramebufferAttachment,
    /// G-buffer depth/stencil
    pub depth: &'a FramebufferAttachment,
}

impl CompositeTargets<'_> {
    /// Lit colour + depth views of every frame, in attachment order
    pub fn frame_attachments(&self) -> Vec<Vec<vk::ImageView>> {
        self.lit.views().iter().zip(self.depth.views()).map(|(&lit, &depth)| vec![lit, depth]).collect()
    }
}

/// Render pass loading the lit colour and the G-buffer depth
///
/// The colour enters in `COLOR_ATTACHMENT_OPTIMAL` and leaves in
/// `color_final`.
pub(crate) fn composite_target(
    device: &mut dyn GpuDevice,
    label: &'static str,
    targets: &CompositeTargets<'_>,
    color_final: vk::ImageLayout,
    depth: AttachmentDesc,
) -> VulkanResult<PassTarget> {
    let desc = RenderPassDesc {
        label,
        color_attachments: vec![AttachmentDesc::color_load(
            targets.lit.format(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            color_final,
        )],
        depth_attachment: Some(depth),
    };
    PassTarget::new(device, &desc, &targets.frame_attachments(), targets.lit.extent())
}

/// Clear values of a compositing pass (both attachments are loaded)
pub(crate) const COMPOSITE_CLEARS: [ClearValue; 2] = [ClearValue::Color([0.0; 4]), ClearValue::FAR_DEPTH];

/// Error for rendering a pass before `init`
pub(crate) fn not_initialized(name: &'static str) -> RenderError {
    log::error!("Render pass '{name}' used before init");
    RenderError::PassNotInitialized(name)
}

/// Result of taking a pass's initialized state
pub(crate) fn require<'a, T>(state: &'a mut Option<T>, name: &'static str) -> RenderResult<&'a mut T> {
    state.as_mut().ok_or_else(|| not_initialized(name))
}
