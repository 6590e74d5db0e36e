//! GPU backends
//!
//! - [`vulkan`]: the `ash` implementation of the GPU seam
//! - [`headless`]: a recording implementation for tests and tooling

pub mod vulkan;
pub mod headless;

pub use headless::{HeadlessDevice, RecordedCommand, RecordingSink, ObjectKind};
