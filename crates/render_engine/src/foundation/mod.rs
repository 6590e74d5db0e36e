//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the renderer:
//! - Math types and Vulkan-convention matrix helpers
//! - Logging utilities

pub mod math;
pub mod logging;
