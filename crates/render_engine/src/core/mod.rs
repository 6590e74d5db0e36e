//! # Core Configuration
//!
//! Renderer-wide settings shared by every pass. Loaded through the
//! [`crate::config::Config`] trait and validated before the renderer is built.

pub mod config;

pub use config::{
    RendererConfig, ShadowSettings, OutlineSettings, SkyboxSettings, DebugSettings,
};
