//! Graphics pipelines
//!
//! Descriptors, vertex layouts, SPIR-V loading and the pipeline factory.

pub mod descriptor;
pub mod vertex_layout;
pub mod shader_library;
pub mod factory;

pub use descriptor::{
    BlendEquation, ColorBlendAttachment, DepthBias, DepthStencilState, PipelineDescriptor,
    RasterizationState, ShaderProgram, StencilState, ViewportMode, compare,
};
pub use vertex_layout::{VertexAttribute, VertexLayout};
pub use shader_library::{ShaderLibrary, names};
pub use factory::{GraphicsPipeline, GraphicsPipelineFactory, PipelineCache};
