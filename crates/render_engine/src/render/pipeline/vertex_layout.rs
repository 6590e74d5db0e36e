//! Vertex input layouts
//!
//! Describes how vertex data is organized in buffer memory. The mesh layout
//! matches [`crate::scene::Vertex`]; the debug-line and overlay layouts match
//! the vertex types of their passes.

use ash::vk;

use crate::scene::Vertex;

/// One vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Attribute format
    pub format: vk::Format,
    /// Byte offset inside the vertex
    pub offset: u32,
}

/// Vertex buffer binding with its attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    /// Binding index
    pub binding: u32,
    /// Byte stride between vertices
    pub stride: u32,
    /// Per-vertex or per-instance
    pub input_rate: vk::VertexInputRate,
    /// Attributes read from the binding
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Position / normal / texcoord layout of scene primitives
    pub fn mesh() -> Self {
        Self {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
            attributes: vec![
                VertexAttribute { location: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, format: vk::Format::R32G32B32_SFLOAT, offset: 12 },
                VertexAttribute { location: 2, format: vk::Format::R32G32_SFLOAT, offset: 24 },
            ],
        }
    }

    /// Position-only view of the mesh layout for depth-only pipelines
    pub fn mesh_positions() -> Self {
        let mut layout = Self::mesh();
        layout.attributes.truncate(1);
        layout
    }

    /// Position + RGBA colour, 28 bytes
    pub fn debug_line() -> Self {
        Self {
            binding: 0,
            stride: 28,
            input_rate: vk::VertexInputRate::VERTEX,
            attributes: vec![
                VertexAttribute { location: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, format: vk::Format::R32G32B32A32_SFLOAT, offset: 12 },
            ],
        }
    }

    /// Screen position + UV + packed RGBA8 colour, 20 bytes
    pub fn overlay() -> Self {
        Self {
            binding: 0,
            stride: 20,
            input_rate: vk::VertexInputRate::VERTEX,
            attributes: vec![
                VertexAttribute { location: 0, format: vk::Format::R32G32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, format: vk::Format::R32G32_SFLOAT, offset: 8 },
                VertexAttribute { location: 2, format: vk::Format::R8G8B8A8_UNORM, offset: 16 },
            ],
        }
    }

    /// Vulkan binding description
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: self.binding,
            stride: self.stride,
            input_rate: self.input_rate,
        }
    }

    /// Vulkan attribute descriptions
    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                binding: self.binding,
                location: attribute.location,
                format: attribute.format,
                offset: attribute.offset,
            })
            .collect()
    }
}
