//! Primitives (vertex + optional index data)
//!
//! All primitives share one fixed vertex layout (position, normal, texture
//! coordinate), so every mesh pipeline uses the same vertex input state.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::constants::PI;

/// Mesh vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, normal, tex_coord }
    }
}

/// Drawable vertex data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Primitive {
    /// Debug name
    pub name: String,
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Optional triangle-list indices
    pub indices: Option<Vec<u32>>,
}

impl Primitive {
    /// Create a primitive from vertices and optional indices
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Option<Vec<u32>>) -> Self {
        Self { name: name.into(), vertices, indices }
    }

    /// Number of elements a draw consumes (indices if present, else vertices)
    pub fn element_count(&self) -> u32 {
        self.indices
            .as_ref()
            .map_or(self.vertices.len(), Vec::len) as u32
    }

    /// Whether drawing this primitive would produce nothing
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.element_count() == 0
    }

    /// Indexed UV sphere of the given radius
    pub fn uv_sphere(name: impl Into<String>, radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);

        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let phi = v * PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let theta = u * 2.0 * PI;
                let normal = [phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin()];
                vertices.push(Vertex::new(
                    [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                    normal,
                    [u, v],
                ));
            }
        }

        let stride = segments + 1;
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }

        Self::new(name, vertices, Some(indices))
    }

    /// Non-indexed axis-aligned cube centred on the origin
    pub fn cube(name: impl Into<String>, half_extent: f32) -> Self {
        let h = half_extent;
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(36);
        for (normal, tangent, bitangent) in faces {
            let corner = |s: f32, t: f32| {
                let position = [
                    (normal[0] + tangent[0] * s + bitangent[0] * t) * h,
                    (normal[1] + tangent[1] * s + bitangent[1] * t) * h,
                    (normal[2] + tangent[2] * s + bitangent[2] * t) * h,
                ];
                Vertex::new(position, normal, [(s + 1.0) * 0.5, (1.0 - t) * 0.5])
            };
            let quad = [corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0)];
            vertices.extend_from_slice(&[quad[0], quad[1], quad[2], quad[0], quad[2], quad[3]]);
        }

        Self::new(name, vertices, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn test_uv_sphere_indices_in_range() {
        let sphere = Primitive::uv_sphere("sphere", 1.0, 16, 8);
        let vertex_count = sphere.vertices.len() as u32;
        let indices = sphere.indices.as_ref().unwrap();
        assert_eq!(indices.len(), 16 * 8 * 6);
        assert!(indices.iter().all(|&i| i < vertex_count));
        for vertex in &sphere.vertices {
            let p = vertex.position;
            let length = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!((length - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_element_count_prefers_indices() {
        let cube = Primitive::cube("cube", 0.5);
        assert_eq!(cube.element_count(), 36);
        assert!(!cube.is_empty());
        assert!(Primitive::new("empty", Vec::new(), Some(vec![0, 1, 2])).is_empty());
    }
}
