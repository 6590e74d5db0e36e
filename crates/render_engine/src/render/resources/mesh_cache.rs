//! Primitive vertex and index buffers on the GPU

use ash::vk;
use slotmap::SecondaryMap;

use crate::render::backends::vulkan::VulkanResult;
use crate::render::gpu::{BufferDesc, CommandSink, GpuDevice};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Primitive, PrimitiveKey};

/// Uploaded primitive
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    vertex_buffer: vk::Buffer,
    index_buffer: Option<vk::Buffer>,
    element_count: u32,
}

impl GpuMesh {
    /// Upload the vertices and (optional) indices of `primitive`
    ///
    /// The caller must reject empty primitives first.
    pub fn upload(device: &mut dyn GpuDevice, primitive: &Primitive) -> VulkanResult<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&primitive.vertices);
        let vertex_buffer = device.create_buffer(&BufferDesc {
            label: "mesh vertices",
            size: vertex_bytes.len() as vk::DeviceSize,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
        })?;
        if let Err(e) = device.write_buffer(vertex_buffer, 0, vertex_bytes) {
            device.destroy_buffer(vertex_buffer);
            return Err(e);
        }

        let index_buffer = match &primitive.indices {
            Some(indices) => {
                let index_bytes: &[u8] = bytemuck::cast_slice(indices);
                let created = device
                    .create_buffer(&BufferDesc {
                        label: "mesh indices",
                        size: index_bytes.len() as vk::DeviceSize,
                        usage: vk::BufferUsageFlags::INDEX_BUFFER,
                    })
                    .and_then(|buffer| match device.write_buffer(buffer, 0, index_bytes) {
                        Ok(()) => Ok(buffer),
                        Err(e) => {
                            device.destroy_buffer(buffer);
                            Err(e)
                        }
                    });
                match created {
                    Ok(buffer) => Some(buffer),
                    Err(e) => {
                        device.destroy_buffer(vertex_buffer);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok(Self { vertex_buffer, index_buffer, element_count: primitive.element_count() })
    }

    /// Number of vertices (non-indexed) or indices (indexed) drawn
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Whether draws go through the index buffer
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    /// Bind the buffers and draw `instance_count` instances
    pub fn draw(&self, cmd: &mut dyn CommandSink, instance_count: u32) {
        cmd.bind_vertex_buffer(self.vertex_buffer);
        match self.index_buffer {
            Some(index_buffer) => {
                cmd.bind_index_buffer(index_buffer);
                cmd.draw_indexed(self.element_count, 0, 0, instance_count);
            }
            None => cmd.draw(self.element_count, instance_count),
        }
    }

    /// Destroy the buffers
    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_buffer(self.vertex_buffer);
        if let Some(index_buffer) = self.index_buffer {
            device.destroy_buffer(index_buffer);
        }
    }
}

/// Lazily uploaded meshes keyed by primitive
#[derive(Debug, Default)]
pub struct MeshCache {
    meshes: SecondaryMap<PrimitiveKey, GpuMesh>,
}

impl MeshCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The mesh of `key`, uploading `primitive` on first use
    ///
    /// Returns `Ok(None)` for primitives without vertices; callers skip the draw.
    pub fn get_or_upload(
        &mut self,
        device: &mut dyn GpuDevice,
        key: PrimitiveKey,
        primitive: &Primitive,
    ) -> RenderResult<Option<GpuMesh>> {
        if let Some(mesh) = self.meshes.get(key) {
            return Ok(Some(*mesh));
        }

        if primitive.is_empty() {
            log::warn!("Primitive '{}' has no vertices, skipping draw", primitive.name);
            return Ok(None);
        }

        let mesh = GpuMesh::upload(device, primitive)
            .map_err(|e| RenderError::allocation(format!("mesh '{}'", primitive.name), e))?;
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, indexed: {})",
            primitive.name,
            primitive.vertices.len(),
            mesh.is_indexed()
        );
        if self.meshes.insert(key, mesh).is_none() && !self.meshes.contains_key(key) {
            mesh.destroy(device);
            return Err(RenderError::MissingResource(format!("stale primitive key {key:?}")));
        }
        Ok(Some(mesh))
    }

    /// Number of uploaded meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether nothing is uploaded
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Release the mesh of a removed primitive
    pub fn forget(&mut self, device: &mut dyn GpuDevice, key: PrimitiveKey) {
        if let Some(mesh) = self.meshes.remove(key) {
            mesh.destroy(device);
        }
    }

    /// Release every mesh
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, mesh) in self.meshes.drain() {
            mesh.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{HeadlessDevice, ObjectKind, RecordedCommand, RecordingSink};
    use slotmap::SlotMap;

    #[test]
    fn test_upload_once_and_draw_indexed() {
        let mut device = HeadlessDevice::new();
        let mut keys: SlotMap<PrimitiveKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let sphere = Primitive::uv_sphere("sphere", 1.0, 8, 4);
        let mut cache = MeshCache::new();

        let mesh = cache.get_or_upload(&mut device, key, &sphere).unwrap().unwrap();
        cache.get_or_upload(&mut device, key, &sphere).unwrap();
        assert_eq!(device.live_count(ObjectKind::Buffer), 2);

        let mut cmd = RecordingSink::new();
        mesh.draw(&mut cmd, 1);
        assert!(matches!(
            cmd.commands().last(),
            Some(RecordedCommand::DrawIndexed { index_count, .. }) if *index_count == sphere.element_count()
        ));
    }

    #[test]
    fn test_non_indexed_primitive_draws_vertices() {
        let mut device = HeadlessDevice::new();
        let mut keys: SlotMap<PrimitiveKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let cube = Primitive::cube("cube", 0.5);
        let mut cache = MeshCache::new();

        let mesh = cache.get_or_upload(&mut device, key, &cube).unwrap().unwrap();
        assert!(!mesh.is_indexed());
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);

        let mut cmd = RecordingSink::new();
        mesh.draw(&mut cmd, 1);
        assert!(matches!(cmd.commands().last(), Some(RecordedCommand::Draw { vertex_count: 36, .. })));
    }

    #[test]
    fn test_empty_primitive_is_skipped() {
        let mut device = HeadlessDevice::new();
        let mut keys: SlotMap<PrimitiveKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let mut cache = MeshCache::new();

        let mesh = cache.get_or_upload(&mut device, key, &Primitive::new("empty", Vec::new(), None)).unwrap();
        assert!(mesh.is_none());
        assert_eq!(device.total_live(), 0);
    }

    #[test]
    fn test_forget_releases_buffers() {
        let mut device = HeadlessDevice::new();
        let mut keys: SlotMap<PrimitiveKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let mut cache = MeshCache::new();
        cache.get_or_upload(&mut device, key, &Primitive::uv_sphere("sphere", 1.0, 8, 4)).unwrap();

        cache.forget(&mut device, key);
        assert!(cache.is_empty());
        assert_eq!(device.total_live(), 0);
    }
}
