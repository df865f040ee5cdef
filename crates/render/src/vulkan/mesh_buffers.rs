//! Device copies of procedural meshes.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use pacer_rhi::RhiResult;
use pacer_rhi::buffer::{Buffer, BufferUsage};
use pacer_rhi::device::Device;

use crate::mesh::MeshData;

/// Vertex and index buffers for one mesh. Lives as long as the backend.
pub struct MeshBuffers {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl MeshBuffers {
    pub fn upload(device: Arc<Device>, mesh: &MeshData) -> RhiResult<Self> {
        let vertex_buffer = Buffer::new_with_data(device.clone(), BufferUsage::Vertex, &mesh.vertices)?;
        let index_buffer = Buffer::new_with_data(device, BufferUsage::Index, &mesh.indices)?;
        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
        })
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}
