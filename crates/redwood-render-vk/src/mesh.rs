// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use redwood_render::{IndexFormat, Mesh, MeshHandle};

use crate::error::{RenderError, Result};
use crate::upload::{GpuBuffer, Uploader};

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

/// Device-resident vertex + index buffers for one mesh.
pub struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
    pub index_type: vk::IndexType,
}

impl GpuMesh {
    /// Consumes the host copy; the device buffers are authoritative afterwards.
    pub fn upload(uploader: &Uploader, mesh: Mesh) -> Result<Self> {
        let vertices = uploader.upload(mesh.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let indices = uploader.upload(mesh.index_bytes(), vk::BufferUsageFlags::INDEX_BUFFER)?;
        Ok(Self {
            vertices,
            indices,
            index_count: mesh.index_count(),
            index_type: index_type(mesh.index_format()),
        })
    }
}

/// Meshes live until the store is dropped.
pub struct MeshStore<M = GpuMesh> {
    meshes: Vec<M>,
}

impl<M> Default for MeshStore<M> {
    fn default() -> Self {
        Self { meshes: Vec::new() }
    }
}

impl<M> MeshStore<M> {
    pub fn insert(&mut self, mesh: M) -> MeshHandle {
        self.meshes.push(mesh);
        MeshHandle::from_raw((self.meshes.len() - 1) as u32)
    }

    pub fn get(&self, handle: MeshHandle) -> Result<&M> {
        self.meshes
            .get(handle.raw() as usize)
            .ok_or(RenderError::UnknownMesh(handle))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_types() {
        assert_eq!(index_type(IndexFormat::U16), vk::IndexType::UINT16);
        assert_eq!(index_type(IndexFormat::U32), vk::IndexType::UINT32);
    }

    #[test]
    fn handles_resolve_in_insertion_order() {
        let mut store = MeshStore::<&str>::default();
        let a = store.insert("quad");
        let b = store.insert("tri");
        assert_ne!(a, b);
        assert_eq!(*store.get(b).unwrap(), "tri");
        assert!(matches!(
            store.get(MeshHandle::from_raw(7)),
            Err(RenderError::UnknownMesh(_))
        ));
    }
}
