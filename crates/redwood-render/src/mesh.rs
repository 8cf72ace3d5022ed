// SPDX-License-Identifier: CEPL-1.0
use anyhow::{ensure, Result};
use bytemuck::{Pod, Zeroable};

/// Interleaved vertex: 2D position then RGB colour.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POS_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = std::mem::size_of::<[f32; 2]>() as u32;

    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub const fn size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Host-side mesh data. Owned until uploaded, then dropped.
#[derive(Clone, Debug)]
pub struct Mesh {
    vertices: Vec<u8>,
    indices: Vec<u8>,
    index_count: u32,
    index_format: IndexFormat,
}

impl Mesh {
    pub fn new(
        vertices: Vec<u8>,
        indices: Vec<u8>,
        index_count: u32,
        index_format: IndexFormat,
    ) -> Result<Self> {
        ensure!(!vertices.is_empty(), "mesh has no vertex data");
        ensure!(
            vertices.len() % Vertex::STRIDE as usize == 0,
            "vertex data ({} bytes) is not a multiple of the {}-byte stride",
            vertices.len(),
            Vertex::STRIDE
        );
        ensure!(index_count > 0, "mesh has no indices");
        ensure!(
            indices.len() == index_count as usize * index_format.size(),
            "index data is {} bytes, expected {} x {:?}",
            indices.len(),
            index_count,
            index_format
        );
        Ok(Self {
            vertices,
            indices,
            index_count,
            index_format,
        })
    }

    pub fn from_slices(vertices: &[Vertex], indices: &[u16]) -> Result<Self> {
        Self::new(
            bytemuck::cast_slice(vertices).to_vec(),
            bytemuck::cast_slice(indices).to_vec(),
            indices.len() as u32,
            IndexFormat::U16,
        )
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        &self.vertices
    }
    pub fn index_bytes(&self) -> &[u8] {
        &self.indices
    }
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout() {
        assert_eq!(Vertex::STRIDE, 20);
        assert_eq!(Vertex::COLOR_OFFSET, 8);
    }

    #[test]
    fn quad_from_slices() {
        let verts = [
            Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
            Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
            Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
            Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
        ];
        let mesh = Mesh::from_slices(&verts, &[0, 1, 2, 2, 3, 0]).unwrap();
        assert_eq!(mesh.vertex_bytes().len(), 80);
        assert_eq!(mesh.index_bytes().len(), 12);
        assert_eq!(mesh.index_count(), 6);
        assert_eq!(mesh.index_format(), IndexFormat::U16);
    }

    #[test]
    fn rejects_mismatched_indices() {
        let v = bytemuck::cast_slice(&[Vertex::default()]).to_vec();
        assert!(Mesh::new(v.clone(), vec![0; 6], 3, IndexFormat::U32).is_err());
        assert!(Mesh::new(v, vec![], 0, IndexFormat::U16).is_err());
        assert!(Mesh::new(vec![0; 7], vec![0; 2], 1, IndexFormat::U16).is_err());
    }
}
