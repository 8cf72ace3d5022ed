// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering contracts shared by the app and the backends.
use anyhow::Result;

mod draw;
mod mesh;
mod shader;

pub use draw::{DrawItem, DrawList, MeshHandle};
pub use mesh::{IndexFormat, Mesh, Vertex};
pub use shader::{Shader, ShaderId, ShaderSource, SpirvDir};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports 0 on at least one side.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for RenderSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Moves the mesh into device memory. Host data is released afterwards.
    fn upload_mesh(&mut self, mesh: Mesh) -> Result<MeshHandle>;

    /// Appends a draw to the retained draw list, compiling the pipeline if needed.
    fn draw_mesh(&mut self, mesh: MeshHandle, shader: &Shader) -> Result<()>;
    fn clear_draw_list(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sizes() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::from((800, 600)).is_empty());
    }
}
