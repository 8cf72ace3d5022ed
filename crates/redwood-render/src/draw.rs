// SPDX-License-Identifier: CEPL-1.0
use crate::ShaderId;

/// Opaque handle to a device-resident mesh owned by a renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawItem {
    pub shader: ShaderId,
    pub mesh: MeshHandle,
}

/// Ordered draws recorded into the single render pass each frame.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    items: Vec<DrawItem>,
}

impl DrawList {
    pub fn push(&mut self, shader: ShaderId, mesh: MeshHandle) {
        self.items.push(DrawItem { shader, mesh });
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shader;

    #[test]
    fn keeps_insertion_order() {
        let s = Shader::new("v", "f");
        let mut list = DrawList::default();
        list.push(s.id(), MeshHandle::from_raw(2));
        list.push(s.id(), MeshHandle::from_raw(0));

        let meshes: Vec<u32> = list.iter().map(|d| d.mesh.raw()).collect();
        assert_eq!(meshes, [2, 0]);

        list.clear();
        assert!(list.is_empty());
    }
}
