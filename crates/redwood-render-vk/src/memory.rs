// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{RenderError, Result};

/// Lowest memory type index allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..mem.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32) {
        let ok = (type_bits & (1 << i)) != 0
            && mem.memory_types[i as usize].property_flags.contains(required);
        if ok {
            return Ok(i);
        }
    }
    Err(RenderError::NoMemoryType {
        type_bits,
        required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in mem.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        mem
    }

    const LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn lowest_matching_index() {
        let mem = props(&[LOCAL, HOST, HOST | LOCAL]);
        assert_eq!(find_memory_type(&mem, 0b111, HOST).unwrap(), 1);
        assert_eq!(find_memory_type(&mem, 0b111, LOCAL).unwrap(), 0);
    }

    #[test]
    fn respects_type_bits() {
        let mem = props(&[HOST, HOST | LOCAL]);
        assert_eq!(find_memory_type(&mem, 0b10, HOST).unwrap(), 1);
    }

    #[test]
    fn superset_is_enough() {
        let mem = props(&[HOST | LOCAL]);
        let coherent = vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&mem, 1, coherent).unwrap(), 0);
    }

    #[test]
    fn no_match_is_an_error() {
        let mem = props(&[LOCAL]);
        assert!(matches!(
            find_memory_type(&mem, 0b1, HOST),
            Err(RenderError::NoMemoryType { type_bits: 1, .. })
        ));
        assert!(find_memory_type(&mem, 0, LOCAL).is_err());
    }
}
