// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection.
//!
//! Every enumerated device is first probed into a plain [`DeviceCandidate`];
//! the choice itself is a pure function over those snapshots so it can be
//! exercised without a driver.
use std::ffi::{CStr, CString};

use ash::khr::{surface, swapchain};
use ash::vk;
use bitflags::bitflags;
use tracing::{debug, info};

use crate::error::{RenderError, Result, VkResultExt};

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

bitflags! {
    /// Which of the four selection predicates a device met.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Suitability: u8 {
        const DISCRETE = 1 << 0;
        const GEOMETRY_SHADER = 1 << 1;
        const QUEUE_FAMILIES = 1 << 2;
        const SWAPCHAIN = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, one queue is requested from each.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scans families in order and stops once both roles are filled.
pub fn find_queue_families(families: &[QueueFamilySupport]) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;
    for (i, fam) in families.iter().enumerate() {
        if fam.graphics {
            graphics = Some(i as u32);
        }
        if fam.present {
            present = Some(i as u32);
        }
        if let (Some(graphics), Some(present)) = (graphics, present) {
            return Some(QueueFamilyIndices { graphics, present });
        }
    }
    None
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub queue_families: Vec<QueueFamilySupport>,
    pub extensions: Vec<CString>,
    pub format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    pub fn supports_required_extensions(&self) -> bool {
        REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .all(|req| self.extensions.iter().any(|e| e.as_c_str() == *req))
    }

    pub fn queue_family_indices(&self) -> Option<QueueFamilyIndices> {
        find_queue_families(&self.queue_families)
    }

    pub fn suitability(&self) -> Suitability {
        let mut s = Suitability::empty();
        s.set(
            Suitability::DISCRETE,
            self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
        );
        s.set(Suitability::GEOMETRY_SHADER, self.geometry_shader);
        s.set(
            Suitability::QUEUE_FAMILIES,
            self.queue_family_indices().is_some(),
        );
        s.set(
            Suitability::SWAPCHAIN,
            self.supports_required_extensions()
                && self.format_count > 0
                && self.present_mode_count > 0,
        );
        s
    }
}

/// First candidate, in enumeration order, meeting every predicate.
pub fn select_physical_device(candidates: &[DeviceCandidate]) -> Result<usize> {
    for (i, cand) in candidates.iter().enumerate() {
        let s = cand.suitability();
        if s.is_all() {
            info!("selected GPU {} '{}' ({:?})", i, cand.name, cand.device_type);
            return Ok(i);
        }
        debug!(
            "rejecting GPU {} '{}': missing {:?}",
            i,
            cand.name,
            Suitability::all().difference(s)
        );
    }
    Err(RenderError::NoSuitableDevice)
}

/// Snapshots everything selection needs from one physical device.
pub(crate) unsafe fn probe(
    instance: &ash::Instance,
    surface_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();
    let features = instance.get_physical_device_features(phys);

    let mut queue_families = Vec::new();
    for (i, qf) in instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
    {
        let present = surface_i
            .get_physical_device_surface_support(phys, i as u32, surface)
            .call("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        queue_families.push(QueueFamilySupport {
            graphics: qf.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present,
        });
    }

    let extensions: Vec<CString> = instance
        .enumerate_device_extension_properties(phys)
        .call("vkEnumerateDeviceExtensionProperties")?
        .iter()
        .map(|e| CStr::from_ptr(e.extension_name.as_ptr()).to_owned())
        .collect();

    let mut cand = DeviceCandidate {
        name,
        device_type: props.device_type,
        geometry_shader: features.geometry_shader == vk::TRUE,
        queue_families,
        extensions,
        format_count: 0,
        present_mode_count: 0,
    };

    // Surface formats are only meaningful once the swapchain extension exists.
    if cand.supports_required_extensions() {
        cand.format_count = surface_i
            .get_physical_device_surface_formats(phys, surface)
            .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?
            .len();
        cand.present_mode_count = surface_i
            .get_physical_device_surface_present_modes(phys, surface)
            .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?
            .len();
    }
    Ok(cand)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_gpu(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_owned(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            geometry_shader: true,
            queue_families: vec![QueueFamilySupport {
                graphics: true,
                present: true,
            }],
            extensions: vec![swapchain::NAME.to_owned()],
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn queue_families_shared() {
        let fams = [QueueFamilySupport {
            graphics: true,
            present: true,
        }];
        let idx = find_queue_families(&fams).unwrap();
        assert!(idx.is_shared());
        assert_eq!(idx.unique(), vec![0]);
    }

    #[test]
    fn queue_families_split() {
        let fams = [
            QueueFamilySupport {
                graphics: true,
                present: false,
            },
            QueueFamilySupport::default(),
            QueueFamilySupport {
                graphics: false,
                present: true,
            },
            QueueFamilySupport {
                graphics: true,
                present: true,
            },
        ];
        let idx = find_queue_families(&fams).unwrap();
        assert_eq!(idx, QueueFamilyIndices { graphics: 0, present: 2 });
        assert_eq!(idx.unique(), vec![0, 2]);
    }

    #[test]
    fn queue_families_incomplete() {
        let fams = [QueueFamilySupport {
            graphics: true,
            present: false,
        }];
        assert!(find_queue_families(&fams).is_none());
        assert!(find_queue_families(&[]).is_none());
    }

    #[test]
    fn suitability_flags() {
        let mut integrated = good_gpu("igpu");
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.present_mode_count = 0;
        let s = integrated.suitability();
        assert!(!s.contains(Suitability::DISCRETE));
        assert!(!s.contains(Suitability::SWAPCHAIN));
        assert!(s.contains(Suitability::GEOMETRY_SHADER | Suitability::QUEUE_FAMILIES));
        assert!(good_gpu("dgpu").suitability().is_all());
    }

    #[test]
    fn missing_extension_fails_swapchain_predicate() {
        let mut gpu = good_gpu("no-wsi");
        gpu.extensions.clear();
        assert!(!gpu.suitability().contains(Suitability::SWAPCHAIN));
    }

    #[test]
    fn picks_first_qualifying_in_order() {
        let mut no_geom = good_gpu("a");
        no_geom.geometry_shader = false;
        let list = [no_geom, good_gpu("b"), good_gpu("c")];
        assert_eq!(select_physical_device(&list).unwrap(), 1);
    }

    #[test]
    fn none_qualify() {
        let mut a = good_gpu("a");
        a.queue_families.clear();
        assert!(matches!(
            select_physical_device(&[a]),
            Err(RenderError::NoSuitableDevice)
        ));
        assert!(select_physical_device(&[]).is_err());
    }
}
