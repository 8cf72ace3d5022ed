// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;
use tracing::{debug, error, info, warn};

use crate::error::{Result, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// On in debug builds, off in release.
    #[default]
    Auto,
    On,
    Off,
}

impl ValidationPolicy {
    pub fn wanted(self) -> bool {
        match self {
            ValidationPolicy::Auto => cfg!(debug_assertions),
            ValidationPolicy::On => true,
            ValidationPolicy::Off => false,
        }
    }
}

/// Whether validation ends up enabled given what the loader advertises.
/// Missing layers only warn.
pub fn resolve_validation(policy: ValidationPolicy, available: &[&CStr]) -> bool {
    if !policy.wanted() {
        return false;
    }
    if available.contains(&VALIDATION_LAYER) {
        true
    } else {
        warn!(
            "validation requested but {:?} is not installed; continuing without it",
            VALIDATION_LAYER
        );
        false
    }
}

pub(crate) unsafe fn available_layers(entry: &ash::Entry) -> Result<Vec<vk::LayerProperties>> {
    entry
        .enumerate_instance_layer_properties()
        .call("vkEnumerateInstanceLayerProperties")
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Messenger plus the loader that destroys it.
pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .call("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, messenger })
    }

    /// Caller guarantees the owning instance is still alive.
    pub(crate) unsafe fn destroy(&mut self) {
        if self.messenger != vk::DebugUtilsMessengerEXT::null() {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
            self.messenger = vk::DebugUtilsMessengerEXT::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_never_enables() {
        assert!(!resolve_validation(ValidationPolicy::Off, &[VALIDATION_LAYER]));
    }

    #[test]
    fn on_requires_layer_present() {
        assert!(resolve_validation(ValidationPolicy::On, &[VALIDATION_LAYER]));
        assert!(!resolve_validation(ValidationPolicy::On, &[]));
        assert!(!resolve_validation(
            ValidationPolicy::On,
            &[c"VK_LAYER_MESA_overlay"]
        ));
    }

    #[test]
    fn auto_follows_build_profile() {
        assert_eq!(
            resolve_validation(ValidationPolicy::Auto, &[VALIDATION_LAYER]),
            cfg!(debug_assertions)
        );
    }
}
