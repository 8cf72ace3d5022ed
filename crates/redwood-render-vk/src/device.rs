// SPDX-License-Identifier: CEPL-1.0
//! GPU connection: instance, surface, physical/logical device and queues.
//!
//! Each raw handle lives in a small owner whose `Drop` destroys it. The owners
//! are fields of [`DeviceContext`] in drop order, so teardown is always
//! device, then surface, then debug messenger and instance, even when
//! construction bails out half way.
use std::ffi::{c_char, CStr};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{info, warn};

use crate::debug::{self, DebugMessenger, ValidationPolicy, VALIDATION_LAYER};
use crate::error::{Result, VkResultExt};
use crate::memory;
use crate::select::{self, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

const APP_NAME: &CStr = c"Redwood";

struct InstanceOwner {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some(dbg) = self.debug.as_mut() {
                dbg.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

struct SurfaceOwner {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for SurfaceOwner {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

struct LogicalDevice {
    device: ash::Device,
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}

pub struct DeviceContext {
    // STRICT ORDER: fields drop top to bottom. Device before surface before instance.
    device: LogicalDevice,
    surface: SurfaceOwner,
    instance: InstanceOwner,

    swapchain_loader: swapchain::Device,
    phys: vk::PhysicalDevice,
    device_name: String,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    validation: bool,
}

impl DeviceContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        policy: ValidationPolicy,
    ) -> Result<Self> {
        // --- Platform handles ---
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            // --- Instance (+ optional validation and messenger) ---
            let instance = create_instance(dh, policy)?;

            // --- Surface bound to this instance ---
            let loader = surface::Instance::new(&instance.entry, &instance.instance);
            let raw_surface =
                ash_window::create_surface(&instance.entry, &instance.instance, dh, wh, None)
                    .call("vkCreateSurfaceKHR")?;
            let surface = SurfaceOwner {
                loader,
                surface: raw_surface,
            };

            // --- Physical device against this surface ---
            let physical = instance
                .instance
                .enumerate_physical_devices()
                .call("vkEnumeratePhysicalDevices")?;
            let mut candidates = Vec::with_capacity(physical.len());
            for &pd in &physical {
                candidates.push(select::probe(
                    &instance.instance,
                    &surface.loader,
                    surface.surface,
                    pd,
                )?);
            }
            let picked = select::select_physical_device(&candidates)?;
            let phys = physical[picked];
            let cand = &candidates[picked];
            let queue_families = cand
                .queue_family_indices()
                .ok_or(crate::RenderError::NoSuitableDevice)?;

            // --- Logical device + queues ---
            let device = create_logical_device(
                &instance.instance,
                phys,
                queue_families,
                instance.debug.is_some(),
            )?;
            let graphics_queue = device.device.get_device_queue(queue_families.graphics, 0);
            let present_queue = device.device.get_device_queue(queue_families.present, 0);
            let swapchain_loader = swapchain::Device::new(&instance.instance, &device.device);
            let memory_props = instance
                .instance
                .get_physical_device_memory_properties(phys);

            info!(
                "device '{}' ready (graphics family {}, present family {})",
                cand.name, queue_families.graphics, queue_families.present
            );

            let validation = instance.debug.is_some();
            Ok(Self {
                device,
                surface,
                instance,
                swapchain_loader,
                phys,
                device_name: cand.name.clone(),
                queue_families,
                graphics_queue,
                present_queue,
                memory_props,
                validation,
            })
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }
    pub fn device(&self) -> &ash::Device {
        &self.device.device
    }
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }
    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface.loader
    }
    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        memory::find_memory_type(&self.memory_props, type_bits, required)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device().device_wait_idle() }.call("vkDeviceWaitIdle")
    }
}

unsafe fn create_instance(display: RawDisplayHandle, policy: ValidationPolicy) -> Result<InstanceOwner> {
    let entry = Entry::load()?;

    let layer_props = debug::available_layers(&entry)?;
    let layer_names: Vec<&CStr> = layer_props
        .iter()
        .map(|l| CStr::from_ptr(l.layer_name.as_ptr()))
        .collect();
    let validation = debug::resolve_validation(policy, &layer_names);

    let mut exts: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .call("enumerate_required_extensions")?
        .to_vec();
    if validation {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let layers: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .call("vkCreateInstance")?;

    // Owner first, so a failing messenger still destroys the instance.
    let mut owner = InstanceOwner {
        entry,
        instance,
        debug: None,
    };
    if validation {
        owner.debug = Some(DebugMessenger::new(&owner.entry, &owner.instance)?);
        info!("validation layers enabled");
    }
    Ok(owner)
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilyIndices,
    validation: bool,
) -> Result<LogicalDevice> {
    let priority = [1.0f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priority.as_ptr(),
            ..Default::default()
        })
        .collect();

    let exts: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect();
    // Device layers are ignored by current loaders but older ones still read them.
    let layers: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };
    let features = vk::PhysicalDeviceFeatures::default();

    let dci = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dci, None)
        .call("vkCreateDevice")?;
    Ok(LogicalDevice { device })
}
