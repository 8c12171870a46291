// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device and queues.
use std::ffi::{c_char, c_void, CStr};

use anyhow::{bail, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use hellovk_render::NativeWindow;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::debug::{messenger_create_info, DebugMessenger};
use crate::probe::{pick_physical_device, QueueFamilies, DEVICE_EXTENSIONS};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything that lives for the whole renderer lifetime.
pub struct DeviceContext {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
}

pub fn layer_available(layers: &[vk::LayerProperties], name: &CStr) -> bool {
    layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe fn create_instance(
    entry: &Entry,
    window: &dyn NativeWindow,
    enable_validation: bool,
) -> Result<Instance> {
    let app_name = c"hellovk";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"No Engine".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let display = window
        .display_handle()
        .context("display_handle")?
        .as_raw();
    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();

    let mut layers: Vec<*const c_char> = Vec::new();
    if enable_validation {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .context("enumerate_instance_layer_properties")?;
        if !layer_available(&available, VALIDATION_LAYER) {
            bail!("validation layers requested, but not available");
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(debug_utils::NAME.as_ptr());
    }

    if let Ok(available) = unsafe { entry.enumerate_instance_extension_properties(None) } {
        for ext in &available {
            if let Ok(name) = ext.extension_name_as_c_str() {
                debug!("instance extension available: {}", name.to_string_lossy());
            }
        }
    }

    // Covers messages emitted by vkCreateInstance/vkDestroyInstance themselves.
    let debug_info = messenger_create_info();
    let p_next = if enable_validation {
        (&debug_info as *const vk::DebugUtilsMessengerCreateInfoEXT<'_>).cast::<c_void>()
    } else {
        std::ptr::null()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next,
        p_application_info: &app_info,
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };

    unsafe { entry.create_instance(&create_info, None) }.context("create_instance")
}

unsafe fn create_surface(
    entry: &Entry,
    instance: &Instance,
    window: &dyn NativeWindow,
) -> Result<vk::SurfaceKHR> {
    let display = window
        .display_handle()
        .context("display_handle")?
        .as_raw();
    let handle = window.window_handle().context("window_handle")?.as_raw();
    unsafe { ash_window::create_surface(entry, instance, display, handle, None) }
        .context("create_surface")
}

/// One create info per distinct family, each asking for a single queue.
pub fn queue_create_infos(
    families: QueueFamilies,
    priorities: &[f32],
) -> Vec<vk::DeviceQueueCreateInfo<'_>> {
    families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect()
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos = queue_create_infos(families, &priorities);

    let features = vk::PhysicalDeviceFeatures::default();
    let device_exts: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        p_enabled_features: &features,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) loader + instance (validation layer only when asked)
    // 2) debug messenger (instance-scoped)
    // 3) surface from the window, then device selection against it
    // 4) logical device + queues + swapchain loader
    pub unsafe fn new(window: &dyn NativeWindow, enable_validation: bool) -> Result<Self> {
        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;

        // --- Instance ---
        let instance = unsafe { create_instance(&entry, window, enable_validation) }?;

        // --- Debug messenger ---
        let debug = if enable_validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance) }?)
        } else {
            None
        };

        // --- Surface + physical device ---
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = unsafe { create_surface(&entry, &instance, window) }?;
        let (phys, families) =
            unsafe { pick_physical_device(&instance, &surface_loader, surface) }?;
        let mem_props = unsafe { instance.get_physical_device_memory_properties(phys) };

        // --- Logical device + queues ---
        let device = unsafe { create_logical_device(&instance, phys, families) }?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        info!(
            "device ready (validation={}, queues {})",
            enable_validation,
            if families.is_shared() { "shared" } else { "split" }
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            mem_props,
            device,
            families,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }

    /// Swaps in a surface for a new window. Any swapchain on the old surface
    /// must already be destroyed.
    pub unsafe fn replace_surface(&mut self, window: &dyn NativeWindow) -> Result<()> {
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        self.surface = vk::SurfaceKHR::null();

        let surface = unsafe { create_surface(&self.entry, &self.instance, window) }?;
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.phys,
                self.families.present,
                surface,
            )
        }
        .context("get_physical_device_surface_support")?;
        if !supported {
            unsafe { self.surface_loader.destroy_surface(surface, None) };
            bail!(
                "new surface is not presentable from queue family {}",
                self.families.present
            );
        }
        self.surface = surface;
        debug!("surface replaced");
        Ok(())
    }

    /// Device, then debug messenger, then surface, then instance.
    pub unsafe fn destroy(mut self) {
        unsafe {
            self.device.destroy_device(None);
            if let Some(dbg) = self.debug.take() {
                dbg.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut l = vk::LayerProperties::default();
        for (dst, src) in l.layer_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as c_char;
        }
        l
    }

    #[test]
    fn validation_layer_lookup() {
        let layers = [layer(c"VK_LAYER_MESA_overlay"), layer(VALIDATION_LAYER)];
        assert!(layer_available(&layers, VALIDATION_LAYER));
        assert!(!layer_available(&layers[..1], VALIDATION_LAYER));
        assert!(!layer_available(&[], VALIDATION_LAYER));
    }

    #[test]
    fn shared_family_gets_exactly_one_queue_entry() {
        let priorities = [1.0_f32];
        let infos = queue_create_infos(
            QueueFamilies {
                graphics: 2,
                present: 2,
            },
            &priorities,
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 2);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn split_families_get_one_entry_each() {
        let priorities = [1.0_f32];
        let infos = queue_create_infos(
            QueueFamilies {
                graphics: 0,
                present: 1,
            },
            &priorities,
        );
        let indices: Vec<u32> = infos.iter().map(|i| i.queue_family_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(infos.iter().all(|i| i.queue_count == 1));
        assert!(infos
            .iter()
            .all(|i| i.p_queue_priorities == priorities.as_ptr()));
    }
}
