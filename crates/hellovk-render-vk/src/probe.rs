// SPDX-License-Identifier: CEPL-1.0
//! Capability queries and the physical-device selection rules built on them.
use std::ffi::CStr;

use anyhow::{bail, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info, warn};

/// Device extensions every candidate must expose.
pub const DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Both families resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilySelection {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first. One entry per queue create info.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Walks families in order, letting later matches overwrite earlier ones until
/// both roles are filled.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilySelection {
    let mut sel = QueueFamilySelection::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            sel.graphics = Some(i);
        }
        if supports_present(i) {
            sel.present = Some(i);
        }
        if sel.is_complete() {
            break;
        }
    }
    sel
}

/// Snapshot of what a surface supports on one physical device.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub families: QueueFamilySelection,
    pub missing_extensions: Vec<String>,
    /// Only queried when every required extension is present.
    pub surface: Option<SurfaceSupport>,
}

impl DeviceCandidate {
    pub fn extensions_supported(&self) -> bool {
        self.missing_extensions.is_empty()
    }
}

pub fn is_device_suitable(c: &DeviceCandidate) -> bool {
    c.families.is_complete()
        && c.extensions_supported()
        && c.surface.as_ref().is_some_and(SurfaceSupport::is_adequate)
}

/// Enumeration order decides; no scoring.
pub fn select_first_suitable<T>(
    candidates: impl IntoIterator<Item = (T, DeviceCandidate)>,
) -> Option<(T, DeviceCandidate)> {
    candidates
        .into_iter()
        .find(|(_, c)| is_device_suitable(c))
}

/// Names from `required` that `available` lacks.
pub fn missing_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|want| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == **want))
        })
        .map(|want| want.to_string_lossy().into_owned())
        .collect()
}

pub unsafe fn query_surface_support(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    let capabilities = unsafe { loader.get_physical_device_surface_capabilities(phys, surface) }
        .context("get_physical_device_surface_capabilities")?;
    let formats = unsafe { loader.get_physical_device_surface_formats(phys, surface) }
        .context("get_physical_device_surface_formats")?;
    let present_modes = unsafe { loader.get_physical_device_surface_present_modes(phys, surface) }
        .context("get_physical_device_surface_present_modes")?;
    Ok(SurfaceSupport {
        capabilities,
        formats,
        present_modes,
    })
}

unsafe fn query_candidate(
    instance: &ash::Instance,
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let families = find_queue_families(&props, |i| {
        match unsafe { loader.get_physical_device_surface_support(phys, i, surface) } {
            Ok(ok) => ok,
            Err(e) => {
                warn!("surface support query for family {i} failed: {e:?}");
                false
            }
        }
    });

    let available = unsafe { instance.enumerate_device_extension_properties(phys) }
        .context("enumerate_device_extension_properties")?;
    let missing_extensions = missing_extensions(&available, &DEVICE_EXTENSIONS);

    let surface = if missing_extensions.is_empty() {
        Some(unsafe { query_surface_support(loader, phys, surface) }?)
    } else {
        None
    };

    Ok(DeviceCandidate {
        families,
        missing_extensions,
        surface,
    })
}

/// First physical device that can render to and present on `surface`.
pub unsafe fn pick_physical_device(
    instance: &ash::Instance,
    loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    if devices.is_empty() {
        bail!("failed to find GPUs with Vulkan support");
    }

    let mut candidates = Vec::with_capacity(devices.len());
    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let candidate = unsafe { query_candidate(instance, loader, phys, surface) }?;
        debug!(
            "candidate {name}: families={:?} missing_ext={:?} surface_ok={}",
            candidate.families,
            candidate.missing_extensions,
            candidate.surface.as_ref().is_some_and(SurfaceSupport::is_adequate)
        );
        candidates.push(((phys, name), candidate));
    }

    let Some(((phys, name), chosen)) = select_first_suitable(candidates) else {
        bail!("failed to find a suitable GPU");
    };
    let families = chosen
        .families
        .resolve()
        .context("suitable device without queue families")?;
    info!(
        "using {name} (graphics family {}, present family {})",
        families.graphics, families.present
    );
    Ok((phys, families))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn ext(name: &CStr) -> vk::ExtensionProperties {
        let mut e = vk::ExtensionProperties::default();
        for (dst, src) in e.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        e
    }

    fn adequate_surface() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn suitable() -> DeviceCandidate {
        DeviceCandidate {
            families: QueueFamilySelection {
                graphics: Some(0),
                present: Some(0),
            },
            missing_extensions: vec![],
            surface: Some(adequate_surface()),
        }
    }

    #[test]
    fn single_family_is_shared_with_one_queue_entry() {
        let sel = find_queue_families(&[family(vk::QueueFlags::GRAPHICS)], |_| true);
        let fams = sel.resolve().unwrap();
        assert!(fams.is_shared());
        assert_eq!(fams.unique(), vec![0]);
    }

    #[test]
    fn split_families_yield_two_entries() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let sel = find_queue_families(&props, |i| i == 1);
        assert_eq!(
            sel.resolve(),
            Some(QueueFamilies {
                graphics: 0,
                present: 1
            })
        );
        assert_eq!(sel.resolve().unwrap().unique(), vec![0, 1]);
    }

    #[test]
    fn later_family_overwrites_until_complete() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = vec![];
        let sel = find_queue_families(&props, |i| {
            queried.push(i);
            i >= 1
        });
        assert_eq!(sel.graphics, Some(1));
        assert_eq!(sel.present, Some(1));
        // stops once complete
        assert_eq!(queried, vec![0, 1]);
    }

    #[test]
    fn no_graphics_family_is_incomplete() {
        let sel = find_queue_families(&[family(vk::QueueFlags::COMPUTE)], |_| true);
        assert!(!sel.is_complete());
        assert_eq!(sel.resolve(), None);
    }

    #[test]
    fn suitability_truth_table() {
        assert!(is_device_suitable(&suitable()));

        let mut c = suitable();
        c.families.present = None;
        assert!(!is_device_suitable(&c));

        let mut c = suitable();
        c.missing_extensions = vec!["VK_KHR_swapchain".into()];
        c.surface = None;
        assert!(!is_device_suitable(&c));

        let mut c = suitable();
        c.surface.as_mut().unwrap().formats.clear();
        assert!(!is_device_suitable(&c));

        let mut c = suitable();
        c.surface.as_mut().unwrap().present_modes.clear();
        assert!(!is_device_suitable(&c));
    }

    #[test]
    fn first_suitable_wins_in_enumeration_order() {
        let mut bad = suitable();
        bad.surface = None;
        let picked = select_first_suitable([("a", bad), ("b", suitable()), ("c", suitable())]);
        assert_eq!(picked.map(|(n, _)| n), Some("b"));

        let mut bad = suitable();
        bad.families.graphics = None;
        assert!(select_first_suitable([("a", bad)]).is_none());
        assert!(select_first_suitable(Vec::<(u8, DeviceCandidate)>::new()).is_none());
    }

    #[test]
    fn reports_missing_extensions_by_name() {
        let available = [ext(c"VK_KHR_surface")];
        assert_eq!(
            missing_extensions(&available, &DEVICE_EXTENSIONS),
            vec!["VK_KHR_swapchain".to_string()]
        );
        let available = [ext(c"VK_KHR_surface"), ext(swapchain::NAME)];
        assert!(missing_extensions(&available, &DEVICE_EXTENSIONS).is_empty());
    }
}
