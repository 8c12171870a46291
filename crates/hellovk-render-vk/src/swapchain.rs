// SPDX-License-Identifier: CEPL-1.0
//! Swapchain planning (pure) and the swapchain/view/framebuffer bundle.
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use hellovk_math::SurfaceRotation;
use hellovk_render::RenderSize;
use tracing::{debug, warn};

use crate::probe::{QueueFamilies, SurfaceSupport};

pub fn rotation_of(transform: vk::SurfaceTransformFlagsKHR) -> SurfaceRotation {
    if transform.contains(vk::SurfaceTransformFlagsKHR::ROTATE_90) {
        SurfaceRotation::Rotate90
    } else if transform.contains(vk::SurfaceTransformFlagsKHR::ROTATE_180) {
        SurfaceRotation::Rotate180
    } else if transform.contains(vk::SurfaceTransformFlagsKHR::ROTATE_270) {
        SurfaceRotation::Rotate270
    } else {
        SurfaceRotation::Identity
    }
}

/// The extent of the display in its native (un-rotated) orientation.
///
/// When the surface leaves the size to us (`u32::MAX`), the window size clamped
/// to the supported range is used instead.
pub fn display_size_identity(
    caps: &vk::SurfaceCapabilitiesKHR,
    window: RenderSize,
) -> vk::Extent2D {
    let current = if caps.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        caps.current_extent
    };

    if rotation_of(caps.current_transform).swaps_axes() {
        vk::Extent2D {
            width: current.height,
            height: current.width,
        }
    } else {
        current
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is required by the API, but a broken driver may not list it.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> Option<vk::PresentModeKHR> {
    if modes.contains(&vk::PresentModeKHR::FIFO) {
        return Some(vk::PresentModeKHR::FIFO);
    }
    let first = modes.first().copied();
    warn!("surface does not report FIFO, falling back to {first:?}");
    first
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|bit| supported.contains(*bit))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl QueueSharing {
    pub fn for_families(families: QueueFamilies) -> Self {
        if families.is_shared() {
            QueueSharing::Exclusive
        } else {
            QueueSharing::Concurrent([families.graphics, families.present])
        }
    }
}

/// Every decision needed to build a swapchain, derived from a support snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub sharing: QueueSharing,
}

impl SwapchainPlan {
    /// Minimized windows report a zero extent; nothing can be built then.
    pub fn is_drawable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

pub fn plan_swapchain(
    support: &SurfaceSupport,
    families: QueueFamilies,
    window: RenderSize,
) -> Result<SwapchainPlan> {
    let caps = &support.capabilities;
    let format = choose_surface_format(&support.formats).context("surface reports no formats")?;
    let present_mode =
        choose_present_mode(&support.present_modes).context("surface reports no present modes")?;
    Ok(SwapchainPlan {
        format,
        present_mode,
        extent: display_size_identity(caps, window),
        image_count: choose_image_count(caps),
        pre_transform: caps.current_transform,
        composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
        sharing: QueueSharing::for_families(families),
    })
}

pub fn swapchain_create_info(
    surface: vk::SurfaceKHR,
    plan: &SwapchainPlan,
) -> vk::SwapchainCreateInfoKHR<'_> {
    let (sharing_mode, indices): (_, &[u32]) = match &plan.sharing {
        QueueSharing::Exclusive => (vk::SharingMode::EXCLUSIVE, &[]),
        QueueSharing::Concurrent(pair) => (vk::SharingMode::CONCURRENT, pair),
    };
    vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: plan.image_count,
        image_format: plan.format.format,
        image_color_space: plan.format.color_space,
        image_extent: plan.extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: indices.len() as u32,
        p_queue_family_indices: indices.as_ptr(),
        pre_transform: plan.pre_transform,
        composite_alpha: plan.composite_alpha,
        present_mode: plan.present_mode,
        clipped: vk::TRUE,
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    }
}

/// One 2D color view per swapchain image.
pub fn view_infos(
    images: &[vk::Image],
    format: vk::Format,
) -> Vec<vk::ImageViewCreateInfo<'static>> {
    images
        .iter()
        .map(|&image| vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: color_subresource_range(),
            ..Default::default()
        })
        .collect()
}

/// One framebuffer per view, each with that view as its only attachment.
pub fn framebuffer_infos(
    views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Vec<vk::FramebufferCreateInfo<'_>> {
    views
        .iter()
        .map(|view| vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        })
        .collect()
}

/// Swapchain images with one view and one framebuffer each. Rebuilt wholesale.
#[derive(Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// An empty bundle for a surface that cannot be drawn to yet. Only the format
    /// and transform are known; nothing is created.
    pub fn deferred(plan: &SwapchainPlan) -> Self {
        Swapchain {
            format: plan.format.format,
            extent: plan.extent,
            pre_transform: plan.pre_transform,
            ..Default::default()
        }
    }

    pub fn is_built(&self) -> bool {
        self.handle != vk::SwapchainKHR::null()
    }

    /// Creates the swapchain and its image views. Framebuffers come later,
    /// once a render pass for `format` exists.
    pub unsafe fn create(
        device: &ash::Device,
        loader: &swapchain::Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
    ) -> Result<Self> {
        let swap_info = swapchain_create_info(surface, plan);
        let handle =
            unsafe { loader.create_swapchain(&swap_info, None) }.context("create_swapchain")?;
        let images =
            unsafe { loader.get_swapchain_images(handle) }.context("get_swapchain_images")?;

        let mut sc = Swapchain {
            handle,
            format: plan.format.format,
            extent: plan.extent,
            pre_transform: plan.pre_transform,
            images,
            views: Vec::new(),
            framebuffers: Vec::new(),
        };

        let images = sc.images.clone();
        for iv_info in view_infos(&images, sc.format) {
            match unsafe { device.create_image_view(&iv_info, None) } {
                Ok(v) => sc.views.push(v),
                Err(e) => {
                    unsafe { sc.destroy(device, loader) };
                    return Err(e).context("create_image_view(swapchain)");
                }
            }
        }

        debug!(
            "swapchain {}x{} fmt {:?} images={} transform={:?}",
            sc.extent.width,
            sc.extent.height,
            sc.format,
            sc.images.len(),
            sc.pre_transform
        );
        Ok(sc)
    }

    pub unsafe fn create_framebuffers(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let infos = framebuffer_infos(&self.views, render_pass, self.extent);
        self.framebuffers.reserve(infos.len());
        for fb_info in &infos {
            let fb = unsafe { device.create_framebuffer(fb_info, None) }
                .context("create_framebuffer")?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    pub fn rotation(&self) -> SurfaceRotation {
        rotation_of(self.pre_transform)
    }

    /// width / height of the identity extent.
    pub fn aspect_ratio(&self) -> f32 {
        if self.extent.height == 0 {
            1.0
        } else {
            self.extent.width as f32 / self.extent.height as f32
        }
    }

    /// Framebuffers, then views, then the swapchain. Leaves an empty bundle.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &swapchain::Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            for iv in self.views.drain(..) {
                device.destroy_image_view(iv, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.handle, None);
            }
        }
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
