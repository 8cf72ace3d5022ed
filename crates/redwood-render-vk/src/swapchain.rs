// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain: swapchain, one view and one framebuffer per image.
//!
//! The chain is never patched in place. A rebuild waits for the device to go
//! idle, drops the whole [`Chain`] and builds a fresh one against the same
//! render pass.
use std::sync::Arc;

use ash::vk;
use redwood_render::RenderSize;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};
use crate::pipeline::RenderPass;

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn query_support(ctx: &DeviceContext) -> Result<SwapchainSupport> {
    let (loader, phys, surface) = (ctx.surface_loader(), ctx.physical_device(), ctx.surface());
    unsafe {
        Ok(SwapchainSupport {
            caps: loader
                .get_physical_device_surface_capabilities(phys, surface)
                .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            formats: loader
                .get_physical_device_surface_formats(phys, surface)
                .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(phys, surface)
                .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// Low-latency triple buffering when the surface offers it.
    #[default]
    Mailbox,
    Fifo,
}

/// Previous format (keeps the render pass valid), then BGRA8 sRGB, then whatever comes first.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    previous: Option<vk::Format>,
) -> Result<vk::SurfaceFormatKHR> {
    if let Some(prev) = previous {
        if let Some(f) = formats.iter().copied().find(|f| f.format == prev) {
            return Ok(f);
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(RenderError::NoSurfaceFormat)
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentModePreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentModePreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the one mode every surface must support.
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// `current_extent.width == u32::MAX` means the application picks the size.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One above the minimum, capped by the maximum (0 == "no max").
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainSettings {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

pub fn choose_settings(
    support: &SwapchainSupport,
    want: RenderSize,
    pref: PresentModePreference,
    previous: Option<vk::Format>,
) -> Result<SwapchainSettings> {
    Ok(SwapchainSettings {
        format: choose_surface_format(&support.formats, previous)?,
        present_mode: choose_present_mode(&support.present_modes, pref),
        extent: choose_extent(&support.caps, want),
        image_count: image_count(&support.caps),
        transform: support.caps.current_transform,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

struct SwapchainImage {
    image: vk::Image,
    view: vk::ImageView,
    framebuffer: vk::Framebuffer,
}

/// Swapchain handle plus everything derived from its images.
struct Chain {
    ctx: Arc<DeviceContext>,
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
}

impl Chain {
    fn empty(ctx: Arc<DeviceContext>) -> Self {
        Self {
            ctx,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
        }
    }

    unsafe fn build(
        ctx: Arc<DeviceContext>,
        settings: &SwapchainSettings,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let families = ctx.queue_families();
        let family_list = [families.graphics, families.present];
        let (sharing_mode, family_count, family_ptr) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (vk::SharingMode::CONCURRENT, 2, family_list.as_ptr())
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: settings.image_count,
            image_format: settings.format.format,
            image_color_space: settings.format.color_space,
            image_extent: settings.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: family_ptr,
            pre_transform: settings.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: settings.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let swapchain = ctx
            .swapchain_loader()
            .create_swapchain(&info, None)
            .call("vkCreateSwapchainKHR")?;

        // From here on `chain` owns whatever has been created.
        let mut chain = Chain {
            ctx: ctx.clone(),
            swapchain,
            images: Vec::new(),
        };
        let images = ctx
            .swapchain_loader()
            .get_swapchain_images(swapchain)
            .call("vkGetSwapchainImagesKHR")?;

        for image in images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: settings.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = ctx
                .device()
                .create_image_view(&iv_info, None)
                .call("vkCreateImageView")?;
            chain.images.push(SwapchainImage {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
            });

            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: settings.extent.width,
                height: settings.extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer = ctx
                .device()
                .create_framebuffer(&fb_info, None)
                .call("vkCreateFramebuffer")?;
            if let Some(last) = chain.images.last_mut() {
                last.framebuffer = framebuffer;
            }
        }
        Ok(chain)
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        // STRICT ORDER: framebuffers, views, then the swapchain that owns the images.
        let device = self.ctx.device();
        unsafe {
            for img in self.images.drain(..) {
                if img.framebuffer != vk::Framebuffer::null() {
                    device.destroy_framebuffer(img.framebuffer, None);
                }
                device.destroy_image_view(img.view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.ctx
                    .swapchain_loader()
                    .destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

pub struct Swapchain {
    // Chain framebuffers reference the render pass, so the chain drops first.
    chain: Chain,
    render_pass: Arc<RenderPass>,
    settings: SwapchainSettings,
    preference: PresentModePreference,
    ctx: Arc<DeviceContext>,
}

impl Swapchain {
    pub fn new(
        ctx: Arc<DeviceContext>,
        size: RenderSize,
        preference: PresentModePreference,
    ) -> Result<Self> {
        let support = query_support(&ctx)?;
        let settings = choose_settings(&support, size, preference, None)?;
        let render_pass = Arc::new(RenderPass::new(ctx.clone(), settings.format.format)?);
        let chain = unsafe { Chain::build(ctx.clone(), &settings, render_pass.handle())? };
        log_settings("swapchain created", &settings, chain.images.len());
        Ok(Self {
            chain,
            render_pass,
            settings,
            preference,
            ctx,
        })
    }

    /// Destroys views, framebuffers and the swapchain, then rebuilds them.
    /// The render pass (and every pipeline built against it) is kept.
    ///
    /// Returns `Ok(false)` and leaves the old chain alone when the surface
    /// currently has a zero extent; the caller retries later.
    pub fn rebuild(&mut self, size: RenderSize) -> Result<bool> {
        self.ctx.wait_idle()?;
        let support = query_support(&self.ctx)?;
        let old_format = self.settings.format.format;
        let settings = choose_settings(&support, size, self.preference, Some(old_format))?;
        if extent_is_empty(settings.extent) {
            debug!("surface extent is 0x0, rebuild postponed");
            return Ok(false);
        }
        if settings.format.format != old_format {
            return Err(RenderError::FormatChanged {
                old: old_format,
                new: settings.format.format,
            });
        }

        // The surface accepts only one live swapchain here, so the old chain goes first.
        drop(std::mem::replace(
            &mut self.chain,
            Chain::empty(self.ctx.clone()),
        ));
        self.chain = unsafe { Chain::build(self.ctx.clone(), &settings, self.render_pass.handle())? };
        self.settings = settings;
        log_settings("swapchain rebuilt", &settings, self.chain.images.len());
        Ok(true)
    }

    pub fn acquire(&self, signal: vk::Semaphore) -> Result<Acquire> {
        let res = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                self.chain.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    /// Presents `image_index` once `wait` signals. `Ok(true)` asks for a rebuild.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        let swapchains = [self.chain.swapchain];
        let indices = [image_index];
        let waits = [wait];
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: waits.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        let res = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.present_queue(), &info)
        };
        match res {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.settings.format
    }
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.settings.present_mode
    }
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    /// Images, views and framebuffers are created together, so this counts all three.
    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn image(&self, index: u32) -> Result<vk::Image> {
        image_at(&self.chain.images, index).map(|i| i.image)
    }

    pub fn framebuffer(&self, index: u32) -> Result<vk::Framebuffer> {
        image_at(&self.chain.images, index).map(|i| i.framebuffer)
    }
}

fn image_at<T>(images: &[T], index: u32) -> Result<&T> {
    images
        .get(index as usize)
        .ok_or(RenderError::ImageOutOfRange {
            index,
            count: images.len(),
        })
}

/// A minimised surface may report 0x0; no swapchain can be created for it.
pub fn extent_is_empty(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

fn log_settings(what: &str, s: &SwapchainSettings, images: usize) {
    info!(
        "{}: {:?}/{:?}, {:?}, {}x{}, {} images",
        what,
        s.format.format,
        s.format.color_space,
        s.present_mode,
        s.extent.width,
        s.extent.height,
        images
    );
    debug!("requested min_image_count={}", s.image_count);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    const SRGB: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

    #[test]
    fn prefers_bgra8_srgb() {
        let formats = [
            sf(vk::Format::R8G8B8A8_UNORM, SRGB),
            sf(vk::Format::B8G8R8A8_SRGB, SRGB),
        ];
        let f = choose_surface_format(&formats, None).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            sf(vk::Format::R8G8B8A8_UNORM, SRGB),
            sf(vk::Format::A2B10G10R10_UNORM_PACK32, SRGB),
        ];
        let f = choose_surface_format(&formats, None).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn keeps_previous_format_on_rebuild() {
        let formats = [
            sf(vk::Format::B8G8R8A8_SRGB, SRGB),
            sf(vk::Format::B8G8R8A8_UNORM, SRGB),
        ];
        let f = choose_surface_format(&formats, Some(vk::Format::B8G8R8A8_UNORM)).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[], None),
            Err(RenderError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn mailbox_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn fifo_when_mailbox_absent() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        let all = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&all, PresentModePreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let c = caps((1024, 768), 2, 3);
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn extent_from_window_when_sentinel() {
        let c = caps((u32::MAX, u32::MAX), 2, 3);
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (800, 600));
        let e = choose_extent(&c, RenderSize::new(9000, 0));
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[test]
    fn zero_surface_extent_is_empty() {
        // Surface already minimised while the window still reported 800x600.
        let c = caps((0, 0), 2, 3);
        assert!(extent_is_empty(choose_extent(&c, RenderSize::new(800, 600))));
        let free = caps((u32::MAX, u32::MAX), 2, 3);
        assert!(!extent_is_empty(choose_extent(&free, RenderSize::new(800, 600))));
    }

    #[test]
    fn image_lookup_out_of_range() {
        let images = [10u32, 11, 12];
        assert_eq!(*image_at(&images, 2).unwrap(), 12);
        assert!(matches!(
            image_at(&images, 3),
            Err(RenderError::ImageOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn image_count_clamped() {
        assert_eq!(image_count(&caps((1, 1), 2, 0)), 3);
        assert_eq!(image_count(&caps((1, 1), 2, 2)), 2);
        assert_eq!(image_count(&caps((1, 1), 3, 8)), 4);
    }

    #[test]
    fn settings_bundle() {
        let support = SwapchainSupport {
            caps: caps((u32::MAX, u32::MAX), 2, 0),
            formats: vec![sf(vk::Format::B8G8R8A8_SRGB, SRGB)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let s = choose_settings(
            &support,
            RenderSize::new(1280, 720),
            PresentModePreference::Mailbox,
            None,
        )
        .unwrap();
        assert_eq!(s.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(s.image_count, 3);
        assert_eq!((s.extent.width, s.extent.height), (1280, 720));
    }
}
