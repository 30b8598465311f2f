//! Swapchain creation, image acquisition and presentation.
//!
//! Selection of format, present mode, extent and image count is done by
//! pure functions over the surface's reported support, so creating the
//! chain twice against the same surface state gives the same result.
//!
//! Acquire and present report an out-of-date swapchain as a value
//! ([`AcquireOutcome::OutOfDate`], [`PresentOutcome::OutOfDate`]) so the
//! frame loop can recreate without going through its error path.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::create_image_view;
use crate::instance::Instance;

/// What the surface supports for a swapchain.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Picks the chain parameters for `desired` extent.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedSurface`] if the surface offers no formats or
    /// no present modes.
    pub fn choose(&self, desired: vk::Extent2D, prefer_mailbox: bool) -> RhiResult<SwapchainParams> {
        let surface_format = choose_surface_format(&self.formats).ok_or_else(|| {
            RhiError::UnsupportedSurface("surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&self.present_modes, prefer_mailbox)
            .ok_or_else(|| {
                RhiError::UnsupportedSurface("surface reports no present modes".to_string())
            })?;

        Ok(SwapchainParams {
            surface_format,
            present_mode,
            extent: choose_extent(&self.capabilities, desired),
            image_count: choose_image_count(&self.capabilities),
            pre_transform: self.capabilities.current_transform,
        })
    }
}

/// Parameters a swapchain is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainParams {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The semaphore will be signaled when image `index` is ready.
    Acquired { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was signaled.
    OutOfDate,
    /// No image became available within the timeout.
    Timeout,
}

/// Result of [`Swapchain::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Vulkan swapchain and its image views.
///
/// Images belong to the swapchain; the views are owned here.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    params: SwapchainParams,
    prefer_mailbox: bool,
}

impl Swapchain {
    /// Creates a swapchain for `surface`. The surface must outlive it.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        desired: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        Self::create(
            device,
            swapchain_loader,
            surface_loader,
            surface,
            desired,
            prefer_mailbox,
            vk::SwapchainKHR::null(),
        )
    }

    fn create(
        device: Arc<Device>,
        swapchain_loader: ash::khr::swapchain::Device,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        desired: vk::Extent2D,
        prefer_mailbox: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let support = SurfaceSupport::query(device.physical_device(), surface, &surface_loader)?;
        let params = support.choose(desired, prefer_mailbox)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            params.extent.width,
            params.extent.height,
            params.surface_format.format,
            params.surface_format.color_space,
            params.present_mode,
            params.image_count
        );

        let queue_families = device.queue_families();
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::Initialization(
                "device has no graphics or present queue family".to_string(),
            ));
        };
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(params.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let mut created = Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            params,
            prefer_mailbox,
        };

        created.images = unsafe { created.swapchain_loader.get_swapchain_images(swapchain)? };
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        for &image in &created.images {
            let view = create_image_view(
                &created.device,
                image,
                params.surface_format.format,
                range,
            )?;
            created.image_views.push(view);
        }

        info!("Swapchain created with {} images", created.images.len());
        Ok(created)
    }

    /// Replaces the chain with one for `desired` extent.
    ///
    /// Waits for the device to go idle, creates the new chain from the old
    /// one, then destroys the old views and chain.
    pub fn recreate(&mut self, desired: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for {}x{}",
            desired.width, desired.height
        );

        let replacement = Self::create(
            self.device.clone(),
            self.swapchain_loader.clone(),
            self.surface_loader.clone(),
            self.surface,
            desired,
            self.prefer_mailbox,
            self.swapchain,
        )?;

        drop(std::mem::replace(self, replacement));
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues image `image_index` for presentation after `wait_semaphore`.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn params(&self) -> &SwapchainParams {
        &self.params
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.params.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.params.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.params.extent.width,
            self.params.extent.height,
            self.images.len()
        );
    }
}

/// `B8G8R8A8_SRGB` with `SRGB_NONLINEAR` if offered, else the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!(
            "Preferred surface format unavailable, using {:?} / {:?}",
            format.format, format.color_space
        );
    }
    first
}

/// `MAILBOX` when preferred and offered, else the always-available `FIFO`.
///
/// Returns `None` only when the surface reports no modes at all.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> Option<vk::PresentModeKHR> {
    if present_modes.is_empty() {
        return None;
    }
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return Some(vk::PresentModeKHR::MAILBOX);
    }
    Some(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless it is the `u32::MAX` sentinel, in
/// which case `desired` clamped to the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: desired.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: desired.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped at the maximum (0 means no maximum).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(current: u32, min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current,
                height: current,
            },
            min_image_extent: vk::Extent2D {
                width: min,
                height: min,
            },
            max_image_extent: vk::Extent2D {
                width: max,
                height: max,
            },
            ..Default::default()
        }
    }

    fn support(
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: capabilities(u32::MAX, 1, 4096),
            formats,
            present_modes,
        }
    }

    #[test]
    fn test_prefers_bgra_srgb_and_mailbox() {
        let support = support(
            vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        );
        let params = support
            .choose(vk::Extent2D { width: 800, height: 600 }, true)
            .unwrap();
        assert_eq!(params.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(params.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_falls_back_to_first_format_and_fifo() {
        let support = support(
            vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
        );
        let params = support
            .choose(vk::Extent2D { width: 800, height: 600 }, true)
            .unwrap();
        assert_eq!(params.surface_format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(params.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_mailbox_not_preferred_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, false),
            Some(vk::PresentModeKHR::FIFO)
        );
    }

    #[test]
    fn test_empty_support_is_unsupported_surface() {
        let desired = vk::Extent2D { width: 800, height: 600 };

        let no_formats = support(Vec::new(), vec![vk::PresentModeKHR::FIFO]);
        let err = no_formats.choose(desired, true).unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedSurface(_)));
        assert!(err.is_initialization());

        let no_modes = support(
            vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            Vec::new(),
        );
        assert!(matches!(
            no_modes.choose(desired, true),
            Err(RhiError::UnsupportedSurface(_))
        ));
    }

    #[test]
    fn test_choosing_twice_is_identical() {
        let support = support(
            vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        );
        let desired = vk::Extent2D { width: 1280, height: 720 };
        assert_eq!(
            support.choose(desired, true).unwrap(),
            support.choose(desired, true).unwrap()
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let caps = capabilities(640, 1, 4096);
        let extent = choose_extent(&caps, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 640, height: 640 });
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let caps = capabilities(u32::MAX, 100, 1000);
        assert_eq!(
            choose_extent(&caps, vk::Extent2D { width: 5000, height: 50 }),
            vk::Extent2D { width: 1000, height: 100 }
        );
    }

    #[test]
    fn test_choose_image_count() {
        let mut caps = capabilities(u32::MAX, 1, 4096);
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 4;
        assert_eq!(choose_image_count(&caps), 5);
    }

    #[test]
    fn test_present_outcome_needs_recreate() {
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
