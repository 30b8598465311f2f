//! 2D GPU images with a default view.
//!
//! One type covers the three kinds of image the renderer needs: sampled
//! textures (mipmapped, uploaded once), depth attachments and the transient
//! multisampled color target that is resolved into the swapchain image.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::physical_device::has_stencil_component;

/// Creation parameters for an [`Image`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    /// Allocator name, shows up in leak reports
    pub name: &'static str,
}

impl ImageDesc {
    /// Sampled texture that is filled by transfers (and blits, when mipmapped).
    pub fn texture(extent: vk::Extent2D, format: vk::Format, mip_levels: u32) -> Self {
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        Self {
            extent,
            format,
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            name: "texture",
        }
    }

    pub fn depth(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        Self {
            extent,
            format,
            mip_levels: 1,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect,
            name: "depth",
        }
    }

    /// Multisampled color target; its contents never leave tile memory.
    pub fn msaa_color(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            samples,
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
            name: "msaa color",
        }
    }

    /// Subresource range covering every mip level.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(1)
    }
}

/// GPU image, its memory and a view over all mip levels.
///
/// Destroyed in the order view, image, allocation.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} image dimensions must be greater than 0",
                desc.name
            )));
        }
        if desc.mip_levels == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} image needs at least one mip level",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None) }
            .map_err(|e| RhiError::from(e).in_context(format!("creating {} image", desc.name)))?;

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    RhiError::from(e).in_context(format!(
                        "allocating {} bytes for a {} image",
                        requirements.size, desc.name
                    ))
                })
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up whatever was created.
        let mut created = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
        };

        if let Some(allocation) = created.allocation.as_ref() {
            unsafe {
                created.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        created.view = create_image_view(&created.device, image, desc.format, desc.full_range())?;

        debug!(
            "Created {} image: {}x{} {:?}, {} mip level(s), {:?}",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(created)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }

    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        self.desc.full_range()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free {} image allocation: {:?}", self.desc.name, e);
                    }
                }
                Err(e) => tracing::error!("Leaking {} image allocation: {}", self.desc.name, e),
            }
        }

        debug!("Destroyed {} image", self.desc.name);
    }
}

/// Creates a 2D view of `image` over `range`.
///
/// Also used for the swapchain images, which are not owned by an [`Image`].
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    range: vk::ImageSubresourceRange,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(range);

    let view = unsafe { device.handle().create_image_view(&create_info, None)? };
    Ok(view)
}

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`.
///
/// ```
/// use vp_rhi::image::mip_level_count;
///
/// assert_eq!(mip_level_count(1, 1), 1);
/// assert_eq!(mip_level_count(1024, 512), 11);
/// ```
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of mip `level` for a base `extent`, clamped at 1.
pub fn mip_extent(extent: vk::Extent2D, level: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(3, 1), 2);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(1024, 768), 11);
        assert_eq!(mip_level_count(1, 4096), 13);
    }

    #[test]
    fn test_mip_extent_clamps_at_one() {
        let base = vk::Extent2D {
            width: 1024,
            height: 256,
        };
        assert_eq!(mip_extent(base, 0), base);
        assert_eq!(
            mip_extent(base, 9),
            vk::Extent2D {
                width: 2,
                height: 1
            }
        );
        let last = mip_extent(base, mip_level_count(1024, 256) - 1);
        assert_eq!(
            last,
            vk::Extent2D {
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn test_texture_desc_usage() {
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let single = ImageDesc::texture(extent, vk::Format::R8G8B8A8_SRGB, 1);
        assert!(!single.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));

        let mipped = ImageDesc::texture(extent, vk::Format::R8G8B8A8_SRGB, 7);
        assert!(mipped.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert_eq!(mipped.full_range().level_count, 7);
    }

    #[test]
    fn test_attachment_descs() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let depth = ImageDesc::depth(extent, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.samples, vk::SampleCountFlags::TYPE_4);

        let stencil = ImageDesc::depth(
            extent,
            vk::Format::D24_UNORM_S8_UINT,
            vk::SampleCountFlags::TYPE_1,
        );
        assert!(stencil.aspect.contains(vk::ImageAspectFlags::STENCIL));

        let color = ImageDesc::msaa_color(
            extent,
            vk::Format::B8G8R8A8_SRGB,
            vk::SampleCountFlags::TYPE_4,
        );
        assert!(
            color
                .usage
                .contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT)
        );
    }
}
