//! Depth and multisampled color attachments sized to the swapchain.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use vp_rhi::RhiResult;
use vp_rhi::device::Device;
use vp_rhi::image::{Image, ImageDesc};
use vp_rhi::physical_device::has_stencil_component;
use vp_rhi::pipeline::AttachmentFormats;

/// Attachments recreated with every swapchain.
///
/// With one sample the swapchain image is the color attachment and
/// `color` is `None`; otherwise a transient multisampled image is rendered
/// into and resolved to the swapchain image.
pub struct RenderTargets {
    depth: Image,
    color: Option<Image>,
    formats: AttachmentFormats,
    samples: vk::SampleCountFlags,
}

impl RenderTargets {
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        formats: AttachmentFormats,
        samples: vk::SampleCountFlags,
    ) -> RhiResult<Self> {
        let depth = Image::new(device.clone(), ImageDesc::depth(extent, formats.depth, samples))?;
        let color = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(Image::new(
                device,
                ImageDesc::msaa_color(extent, formats.color, samples),
            )?)
        };

        debug!(
            "Render targets {}x{} ({:?}, depth {:?})",
            extent.width, extent.height, samples, formats.depth
        );

        Ok(Self {
            depth,
            color,
            formats,
            samples,
        })
    }

    #[inline]
    pub fn depth(&self) -> &Image {
        &self.depth
    }

    #[inline]
    pub fn msaa_color(&self) -> Option<&Image> {
        self.color.as_ref()
    }

    #[inline]
    pub fn formats(&self) -> AttachmentFormats {
        self.formats
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.depth.extent()
    }

    pub fn depth_layout(&self) -> vk::ImageLayout {
        depth_layout(self.formats.depth)
    }
}

/// Attachment layout for a depth format.
pub fn depth_layout(format: vk::Format) -> vk::ImageLayout {
    if has_stencil_component(format) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
    }
}
