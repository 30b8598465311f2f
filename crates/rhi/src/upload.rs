//! Host to device uploads and device to host readback.
//!
//! [`ResourceUploader`] owns a transient command pool on the graphics queue.
//! Every transfer is a one-shot submission that is waited on before the
//! call returns, so staging buffers are released right away. It is meant
//! for initialization and asset loads, not for per-frame data.

use std::borrow::Cow;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool, submit_one_shot};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, mip_extent, mip_level_count};

/// Whether a `CpuToGpu` allocation can be returned as a device-local buffer
/// and filled through its host mapping.
pub fn is_direct_write_target(memory: vk::MemoryPropertyFlags, mapped: bool) -> bool {
    mapped && memory.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
}

/// Format of every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Copies resources between host and device memory.
pub struct ResourceUploader {
    device: Arc<Device>,
    pool: CommandPool,
    direct_writes: bool,
}

impl ResourceUploader {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let Some(graphics_family) = device.queue_families().graphics_family else {
            return Err(RhiError::Initialization(
                "device has no graphics queue family".to_string(),
            ));
        };
        let pool = CommandPool::new_transient(device.clone(), graphics_family)?;
        let direct_writes = device.info().has_host_visible_device_local();

        info!(
            "Resource uploader ready ({})",
            if direct_writes {
                "direct writes to host-visible device memory"
            } else {
                "staged transfers"
            }
        );

        Ok(Self {
            device,
            pool,
            direct_writes,
        })
    }

    /// Creates a device-local buffer holding `data`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for empty `data`, [`RhiError::OutOfMemory`]
    /// when either the buffer or its staging copy cannot be allocated.
    pub fn upload_buffer(&self, data: &[u8], usage: BufferUsage) -> RhiResult<Buffer> {
        if data.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "cannot upload an empty {} buffer",
                usage.name()
            )));
        }
        let size = data.len() as vk::DeviceSize;

        if self.direct_writes {
            let buffer = Buffer::new(self.device.clone(), usage, size, MemoryLocation::CpuToGpu)?;
            if is_direct_write_target(buffer.memory_properties(), buffer.is_mapped()) {
                buffer.write_data(0, data)?;
                debug!("Uploaded {} bytes into {} buffer directly", size, usage.name());
                return Ok(buffer);
            }
            debug!(
                "{} buffer landed in {:?}, falling back to staging",
                usage.name(),
                buffer.memory_properties()
            );
        }

        let buffer = Buffer::new(self.device.clone(), usage, size, MemoryLocation::GpuOnly)?;
        self.copy_through_staging(data, &buffer)?;
        Ok(buffer)
    }

    fn copy_through_staging(&self, data: &[u8], dst: &Buffer) -> RhiResult<()> {
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)
            .map_err(|e| e.in_context("allocating an upload staging buffer"))?;

        submit_one_shot(&self.device, &self.pool, |cmd| {
            cmd.copy_buffer(staging.handle(), dst.handle(), staging.size());
            Ok(())
        })?;

        debug!(
            "Uploaded {} bytes into {} buffer via staging",
            data.len(),
            dst.usage().name()
        );
        Ok(())
    }

    /// Creates a sampled `R8G8B8A8_SRGB` texture from 8-bit pixels.
    ///
    /// 3-channel input is expanded to RGBA. With `mipmaps`, the full chain is
    /// generated by linear blits and the image has
    /// [`mip_level_count`] levels; otherwise one.
    pub fn upload_image(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        mipmaps: bool,
    ) -> RhiResult<Image> {
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "cannot upload a {}x{} image",
                width, height
            )));
        }
        let rgba = expand_to_rgba(pixels, width, height, channels)?;

        let mip_levels = if mipmaps {
            mip_level_count(width, height)
        } else {
            1
        };
        if mip_levels > 1
            && !self
                .device
                .optimal_format_features(TEXTURE_FORMAT)
                .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(RhiError::Initialization(format!(
                "{:?} does not support linear blitting",
                TEXTURE_FORMAT
            )));
        }

        let extent = vk::Extent2D { width, height };
        let image = Image::new(
            self.device.clone(),
            ImageDesc::texture(extent, TEXTURE_FORMAT, mip_levels),
        )?;
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, &rgba)
            .map_err(|e| e.in_context("allocating a texture staging buffer"))?;

        submit_one_shot(&self.device, &self.pool, |cmd| {
            cmd.transition_image_layout(
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image.full_range(),
            );
            cmd.copy_buffer_to_image(staging.handle(), image.handle(), extent);

            if mip_levels > 1 {
                record_mip_chain(cmd, &image);
            } else {
                cmd.transition_image_layout(
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    image.full_range(),
                );
            }
            Ok(())
        })?;

        info!(
            "Uploaded {}x{} texture ({} mip level(s))",
            width, height, mip_levels
        );
        Ok(image)
    }

    /// Copies the contents of `buffer` back to the host.
    pub fn read_buffer(&self, buffer: &Buffer) -> RhiResult<Vec<u8>> {
        let readback = Buffer::new(
            self.device.clone(),
            BufferUsage::Readback,
            buffer.size(),
            MemoryLocation::GpuToCpu,
        )?;

        submit_one_shot(&self.device, &self.pool, |cmd| {
            cmd.copy_buffer(buffer.handle(), readback.handle(), buffer.size());
            Ok(())
        })?;

        readback.read_data(0, buffer.size() as usize)
    }
}

/// Blits level `i - 1` into level `i` for the whole chain and leaves every
/// level in `SHADER_READ_ONLY_OPTIMAL`. All levels start in
/// `TRANSFER_DST_OPTIMAL` with level 0 filled.
fn record_mip_chain(cmd: &CommandBuffer, image: &Image) {
    let base = image.extent();
    let level_range = |level: u32| {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(level)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    };
    let layers = |level: u32| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level)
            .base_array_layer(0)
            .layer_count(1)
    };
    let far_corner = |extent: vk::Extent2D| vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    };

    for level in 1..image.mip_levels() {
        let src = level - 1;
        cmd.transition_image_layout(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            level_range(src),
        );

        let blit = vk::ImageBlit::default()
            .src_subresource(layers(src))
            .src_offsets([vk::Offset3D::default(), far_corner(mip_extent(base, src))])
            .dst_subresource(layers(level))
            .dst_offsets([vk::Offset3D::default(), far_corner(mip_extent(base, level))]);
        cmd.blit_image(image.handle(), image.handle(), blit);

        cmd.transition_image_layout(
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level_range(src),
        );
    }

    cmd.transition_image_layout(
        image.handle(),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        level_range(image.mip_levels() - 1),
    );
}

/// Returns `pixels` as tightly packed RGBA8, adding an opaque alpha to
/// 3-channel input.
pub fn expand_to_rgba(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
) -> RhiResult<Cow<'_, [u8]>> {
    let texels = width as usize * height as usize;
    let expected = texels * channels as usize;
    if pixels.len() != expected {
        return Err(RhiError::InvalidArgument(format!(
            "{}x{}x{} image needs {} bytes, got {}",
            width,
            height,
            channels,
            expected,
            pixels.len()
        )));
    }

    match channels {
        4 => Ok(Cow::Borrowed(pixels)),
        3 => {
            let mut rgba = Vec::with_capacity(texels * 4);
            for rgb in pixels.chunks_exact(3) {
                rgba.extend_from_slice(rgb);
                rgba.push(u8::MAX);
            }
            Ok(Cow::Owned(rgba))
        }
        other => Err(RhiError::InvalidArgument(format!(
            "unsupported channel count {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_passes_through() {
        let pixels = [1, 2, 3, 4, 5, 6, 7, 8];
        let rgba = expand_to_rgba(&pixels, 2, 1, 4).unwrap();
        assert!(matches!(rgba, Cow::Borrowed(_)));
        assert_eq!(&*rgba, &pixels);
    }

    #[test]
    fn test_rgb_gets_opaque_alpha() {
        let pixels = [10, 20, 30, 40, 50, 60];
        let rgba = expand_to_rgba(&pixels, 1, 2, 3).unwrap();
        assert_eq!(&*rgba, &[10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let err = expand_to_rgba(&[0; 7], 2, 1, 4).unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
    }

    #[test]
    fn test_unsupported_channels_rejected() {
        assert!(expand_to_rgba(&[0; 4], 2, 1, 2).is_err());
    }

    #[test]
    fn test_host_memory_is_not_a_direct_write_target() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert!(!is_direct_write_target(host, true));
        assert!(is_direct_write_target(host | vk::MemoryPropertyFlags::DEVICE_LOCAL, true));
        assert!(!is_direct_write_target(vk::MemoryPropertyFlags::DEVICE_LOCAL, false));
    }

    #[test]
    fn test_texture_format_is_srgb() {
        assert_eq!(TEXTURE_FORMAT, vk::Format::R8G8B8A8_SRGB);
    }
}
