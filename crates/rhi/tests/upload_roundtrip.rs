//! Upload and readback against a real device.
//!
//! Every test skips (passes with a message) when no Vulkan 1.3 device is
//! available, so the suite runs on machines without a GPU.

use std::sync::Arc;

use vp_rhi::{RhiError, vk};
use vp_rhi::buffer::BufferUsage;
use vp_rhi::device::Device;
use vp_rhi::image::mip_level_count;
use vp_rhi::instance::Instance;
use vp_rhi::physical_device::select_headless_physical_device;
use vp_rhi::upload::ResourceUploader;

fn headless_device() -> Option<(Instance, Arc<Device>)> {
    let instance = match Instance::new(false, &[]) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("skipping: no Vulkan instance ({e})");
            return None;
        }
    };
    let info = match select_headless_physical_device(instance.handle()) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("skipping: no suitable GPU ({e})");
            return None;
        }
    };
    match Device::new(&instance, &info) {
        Ok(device) => Some((instance, device)),
        Err(e) => {
            eprintln!("skipping: device creation failed ({e})");
            None
        }
    }
}

#[test]
fn test_buffer_round_trip() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };
    let uploader = ResourceUploader::new(device.clone()).unwrap();

    let data: Vec<u8> = (0..4096u32).flat_map(|i| (i * 7).to_le_bytes()).collect();
    let buffer = uploader.upload_buffer(&data, BufferUsage::Vertex).unwrap();
    assert_eq!(buffer.size(), data.len() as u64);
    assert!(
        buffer
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        "{buffer:?} is not device-local"
    );

    let read = uploader.read_buffer(&buffer).unwrap();
    assert_eq!(read, data);
}

#[test]
fn test_identical_uploads_are_independent() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };
    let uploader = ResourceUploader::new(device.clone()).unwrap();

    let data = [1u8, 2, 3, 4];
    let a = uploader.upload_buffer(&data, BufferUsage::Index).unwrap();
    let b = uploader.upload_buffer(&data, BufferUsage::Index).unwrap();
    assert_ne!(a.handle(), b.handle());
}

#[test]
fn test_empty_upload_rejected() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };
    let uploader = ResourceUploader::new(device).unwrap();

    let result = uploader.upload_buffer(&[], BufferUsage::Uniform);
    assert!(matches!(result, Err(RhiError::InvalidArgument(_))), "{result:?}");
}

#[test]
fn test_texture_upload_builds_mip_chain() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };
    let uploader = ResourceUploader::new(device).unwrap();

    let (width, height) = (64, 32);
    let pixels = vec![200u8; (width * height * 3) as usize];
    let image = uploader
        .upload_image(&pixels, width, height, 3, true)
        .unwrap();
    assert_eq!(image.mip_levels(), mip_level_count(width, height));
    assert_eq!(image.mip_levels(), 7);

    let single = uploader.upload_image(&[255; 4], 1, 1, 4, true).unwrap();
    assert_eq!(single.mip_levels(), 1);
}
