//! Vulkan logical device, queues and the GPU memory allocator.
//!
//! [`Device`] is created once and shared as `Arc<Device>` by every object
//! that owns a Vulkan handle, so the device is only destroyed after the last
//! of them is gone.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

/// Vulkan logical device wrapper.
///
/// The allocator sits behind a `Mutex`; it is only locked while creating or
/// freeing allocations, never while recording or submitting a frame.
pub struct Device {
    device: ash::Device,
    instance: ash::Instance,
    info: PhysicalDeviceInfo,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    sample_rate_shading: bool,
    fill_mode_non_solid: bool,
}

impl Device {
    /// Creates the logical device, retrieves its queues and sets up `gpu-allocator`.
    ///
    /// Enabled features: sampler anisotropy, Vulkan 1.3 dynamic rendering and
    /// synchronization2, plus sample-rate shading and non-solid fill when the
    /// hardware has them.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = &physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::Initialization(
                "physical device has no graphics or present queue family".to_string(),
            ));
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let supported = &physical_device_info.features;
        let sample_rate_shading = supported.sample_rate_shading == vk::TRUE;
        let fill_mode_non_solid = supported.fill_mode_non_solid == vk::TRUE;

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .sample_rate_shading(sample_rate_shading)
            .fill_mode_non_solid(fill_mode_non_solid);

        let extension_names: Vec<*const std::ffi::c_char> =
            REQUIRED_DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created (sample shading: {}, wireframe: {})",
            sample_rate_shading, fill_mode_non_solid
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            info: physical_device_info.clone(),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            sample_rate_shading,
            fill_mode_non_solid,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.info.device
    }

    /// Properties, limits and memory layout of the selected GPU.
    #[inline]
    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.info.queue_families
    }

    #[inline]
    pub fn sample_rate_shading_enabled(&self) -> bool {
        self.sample_rate_shading
    }

    #[inline]
    pub fn wireframe_enabled(&self) -> bool {
        self.fill_mode_non_solid
    }

    /// Locks the allocator.
    ///
    /// # Errors
    ///
    /// Fails if a previous holder panicked while allocating.
    pub fn allocator(&self) -> Result<MutexGuard<'_, Allocator>, RhiError> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::Initialization("GPU allocator mutex poisoned".to_string()))
    }

    /// Format features for optimal tiling.
    pub fn optimal_format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.info.device, format)
                .optimal_tiling_features
        }
    }

    /// Depth format chosen from the supported candidates.
    pub fn depth_format(&self) -> Result<vk::Format, RhiError> {
        crate::physical_device::find_depth_format(&self.instance, self.info.device)
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded, and `fence` (if not null)
    /// must be unsignaled and not part of another pending submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: the handles are plain identifiers, ash::Device and ash::Instance are
// Send + Sync, and the allocator is only reached through its Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_extensions_include_swapchain() {
        assert!(REQUIRED_DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
