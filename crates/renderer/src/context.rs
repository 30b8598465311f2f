//! Instance, surface and logical device for one window.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::info;

use vp_core::RendererConfig;
use vp_platform::{Surface, Window};
use vp_rhi::device::Device;
use vp_rhi::instance::Instance;
use vp_rhi::physical_device::select_physical_device;

use crate::error::RenderResult;

/// Process-lifetime Vulkan objects every other component is built from.
///
/// Dropped last: the device, then the surface, then the instance. Anything
/// holding a clone of the device must be gone by then.
pub struct RenderContext {
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
}

impl RenderContext {
    pub fn new(window: &Window, config: &RendererConfig) -> RenderResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(config.enable_validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let info = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let (major, minor, patch) = info.api_version();
        info!(
            "Selected GPU: {} ({}, Vulkan {}.{}.{})",
            info.device_name(),
            info.device_type_name(),
            major,
            minor,
            patch
        );

        let device = Device::new(&instance, &info)?;

        Ok(Self {
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // SAFETY: each field is dropped exactly once, here, in dependency order.
        unsafe {
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
        info!("Render context destroyed");
    }
}
