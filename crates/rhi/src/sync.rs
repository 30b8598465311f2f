//! Semaphores, fences and the [`CompletionSignal`] abstraction.
//!
//! - [`Semaphore`] orders work between queue operations (acquire → render → present).
//! - [`Fence`] lets the host learn that a submission has finished.
//! - [`CompletionSignal`] is the host-side view of a fence. Frame pacing code
//!   is written against the trait so it can run against a fake in tests.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Host-visible completion of a GPU submission.
pub trait CompletionSignal {
    /// Blocks until the signal fires or `timeout_ns` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait(&self, timeout_ns: u64) -> RhiResult<bool>;

    /// Returns the signal to the unsignaled state.
    ///
    /// Must not be called while a pending submission will signal it.
    fn reset(&self) -> RhiResult<()>;
}

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        trace!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        trace!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence. Frame fences start `signaled` so the first wait on
    /// them returns immediately.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        trace!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits until signaled, failing with [`RhiError::Timeout`] if
    /// `timeout_ns` elapses first.
    pub fn wait_or_timeout(&self, timeout_ns: u64) -> RhiResult<()> {
        if CompletionSignal::wait(self, timeout_ns)? {
            Ok(())
        } else {
            Err(RhiError::Timeout("fence"))
        }
    }
}

impl CompletionSignal for Fence {
    fn wait(&self, timeout_ns: u64) -> RhiResult<bool> {
        let fences = [self.fence];
        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout_ns)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        trace!("Destroyed fence");
    }
}

// Safety: the wrappers only hold a handle and an Arc<Device>; Vulkan allows
// these handles to be used from any thread with external synchronization.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}
unsafe impl Send for Fence {}
unsafe impl Sync for Fence {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_fence_is_a_completion_signal() {
        fn assert_signal<T: CompletionSignal>() {}
        assert_signal::<Fence>();
    }
}
