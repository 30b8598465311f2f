//! Tracks the drawable size and whether the swapchain must be rebuilt, and
//! turns swapchain results into the frame loop's next step.

use ash::vk;
use tracing::debug;
use vp_platform::SurfaceEvent;
use vp_rhi::swapchain::{AcquireOutcome, PresentOutcome};

/// First step of a frame loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStart {
    /// Zero-sized surface: no acquire, present or rebuild.
    Skip,
    /// Rebuild the swapchain, then render.
    Rebuild,
    Render,
}

/// What the frame loop does with an acquired (or not) image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAction {
    /// Record and present into this swapchain image.
    Record(u32),
    /// The chain is out of date: give the slot back and try again.
    Retry,
    /// No image in time: drop the frame.
    Skip,
}

/// Pure bookkeeping between window events and swapchain recreation.
///
/// A zero-sized surface (minimized window) is not renderable: the frame
/// loop neither acquires, presents nor recreates until a non-zero size is
/// reported again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceState {
    width: u32,
    height: u32,
    rebuild_pending: bool,
    close_requested: bool,
}

impl SurfaceState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rebuild_pending: false,
            close_requested: false,
        }
    }

    pub fn handle(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Resized { width, height } => self.resize(width, height),
            SurfaceEvent::CloseRequested => self.close_requested = true,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        debug!(
            "Surface resized: {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        self.width = width;
        self.height = height;
        self.rebuild_pending = true;
    }

    /// The swapchain reported out-of-date or suboptimal.
    pub fn mark_stale(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn is_renderable(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// A rebuild is pending and can be done now.
    pub fn needs_rebuild(&self) -> bool {
        self.rebuild_pending && self.is_renderable()
    }

    pub fn rebuilt(&mut self) {
        self.rebuild_pending = false;
    }

    pub fn frame_start(&self) -> FrameStart {
        if !self.is_renderable() {
            FrameStart::Skip
        } else if self.rebuild_pending {
            FrameStart::Rebuild
        } else {
            FrameStart::Render
        }
    }

    /// Suboptimal images are still drawn; the chain is rebuilt after present.
    pub fn on_acquire(&mut self, outcome: AcquireOutcome) -> AcquireAction {
        match outcome {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    self.mark_stale();
                }
                AcquireAction::Record(index)
            }
            AcquireOutcome::OutOfDate => {
                self.mark_stale();
                AcquireAction::Retry
            }
            AcquireOutcome::Timeout => AcquireAction::Skip,
        }
    }

    /// Returns whether the swapchain must be rebuilt before the next frame.
    pub fn on_present(&mut self, outcome: PresentOutcome) -> bool {
        if outcome.needs_recreate() {
            debug!("Present reported {:?}", outcome);
            self.mark_stale();
        }
        self.needs_rebuild()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_requests_rebuild() {
        let mut state = SurfaceState::new(800, 600);
        assert!(!state.needs_rebuild());

        state.handle(SurfaceEvent::Resized {
            width: 1024,
            height: 768,
        });
        assert!(state.needs_rebuild());
        assert_eq!(state.extent().width, 1024);

        state.rebuilt();
        assert!(!state.needs_rebuild());
    }

    #[test]
    fn test_same_size_is_not_a_resize() {
        let mut state = SurfaceState::new(800, 600);
        state.resize(800, 600);
        assert!(!state.needs_rebuild());
    }

    #[test]
    fn test_zero_size_defers_rebuild() {
        let mut state = SurfaceState::new(800, 600);
        state.resize(0, 600);
        assert!(!state.is_renderable());
        assert!(!state.needs_rebuild());

        state.mark_stale();
        assert!(!state.needs_rebuild());

        state.resize(640, 480);
        assert!(state.is_renderable());
        assert!(state.needs_rebuild());
    }

    #[test]
    fn test_zero_size_skips_the_whole_frame() {
        let mut state = SurfaceState::new(800, 600);
        state.mark_stale();
        state.resize(0, 0);
        assert_eq!(state.frame_start(), FrameStart::Skip);

        // A late out-of-date present while minimized does not rebuild.
        assert!(!state.on_present(PresentOutcome::OutOfDate));

        state.resize(800, 600);
        assert_eq!(state.frame_start(), FrameStart::Rebuild);
        state.rebuilt();
        assert_eq!(state.frame_start(), FrameStart::Render);
    }

    #[test]
    fn test_suboptimal_image_is_drawn_then_rebuilt() {
        let mut state = SurfaceState::new(800, 600);
        let action = state.on_acquire(AcquireOutcome::Acquired {
            index: 2,
            suboptimal: true,
        });
        assert_eq!(action, AcquireAction::Record(2));
        assert!(state.on_present(PresentOutcome::Presented));
    }

    #[test]
    fn test_out_of_date_acquire_retries() {
        let mut state = SurfaceState::new(800, 600);
        assert_eq!(state.on_acquire(AcquireOutcome::OutOfDate), AcquireAction::Retry);
        assert!(state.needs_rebuild());
    }

    #[test]
    fn test_acquire_timeout_skips_without_rebuild() {
        let mut state = SurfaceState::new(800, 600);
        assert_eq!(state.on_acquire(AcquireOutcome::Timeout), AcquireAction::Skip);
        assert_eq!(state.frame_start(), FrameStart::Render);
    }

    #[test]
    fn test_present_outcomes() {
        let mut state = SurfaceState::new(800, 600);
        assert!(!state.on_present(PresentOutcome::Presented));
        assert!(state.on_present(PresentOutcome::OutOfDate));
        state.rebuilt();
        assert!(state.on_present(PresentOutcome::Suboptimal));
    }

    #[test]
    fn test_pending_resize_rebuilds_after_present() {
        let mut state = SurfaceState::new(800, 600);
        state.resize(1024, 768);
        assert!(state.on_present(PresentOutcome::Presented));
    }

    #[test]
    fn test_close_request() {
        let mut state = SurfaceState::new(1, 1);
        state.handle(SurfaceEvent::CloseRequested);
        assert!(state.close_requested());
        assert!(state.is_renderable());
    }
}
