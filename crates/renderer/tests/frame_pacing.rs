//! The frame ring and the deletion queue driven together the way the frame
//! loop drives them, against a scripted fence.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vp_renderer::{
    AcquireAction, DeletionQueue, FrameRing, FrameStart, FrameStatus, SlotState, SurfaceState,
};
use vp_rhi::RhiResult;
use vp_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use vp_rhi::sync::CompletionSignal;

/// Fence whose GPU work finishes only when a wait is issued on it, and
/// which logs that order into a shared timeline.
struct ScriptedFence {
    slot: usize,
    signaled: Cell<bool>,
    timeline: Rc<RefCell<Vec<String>>>,
}

impl CompletionSignal for ScriptedFence {
    fn wait(&self, _timeout_ns: u64) -> RhiResult<bool> {
        if !self.signaled.get() {
            self.timeline.borrow_mut().push(format!("gpu done {}", self.slot));
            self.signaled.set(true);
        }
        Ok(true)
    }

    fn reset(&self) -> RhiResult<()> {
        self.signaled.set(false);
        Ok(())
    }
}

struct Retired {
    epoch: u64,
    timeline: Rc<RefCell<Vec<String>>>,
}

impl Drop for Retired {
    fn drop(&mut self) {
        self.timeline
            .borrow_mut()
            .push(format!("released {}", self.epoch));
    }
}

fn ring(n: usize, timeline: &Rc<RefCell<Vec<String>>>) -> FrameRing<ScriptedFence> {
    let fences = (0..n)
        .map(|slot| ScriptedFence {
            slot,
            signaled: Cell::new(true),
            timeline: timeline.clone(),
        })
        .collect();
    FrameRing::new(fences, u64::MAX).unwrap()
}

#[test]
fn test_retired_resources_outlive_their_epoch() {
    let timeline = Rc::new(RefCell::new(Vec::new()));
    let mut ring = ring(2, &timeline);
    let mut queue = DeletionQueue::new();

    for frame in 0..6 {
        let slot = ring.begin().unwrap();
        ring.arm().unwrap();
        queue.drain(ring.completed_epoch());

        // Replace a resource used by everything submitted so far.
        if frame == 1 {
            let epoch = ring.last_submitted_epoch();
            queue.retire(
                epoch,
                Retired {
                    epoch,
                    timeline: timeline.clone(),
                },
            );
        }

        ring.submitted();
        assert_eq!(ring.state(slot), SlotState::Submitted);
        assert!(ring.in_flight() <= 2);
    }

    let events = timeline.borrow();
    let released = events
        .iter()
        .position(|e| e == "released 1")
        .expect("resource released");
    // Epoch 1 ran in slot 0; its completion must be observed first.
    let completed = events
        .iter()
        .position(|e| e == "gpu done 0")
        .expect("slot 0 completed");
    assert!(completed < released, "{events:?}");
}

#[test]
fn test_retry_does_not_consume_an_epoch() {
    let timeline = Rc::new(RefCell::new(Vec::new()));
    let mut ring = ring(3, &timeline);

    ring.begin().unwrap();
    ring.cancel();
    assert_eq!(ring.last_submitted_epoch(), 0);

    let slot = ring.begin().unwrap();
    assert_eq!(slot, 0);
    ring.arm().unwrap();
    assert_eq!(ring.submitted(), 1);
    assert_eq!(ring.current_index(), 1);
}

#[test]
fn test_flush_releases_everything_pending() {
    let timeline = Rc::new(RefCell::new(Vec::new()));
    let mut queue = DeletionQueue::new();
    for epoch in [4, 9] {
        queue.retire(
            epoch,
            Retired {
                epoch,
                timeline: timeline.clone(),
            },
        );
    }
    assert_eq!(queue.drain(3), 0);
    assert_eq!(queue.flush(), 2);
    assert_eq!(timeline.borrow().len(), 2);
}

/// One frame loop iteration without a device: the same decisions the
/// renderer takes, with scripted swapchain results. Counts rebuilds.
struct Loop {
    surface: SurfaceState,
    ring: FrameRing<ScriptedFence>,
    rebuilds: u32,
}

impl Loop {
    fn new(slots: usize) -> Self {
        let timeline = Rc::new(RefCell::new(Vec::new()));
        Self {
            surface: SurfaceState::new(800, 600),
            ring: ring(slots, &timeline),
            rebuilds: 0,
        }
    }

    fn rebuild(&mut self) {
        self.rebuilds += 1;
        self.surface.rebuilt();
    }

    fn frame(&mut self, acquired: AcquireOutcome, presented: PresentOutcome) -> FrameStatus {
        match self.surface.frame_start() {
            FrameStart::Skip => return FrameStatus::Skipped,
            FrameStart::Rebuild => self.rebuild(),
            FrameStart::Render => {}
        }

        self.ring.begin().unwrap();
        match self.surface.on_acquire(acquired) {
            AcquireAction::Record(_) => {}
            AcquireAction::Retry => {
                self.ring.cancel();
                if self.surface.needs_rebuild() {
                    self.rebuild();
                }
                return FrameStatus::Retry;
            }
            AcquireAction::Skip => {
                self.ring.skip();
                return FrameStatus::Skipped;
            }
        }

        self.ring.arm().unwrap();
        self.ring.submitted();
        if self.surface.on_present(presented) {
            self.rebuild();
        }
        FrameStatus::Rendered
    }
}

const IMAGE: AcquireOutcome = AcquireOutcome::Acquired {
    index: 0,
    suboptimal: false,
};

#[test]
fn test_minimized_window_touches_nothing() {
    let mut frame_loop = Loop::new(2);
    frame_loop.surface.resize(0, 0);

    for _ in 0..3 {
        let status = frame_loop.frame(AcquireOutcome::OutOfDate, PresentOutcome::OutOfDate);
        assert_eq!(status, FrameStatus::Skipped);
    }
    assert_eq!(frame_loop.rebuilds, 0);
    assert_eq!(frame_loop.ring.current_index(), 0);
    assert_eq!(frame_loop.ring.state(0), SlotState::Idle);

    frame_loop.surface.resize(640, 480);
    assert_eq!(
        frame_loop.frame(IMAGE, PresentOutcome::Presented),
        FrameStatus::Rendered
    );
    assert_eq!(frame_loop.rebuilds, 1);
}

#[test]
fn test_skipped_frame_advances_but_retry_does_not() {
    let mut frame_loop = Loop::new(3);

    let status = frame_loop.frame(AcquireOutcome::OutOfDate, PresentOutcome::Presented);
    assert_eq!(status, FrameStatus::Retry);
    assert_eq!(frame_loop.ring.current_index(), 0);
    assert_eq!(frame_loop.rebuilds, 1);

    let status = frame_loop.frame(AcquireOutcome::Timeout, PresentOutcome::Presented);
    assert_eq!(status, FrameStatus::Skipped);
    assert_eq!(frame_loop.ring.current_index(), 1);
    assert_eq!(frame_loop.ring.last_submitted_epoch(), 0);

    assert_eq!(
        frame_loop.frame(IMAGE, PresentOutcome::Presented),
        FrameStatus::Rendered
    );
    assert_eq!(frame_loop.ring.state(1), SlotState::Submitted);
    assert_eq!(frame_loop.ring.current_index(), 2);
}

#[test]
fn test_suboptimal_frame_is_presented_then_rebuilt() {
    let mut frame_loop = Loop::new(2);
    let suboptimal = AcquireOutcome::Acquired {
        index: 1,
        suboptimal: true,
    };

    assert_eq!(
        frame_loop.frame(suboptimal, PresentOutcome::Presented),
        FrameStatus::Rendered
    );
    assert_eq!(frame_loop.ring.last_submitted_epoch(), 1);
    assert_eq!(frame_loop.rebuilds, 1);

    frame_loop.frame(IMAGE, PresentOutcome::Presented);
    assert_eq!(frame_loop.rebuilds, 1);
}

#[test]
fn test_out_of_date_present_rebuilds_once() {
    let mut frame_loop = Loop::new(2);
    frame_loop.frame(IMAGE, PresentOutcome::OutOfDate);
    assert_eq!(frame_loop.rebuilds, 1);
    assert_eq!(frame_loop.surface.frame_start(), FrameStart::Render);
}
