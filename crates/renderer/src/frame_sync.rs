//! Frames in flight.
//!
//! [`FrameRing`] is the slot bookkeeping: which slot records next, which
//! slots have work on the GPU and which submission epochs are known to be
//! complete. It only sees the host side of each slot's fence through
//! [`CompletionSignal`], so it runs against a fake in tests.
//!
//! [`FrameSynchronizer`] puts Vulkan objects behind the ring: per slot a
//! command buffer, an image-acquired semaphore and the frame-complete fence,
//! plus one render-finished semaphore per swapchain image.
//!
//! ```text
//! begin_frame      wait fence (Submitted -> Complete), reset + begin cmd
//! image_acquired   reset fence
//! end_frame        end cmd, submit (wait acquired, signal finished + fence), present
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use vp_rhi::command::{CommandBuffer, CommandPool};
use vp_rhi::device::Device;
use vp_rhi::swapchain::{PresentOutcome, Swapchain};
use vp_rhi::sync::{CompletionSignal, Fence, Semaphore};
use vp_rhi::{RhiError, RhiResult};

/// Lifecycle of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

struct RingSlot<F> {
    signal: F,
    state: SlotState,
    /// Epoch of the last submission from this slot, 0 before the first.
    epoch: u64,
}

/// Fixed ring of frame slots, each guarded by a completion signal.
///
/// Signals must start signaled. Epochs count submissions from 1.
pub struct FrameRing<F: CompletionSignal> {
    slots: Vec<RingSlot<F>>,
    current: usize,
    last_submitted: u64,
    completed: u64,
    timeout_ns: u64,
}

impl<F: CompletionSignal> FrameRing<F> {
    pub fn new(signals: Vec<F>, timeout_ns: u64) -> RhiResult<Self> {
        if signals.is_empty() {
            return Err(RhiError::InvalidArgument(
                "frame ring needs at least one slot".to_string(),
            ));
        }

        let slots = signals
            .into_iter()
            .map(|signal| RingSlot {
                signal,
                state: SlotState::Idle,
                epoch: 0,
            })
            .collect();

        Ok(Self {
            slots,
            current: 0,
            last_submitted: 0,
            completed: 0,
            timeout_ns,
        })
    }

    /// Claims the current slot for recording, first waiting for its previous
    /// submission to finish.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] if the wait exceeds the ring's timeout.
    pub fn begin(&mut self) -> RhiResult<usize> {
        let index = self.current;
        let slot = &mut self.slots[index];

        if slot.state == SlotState::Submitted {
            if !slot.signal.wait(self.timeout_ns)? {
                return Err(RhiError::Timeout("frame fence"));
            }
            slot.state = SlotState::Complete;
            // A single queue completes submissions in order.
            self.completed = self.completed.max(slot.epoch);
            trace!("Slot {} complete (epoch {})", index, slot.epoch);
        }

        slot.state = SlotState::Recording;
        Ok(index)
    }

    /// Unsignals the current slot's fence. Call once a submission is certain.
    pub fn arm(&mut self) -> RhiResult<()> {
        self.slots[self.current].signal.reset()
    }

    /// Gives the current slot back without submitting; the ring does not
    /// advance, so the retried frame records into the same slot. Only valid
    /// before [`arm`](Self::arm).
    pub fn cancel(&mut self) {
        self.release_current();
    }

    /// Drops the current frame and advances the ring as a submission would.
    /// Only valid before [`arm`](Self::arm): the fence still carries the
    /// signal of the slot's last submission.
    pub fn skip(&mut self) {
        self.release_current();
        self.current = (self.current + 1) % self.slots.len();
    }

    fn release_current(&mut self) {
        let slot = &mut self.slots[self.current];
        debug_assert_eq!(slot.state, SlotState::Recording, "no frame is being recorded");
        if slot.state == SlotState::Recording {
            slot.state = SlotState::Idle;
        }
    }

    /// Records that the current slot was submitted and advances the ring.
    /// Returns the submission's epoch.
    pub fn submitted(&mut self) -> u64 {
        self.last_submitted += 1;
        let slot = &mut self.slots[self.current];
        slot.state = SlotState::Submitted;
        slot.epoch = self.last_submitted;
        self.current = (self.current + 1) % self.slots.len();
        self.last_submitted
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.slots[index].state
    }

    /// Slots whose submission has not been observed complete.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Submitted)
            .count()
    }

    /// Newest epoch known to have finished on the GPU.
    #[inline]
    pub fn completed_epoch(&self) -> u64 {
        self.completed
    }

    #[inline]
    pub fn last_submitted_epoch(&self) -> u64 {
        self.last_submitted
    }
}

/// Handle to the slot being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub index: usize,
    /// Semaphore to pass to swapchain image acquisition.
    pub image_available: vk::Semaphore,
}

struct SlotResources {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
}

/// Per-slot command buffers and synchronization primitives.
pub struct FrameSynchronizer {
    device: Arc<Device>,
    ring: FrameRing<Fence>,
    slots: Vec<SlotResources>,
    render_finished: Vec<Semaphore>,
    // Frees the command buffers when dropped, so it goes last.
    pool: CommandPool,
}

impl FrameSynchronizer {
    pub fn new(
        device: Arc<Device>,
        frames_in_flight: usize,
        swapchain_images: usize,
        fence_timeout_ns: u64,
    ) -> RhiResult<Self> {
        let Some(graphics_family) = device.queue_families().graphics_family else {
            return Err(RhiError::Initialization(
                "device has no graphics queue family".to_string(),
            ));
        };
        let pool = CommandPool::new(device.clone(), graphics_family)?;
        let command_buffers = pool.allocate_command_buffers(frames_in_flight as u32)?;

        let mut fences = Vec::with_capacity(frames_in_flight);
        let mut slots = Vec::with_capacity(frames_in_flight);
        for (i, command_buffer) in command_buffers.into_iter().enumerate() {
            fences.push(Fence::new(device.clone(), true)?);
            slots.push(SlotResources {
                command_buffer,
                image_available: Semaphore::new(device.clone())?,
            });
            debug!("Created frame slot {}", i);
        }

        let ring = FrameRing::new(fences, fence_timeout_ns)?;
        let render_finished = create_semaphores(&device, swapchain_images)?;

        info!(
            "Frame synchronizer ready: {} frames in flight, {} swapchain images",
            frames_in_flight, swapchain_images
        );

        Ok(Self {
            device,
            ring,
            slots,
            render_finished,
            pool,
        })
    }

    /// Waits for the current slot's previous frame, then resets its command
    /// buffer and begins recording.
    pub fn begin_frame(&mut self) -> RhiResult<FrameSlot> {
        let index = self.ring.begin()?;
        let slot = &self.slots[index];
        slot.command_buffer.reset()?;
        slot.command_buffer.begin()?;

        Ok(FrameSlot {
            index,
            image_available: slot.image_available.handle(),
        })
    }

    /// Call after a successful acquire: the frame will be submitted.
    pub fn image_acquired(&mut self, _slot: FrameSlot) -> RhiResult<()> {
        self.ring.arm()
    }

    /// Abandons the frame after an out-of-date acquire. The slot is reused
    /// by the retry.
    pub fn cancel_frame(&mut self, slot: FrameSlot) {
        trace!("Frame in slot {} cancelled", slot.index);
        self.ring.cancel();
    }

    /// Abandons the frame without an image and moves to the next slot.
    pub fn skip_frame(&mut self, slot: FrameSlot) {
        trace!("Frame in slot {} skipped", slot.index);
        self.ring.skip();
    }

    #[inline]
    pub fn command_buffer(&self, slot: FrameSlot) -> &CommandBuffer {
        &self.slots[slot.index].command_buffer
    }

    /// Ends recording, submits to the graphics queue and presents
    /// `image_index`.
    pub fn end_frame(
        &mut self,
        slot: FrameSlot,
        image_index: u32,
        swapchain: &Swapchain,
    ) -> RhiResult<PresentOutcome> {
        let resources = &self.slots[slot.index];
        resources.command_buffer.end()?;

        let render_finished = self
            .render_finished
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "image index {} has no render-finished semaphore",
                    image_index
                ))
            })?
            .handle();

        let wait_semaphores = [resources.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [resources.command_buffer.handle()];
        let signal_semaphores = [render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer finished recording above and the fence
        // was reset by `image_acquired`, so it has no pending signal.
        unsafe {
            self.device.handle().queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                self.ring.slots[slot.index].signal.handle(),
            )?;
        }
        let epoch = self.ring.submitted();
        trace!("Submitted slot {} as epoch {}", slot.index, epoch);

        swapchain.present(self.device.present_queue(), image_index, render_finished)
    }

    /// Replaces the per-image semaphores after swapchain recreation and
    /// hands back the old set for deferred destruction.
    pub fn rebuild_image_semaphores(&mut self, swapchain_images: usize) -> RhiResult<Vec<Semaphore>> {
        let fresh = create_semaphores(&self.device, swapchain_images)?;
        debug!("Rebuilt {} render-finished semaphores", swapchain_images);
        Ok(std::mem::replace(&mut self.render_finished, fresh))
    }

    #[inline]
    pub fn completed_epoch(&self) -> u64 {
        self.ring.completed_epoch()
    }

    #[inline]
    pub fn last_submitted_epoch(&self) -> u64 {
        self.ring.last_submitted_epoch()
    }

}

fn create_semaphores(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Semaphore>> {
    (0..count).map(|_| Semaphore::new(device.clone())).collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// Fence stand-in. A wait on a pending signal models the GPU finishing
    /// the work, unless the signal is stuck.
    #[derive(Clone)]
    struct MockSignal {
        signaled: Rc<Cell<bool>>,
        waits: Rc<Cell<u32>>,
        stuck: bool,
    }

    impl MockSignal {
        fn new() -> Self {
            Self {
                signaled: Rc::new(Cell::new(true)),
                waits: Rc::new(Cell::new(0)),
                stuck: false,
            }
        }
    }

    impl CompletionSignal for MockSignal {
        fn wait(&self, _timeout_ns: u64) -> RhiResult<bool> {
            if !self.signaled.get() {
                self.waits.set(self.waits.get() + 1);
                if self.stuck {
                    return Ok(false);
                }
                self.signaled.set(true);
            }
            Ok(true)
        }

        fn reset(&self) -> RhiResult<()> {
            self.signaled.set(false);
            Ok(())
        }
    }

    fn ring(n: usize) -> (FrameRing<MockSignal>, Vec<MockSignal>) {
        let signals: Vec<MockSignal> = (0..n).map(|_| MockSignal::new()).collect();
        (FrameRing::new(signals.clone(), u64::MAX).unwrap(), signals)
    }

    fn run_frame(ring: &mut FrameRing<MockSignal>) -> u64 {
        ring.begin().unwrap();
        ring.arm().unwrap();
        ring.submitted()
    }

    #[test]
    fn test_never_more_than_n_in_flight() {
        for n in 2..=3 {
            let (mut ring, _) = ring(n);
            for _ in 0..20 {
                run_frame(&mut ring);
                assert!(ring.in_flight() <= n);
            }
            assert_eq!(ring.in_flight(), n);
        }
    }

    #[test]
    fn test_fourth_frame_waits_for_slot_zero() {
        let (mut ring, signals) = ring(3);
        for _ in 0..3 {
            run_frame(&mut ring);
        }
        assert_eq!(ring.state(0), SlotState::Submitted);
        assert_eq!(signals[0].waits.get(), 0);

        let index = ring.begin().unwrap();
        assert_eq!(index, 0);
        assert_eq!(signals[0].waits.get(), 1);
        assert_eq!(ring.state(0), SlotState::Recording);
        assert_eq!(ring.completed_epoch(), 1);
    }

    #[test]
    fn test_first_frames_do_not_wait() {
        let (mut ring, signals) = ring(2);
        run_frame(&mut ring);
        run_frame(&mut ring);
        assert!(signals.iter().all(|s| s.waits.get() == 0));
    }

    #[test]
    fn test_retried_frame_keeps_slot_and_fence() {
        let (mut ring, signals) = ring(2);
        let index = ring.begin().unwrap();
        ring.cancel();

        assert_eq!(ring.current_index(), index);
        assert_eq!(ring.state(index), SlotState::Idle);
        assert!(signals[index].signaled.get());

        // The retry does not block on an unsignaled fence.
        assert_eq!(ring.begin().unwrap(), index);
        assert_eq!(signals[index].waits.get(), 0);
    }

    #[test]
    fn test_skipped_frame_advances_slot() {
        let (mut ring, signals) = ring(3);
        assert_eq!(ring.begin().unwrap(), 0);
        ring.skip();

        assert_eq!(ring.current_index(), 1);
        assert_eq!(ring.state(0), SlotState::Idle);
        assert!(signals[0].signaled.get());
        assert_eq!(ring.last_submitted_epoch(), 0);
        assert_eq!(ring.in_flight(), 0);

        // Wrapping back to the skipped slot does not wait on it.
        run_frame(&mut ring);
        run_frame(&mut ring);
        assert_eq!(ring.begin().unwrap(), 0);
        assert_eq!(signals[0].waits.get(), 0);
    }

    #[test]
    fn test_skip_after_wrap_releases_waited_slot() {
        let (mut ring, signals) = ring(2);
        run_frame(&mut ring);
        run_frame(&mut ring);

        assert_eq!(ring.begin().unwrap(), 0);
        ring.skip();
        assert_eq!(signals[0].waits.get(), 1);
        assert_eq!(ring.completed_epoch(), 1);
        assert_eq!(ring.in_flight(), 1);
        assert_eq!(ring.current_index(), 1);
    }

    #[test]
    fn test_slots_advance_round_robin() {
        let (mut ring, _) = ring(3);
        let order: Vec<usize> = (0..6)
            .map(|_| {
                let index = ring.begin().unwrap();
                ring.arm().unwrap();
                ring.submitted();
                index
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_epochs_are_monotonic() {
        let (mut ring, _) = ring(2);
        let epochs: Vec<u64> = (0..4).map(|_| run_frame(&mut ring)).collect();
        assert_eq!(epochs, vec![1, 2, 3, 4]);
        assert_eq!(ring.last_submitted_epoch(), 4);
        assert_eq!(ring.completed_epoch(), 2);
    }

    #[test]
    fn test_stuck_fence_times_out() {
        let mut signals: Vec<MockSignal> = (0..2).map(|_| MockSignal::new()).collect();
        signals[0].stuck = true;
        let mut ring = FrameRing::new(signals, 1_000).unwrap();
        run_frame(&mut ring);
        run_frame(&mut ring);

        let err = ring.begin().unwrap_err();
        assert!(matches!(err, RhiError::Timeout(_)));
        assert_eq!(ring.state(0), SlotState::Submitted);
    }

    #[test]
    fn test_empty_ring_rejected() {
        assert!(FrameRing::<MockSignal>::new(Vec::new(), u64::MAX).is_err());
    }
}
