//! Deferred destruction of GPU resources.
//!
//! A resource that may still be referenced by submitted work is retired
//! with the epoch of the newest submission at that time. It is dropped once
//! the frame loop has observed that epoch complete.

use std::any::Any;
use std::collections::VecDeque;

use tracing::trace;

/// Queue of retired resources ordered by epoch.
pub struct DeletionQueue<T = Box<dyn Any>> {
    pending: VecDeque<(u64, T)>,
}

impl<T> DeletionQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Queues `item` for destruction once `epoch` has completed.
    ///
    /// Epochs must be retired in non-decreasing order.
    pub fn retire(&mut self, epoch: u64, item: T) {
        debug_assert!(self.pending.back().is_none_or(|(last, _)| *last <= epoch));
        self.pending.push_back((epoch, item));
    }

    /// Drops every item whose epoch is at or below `completed_epoch`.
    /// Returns how many were dropped.
    pub fn drain(&mut self, completed_epoch: u64) -> usize {
        let mut dropped = 0;
        while self
            .pending
            .front()
            .is_some_and(|(epoch, _)| *epoch <= completed_epoch)
        {
            self.pending.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            trace!(
                "Released {} retired resource(s) up to epoch {}",
                dropped, completed_epoch
            );
        }
        dropped
    }

    /// Drops everything. Only valid once the device is idle.
    pub fn flush(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for DeletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Tracked(Rc<Cell<u32>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_nothing_dropped_before_epoch_completes() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeletionQueue::new();
        queue.retire(3, Tracked(drops.clone()));
        queue.retire(5, Tracked(drops.clone()));

        assert_eq!(queue.drain(2), 0);
        assert_eq!(drops.get(), 0);

        assert_eq!(queue.drain(4), 1);
        assert_eq!(drops.get(), 1);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(5), 1);
        assert_eq!(drops.get(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_drops_everything() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeletionQueue::new();
        for epoch in 0..4 {
            queue.retire(epoch, Tracked(drops.clone()));
        }
        assert_eq!(queue.flush(), 4);
        assert_eq!(drops.get(), 4);
    }

    #[test]
    fn test_boxed_items() {
        let mut queue: DeletionQueue = DeletionQueue::new();
        queue.retire(0, Box::new(vec![1u8, 2, 3]));
        queue.retire(1, Box::new(String::from("view")));
        assert_eq!(queue.drain(0), 1);
        assert_eq!(queue.len(), 1);
    }
}
