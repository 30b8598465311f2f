//! High-resolution timer for frame timing and animation.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling frame counter that reports an average once per window.
#[derive(Debug)]
pub struct FrameStats {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FrameStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Records one frame. Returns `(fps, avg_frame_ms)` when a full window
    /// has elapsed, then starts a new window.
    pub fn record(&mut self, delta: Duration) -> Option<(f32, f32)> {
        self.accumulated += delta;
        self.frames += 1;

        if self.accumulated < self.window {
            return None;
        }

        let secs = self.accumulated.as_secs_f32();
        let fps = self.frames as f32 / secs;
        let avg_ms = secs * 1000.0 / self.frames as f32;
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        Some((fps, avg_ms))
    }
}
