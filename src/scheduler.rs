// src/scheduler.rs

use std::thread;
use std::time::{Duration, Instant};

/// Paces the render loop to a target frame rate.
pub struct FrameScheduler {
    frame_budget: Duration,
}

impl FrameScheduler {
    pub fn new(target_fps: u32) -> Self {
        let safe_fps = target_fps.max(1);
        let frame_budget = Duration::from_nanos(1_000_000_000u64 / safe_fps as u64);
        Self { frame_budget }
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    /// Time left in the budget of a frame that started at `frame_start`.
    pub fn remaining(&self, frame_start: Instant) -> Duration {
        self.frame_budget.saturating_sub(frame_start.elapsed())
    }

    /// Sleeps out the rest of the frame that started at `frame_start`.
    pub fn wait(&self, frame_start: Instant) {
        let remaining = self.remaining(frame_start);
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}
