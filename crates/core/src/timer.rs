//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// How often the averaged frame rate is refreshed.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Measures per-frame delta time and a rolling frames-per-second figure.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    fps: f32,
}

impl FrameTimer {
    /// Create a timer starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    /// Total time since creation.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Advance one frame and return the time since the previous tick.
    ///
    /// Returns `Some(fps)` once per reporting interval.
    pub fn tick(&mut self) -> (Duration, Option<f32>) {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.window_frames += 1;

        let window = now - self.window_start;
        if window >= REPORT_INTERVAL {
            self.fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_frames = 0;
            self.window_start = now;
            return (delta, Some(self.fps));
        }
        (delta, None)
    }

    /// Most recently computed frame rate.
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
