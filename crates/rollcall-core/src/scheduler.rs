//! Frame scheduling — decides which frames pay for recognition — and the
//! FPS readout shown next to the overlays.

use std::time::{Duration, Instant};

/// Default: recognise every other frame.
pub const DEFAULT_FRAME_STRIDE: u32 = 2;

/// Runs recognition on one frame out of every `stride`, starting with the
/// first. Frames in between reuse the previous overlays.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    stride: u32,
    position: u32,
}

impl FrameScheduler {
    /// A stride of 0 is treated as 1.
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            position: 0,
        }
    }

    /// Whether the current frame should run recognition.
    pub fn should_process(&self) -> bool {
        self.position == 0
    }

    /// Move to the next frame. Called exactly once per frame.
    pub fn advance(&mut self) {
        self.position = (self.position + 1) % self.stride;
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_STRIDE)
    }
}

/// Frames-per-second over the last elapsed second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count one frame and return the current readout.
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = f64::from(self.frames) / elapsed.as_secs_f64();
            self.window_start = now;
            self.frames = 0;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
