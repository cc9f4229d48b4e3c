//! Frame clock driving the engine tick.
//!
//! # Example
//!
//! ```ignore
//! let mut clock = FrameClock::new();
//! // once per frame:
//! let (elapsed, delta) = clock.tick();
//! ```
//!
//! Headless rendering and tests use [`FrameClock::fixed`] so every frame
//! advances by the same step and output is reproducible.

use std::time::{Duration, Instant};

/// Elapsed/delta time and frame counting.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    elapsed_secs: f32,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
    /// Fixed delta for deterministic stepping.
    fixed_delta: Option<f32>,
}

impl FrameClock {
    /// Wall-clock driven timer starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: Duration::from_millis(500),
            fixed_delta: None,
        }
    }

    /// Timer that advances by exactly `delta` seconds per tick.
    pub fn fixed(delta: f32) -> Self {
        Self {
            fixed_delta: Some(delta.max(0.0)),
            ..Self::new()
        }
    }

    /// Advance one frame. Returns `(elapsed, delta)`.
    pub fn tick(&mut self) -> (f32, f32) {
        let now = Instant::now();
        self.frame_count += 1;

        match self.fixed_delta {
            Some(delta) => {
                self.delta_secs = delta;
                self.elapsed_secs += delta;
            }
            None => {
                self.delta_secs = now.duration_since(self.last_frame).as_secs_f32();
                self.elapsed_secs = now.duration_since(self.start).as_secs_f32();
            }
        }
        self.last_frame = now;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        (self.elapsed_secs, self.delta_secs)
    }

    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    /// Frames ticked so far.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second, refreshed twice a second.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_steps_exactly() {
        let mut clock = FrameClock::fixed(0.5);
        assert_eq!(clock.tick(), (0.5, 0.5));
        assert_eq!(clock.tick(), (1.0, 0.5));
        assert_eq!(clock.frame(), 2);
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let mut clock = FrameClock::new();
        let (a, _) = clock.tick();
        let (b, delta) = clock.tick();
        assert!(b >= a);
        assert!(delta >= 0.0);
        assert_eq!(clock.frame(), 2);
    }
}
