//! Simulation clock.
//!
//! The world owns one [`SimClock`] and advances it by the caller's delta at
//! the start of every tick. Elapsed time is kept in `f64` so spawn-rate
//! gating stays exact over long runs; kernels receive it as `f32`.
//!
//! # Example
//!
//! ```ignore
//! use boid_flocks::time::SimClock;
//!
//! let mut clock = SimClock::new();
//! clock.advance(0.1);
//!
//! println!("Elapsed: {:.2}s", clock.elapsed());
//! println!("Delta: {:.4}s", clock.delta());
//! println!("Frame: {}", clock.frame());
//! ```

/// Time tracking for a simulation driven by explicit deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    /// Total simulated time in seconds.
    elapsed: f64,
    /// Scaled delta of the last advance.
    delta: f32,
    /// Advances so far, paused ones included.
    frame: u64,
    paused: bool,
    /// Time scale multiplier (1.0 = normal speed).
    time_scale: f32,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            elapsed: 0.0,
            delta: 0.0,
            frame: 0,
            paused: false,
            time_scale: 1.0,
        }
    }

    /// Advance by `dt` seconds, scaled. A paused clock counts the frame but
    /// does not move. Negative deltas are treated as zero.
    pub fn advance(&mut self, dt: f32) -> f32 {
        self.frame += 1;
        self.delta = if self.paused { 0.0 } else { dt.max(0.0) * self.time_scale };
        self.elapsed += self.delta as f64;
        self.delta
    }

    /// Total simulated time in seconds.
    #[inline]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Elapsed time as the kernels see it.
    #[inline]
    pub fn elapsed_f32(&self) -> f32 {
        self.elapsed as f32
    }

    /// Delta of the last advance.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether the clock has advanced at least once.
    pub fn is_running(&self) -> bool {
        self.frame > 0
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Set the time scale (1.0 = normal, 0.5 = half speed). Clamped to >= 0.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }
}
