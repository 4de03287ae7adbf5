//! Random placement for freshly activated agents.
//!
//! Every world owns one [`SpawnRng`] seeded from its scene seed, so two runs
//! of the same scene spawn identical agents.

use glam::Vec2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::{FRAC_PI_2, TAU};

/// Initial state applied to an agent on activation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec2,
    pub heading: Vec2,
    pub speed: f32,
}

/// Seeded RNG with the spawn helpers flocks need.
#[derive(Debug, Clone)]
pub struct SpawnRng {
    rng: SmallRng,
}

impl SpawnRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    // ========== Random primitives ==========

    /// Random f32 between 0.0 and 1.0.
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random f32 in `[min, max)`. Returns `min` for an empty range.
    #[inline]
    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        }
    }

    // ========== Position helpers ==========

    /// Random point on a circle of `radius` around `center`.
    pub fn random_on_ring(&mut self, center: Vec2, radius: f32) -> Vec2 {
        center + self.random_direction() * radius
    }

    // ========== Direction helpers ==========

    /// Random unit vector.
    pub fn random_direction(&mut self) -> Vec2 {
        let theta = self.rng.gen_range(0.0..TAU);
        Vec2::from_angle(theta)
    }

    /// Heading pointing away from `origin`, rotated by a uniform angle in
    /// [-90°, +90°].
    ///
    /// Falls back to a random direction when `position` sits on the origin.
    pub fn dispersal_heading(&mut self, origin: Vec2, position: Vec2) -> Vec2 {
        let outward = (position - origin).normalize_or_zero();
        if outward == Vec2::ZERO {
            return self.random_direction();
        }
        let angle = self.rng.gen_range(-FRAC_PI_2..=FRAC_PI_2);
        Vec2::from_angle(angle).rotate(outward)
    }

    /// Full placement on the spawn ring of a flock.
    pub fn placement(&mut self, origin: Vec2, spawn_radius: f32, min_speed: f32, max_speed: f32) -> Placement {
        let position = self.random_on_ring(origin, spawn_radius);
        let heading = self.dispersal_heading(origin, position);
        let speed = self.random_range(min_speed, max_speed);
        Placement {
            position,
            heading,
            speed,
        }
    }
}
