use core::fmt;

use tinyrand::{Rand, Seeded, Wyrand};
use tinyrand_std::ClockSeed;

/// Source of uniform draws in `[0, 1)` for the dampening step.
pub trait RandomSource {
    fn next_unit(&mut self) -> f64;
}

/// Wyrand generator, clock-seeded unless a seed is given.
pub struct WyRandom(Wyrand);

// `Wyrand` has no `Debug`, and its state shouldn't end up in logs anyway.
impl fmt::Debug for WyRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WyRandom").finish_non_exhaustive()
    }
}

impl WyRandom {
    pub fn from_clock() -> Self {
        Self::seeded(ClockSeed::default().next_u64())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(Wyrand::seed(seed))
    }
}

impl RandomSource for WyRandom {
    fn next_unit(&mut self) -> f64 {
        // top 53 bits -> exactly representable in an f64 mantissa
        (self.0.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl RandomSource for FixedDraw {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}
