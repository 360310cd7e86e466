//! Capped exponential schedules
//!
//! Credential quarantine and per-attempt call timeouts both grow by doubling
//! from a base value up to a ceiling. Each owner keeps its own
//! `BackoffSchedule` so the two curves can be tuned independently.

use std::time::Duration;

/// A doubling schedule clamped at a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    /// Value for the first step
    pub base: Duration,

    /// Upper bound for every step
    pub ceiling: Duration,
}

impl BackoffSchedule {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self { base, ceiling }
    }

    /// Value for a 1-based step: `min(base * 2^(step - 1), ceiling)`.
    ///
    /// Step 0 is treated as step 1.
    pub fn step(&self, step: u32) -> Duration {
        capped_exponential(self.base, step.saturating_sub(1), self.ceiling)
    }

    /// Same schedule with a different base
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }
}

/// `min(base * 2^exponent, ceiling)` without floating point or overflow.
pub fn capped_exponential(base: Duration, exponent: u32, ceiling: Duration) -> Duration {
    1u32.checked_shl(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(ceiling, |value| value.min(ceiling))
}
