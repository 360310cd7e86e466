//! Load balancing strategies
//!
//! Strategies pick one credential among the currently usable ones. They work
//! on positions in the pool's configured order and never see secrets.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

// ============================================================================
// Load Balance Strategy
// ============================================================================

/// Load balancing strategy for credential selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    /// Rotate through usable credentials in configured order (default)
    #[default]
    RoundRobin,
    /// Uniform pick among usable credentials
    Random,
    /// Pick the usable credential idle for the longest time
    LeastRecentlyUsed,
}

impl LoadBalanceStrategy {
    /// Parse a configured name (case-insensitive).
    ///
    /// Unknown names fall back to round-robin with a warning.
    pub fn from_name(name: &str) -> Self {
        match Self::parse(name) {
            Some(strategy) => strategy,
            None => {
                tracing::warn!(
                    strategy = %name,
                    fallback = %Self::RoundRobin,
                    "Unrecognized load balancing strategy, using fallback"
                );
                Self::RoundRobin
            }
        }
    }

    /// Strict parse, `None` for unknown names
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "least-recently-used" | "leastrecentlyused" | "lru" => Some(Self::LeastRecentlyUsed),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::Random => write!(f, "random"),
            Self::LeastRecentlyUsed => write!(f, "least-recently-used"),
        }
    }
}

// ============================================================================
// Strategy State
// ============================================================================

/// Round-robin cursor over the pool's configured order
///
/// The cursor remembers the position of the last pick; the next pick is the
/// first usable position after it, wrapping. Positions that are not usable
/// are skipped, so a shrinking usable set never strands the cursor.
#[derive(Debug, Default)]
pub struct RoundRobinState {
    last: Option<usize>,
}

impl RoundRobinState {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Pick the next position among `usable` (ascending positions in `0..total`).
    pub fn next(&mut self, usable: &[usize], total: usize) -> Option<usize> {
        if usable.is_empty() || total == 0 {
            return None;
        }

        let start = match self.last {
            Some(last) => (last + 1) % total,
            None => 0,
        };

        let picked = usable
            .iter()
            .copied()
            .find(|&pos| pos >= start)
            .unwrap_or(usable[0]);

        self.last = Some(picked);
        Some(picked)
    }

    /// Move the cursor onto a position picked outside the rotation
    pub fn mark(&mut self, position: usize) {
        self.last = Some(position);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Uniform pick among `usable`
pub fn pick_random(usable: &[usize]) -> Option<usize> {
    if usable.is_empty() {
        return None;
    }
    let pos = rand::thread_rng().gen_range(0..usable.len());
    Some(usable[pos])
}

/// Pick the entry with the oldest last-used time; never-used entries first.
///
/// Ties resolve to the earliest configured position.
pub fn pick_least_recently_used(candidates: &[(usize, Option<Instant>)]) -> Option<usize> {
    candidates
        .iter()
        .min_by_key(|(_, last_used)| *last_used)
        .map(|(pos, _)| *pos)
}

// ============================================================================
// Tests
// ============================================================================
