//! Credential records and the handles given out to callers
//!
//! A `Credential` lives inside the pool for the whole process lifetime and is
//! only mutated while the pool lock is held. Callers get a `CredentialHandle`,
//! a cheap reference that carries the secret and the credential's position.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::{mask_secret, BackoffSchedule};

// ============================================================================
// Health
// ============================================================================

/// Health of a single credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Usable for outbound calls
    Good,
    /// Skipped by selection until `until` has passed
    Quarantined { until: Instant },
}

impl CredentialStatus {
    pub fn is_good(&self) -> bool {
        matches!(self, CredentialStatus::Good)
    }

    /// Quarantine expiry, if quarantined
    pub fn quarantined_until(&self) -> Option<Instant> {
        match self {
            CredentialStatus::Good => None,
            CredentialStatus::Quarantined { until } => Some(*until),
        }
    }
}

/// Result of one call made with a credential, as reported back to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

// ============================================================================
// Credential
// ============================================================================

/// One session identity usable against the upstream API
pub struct Credential {
    name: String,
    secret: Arc<str>,
    status: CredentialStatus,
    failure_count: u32,
    last_used: Option<Instant>,
    /// Base of the quarantine curve; reset to the pool floor on success
    base_quarantine: Duration,
}

impl Credential {
    pub(crate) fn new(name: String, secret: impl Into<Arc<str>>, floor: Duration) -> Self {
        Self {
            name,
            secret: secret.into(),
            status: CredentialStatus::Good,
            failure_count: 0,
            last_used: None,
            base_quarantine: floor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CredentialStatus {
        self.status
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    pub fn base_quarantine(&self) -> Duration {
        self.base_quarantine
    }

    /// Good, or quarantined with an expiry at or before `now`
    pub(crate) fn is_available_at(&self, now: Instant) -> bool {
        match self.status {
            CredentialStatus::Good => true,
            CredentialStatus::Quarantined { until } => until <= now,
        }
    }

    /// Flip an expired quarantine back to Good. Returns true if promoted.
    pub(crate) fn promote_if_expired(&mut self, now: Instant) -> bool {
        match self.status {
            CredentialStatus::Quarantined { until } if until <= now => {
                self.status = CredentialStatus::Good;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_used = Some(now);
    }

    pub(crate) fn record_success(&mut self, floor: Duration) {
        self.status = CredentialStatus::Good;
        self.failure_count = 0;
        self.base_quarantine = floor;
    }

    /// Apply one failure and return the quarantine length chosen for it.
    pub(crate) fn record_failure(&mut self, now: Instant, ceiling: Duration) -> Duration {
        self.failure_count = self.failure_count.saturating_add(1);
        let duration = BackoffSchedule::new(self.base_quarantine, ceiling).step(self.failure_count);
        self.status = CredentialStatus::Quarantined {
            until: now + duration,
        };
        duration
    }

    pub(crate) fn reset(&mut self, floor: Duration) {
        self.record_success(floor);
    }

    pub(crate) fn handle(&self, index: usize) -> CredentialHandle {
        CredentialHandle {
            index,
            name: self.name.clone(),
            secret: Arc::clone(&self.secret),
        }
    }

    pub(crate) fn snapshot(&self, now: Instant) -> CredentialSnapshot {
        let quarantine_remaining_ms = self
            .status
            .quarantined_until()
            .map(|until| until.saturating_duration_since(now).as_millis() as u64);

        CredentialSnapshot {
            name: self.name.clone(),
            masked_value: mask_secret(&self.secret),
            status: if self.status.is_good() {
                "good"
            } else {
                "quarantined"
            },
            failure_count: self.failure_count,
            quarantine_remaining_ms,
            idle_ms: self
                .last_used
                .map(|used| now.saturating_duration_since(used).as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &mask_secret(&self.secret))
            .field("status", &self.status)
            .field("failure_count", &self.failure_count)
            .field("last_used", &self.last_used)
            .field("base_quarantine", &self.base_quarantine)
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Reference to a pooled credential, returned by selection
///
/// Holding a handle does not reserve the credential; several in-flight calls
/// may use the same one.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHandle {
    index: usize,
    name: String,
    secret: Arc<str>,
}

impl CredentialHandle {
    /// Position of the credential in configured order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session secret to send upstream
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("secret", &mask_secret(&self.secret))
            .finish()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time copy of one credential's health, safe to render
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub name: String,
    pub masked_value: String,
    pub status: &'static str,
    pub failure_count: u32,
    /// Time left in quarantine; 0 once expired but not yet re-evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_remaining_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
}

// ============================================================================
// Tests
// ============================================================================
