//! Credential Pool Implementation
//!
//! `CredentialPool` owns every configured credential, picks one per outbound
//! call, and tracks quarantine state from reported outcomes. All mutation
//! (selection, reporting, reset) happens inside one pool-wide mutex; hold
//! times are a scan over a handful of records.
//!
//! Quarantine expiry is evaluated lazily during selection. There is no
//! background timer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::credential::{Credential, CredentialHandle, CredentialSnapshot, Outcome};
use super::strategy::{pick_least_recently_used, pick_random, LoadBalanceStrategy, RoundRobinState};

/// Quarantine base a credential starts from and returns to on success
pub const DEFAULT_QUARANTINE_FLOOR: Duration = Duration::from_secs(1);

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration for credential pool behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Load balancing strategy
    pub strategy: LoadBalanceStrategy,
    /// Attempts allowed per logical upstream call
    pub max_retries: u32,
    /// First-attempt timeout for upstream calls
    pub base_timeout: Duration,
    /// Ceiling for the quarantine curve
    pub max_backoff: Duration,
    /// Quarantine base after a success or reset
    pub quarantine_floor: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::RoundRobin,
            max_retries: 5,
            base_timeout: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            quarantine_floor: DEFAULT_QUARANTINE_FLOOR,
        }
    }
}

impl PoolConfig {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = timeout;
        self
    }

    pub fn with_max_backoff(mut self, ceiling: Duration) -> Self {
        self.max_backoff = ceiling;
        self
    }

    pub fn with_quarantine_floor(mut self, floor: Duration) -> Self {
        self.quarantine_floor = floor;
        self
    }
}

/// Pool construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("credential list is empty; at least one upstream credential is required")]
    EmptyCredentialList,
}

// ============================================================================
// Credential Pool
// ============================================================================

#[derive(Debug)]
struct PoolInner {
    credentials: Vec<Credential>,
    round_robin: RoundRobinState,
}

/// A fixed set of upstream credentials with load balancing and quarantine
#[derive(Debug)]
pub struct CredentialPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl CredentialPool {
    /// Create a pool from raw secret values, in configured order.
    pub fn new<S: AsRef<str>>(values: &[S], config: PoolConfig) -> Result<Self, PoolError> {
        if values.is_empty() {
            return Err(PoolError::EmptyCredentialList);
        }

        let credentials = values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                Credential::new(
                    format!("credential_{}", idx + 1),
                    value.as_ref(),
                    config.quarantine_floor,
                )
            })
            .collect();

        Ok(Self {
            config,
            inner: Mutex::new(PoolInner {
                credentials,
                round_robin: RoundRobinState::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.config.strategy
    }

    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a credential for one outbound call.
    ///
    /// Returns `None` when every credential is quarantined and none has
    /// expired; the caller decides the fallback.
    pub fn select(&self) -> Option<CredentialHandle> {
        self.select_at(Instant::now())
    }

    /// `select` evaluated at an explicit instant
    pub fn select_at(&self, now: Instant) -> Option<CredentialHandle> {
        let mut guard = self.lock();
        let PoolInner {
            credentials,
            round_robin,
        } = &mut *guard;

        let mut promoted = None;
        let mut usable = Vec::with_capacity(credentials.len());
        for (pos, cred) in credentials.iter_mut().enumerate() {
            if cred.promote_if_expired(now) {
                tracing::info!(
                    credential = %cred.name(),
                    failures = cred.failure_count(),
                    "Credential quarantine expired, returning to rotation"
                );
                promoted.get_or_insert(pos);
            }
            if cred.status().is_good() {
                usable.push(pos);
            }
        }

        // A freshly recovered credential is probed before the rotation resumes.
        let picked = if let Some(pos) = promoted {
            round_robin.mark(pos);
            Some(pos)
        } else if usable.is_empty() {
            Self::log_exhausted(credentials, now);
            None
        } else {
            match self.config.strategy {
                LoadBalanceStrategy::RoundRobin => round_robin.next(&usable, credentials.len()),
                LoadBalanceStrategy::Random => pick_random(&usable),
                LoadBalanceStrategy::LeastRecentlyUsed => {
                    let candidates: Vec<_> = usable
                        .iter()
                        .map(|&pos| (pos, credentials[pos].last_used()))
                        .collect();
                    pick_least_recently_used(&candidates)
                }
            }
        };

        let pos = picked?;
        let cred = &mut credentials[pos];
        cred.touch(now);
        Some(cred.handle(pos))
    }

    /// Nothing is Good and nothing expired during the scan.
    fn log_exhausted(credentials: &[Credential], now: Instant) {
        let wait = credentials
            .iter()
            .filter_map(|cred| cred.status().quarantined_until())
            .min()
            .map(|until| until.saturating_duration_since(now));
        tracing::debug!(
            wait_ms = wait.map(|w| w.as_millis() as u64),
            "All credentials quarantined"
        );
    }

    /// Record the result of a call made with `handle`.
    pub fn report(&self, handle: &CredentialHandle, outcome: Outcome) {
        self.report_at(handle, outcome, Instant::now());
    }

    /// `report` evaluated at an explicit instant
    pub fn report_at(&self, handle: &CredentialHandle, outcome: Outcome, now: Instant) {
        let mut guard = self.lock();
        let cred = match guard.credentials.get_mut(handle.index()) {
            Some(cred) if cred.name() == handle.name() => cred,
            _ => {
                tracing::warn!(
                    credential = %handle.name(),
                    "Ignoring outcome for a credential this pool does not own"
                );
                return;
            }
        };

        match outcome {
            Outcome::Success => {
                let previous_failures = cred.failure_count();
                cred.record_success(self.config.quarantine_floor);
                if previous_failures > 0 {
                    tracing::info!(
                        credential = %cred.name(),
                        previous_failures,
                        "Credential healthy again"
                    );
                }
            }
            Outcome::Failure => {
                let quarantine = cred.record_failure(now, self.config.max_backoff);
                tracing::warn!(
                    credential = %cred.name(),
                    failures = cred.failure_count(),
                    quarantine_ms = quarantine.as_millis() as u64,
                    "Credential quarantined"
                );
            }
        }
    }

    /// Return every credential to Good with a clean failure history.
    pub fn reset_all(&self) {
        let mut guard = self.lock();
        for cred in guard.credentials.iter_mut() {
            cred.reset(self.config.quarantine_floor);
        }
        guard.round_robin.reset();
        tracing::info!(
            credentials = guard.credentials.len(),
            "All credentials reset"
        );
    }

    /// Time until some credential can be selected; zero if one already can.
    ///
    /// `None` only for a pool without credentials.
    pub fn next_recovery_in(&self) -> Option<Duration> {
        self.next_recovery_at(Instant::now())
    }

    pub fn next_recovery_at(&self, now: Instant) -> Option<Duration> {
        self.lock()
            .credentials
            .iter()
            .map(|cred| match cred.status().quarantined_until() {
                None => Duration::ZERO,
                Some(until) => until.saturating_duration_since(now),
            })
            .min()
    }

    /// Number of credentials selection could hand out right now
    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .credentials
            .iter()
            .filter(|cred| cred.is_available_at(now))
            .count()
    }

    /// Point-in-time copy of pool health
    pub fn snapshot(&self) -> PoolSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> PoolSnapshot {
        let guard = self.lock();
        let credentials: Vec<CredentialSnapshot> =
            guard.credentials.iter().map(|cred| cred.snapshot(now)).collect();
        let good = guard
            .credentials
            .iter()
            .filter(|cred| cred.status().is_good())
            .count();
        let available = guard
            .credentials
            .iter()
            .filter(|cred| cred.is_available_at(now))
            .count();
        drop(guard);

        PoolSnapshot {
            taken_at: Utc::now(),
            strategy: self.config.strategy,
            total: credentials.len(),
            good,
            quarantined: credentials.len() - good,
            available,
            credentials,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Pool Snapshot
// ============================================================================

/// Statistics about a credential pool, copied out of the lock
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub taken_at: DateTime<Utc>,
    pub strategy: LoadBalanceStrategy,
    pub total: usize,
    /// Credentials currently marked Good
    pub good: usize,
    /// Credentials currently marked Quarantined, expired or not
    pub quarantined: usize,
    /// Good plus quarantined-but-expired
    pub available: usize,
    pub credentials: Vec<CredentialSnapshot>,
}

impl PoolSnapshot {
    /// At least one credential can be selected
    pub fn is_healthy(&self) -> bool {
        self.available > 0
    }
}

// ============================================================================
// Credential Source
// ============================================================================

/// What the call executor needs from a credential store
pub trait CredentialSource: Send + Sync {
    /// Next usable credential, or `None` when every credential is quarantined
    fn select(&self) -> Option<CredentialHandle>;

    /// Record the outcome of one attempt made with `handle`
    fn report(&self, handle: &CredentialHandle, outcome: Outcome);

    /// Time until a credential becomes selectable
    fn next_recovery_in(&self) -> Option<Duration>;
}

impl CredentialSource for CredentialPool {
    fn select(&self) -> Option<CredentialHandle> {
        CredentialPool::select(self)
    }

    fn report(&self, handle: &CredentialHandle, outcome: Outcome) {
        CredentialPool::report(self, handle, outcome)
    }

    fn next_recovery_in(&self) -> Option<Duration> {
        CredentialPool::next_recovery_in(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn create_pool(strategy: LoadBalanceStrategy) -> CredentialPool {
        CredentialPool::new(
            &["token1", "token2", "token3"],
            PoolConfig::new(strategy).with_max_backoff(Duration::from_secs(8)),
        )
        .unwrap()
    }

    fn quarantine_left(pool: &CredentialPool, name: &str, now: Instant) -> Option<u64> {
        pool.snapshot_at(now)
            .credentials
            .into_iter()
            .find(|c| c.name == name)
            .and_then(|c| c.quarantine_remaining_ms)
    }

    #[test]
    fn test_new_pool() {
        let config = PoolConfig::new(LoadBalanceStrategy::Random)
            .with_max_retries(5)
            .with_base_timeout(Duration::from_millis(1000))
            .with_max_backoff(Duration::from_millis(32000));
        let pool = CredentialPool::new(&["token1", "token2", "token3"], config.clone()).unwrap();

        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
        assert_eq!(pool.config(), &config);
        assert_eq!(pool.strategy(), LoadBalanceStrategy::Random);
        assert_eq!(pool.config().quarantine_floor, DEFAULT_QUARANTINE_FLOOR);
    }

    #[test]
    fn test_empty_pool_rejected() {
        let values: [&str; 0] = [];
        let result = CredentialPool::new(&values, PoolConfig::default());
        assert_eq!(result.unwrap_err(), PoolError::EmptyCredentialList);
    }

    #[test]
    fn test_round_robin_selection() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let names: Vec<String> = (0..6)
            .map(|_| pool.select().unwrap().name().to_string())
            .collect();

        assert_eq!(
            names,
            [
                "credential_1",
                "credential_2",
                "credential_3",
                "credential_1",
                "credential_2",
                "credential_3"
            ]
        );
    }

    #[test]
    fn test_quarantine_scenario() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let t0 = Instant::now();

        let first: Vec<CredentialHandle> = (0..3).map(|_| pool.select_at(t0).unwrap()).collect();
        let secrets: Vec<&str> = first.iter().map(|h| h.secret()).collect();
        assert_eq!(secrets, ["token1", "token2", "token3"]);

        pool.report_at(&first[0], Outcome::Failure, t0);
        assert_eq!(quarantine_left(&pool, "credential_1", t0), Some(1000));

        let skipped: Vec<String> = (0..4)
            .map(|_| pool.select_at(t0).unwrap().secret().to_string())
            .collect();
        assert_eq!(skipped, ["token2", "token3", "token2", "token3"]);

        let recovered = pool.select_at(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(recovered.secret(), "token1");
        assert_eq!(pool.snapshot_at(t0 + Duration::from_secs(1)).good, 3);
    }

    #[test]
    fn test_quarantine_doubles_until_ceiling() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let now = Instant::now();
        let handle = pool.select_at(now).unwrap();

        let expected_ms = [1000, 2000, 4000, 8000, 8000, 8000];
        for (k, expected) in expected_ms.iter().enumerate() {
            pool.report_at(&handle, Outcome::Failure, now);
            assert_eq!(
                quarantine_left(&pool, handle.name(), now),
                Some(*expected),
                "after {} failures",
                k + 1
            );
        }

        pool.report_at(&handle, Outcome::Success, now);
        let snap = pool.snapshot_at(now);
        let cred = &snap.credentials[handle.index()];
        assert_eq!(cred.status, "good");
        assert_eq!(cred.failure_count, 0);

        // Curve starts over from the floor
        pool.report_at(&handle, Outcome::Failure, now);
        assert_eq!(quarantine_left(&pool, handle.name(), now), Some(1000));
    }

    #[test]
    fn test_earliest_expiry_recovers_first() {
        let pool = CredentialPool::new(&["token1", "token2"], PoolConfig::default()).unwrap();
        let t0 = Instant::now();

        let a = pool.select_at(t0).unwrap();
        let b = pool.select_at(t0).unwrap();
        pool.report_at(&a, Outcome::Failure, t0);
        pool.report_at(&b, Outcome::Failure, t0);
        pool.report_at(&b, Outcome::Failure, t0);

        assert!(pool.select_at(t0).is_none());
        assert_eq!(
            pool.next_recovery_at(t0),
            Some(Duration::from_secs(1))
        );

        // a expires first (1s) while b still has 2s
        let later = t0 + Duration::from_millis(1500);
        let picked = pool.select_at(later).unwrap();
        assert_eq!(picked.name(), "credential_1");
        let snap = pool.snapshot_at(later);
        assert_eq!(snap.credentials[0].status, "good");
        assert_eq!(snap.credentials[1].status, "quarantined");
        assert_eq!(snap.good, 1);
    }

    #[test]
    fn test_all_quarantined_returns_none() {
        let pool = CredentialPool::new(&["only"], PoolConfig::default()).unwrap();
        let now = Instant::now();
        let handle = pool.select_at(now).unwrap();
        pool.report_at(&handle, Outcome::Failure, now);

        assert!(pool.select_at(now + Duration::from_millis(999)).is_none());
        assert!(pool.select_at(now + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_round_robin_fairness() {
        for n in 1..=4usize {
            for k in 0..=6usize {
                let values: Vec<String> = (0..n).map(|i| format!("token{}", i)).collect();
                let pool = CredentialPool::new(&values, PoolConfig::default()).unwrap();

                let mut counts: HashMap<usize, usize> = HashMap::new();
                for _ in 0..(n + k) {
                    *counts.entry(pool.select().unwrap().index()).or_default() += 1;
                }

                let floor = (n + k) / n;
                let ceil = (n + k).div_ceil(n);
                for idx in 0..n {
                    let count = counts.get(&idx).copied().unwrap_or(0);
                    assert!(
                        count >= floor && count <= ceil,
                        "n={} k={} idx={} count={}",
                        n,
                        k,
                        idx,
                        count
                    );
                }
            }
        }
    }

    #[test]
    fn test_random_selection_uses_all() {
        let pool = create_pool(LoadBalanceStrategy::Random);
        let used: std::collections::HashSet<usize> =
            (0..60).map(|_| pool.select().unwrap().index()).collect();
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn test_random_skips_quarantined() {
        let pool = create_pool(LoadBalanceStrategy::Random);
        let now = Instant::now();
        let first = pool.select_at(now).unwrap();
        pool.report_at(&first, Outcome::Failure, now);

        for _ in 0..30 {
            assert_ne!(pool.select_at(now).unwrap().index(), first.index());
        }
    }

    #[test]
    fn test_least_recently_used_selection() {
        let pool = create_pool(LoadBalanceStrategy::LeastRecentlyUsed);
        let t0 = Instant::now();

        let a = pool.select_at(t0).unwrap();
        let b = pool.select_at(t0 + Duration::from_millis(10)).unwrap();
        let c = pool.select_at(t0 + Duration::from_millis(20)).unwrap();
        assert_ne!(a.index(), b.index());
        assert_ne!(b.index(), c.index());
        assert_ne!(a.index(), c.index());

        // Oldest use comes back first
        let d = pool.select_at(t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(d.index(), a.index());
    }

    #[test]
    fn test_reset_all() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let now = Instant::now();
        for _ in 0..3 {
            let handle = pool.select_at(now).unwrap();
            pool.report_at(&handle, Outcome::Failure, now);
            pool.report_at(&handle, Outcome::Failure, now);
        }
        assert!(pool.select_at(now).is_none());

        pool.reset_all();

        let snap = pool.snapshot_at(now);
        assert_eq!(snap.good, 3);
        assert_eq!(snap.quarantined, 0);
        for cred in &snap.credentials {
            assert_eq!(cred.failure_count, 0);
            assert!(cred.quarantine_remaining_ms.is_none());
        }

        // Curve restarts at the floor after a reset
        let handle = pool.select_at(now).unwrap();
        pool.report_at(&handle, Outcome::Failure, now);
        assert_eq!(quarantine_left(&pool, handle.name(), now), Some(1000));
    }

    #[test]
    fn test_snapshot_counts() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let now = Instant::now();
        let snap = pool.snapshot_at(now);
        assert_eq!(snap.total, 3);
        assert_eq!(snap.good, 3);
        assert!(snap.is_healthy());

        let handle = pool.select_at(now).unwrap();
        pool.report_at(&handle, Outcome::Failure, now);

        let snap = pool.snapshot_at(now);
        assert_eq!(snap.good, 2);
        assert_eq!(snap.quarantined, 1);
        assert_eq!(snap.available, 2);

        // Expired but not yet re-evaluated counts as available
        let snap = pool.snapshot_at(now + Duration::from_secs(2));
        assert_eq!(snap.quarantined, 1);
        assert_eq!(snap.available, 3);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["strategy"], "round-robin");
        assert!(!json.to_string().contains("token1"));
    }

    #[test]
    fn test_foreign_handle_is_ignored() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        let other = CredentialPool::new(&["x", "y", "z", "w"], PoolConfig::default()).unwrap();
        let foreign = (0..4).map(|_| other.select().unwrap()).last().unwrap();

        pool.report(&foreign, Outcome::Failure);
        assert_eq!(pool.snapshot().good, 3);
    }

    #[test]
    fn test_reset_all_restarts_rotation() {
        let pool = create_pool(LoadBalanceStrategy::RoundRobin);
        pool.select().unwrap();
        pool.select().unwrap();

        pool.reset_all();

        assert_eq!(pool.select().unwrap().name(), "credential_1");
    }

    fn assert_recovered_credential_picked_first(strategy: LoadBalanceStrategy) {
        let pool = create_pool(strategy);
        let t0 = Instant::now();

        let failed = pool.select_at(t0).unwrap();
        pool.report_at(&failed, Outcome::Failure, t0);

        for step in 1..=10u64 {
            let picked = pool.select_at(t0 + Duration::from_millis(step * 10)).unwrap();
            assert_ne!(picked.index(), failed.index(), "{} while quarantined", strategy);
        }

        let recovered = pool.select_at(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(recovered.name(), failed.name(), "{} after expiry", strategy);
    }

    #[test]
    fn test_random_picks_recovered_credential_first() {
        assert_recovered_credential_picked_first(LoadBalanceStrategy::Random);
    }

    #[test]
    fn test_least_recently_used_picks_recovered_credential_first() {
        assert_recovered_credential_picked_first(LoadBalanceStrategy::LeastRecentlyUsed);
    }

    /// Consecutive failures at the end of a report history
    fn trailing_failures(history: &[Outcome]) -> u32 {
        history
            .iter()
            .rev()
            .take_while(|outcome| **outcome == Outcome::Failure)
            .count() as u32
    }

    #[test]
    fn test_concurrent_access() {
        let pool = Arc::new(create_pool(LoadBalanceStrategy::RoundRobin));
        let handles: Vec<CredentialHandle> = (0..3).map(|_| pool.select().unwrap()).collect();

        // One reporter per credential, plus selectors contending for the lock
        let reporters: Vec<_> = handles
            .iter()
            .cloned()
            .enumerate()
            .map(|(worker, handle)| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let mut history = Vec::new();
                    for i in 0..1000 {
                        let outcome = if (i + worker) % 7 == 0 {
                            Outcome::Failure
                        } else {
                            Outcome::Success
                        };
                        pool.report(&handle, outcome);
                        history.push(outcome);
                    }
                    for _ in 0..worker {
                        pool.report(&handle, Outcome::Failure);
                        history.push(Outcome::Failure);
                    }
                    (handle.index(), history)
                })
            })
            .collect();
        let selectors: Vec<_> = (0..5)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = pool.select();
                    }
                })
            })
            .collect();

        let histories: Vec<(usize, Vec<Outcome>)> = reporters
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();
        for selector in selectors {
            selector.join().unwrap();
        }

        let snap = pool.snapshot();
        assert_eq!(snap.total, 3);
        let mut saw_failing_tail = false;
        for (index, history) in &histories {
            let cred = &snap.credentials[*index];
            let expected = trailing_failures(history);
            assert_eq!(cred.failure_count, expected, "{}", cred.name);
            if expected == 0 {
                assert_eq!(cred.status, "good", "{}", cred.name);
            } else {
                saw_failing_tail = true;
                assert!(cred.quarantine_remaining_ms.unwrap_or(0) <= 8000);
            }
        }
        assert!(saw_failing_tail);
    }
}
