//! Credential Pool Module
//!
//! Multiplexes a fixed set of upstream session credentials across concurrent
//! requests, quarantines credentials the upstream rejects, and lets them back
//! in once their quarantine expires.
//!
//! # Features
//! - Round-robin, random, and least-recently-used selection
//! - Exponential quarantine per credential (`floor * 2^(failures - 1)`, capped)
//! - Lazy recovery: expiry is checked during selection, no background timer
//! - Point-in-time snapshots for diagnostics
//!
//! # Example
//! ```ignore
//! use upstream_gateway::services::credential_pool::{
//!     CredentialPool, LoadBalanceStrategy, Outcome, PoolConfig,
//! };
//!
//! let pool = CredentialPool::new(&["session-a", "session-b"], PoolConfig::new(LoadBalanceStrategy::RoundRobin))?;
//!
//! if let Some(cred) = pool.select() {
//!     // ... call upstream with cred.secret() ...
//!     pool.report(&cred, Outcome::Success);
//! }
//! ```

mod credential;
mod pool;
mod strategy;

pub use credential::{
    Credential, CredentialHandle, CredentialSnapshot, CredentialStatus, Outcome,
};
pub use pool::{
    CredentialPool, CredentialSource, PoolConfig, PoolError, PoolSnapshot,
    DEFAULT_QUARANTINE_FLOOR,
};
pub use strategy::LoadBalanceStrategy;
