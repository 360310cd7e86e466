//! Upstream Gateway library
//!
//! Front-end gateway for a session-authenticated upstream JSON API. Outbound
//! calls draw from a pool of session credentials that quarantines rejected
//! credentials and recovers them lazily, and every call runs under a bounded
//! retry policy with growing per-attempt timeouts.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
