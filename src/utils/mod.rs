//! Utility modules
//!
//! Contains backoff schedules, deadline handling, and string helpers.

pub mod backoff;
pub mod string;
pub mod timeout;

pub use backoff::{capped_exponential, BackoffSchedule};
pub use string::{mask_secret, truncate_str, truncate_with_suffix};
pub use timeout::{run_guarded, Interrupted};
