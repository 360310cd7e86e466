//! Services module
//!
//! The credential pool and the upstream call machinery built on it.

pub mod credential_pool;
pub mod upstream;

pub use credential_pool::{
    CredentialHandle, CredentialPool, CredentialSource, LoadBalanceStrategy, Outcome, PoolConfig,
    PoolSnapshot,
};
pub use upstream::{
    CallExecutor, ExecuteError, ExecutorConfig, HttpTransport, NoCredentialPolicy, UpstreamRequest,
    UpstreamResponse,
};
