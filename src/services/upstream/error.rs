//! Upstream call error taxonomy
//!
//! `AttemptError` covers one retryable attempt failure. `ExecuteError` is the
//! single terminal error of a logical call: what went wrong and how many
//! attempts were made.

use std::time::Duration;
use thiserror::Error;

use super::transport::TransportError;

/// Failure of a single attempt that warrants another try
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream rejected credential with status {status}")]
    Rejected { status: u16 },
}

/// Terminal outcome of a logical call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// All credentials quarantined and the policy forbids an anonymous call
    #[error("no upstream credential available")]
    NoCredentialAvailable { retry_after: Option<Duration> },

    #[error("retries exhausted, last error: {last}")]
    RetriesExhausted { last: AttemptError },

    /// Resource-level error reported by the upstream; not a credential problem
    #[error("upstream returned {status}: {message}")]
    Application { status: u16, message: String },

    #[error("malformed upstream response: {reason}")]
    MalformedResponse { reason: String },

    #[error("cancelled by caller")]
    Cancelled,
}

/// Error returned by `CallExecutor::execute`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("upstream call failed after {attempts} attempt(s): {kind}")]
pub struct ExecuteError {
    pub attempts: u32,
    pub kind: ErrorKind,
}

impl ExecuteError {
    pub fn new(kind: ErrorKind, attempts: u32) -> Self {
        Self { attempts, kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The caller should try again later (credential or transport trouble)
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NoCredentialAvailable { .. } | ErrorKind::RetriesExhausted { .. }
        )
    }

    /// The upstream says the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::Application { status: 404, .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Suggested wait before retrying, when known
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ErrorKind::NoCredentialAvailable { retry_after } => retry_after,
            _ => None,
        }
    }
}
