//! Call executor
//!
//! Runs one logical upstream call: picks a credential, sends with a growing
//! per-attempt timeout, classifies the reply, reports credential health and
//! retries retryable failures up to the configured budget.

use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::envelope;
use super::error::{AttemptError, ErrorKind, ExecuteError};
use super::request::{AuthMode, BodyKind, Method, UpstreamRequest, UpstreamResponse};
use super::transport::{Transport, TransportRequest, TransportResponse};
use crate::services::credential_pool::{CredentialHandle, CredentialSource, Outcome, PoolConfig};
use crate::utils::{run_guarded, BackoffSchedule, Interrupted};

/// Statuses meaning "this credential is rejected or throttled"; retried and penalised
pub const CREDENTIAL_REJECTION_STATUSES: [u16; 3] = [401, 403, 429];

// ============================================================================
// Configuration
// ============================================================================

/// What to do for an authenticated call when the pool has nothing to offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoCredentialPolicy {
    /// Surface `NoCredentialAvailable` right away
    Fail,
    /// Go on with a random anonymous credential from the list, or none if empty
    Fallback(Arc<[String]>),
}

impl NoCredentialPolicy {
    pub fn fallback(credentials: Vec<String>) -> Self {
        NoCredentialPolicy::Fallback(credentials.into())
    }

    pub fn allows_fallback(&self) -> bool {
        matches!(self, NoCredentialPolicy::Fallback(_))
    }

    fn anonymous_secret(&self) -> Option<&str> {
        match self {
            NoCredentialPolicy::Fail => None,
            NoCredentialPolicy::Fallback(list) => list
                .choose(&mut rand::thread_rng())
                .map(String::as_str),
        }
    }
}

/// Retry and timeout policy for the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Attempts per logical call, at least 1
    pub max_retries: u32,
    /// Per-attempt timeout curve, independent of the quarantine curve
    pub attempt_timeouts: BackoffSchedule,
    pub no_credential: NoCredentialPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_pool(&PoolConfig::default())
    }
}

impl ExecutorConfig {
    /// Retry budget and timeout curve taken from the pool configuration
    pub fn from_pool(config: &PoolConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeouts: BackoffSchedule::new(config.base_timeout, config.max_backoff),
            no_credential: NoCredentialPolicy::Fail,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_attempt_timeouts(mut self, schedule: BackoffSchedule) -> Self {
        self.attempt_timeouts = schedule;
        self
    }

    pub fn with_no_credential_policy(mut self, policy: NoCredentialPolicy) -> Self {
        self.no_credential = policy;
        self
    }

    /// Timeout for a 1-based attempt
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.attempt_timeouts.step(attempt)
    }
}

// ============================================================================
// Attempts
// ============================================================================

/// One try of a call; lives for a single loop iteration
struct CallAttempt<'a> {
    index: u32,
    method: Method,
    url: &'a str,
    credential: Option<&'a CredentialHandle>,
    timeout: Duration,
    started: Instant,
}

impl CallAttempt<'_> {
    fn credential_name(&self) -> &str {
        self.credential.map_or("anonymous", CredentialHandle::name)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[derive(Debug, PartialEq)]
enum AttemptOutcome {
    Success { status: u16, body: serde_json::Value },
    Retryable(AttemptError),
    Fatal(ErrorKind),
    Cancelled,
}

fn classify(expect: BodyKind, response: TransportResponse) -> AttemptOutcome {
    let status = response.status;

    if (200..300).contains(&status) {
        return match envelope::interpret(expect, status, &response.body) {
            Ok(body) => AttemptOutcome::Success { status, body },
            Err(kind) => AttemptOutcome::Fatal(kind),
        };
    }

    if CREDENTIAL_REJECTION_STATUSES.contains(&status) {
        AttemptOutcome::Retryable(AttemptError::Rejected { status })
    } else {
        AttemptOutcome::Fatal(ErrorKind::Application {
            status,
            message: envelope::error_message(&response.body),
        })
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Applies credential selection, retry and timeout policy to upstream calls
pub struct CallExecutor {
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CallExecutor {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            credentials,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Perform one logical call.
    ///
    /// Never makes more than `max_retries` attempts. Resource-level errors,
    /// malformed bodies and cancellation end the call at once and leave
    /// credential health untouched.
    pub async fn execute(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, ExecuteError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut index = 0u32;

        loop {
            index += 1;

            if request.cancel.is_cancelled() {
                return Err(ExecuteError::new(ErrorKind::Cancelled, index - 1));
            }

            let credential = match request.auth {
                AuthMode::Anonymous => None,
                AuthMode::Authenticated => match self.credentials.select() {
                    Some(handle) => Some(handle),
                    None if self.config.no_credential.allows_fallback() => {
                        tracing::debug!(
                            attempt = index,
                            "No credential available, falling back to anonymous call"
                        );
                        None
                    }
                    None => {
                        let retry_after = self.credentials.next_recovery_in();
                        tracing::warn!(
                            attempt = index,
                            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                            "No upstream credential available"
                        );
                        return Err(ExecuteError::new(
                            ErrorKind::NoCredentialAvailable { retry_after },
                            index - 1,
                        ));
                    }
                },
            };

            let secret = match &credential {
                Some(handle) => Some(handle.secret()),
                None => self.config.no_credential.anonymous_secret(),
            };

            let attempt = CallAttempt {
                index,
                method: request.method,
                url: &request.url,
                credential: credential.as_ref(),
                timeout: self.config.attempt_timeout(index),
                started: Instant::now(),
            };

            tracing::debug!(
                attempt = attempt.index,
                method = %attempt.method,
                url = %attempt.url,
                credential = attempt.credential_name(),
                timeout_ms = attempt.timeout.as_millis() as u64,
                "Upstream attempt started"
            );

            match self.send(request, secret, attempt.timeout).await {
                AttemptOutcome::Success { status, body } => {
                    if let Some(handle) = attempt.credential {
                        self.credentials.report(handle, Outcome::Success);
                    }
                    tracing::debug!(
                        attempt = attempt.index,
                        credential = attempt.credential_name(),
                        status,
                        elapsed_ms = attempt.elapsed_ms(),
                        "Upstream attempt succeeded"
                    );
                    return Ok(UpstreamResponse {
                        status,
                        body,
                        attempts: index,
                        credential: attempt.credential.map(|h| h.name().to_string()),
                    });
                }
                AttemptOutcome::Retryable(error) => {
                    if let Some(handle) = attempt.credential {
                        self.credentials.report(handle, Outcome::Failure);
                    }
                    tracing::warn!(
                        attempt = attempt.index,
                        max_attempts,
                        credential = attempt.credential_name(),
                        error = %error,
                        elapsed_ms = attempt.elapsed_ms(),
                        "Upstream attempt failed"
                    );
                    if index >= max_attempts {
                        return Err(ExecuteError::new(
                            ErrorKind::RetriesExhausted { last: error },
                            index,
                        ));
                    }
                }
                AttemptOutcome::Fatal(kind) => {
                    tracing::debug!(
                        attempt = attempt.index,
                        credential = attempt.credential_name(),
                        error = %kind,
                        elapsed_ms = attempt.elapsed_ms(),
                        "Upstream call ended with terminal error"
                    );
                    return Err(ExecuteError::new(kind, index));
                }
                AttemptOutcome::Cancelled => {
                    tracing::debug!(
                        attempt = attempt.index,
                        elapsed_ms = attempt.elapsed_ms(),
                        "Upstream call cancelled"
                    );
                    return Err(ExecuteError::new(ErrorKind::Cancelled, index));
                }
            }
        }
    }

    async fn send(
        &self,
        request: &UpstreamRequest,
        secret: Option<&str>,
        timeout: Duration,
    ) -> AttemptOutcome {
        let exchange = self.transport.send(TransportRequest {
            method: request.method,
            url: &request.url,
            credential: secret,
            body: request.body.as_ref(),
        });

        match run_guarded(timeout, &request.cancel, exchange).await {
            Err(Interrupted::Cancelled) => AttemptOutcome::Cancelled,
            Err(Interrupted::TimedOut(after)) => {
                AttemptOutcome::Retryable(AttemptError::Timeout(after))
            }
            Ok(Err(error)) => AttemptOutcome::Retryable(error.into()),
            Ok(Ok(response)) => classify(request.expect, response),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
