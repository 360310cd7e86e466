//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::services::credential_pool::CredentialPool;
use crate::services::upstream::{CallExecutor, HttpTransport, Transport};

/// Shared application state
///
/// Cheaply cloneable; every field is behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Upstream session credentials
    pub pool: Arc<CredentialPool>,

    /// Retrying upstream caller sharing `pool`
    pub executor: Arc<CallExecutor>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Create state with the real HTTP transport
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(settings.transport_config())
            .context("Failed to build upstream HTTP client")?;
        Self::with_transport(settings, Arc::new(transport))
    }

    /// Create state around any transport
    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        let pool = Arc::new(
            CredentialPool::new(settings.credentials.tokens.as_slice(), settings.pool_config())
                .context("Failed to build credential pool")?,
        );

        let executor_config = settings.executor_config();
        tracing::info!(
            credentials = pool.len(),
            strategy = %pool.strategy(),
            max_retries = executor_config.max_retries,
            no_credential_fallback = executor_config.no_credential.allows_fallback(),
            "Credential pool initialized"
        );

        let executor = Arc::new(CallExecutor::new(pool.clone(), transport, executor_config));

        Ok(Self {
            settings,
            pool,
            executor,
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Join a passthrough path onto the upstream base URL
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}",
            self.settings.upstream.base_url,
            path.trim_start_matches('/')
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}
