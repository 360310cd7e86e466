//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

use crate::services::credential_pool::{LoadBalanceStrategy, PoolConfig};
use crate::services::upstream::{ExecutorConfig, HttpTransportConfig, NoCredentialPolicy};
use crate::utils::BackoffSchedule;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Behaviour when every pooled credential is quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoCredentialMode {
    /// Continue with an anonymous credential
    #[default]
    Fallback,
    /// Answer 503 right away
    Fail,
}

impl std::str::FromStr for NoCredentialMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fallback" | "anonymous" => Ok(NoCredentialMode::Fallback),
            "fail" => Ok(NoCredentialMode::Fail),
            _ => anyhow::bail!("Invalid no-credential policy: {}. Expected: fallback or fail", s),
        }
    }
}

/// Upstream endpoint and request identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    /// Cookie name carrying the session credential
    pub session_cookie: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let transport = HttpTransportConfig::default();
        Self {
            base_url: "https://www.pixiv.net".to_string(),
            user_agent: transport.user_agent,
            accept_language: transport.accept_language,
            session_cookie: transport.session_cookie,
        }
    }
}

/// Credential pool and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialConfig {
    #[serde(skip_serializing)]
    pub tokens: Vec<String>,
    pub load_balancing: LoadBalanceStrategy,
    pub max_retries: u32,
    pub base_timeout_ms: u64,
    /// Ceiling of the quarantine curve
    pub max_backoff_ms: u64,
    /// Ceiling of the per-attempt timeout curve
    pub attempt_timeout_ceiling_ms: u64,
    pub quarantine_floor_ms: u64,
    #[serde(skip_serializing)]
    pub anonymous_tokens: Vec<String>,
    pub no_credential_policy: NoCredentialMode,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            load_balancing: LoadBalanceStrategy::RoundRobin,
            max_retries: 5,
            base_timeout_ms: 1_000,
            max_backoff_ms: 32_000,
            attempt_timeout_ceiling_ms: 32_000,
            quarantine_floor_ms: 1_000,
            anonymous_tokens: Vec::new(),
            no_credential_policy: NoCredentialMode::Fallback,
        }
    }
}

/// Inbound per-client rate limiting
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_window: 0,
            window_seconds: 30,
        }
    }
}

impl RateLimitConfig {
    /// Build from a `REQUEST_LIMIT` value; below 1 disables limiting.
    pub fn from_limit(limit: i64) -> Self {
        if limit < 1 {
            return Self::default();
        }
        Self {
            enabled: true,
            requests_per_window: u32::try_from(limit).unwrap_or(u32::MAX),
            window_seconds: 30,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    // Upstream
    pub upstream: UpstreamConfig,
    pub credentials: CredentialConfig,

    // Administration
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,

    // Rate limiting
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source and validate them
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_backoff_ms: u64 = var("UPSTREAM_MAX_BACKOFF_MS", "32000")
            .parse()
            .context("Invalid UPSTREAM_MAX_BACKOFF_MS value")?;

        let settings = Self {
            // App settings
            app_name: var("APP_NAME", "upstream-gateway"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: var("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: var("LOG_LEVEL", "info"),

            // Server settings
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "8000").parse().context("Invalid PORT value")?,

            // Upstream
            upstream: UpstreamConfig {
                base_url: var("UPSTREAM_BASE_URL", "https://www.pixiv.net")
                    .trim_end_matches('/')
                    .to_string(),
                user_agent: lookup("UPSTREAM_USER_AGENT")
                    .unwrap_or_else(|| UpstreamConfig::default().user_agent),
                accept_language: var("UPSTREAM_ACCEPT_LANGUAGE", "en-US,en;q=0.5"),
                session_cookie: var("UPSTREAM_SESSION_COOKIE", "PHPSESSID"),
            },

            credentials: CredentialConfig {
                tokens: split_list(&var("UPSTREAM_TOKEN", "")),
                load_balancing: LoadBalanceStrategy::from_name(&var(
                    "UPSTREAM_TOKEN_LOAD_BALANCING",
                    "round-robin",
                )),
                max_retries: var("UPSTREAM_MAX_RETRIES", "5")
                    .parse()
                    .context("Invalid UPSTREAM_MAX_RETRIES value")?,
                base_timeout_ms: var("UPSTREAM_BASE_TIMEOUT_MS", "1000")
                    .parse()
                    .context("Invalid UPSTREAM_BASE_TIMEOUT_MS value")?,
                max_backoff_ms,
                attempt_timeout_ceiling_ms: match lookup("UPSTREAM_ATTEMPT_TIMEOUT_CEILING_MS") {
                    Some(raw) => raw
                        .parse()
                        .context("Invalid UPSTREAM_ATTEMPT_TIMEOUT_CEILING_MS value")?,
                    None => max_backoff_ms,
                },
                quarantine_floor_ms: var("UPSTREAM_QUARANTINE_FLOOR_MS", "1000")
                    .parse()
                    .context("Invalid UPSTREAM_QUARANTINE_FLOOR_MS value")?,
                anonymous_tokens: split_list(&var("UPSTREAM_ANONYMOUS_TOKEN", "")),
                no_credential_policy: var("UPSTREAM_NO_CREDENTIAL_POLICY", "fallback")
                    .parse()?,
            },

            // Administration
            admin_token: lookup("ADMIN_TOKEN").filter(|token| !token.trim().is_empty()),

            // Rate limiting
            rate_limit: RateLimitConfig::from_limit(
                var("REQUEST_LIMIT", "0")
                    .trim()
                    .parse()
                    .context("Invalid REQUEST_LIMIT value")?,
            ),
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    fn validate(&self) -> Result<()> {
        // Validate port range
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "UPSTREAM_BASE_URL must be an http(s) URL, got {}",
                self.upstream.base_url
            );
        }

        let creds = &self.credentials;
        if creds.tokens.is_empty() {
            anyhow::bail!("UPSTREAM_TOKEN is required: provide at least one session credential");
        }
        if creds.max_retries == 0 {
            anyhow::bail!("UPSTREAM_MAX_RETRIES must be >= 1");
        }
        if creds.base_timeout_ms == 0 {
            anyhow::bail!("UPSTREAM_BASE_TIMEOUT_MS must be > 0");
        }
        if creds.max_backoff_ms < creds.base_timeout_ms {
            anyhow::bail!("UPSTREAM_MAX_BACKOFF_MS must be >= UPSTREAM_BASE_TIMEOUT_MS");
        }
        if creds.attempt_timeout_ceiling_ms < creds.base_timeout_ms {
            anyhow::bail!(
                "UPSTREAM_ATTEMPT_TIMEOUT_CEILING_MS must be >= UPSTREAM_BASE_TIMEOUT_MS"
            );
        }
        if creds.quarantine_floor_ms == 0 {
            anyhow::bail!("UPSTREAM_QUARANTINE_FLOOR_MS must be > 0");
        }

        if self.environment == Environment::Production && self.admin_token.is_none() {
            tracing::warn!("Running in production without ADMIN_TOKEN; admin endpoints are open!");
        }

        Ok(())
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool configuration derived from the credential settings
    pub fn pool_config(&self) -> PoolConfig {
        let creds = &self.credentials;
        PoolConfig::new(creds.load_balancing)
            .with_max_retries(creds.max_retries)
            .with_base_timeout(Duration::from_millis(creds.base_timeout_ms))
            .with_max_backoff(Duration::from_millis(creds.max_backoff_ms))
            .with_quarantine_floor(Duration::from_millis(creds.quarantine_floor_ms))
    }

    /// Executor policy; the attempt timeout curve has its own ceiling
    pub fn executor_config(&self) -> ExecutorConfig {
        let creds = &self.credentials;
        let policy = match creds.no_credential_policy {
            NoCredentialMode::Fallback => {
                NoCredentialPolicy::fallback(creds.anonymous_tokens.clone())
            }
            NoCredentialMode::Fail => NoCredentialPolicy::Fail,
        };

        ExecutorConfig::from_pool(&self.pool_config())
            .with_attempt_timeouts(BackoffSchedule::new(
                Duration::from_millis(creds.base_timeout_ms),
                Duration::from_millis(creds.attempt_timeout_ceiling_ms),
            ))
            .with_no_credential_policy(policy)
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            user_agent: self.upstream.user_agent.clone(),
            accept_language: self.upstream.accept_language.clone(),
            session_cookie: self.upstream.session_cookie.clone(),
            ..Default::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "upstream-gateway".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream: UpstreamConfig::default(),
            credentials: CredentialConfig::default(),
            admin_token: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Split a comma-separated list, dropping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
