// SPDX-License-Identifier: MIT
//! Engine configuration — environment-driven, validated at startup.
//!
//! All knobs come from `RULESD_*` environment variables. Invalid values that
//! would change safety-relevant behavior (the dedup TTL bounds) are fatal;
//! merely malformed numbers fall back to defaults with a warning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_API_BASE_URL: &str = "https://api.tracker.example.com/api/v1";
const DEFAULT_DEDUP_TTL_SECS: u64 = 600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_WORKERS: usize = 4;

/// Minimum allowed webhook dedup TTL.
pub const MIN_DEDUP_TTL_SECS: u64 = 60;
/// Maximum allowed webhook dedup TTL (24 hours).
pub const MAX_DEDUP_TTL_SECS: u64 = 86_400;

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RULESD_DEDUP_TTL_SECS must be between {MIN_DEDUP_TTL_SECS} and {MAX_DEDUP_TTL_SECS} seconds, got {0}")]
    DedupTtlOutOfRange(u64),
    #[error("RULESD_API_BASE_URL must be an http(s) URL, got '{0}'")]
    InvalidApiBaseUrl(String),
    #[error("RULESD_ASYNC_QUEUE_DEPTH must be at least 1")]
    EmptyQueue,
    #[error("RULESD_ASYNC_WORKERS must be at least 1")]
    NoWorkers,
}

// ─── RetryConfig ─────────────────────────────────────────────────────────────

/// Bounds for outbound-call retries (`RULESD_RETRY_*`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts per call, including the first (default: 4).
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds (default: 250).
    pub base_delay_ms: u64,
    /// Upper bound on the computed backoff delay (default: 2000 ms).
    pub max_delay_ms: u64,
    /// Cap applied to a server-provided `Retry-After` (default: 5000 ms).
    pub retry_after_cap_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            retry_after_cap_ms: 5_000,
        }
    }
}

// ─── CacheCaps ───────────────────────────────────────────────────────────────

/// Per-dataset item caps for workspace cache loads (`RULESD_CACHE_*_CAP`).
///
/// Hitting a cap marks that dataset truncated on the snapshot rather than
/// silently dropping the remainder.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheCaps {
    pub tags: usize,
    pub projects: usize,
    pub clients: usize,
    pub users: usize,
    /// Total tasks across all projects (the expensive projects × pages walk).
    pub tasks: usize,
}

impl Default for CacheCaps {
    fn default() -> Self {
        Self {
            tags: 5_000,
            projects: 5_000,
            clients: 5_000,
            users: 5_000,
            tasks: 5_000,
        }
    }
}

// ─── EngineConfig ────────────────────────────────────────────────────────────

/// Fully-validated engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Bind address for the HTTP ingress (default: 127.0.0.1).
    pub bind_address: String,
    /// Port for the HTTP ingress (default: 8080).
    pub port: u16,
    /// Base URL of the external time-tracking API.
    pub api_base_url: String,
    /// Perform live mutations when true; log-only dry-run when false.
    pub apply_changes: bool,
    /// Webhook dedup TTL. Validated to 60s–24h at startup.
    pub dedup_ttl_secs: u64,
    /// Connect/read timeout for every outbound API call.
    pub http_timeout_secs: u64,
    /// Bounded queue depth for the async action worker pool.
    pub async_queue_depth: usize,
    /// Number of async action workers.
    pub async_workers: usize,
    pub retry: RetrySettings,
    pub cache_caps: CacheCaps,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            apply_changes: false,
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            async_queue_depth: DEFAULT_QUEUE_DEPTH,
            async_workers: DEFAULT_WORKERS,
            retry: RetrySettings::default(),
            cache_caps: CacheCaps::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = env_string("RULESD_BIND") {
            cfg.bind_address = v;
        }
        if let Some(v) = env_parse::<u16>("RULESD_PORT") {
            cfg.port = v;
        }
        if let Some(v) = env_string("RULESD_API_BASE_URL") {
            cfg.api_base_url = v;
        }
        cfg.apply_changes = env_truthy("RULESD_APPLY_CHANGES");
        if let Some(v) = env_parse::<u64>("RULESD_DEDUP_TTL_SECS") {
            cfg.dedup_ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>("RULESD_HTTP_TIMEOUT_SECS") {
            cfg.http_timeout_secs = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_ASYNC_QUEUE_DEPTH") {
            cfg.async_queue_depth = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_ASYNC_WORKERS") {
            cfg.async_workers = v;
        }
        if let Some(v) = env_parse::<u32>("RULESD_RETRY_MAX_ATTEMPTS") {
            cfg.retry.max_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("RULESD_RETRY_BASE_DELAY_MS") {
            cfg.retry.base_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("RULESD_RETRY_MAX_DELAY_MS") {
            cfg.retry.max_delay_ms = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_CACHE_TASKS_CAP") {
            cfg.cache_caps.tasks = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_CACHE_TAGS_CAP") {
            cfg.cache_caps.tags = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_CACHE_PROJECTS_CAP") {
            cfg.cache_caps.projects = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_CACHE_CLIENTS_CAP") {
            cfg.cache_caps.clients = v;
        }
        if let Some(v) = env_parse::<usize>("RULESD_CACHE_USERS_CAP") {
            cfg.cache_caps.users = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants that must hold before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_ttl_secs < MIN_DEDUP_TTL_SECS || self.dedup_ttl_secs > MAX_DEDUP_TTL_SECS {
            return Err(ConfigError::DedupTtlOutOfRange(self.dedup_ttl_secs));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidApiBaseUrl(self.api_base_url.clone()));
        }
        if self.async_queue_depth == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        if self.async_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

// ─── Env helpers ─────────────────────────────────────────────────────────────

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "invalid numeric value — using default");
            None
        }
    }
}

fn env_truthy(key: &str) -> bool {
    match env_string(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => false,
    }
}
