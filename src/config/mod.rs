use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a failed-but-retryable queue entry re-enters scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum RetryPriority {
    /// Re-enter at the original priority.
    Keep,
    /// Re-enter `step` below the previous priority, clamped to the minimum.
    Lower { step: i32 },
}

impl RetryPriority {
    fn parse(policy: &str, step: i32) -> Self {
        match policy.trim().to_ascii_lowercase().as_str() {
            "lower" => Self::Lower { step: step.max(0) },
            _ => Self::Keep,
        }
    }
}

/// Match scope used when a single vulnerability's file is marked safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScope {
    /// Rule carries the vulnerability's content hash.
    Hash,
    /// Rule matches the path regardless of content.
    Path,
}

impl MatchScope {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "path" => Self::Path,
            _ => Self::Hash,
        }
    }
}

/// Scan queue scheduling knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: i32,
    pub lease_timeout: Duration,
    /// Zero disables the background reaper.
    pub reaper_interval: Duration,
    pub retry_priority: RetryPriority,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lease_timeout: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(60),
            retry_priority: RetryPriority::Keep,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub queue: QueueConfig,
    pub safe_file_default_scope: MatchScope,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = QueueConfig::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("BACKEND_PORT", 3000),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "https://localhost:5173".to_string()),
            queue: QueueConfig {
                max_attempts: parse_or("QUEUE_MAX_ATTEMPTS", defaults.max_attempts).clamp(1, 10),
                lease_timeout: Duration::from_secs(parse_or("QUEUE_LEASE_TIMEOUT_SECS", 3600)),
                reaper_interval: Duration::from_secs(parse_or("QUEUE_REAPER_INTERVAL_SECS", 60)),
                retry_priority: RetryPriority::parse(
                    &env::var("QUEUE_RETRY_PRIORITY").unwrap_or_default(),
                    parse_or("QUEUE_RETRY_PRIORITY_STEP", 1),
                ),
            },
            safe_file_default_scope: MatchScope::parse(
                &env::var("SAFE_FILE_DEFAULT_SCOPE").unwrap_or_default(),
            ),
        })
    }
}

/// Read and parse an environment variable, falling back on absence or garbage.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
