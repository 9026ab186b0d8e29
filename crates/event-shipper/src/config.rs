// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::errors::ConfigError;

const DEFAULT_SINK_URL: &str = "http://localhost:9200";
const DEFAULT_INDEX_PREFIX: &str = "tango";
const DEFAULT_QUEUE_SIZE: usize = 10_000;
const DEFAULT_FLUSH_PERIOD_SECS: u64 = 10;
const DEFAULT_BACKOFF_SECS: u64 = 30;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound for every configured interval (one week).
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the event shipper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the Elasticsearch cluster
    pub sink_url: String,
    /// Prefix of every index name (`<prefix>-<category>-YYYY.MM.DD`)
    pub index_prefix: String,
    /// Maximum number of events buffered in memory
    pub queue_size: usize,
    /// Time between flushes; zero disables periodic flushing
    pub flush_period: Duration,
    /// Cooldown after the first failed flush; grows with each consecutive failure
    pub backoff: Duration,
    /// Upper bound for the cooldown
    pub max_backoff: Duration,
    /// Per-request timeout of the sink HTTP client
    pub request_timeout: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sink_url: DEFAULT_SINK_URL.to_string(),
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
            queue_size: DEFAULT_QUEUE_SIZE,
            flush_period: Duration::from_secs(DEFAULT_FLUSH_PERIOD_SECS),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            log_level: "info".to_string(),
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(default),
    )
}

impl EngineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let sink_url = env::var("EVENT_SHIPPER_SINK_URL")
            .map(|val| val.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_SINK_URL.to_string());
        let index_prefix = env::var("EVENT_SHIPPER_INDEX_PREFIX")
            .map(|val| val.trim().to_string())
            .unwrap_or_else(|_| DEFAULT_INDEX_PREFIX.to_string());
        let queue_size = env::var("EVENT_SHIPPER_QUEUE_SIZE")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_QUEUE_SIZE);
        let flush_period = env_secs("EVENT_SHIPPER_FLUSH_PERIOD", DEFAULT_FLUSH_PERIOD_SECS);
        let backoff = env_secs("EVENT_SHIPPER_BACKOFF", DEFAULT_BACKOFF_SECS);
        let max_backoff = env_secs("EVENT_SHIPPER_MAX_BACKOFF", DEFAULT_MAX_BACKOFF_SECS);
        let request_timeout = env_secs(
            "EVENT_SHIPPER_REQUEST_TIMEOUT",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        );
        let log_level = env::var("EVENT_SHIPPER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            sink_url,
            index_prefix,
            queue_size,
            flush_period,
            backoff,
            max_backoff,
            request_timeout,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sink_url.starts_with("http://") || self.sink_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "Sink URL '{}' must start with http:// or https://",
                self.sink_url
            )));
        }

        // Elasticsearch index names are lowercase and may not contain these characters
        if self.index_prefix.is_empty()
            || self.index_prefix.starts_with(['-', '_', '+'])
            || self.index_prefix.chars().any(|c| {
                c.is_ascii_uppercase()
                    || c.is_whitespace()
                    || matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' | ':')
            })
        {
            return Err(ConfigError::Invalid(format!(
                "Index prefix '{}' is not a valid index name",
                self.index_prefix
            )));
        }

        if self.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "Queue size must be greater than 0".to_string(),
            ));
        }

        if self.queue_size > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "Queue size must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        for (name, interval) in [
            ("Flush period", self.flush_period),
            ("Backoff", self.backoff),
            ("Maximum backoff", self.max_backoff),
            ("Request timeout", self.request_timeout),
        ] {
            if interval > Duration::from_secs(MAX_INTERVAL_SECS) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {MAX_INTERVAL_SECS} seconds"
                )));
            }
        }

        if self.backoff.is_zero() {
            return Err(ConfigError::Invalid(
                "Backoff must be greater than 0".to_string(),
            ));
        }

        if self.max_backoff < self.backoff {
            return Err(ConfigError::Invalid(
                "Maximum backoff must not be shorter than the backoff".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
