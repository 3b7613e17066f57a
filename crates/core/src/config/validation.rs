//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an http(s) URL, or `sync_endpoint` does not parse
    /// - `app_name` or `cache_version` is empty or contains whitespace
    /// - either partition bound is 0
    /// - `max_bytes` is 0 or exceeds 512MB
    /// - `timeout_ms` is outside 100ms..=5 minutes, `message_timeout_ms` outside 50ms..=60s
    /// - `offline_page` is not an absolute path
    /// - `maintenance_interval_secs` or `sync_interval_secs` is below 60s
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;

        for (field, value) in [("app_name", &self.app_name), ("cache_version", &self.cache_version)] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(invalid(field, "must be non-empty without whitespace"));
            }
        }

        if self.shell_max_items == 0 {
            return Err(invalid("shell_max_items", "must be greater than 0"));
        }
        if self.content_max_items == 0 {
            return Err(invalid("content_max_items", "must be greater than 0"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 512 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 512MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if !(50..=60_000).contains(&self.message_timeout_ms) {
            return Err(invalid("message_timeout_ms", "must be between 50ms and 60000ms"));
        }

        if !self.offline_page.starts_with('/') {
            return Err(invalid("offline_page", "must be an absolute path"));
        }
        if let Some(path) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid {
                field: "precache".into(),
                reason: format!("{path} is not an absolute path"),
            });
        }

        if self.maintenance_interval_secs < 60 {
            return Err(invalid("maintenance_interval_secs", "must be at least 60s"));
        }
        if self.sync_interval_secs < 60 {
            return Err(invalid("sync_interval_secs", "must be at least 60s"));
        }

        if let Some(endpoint) = &self.sync_endpoint {
            url::Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
                field: "sync_endpoint".into(),
                reason: e.to_string(),
            })?;
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.content_extensions.is_empty() {
            tracing::warn!("content_extensions is empty; no request will use the content partition");
        }

        Ok(())
    }
}
