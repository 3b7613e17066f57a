//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FOLIO_*)
//! 2. TOML config file (if FOLIO_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FOLIO_*)
/// 2. TOML config file (if FOLIO_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding every cache partition.
    ///
    /// Set via FOLIO_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// The single origin the worker controls (scheme, host and port).
    ///
    /// Set via FOLIO_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Prefix of every partition name owned by this application.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Version tag embedded in partition names. Bumping it retires old partitions on activation.
    ///
    /// Set via FOLIO_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes to fetch per request. Large documents live under this limit too.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Soft item bound for the shell partition.
    #[serde(default = "default_shell_max_items")]
    pub shell_max_items: usize,

    /// Soft item bound for the content partition. Pinned items may exceed it.
    #[serde(default = "default_content_max_items")]
    pub content_max_items: usize,

    /// Path of the offline-fallback document served for failed navigations.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Shell paths fetched into the shell partition during install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Path extensions routed to the content partition.
    #[serde(default = "default_content_extensions")]
    pub content_extensions: Vec<String>,

    /// Path extensions that degrade to an empty placeholder when offline.
    #[serde(default = "default_textual_asset_extensions")]
    pub textual_asset_extensions: Vec<String>,

    /// Timeout applied to every page → worker call, in milliseconds.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Interval of the maintenance eviction sweep, in seconds.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Interval of the background activity sync, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Endpoint receiving pending activity. Background sync is skipped when unset.
    ///
    /// Set via FOLIO_SYNC_ENDPOINT environment variable.
    #[serde(default)]
    pub sync_endpoint: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./folio-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_app_name() -> String {
    "folio".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_user_agent() -> String {
    "folio-worker/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    104_857_600 // 100MB
}

fn default_shell_max_items() -> usize {
    60
}

fn default_content_max_items() -> usize {
    10
}

fn default_offline_page() -> String {
    "/offline.html".into()
}

fn default_precache() -> Vec<String> {
    vec!["/".into(), "/index.html".into()]
}

fn default_content_extensions() -> Vec<String> {
    vec!["pdf".into()]
}

fn default_textual_asset_extensions() -> Vec<String> {
    vec!["css".into(), "js".into()]
}

fn default_message_timeout_ms() -> u64 {
    5_000
}

fn default_maintenance_interval_secs() -> u64 {
    86_400
}

fn default_sync_interval_secs() -> u64 {
    900
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            app_name: default_app_name(),
            cache_version: default_cache_version(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            shell_max_items: default_shell_max_items(),
            content_max_items: default_content_max_items(),
            offline_page: default_offline_page(),
            precache: default_precache(),
            content_extensions: default_content_extensions(),
            textual_asset_extensions: default_textual_asset_extensions(),
            message_timeout_ms: default_message_timeout_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            sync_endpoint: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Timeout for a single page → worker call.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Parsed origin URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `origin` is not an absolute http(s) URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(ConfigError::Invalid { field: "origin".into(), reason: "must be an http(s) URL with a host".into() }),
        }
    }

    /// Name of the shell partition for the current version.
    pub fn shell_cache_name(&self) -> String {
        format!("{}-shell-{}", self.app_name, self.cache_version)
    }

    /// Name of the content partition for the current version.
    pub fn content_cache_name(&self) -> String {
        format!("{}-content-{}", self.app_name, self.cache_version)
    }

    /// Every partition name the current version keeps on activation.
    pub fn current_cache_names(&self) -> Vec<String> {
        vec![self.shell_cache_name(), self.content_cache_name()]
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FOLIO_`
    /// 2. TOML file from `FOLIO_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FOLIO_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("FOLIO_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
