//! Configuration module for Kumo Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("KUMO_TOKEN", "secret");
/// let result = expand_env_vars("Bearer ${KUMO_TOKEN}");
/// assert_eq!(result, "Bearer secret");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
        return s.to_string();
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build a configuration for `base_url` with every other section at its default
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into(),
                access_token: None,
                timeout_seconds: default_timeout_seconds(),
            },
            upload: UploadConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "api.base_url must not be empty".into(),
            ));
        }
        if !is_valid_http_url(base_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid api.base_url '{}': must start with http:// or https://",
                base_url
            )));
        }

        let upload = &self.upload;
        if upload.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_retries must be at least 1".into(),
            ));
        }
        if upload.max_concurrent_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_concurrent_chunks must be at least 1".into(),
            ));
        }
        if upload.chunked_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunked_threshold must be at least 1 byte".into(),
            ));
        }
        if upload.stream_frame_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.stream_frame_size must be at least 1 byte".into(),
            ));
        }

        Ok(())
    }
}

/// Storage API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API base, e.g. `https://drive.example.com`. Supports ${VAR} expansion.
    pub base_url: String,

    /// Bearer credential attached to non-session calls. Supports ${VAR} expansion.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout in seconds. Default: 300
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

/// Upload engine tuning.
///
/// Defaults match what the storage server expects from a browser client:
/// multipart from 30 MiB, five parts in flight, three attempts per part.
///
/// # Example
///
/// ```yaml
/// upload:
///   chunked_threshold: 31457280
///   max_concurrent_chunks: 5
///   max_retries: 3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files of at least this many bytes use multipart upload. Default: 30 MiB
    #[serde(default = "default_chunked_threshold")]
    pub chunked_threshold: u64,

    /// Attempts per part before the session is aborted. Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Parts in flight per session. Default: 5
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    /// Backoff base; the n-th retry waits `base * 2^n`. Default: 1000
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Delay before a completed item leaves the registry. Default: 3000
    #[serde(default = "default_auto_remove_delay_ms")]
    pub auto_remove_delay_ms: u64,

    /// Single-request progress throttle. Default: 80
    #[serde(default = "default_single_progress_throttle_ms")]
    pub single_progress_throttle_ms: u64,

    /// Multipart progress throttle. Default: 200
    #[serde(default = "default_chunked_progress_throttle_ms")]
    pub chunked_progress_throttle_ms: u64,

    /// Minimum speed sampling window for single-request uploads. Default: 500
    #[serde(default = "default_speed_window_ms")]
    pub speed_window_ms: u64,

    /// Size of the body frames streamed to the server. Default: 64 KiB
    #[serde(default = "default_stream_frame_size")]
    pub stream_frame_size: usize,
}

impl UploadConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn auto_remove_delay(&self) -> Duration {
        Duration::from_millis(self.auto_remove_delay_ms)
    }

    pub fn single_progress_throttle(&self) -> Duration {
        Duration::from_millis(self.single_progress_throttle_ms)
    }

    pub fn chunked_progress_throttle(&self) -> Duration {
        Duration::from_millis(self.chunked_progress_throttle_ms)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunked_threshold: default_chunked_threshold(),
            max_retries: default_max_retries(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            auto_remove_delay_ms: default_auto_remove_delay_ms(),
            single_progress_throttle_ms: default_single_progress_throttle_ms(),
            chunked_progress_throttle_ms: default_chunked_progress_throttle_ms(),
            speed_window_ms: default_speed_window_ms(),
            stream_frame_size: default_stream_frame_size(),
        }
    }
}

fn default_chunked_threshold() -> u64 {
    crate::upload::CHUNKED_UPLOAD_THRESHOLD
}

fn default_max_retries() -> u32 {
    crate::upload::MAX_RETRIES
}

fn default_max_concurrent_chunks() -> usize {
    crate::upload::MAX_CONCURRENT_CHUNKS
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_auto_remove_delay_ms() -> u64 {
    3000
}

fn default_single_progress_throttle_ms() -> u64 {
    80
}

fn default_chunked_progress_throttle_ms() -> u64 {
    200
}

fn default_speed_window_ms() -> u64 {
    500
}

fn default_stream_frame_size() -> usize {
    65536 // 64KB
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
