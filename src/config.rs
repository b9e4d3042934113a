// ABOUTME: Optional TOML configuration file for transfer defaults
// ABOUTME: Explicit CLI flags always win over file-provided values

use crate::error::TransferError;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Defaults loadable from a `transfer.toml`:
///
/// ```toml
/// page_size = 1000
/// concurrency = 4
/// region = "us-east"
///
/// [retry]
/// count = 3
/// delay_ms = 1000
/// backoff = 2.0
/// jitter_ms = 300
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    pub page_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub region: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub count: Option<u32>,
    pub delay_ms: Option<u64>,
    pub backoff: Option<f64>,
    pub jitter_ms: Option<u64>,
}

impl TransferConfig {
    pub fn load(path: &Path) -> Result<TransferConfig, TransferError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            TransferError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Build the effective retry policy. CLI-supplied values (already
    /// merged in by the caller as `Some`) take precedence over the file.
    pub fn retry_policy(&self, cli_count: Option<u32>, cli_delay_ms: Option<u64>) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            retries: cli_count
                .or(self.retry.count)
                .unwrap_or(defaults.retries),
            initial_delay: cli_delay_ms
                .or(self.retry.delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            backoff: self.retry.backoff.unwrap_or(defaults.backoff),
            jitter: self
                .retry
                .jitter_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
        }
    }
}
