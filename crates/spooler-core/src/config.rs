//! Configuration: spool capacity, remote endpoint, delivery policy.
//!
//! Every section has working defaults, so an empty (or missing) TOML file
//! is a valid configuration.
//!
//! ```toml
//! [spool]
//! root_dir = "/var/lib/spooler"
//! max_on_disk = 500
//!
//! [remote]
//! base_url = "http://127.0.0.1:8787"
//! request_timeout_ms = 15000
//!
//! [delivery]
//! max_attempts_per_item = 6
//! min_backoff_ms = 1000
//! max_backoff_ms = 60000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerConfig {
    pub spool: SpoolConfig,
    pub remote: RemoteConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Holds `pending/` and `dead/`.
    pub root_dir: PathBuf,
    /// Pending capacity before the oldest records are dropped.
    pub max_on_disk: usize,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./spool"),
            max_on_disk: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            request_timeout_ms: 15_000,
            user_agent: concat!("spooler/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Retry / backoff / polling knobs for the delivery worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Consecutive failures before an item is dead-lettered.
    pub max_attempts_per_item: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the current delay.
    pub jitter_factor: f64,
    /// Sleep between checks of an empty spool.
    pub idle_poll_ms: u64,
    /// Run one health probe when the loop starts (logged only).
    pub probe_on_start: bool,
}

impl DeliveryConfig {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_item: 6,
            min_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            jitter_factor: 0.3,
            idle_poll_ms: 250,
            probe_on_start: true,
        }
    }
}

impl SpoolerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.spool.max_on_disk == 0 {
            return invalid("spool.max_on_disk must be at least 1");
        }
        if self.delivery.max_attempts_per_item == 0 {
            return invalid("delivery.max_attempts_per_item must be at least 1");
        }
        if self.delivery.min_backoff_ms > self.delivery.max_backoff_ms {
            return invalid("delivery.min_backoff_ms must not exceed delivery.max_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.delivery.jitter_factor) {
            return invalid("delivery.jitter_factor must be within 0.0..=1.0");
        }
        if self.delivery.idle_poll_ms == 0 {
            return invalid("delivery.idle_poll_ms must be at least 1");
        }
        if self.remote.base_url.trim().is_empty() {
            return invalid("remote.base_url must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SpoolerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SpoolerConfig::default());
        assert_eq!(config.delivery.max_attempts_per_item, 6);
        assert_eq!(config.delivery.min_backoff(), Duration::from_secs(1));
        assert_eq!(config.delivery.max_backoff(), Duration::from_secs(60));
        assert_eq!(config.delivery.idle_poll(), Duration::from_millis(250));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = SpoolerConfig::from_toml_str(
            r#"
            [spool]
            max_on_disk = 2

            [delivery]
            max_attempts_per_item = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.spool.max_on_disk, 2);
        assert_eq!(config.spool.root_dir, PathBuf::from("./spool"));
        assert_eq!(config.delivery.max_attempts_per_item, 3);
        assert_eq!(config.delivery.max_backoff_ms, 60_000);
    }

    #[rstest]
    #[case::zero_capacity("[spool]\nmax_on_disk = 0")]
    #[case::zero_attempts("[delivery]\nmax_attempts_per_item = 0")]
    #[case::inverted_backoff("[delivery]\nmin_backoff_ms = 5000\nmax_backoff_ms = 10")]
    #[case::jitter_too_large("[delivery]\njitter_factor = 1.5")]
    #[case::zero_poll("[delivery]\nidle_poll_ms = 0")]
    fn invalid_values_are_rejected(#[case] raw: &str) {
        assert!(matches!(
            SpoolerConfig::from_toml_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_path_means_defaults() {
        assert_eq!(SpoolerConfig::load(None).unwrap(), SpoolerConfig::default());
    }
}
