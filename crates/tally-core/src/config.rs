//! Configuration loading
//!
//! Settings come from a TOML file layered over built-in defaults:
//!
//! 1. explicit path passed by the caller (`--config`)
//! 2. `~/.local/share/tally/config.toml` if it exists
//! 3. built-in defaults
//!
//! ```toml
//! [categorize]
//! min_score = 0.3
//!
//! [recurring]
//! amount_tolerance = 0.15
//! trend_threshold = 0.05
//! min_consecutive_months = 3
//!
//! [sync]
//! endpoint = "https://api.example.com/v1"
//! chunk_size = 10
//! inter_chunk_delay_ms = 2000
//! timeout_secs = 30
//!
//! [cache]
//! history_ttl_secs = 60
//! ```
//!
//! `TALLY_SYNC_URL` overrides the sync endpoint and `TALLY_SYNC_TOKEN`
//! supplies the bearer token, which is never read from the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the sync endpoint
pub const SYNC_URL_ENV: &str = "TALLY_SYNC_URL";

/// Environment variable holding the sync bearer token
pub const SYNC_TOKEN_ENV: &str = "TALLY_SYNC_TOKEN";

/// Thresholds for recurring payment detection
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringConfig {
    /// Max relative deviation of a month's charge from the running average
    pub amount_tolerance: f64,
    /// Relative change between the last two months that counts as a trend
    pub trend_threshold: f64,
    pub min_consecutive_months: u32,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.15,
            trend_threshold: 0.05,
            min_consecutive_months: 3,
        }
    }
}

/// Sync backend settings
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
    pub timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            chunk_size: 10,
            inter_chunk_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TallyConfig {
    pub min_category_score: f64,
    pub recurring: RecurringConfig,
    pub sync: SyncConfig,
    pub history_ttl: Duration,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            min_category_score: crate::categorize::DEFAULT_MIN_SCORE,
            recurring: RecurringConfig::default(),
            sync: SyncConfig::default(),
            history_ttl: Duration::from_secs(60),
        }
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config.toml"))
}

impl TallyConfig {
    /// Load configuration (override first, then default location, then built-ins)
    /// and apply environment overrides
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_path(override_path)? {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                let content = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse config from TOML content, filling gaps with defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(categorize) = raw.categorize {
            if let Some(score) = categorize.min_score {
                config.min_category_score = score;
            }
        }

        if let Some(recurring) = raw.recurring {
            if let Some(tolerance) = recurring.amount_tolerance {
                config.recurring.amount_tolerance = tolerance;
            }
            if let Some(threshold) = recurring.trend_threshold {
                config.recurring.trend_threshold = threshold;
            }
            if let Some(months) = recurring.min_consecutive_months {
                config.recurring.min_consecutive_months = months;
            }
        }

        if let Some(sync) = raw.sync {
            if sync.endpoint.is_some() {
                config.sync.endpoint = sync.endpoint;
            }
            if let Some(size) = sync.chunk_size {
                config.sync.chunk_size = size;
            }
            if let Some(delay) = sync.inter_chunk_delay_ms {
                config.sync.inter_chunk_delay = Duration::from_millis(delay);
            }
            if let Some(timeout) = sync.timeout_secs {
                config.sync.timeout = Duration::from_secs(timeout);
            }
        }

        if let Some(cache) = raw.cache {
            if let Some(ttl) = cache.history_ttl_secs {
                config.history_ttl = Duration::from_secs(ttl);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(SYNC_URL_ENV) {
            if !url.trim().is_empty() {
                self.sync.endpoint = Some(url);
            }
        }
        if let Ok(token) = std::env::var(SYNC_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.sync.token = Some(token);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_category_score) {
            return Err(Error::Config(format!(
                "categorize.min_score must be within [0, 1], got {}",
                self.min_category_score
            )));
        }
        if self.recurring.amount_tolerance < 0.0 || self.recurring.trend_threshold < 0.0 {
            return Err(Error::Config(
                "recurring tolerances must not be negative".to_string(),
            ));
        }
        if self.recurring.min_consecutive_months < 2 {
            return Err(Error::Config(
                "recurring.min_consecutive_months must be at least 2".to_string(),
            ));
        }
        if self.sync.chunk_size == 0 {
            return Err(Error::Config("sync.chunk_size must be positive".to_string()));
        }
        Ok(())
    }
}

fn resolve_path(override_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }
    Ok(default_config_path().filter(|p| p.exists()))
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    categorize: Option<RawCategorize>,
    recurring: Option<RawRecurring>,
    sync: Option<RawSync>,
    cache: Option<RawCache>,
}

#[derive(Debug, Deserialize)]
struct RawCategorize {
    min_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRecurring {
    amount_tolerance: Option<f64>,
    trend_threshold: Option<f64>,
    min_consecutive_months: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawSync {
    endpoint: Option<String>,
    chunk_size: Option<usize>,
    inter_chunk_delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    history_ttl_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        let config = TallyConfig::from_toml("").unwrap();
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.sync.chunk_size, 10);
        assert_eq!(config.sync.inter_chunk_delay, Duration::from_secs(2));
        assert_eq!(config.recurring.amount_tolerance, 0.15);
    }

    #[test]
    fn test_partial_override() {
        let config = TallyConfig::from_toml(
            r#"
            [sync]
            endpoint = "http://localhost:9000"
            chunk_size = 25

            [recurring]
            trend_threshold = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.sync.chunk_size, 25);
        assert_eq!(config.sync.inter_chunk_delay, Duration::from_secs(2));
        assert_eq!(config.recurring.trend_threshold, 0.1);
        assert_eq!(config.recurring.min_consecutive_months, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(TallyConfig::from_toml("[sync]\nchunk_size = 0").is_err());
        assert!(TallyConfig::from_toml("[categorize]\nmin_score = 1.5").is_err());
        assert!(TallyConfig::from_toml("[recurring]\nmin_consecutive_months = 1").is_err());
        assert!(TallyConfig::from_toml("not toml at all [").is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nhistory_ttl_secs = 5").unwrap();

        let config = TallyConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.history_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = TallyConfig::load(Some(Path::new("/nonexistent/tally.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
