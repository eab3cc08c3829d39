//! Processor configuration deserialization and validation.

use crate::config::ConfigError;
use crate::models::PrState;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Inclusive bounds for `batch-size` and `sync-chunk-size`.
const BATCH_SIZE_RANGE: (usize, usize) = (1, 1000);

/// Smallest accepted memory ceiling.
const MIN_MEMORY_LIMIT_MB: u64 = 256;

/// Tuning for a processing session.
///
/// Every key is optional in `processor.toml`; missing keys take the defaults
/// below. The value is treated as immutable once handed to the processor.
///
/// ```toml
/// max-concurrent-repos = 5
/// max-concurrent-api-calls = 10
/// batch-size = 50
/// pr-states = ["opened"]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Repositories processed concurrently within one batch.
    pub max_concurrent_repos: usize,

    /// GitHub API calls in flight across all repositories.
    pub max_concurrent_api_calls: usize,

    /// Check-run discoveries in flight across all repositories.
    pub max_concurrent_check_discoveries: usize,

    /// Repositories per batch.
    pub batch_size: usize,

    /// Rows per synchronizer chunk inside one transaction.
    pub sync_chunk_size: usize,

    /// PR states requested from discovery.
    pub pr_states: Vec<PrState>,

    /// Pause between two batches.
    pub inter_batch_delay_ms: u64,

    /// Advisory ceiling for a whole session.
    pub session_timeout_secs: u64,

    /// Advisory resident memory ceiling.
    pub memory_limit_mb: u64,

    /// Resource sampler interval.
    pub resource_sample_interval_ms: u64,

    /// Discovery cache lifetime; 0 disables caching.
    pub cache_ttl_secs: u64,

    /// Upper bound on pages fetched for one listing.
    pub max_pages_per_query: u32,

    /// Abort the session after the first failed repository.
    pub stop_on_first_error: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_repos: 5,
            max_concurrent_api_calls: 10,
            max_concurrent_check_discoveries: 5,
            batch_size: 50,
            sync_chunk_size: 100,
            pr_states: vec![PrState::Opened],
            inter_batch_delay_ms: 100,
            session_timeout_secs: 1800,
            memory_limit_mb: 1024,
            resource_sample_interval_ms: 5000,
            cache_ttl_secs: 300,
            max_pages_per_query: 20,
            stop_on_first_error: false,
        }
    }
}

impl ProcessorConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading processor configuration");

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlError {
            path: path.display().to_string(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlError {
            path: "<inline>".to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_repos == 0 {
            return Err(invalid("max-concurrent-repos", "must be at least 1"));
        }

        if self.max_concurrent_api_calls < self.max_concurrent_repos {
            return Err(invalid(
                "max-concurrent-api-calls",
                format!(
                    "must be >= max-concurrent-repos ({} < {})",
                    self.max_concurrent_api_calls, self.max_concurrent_repos
                ),
            ));
        }

        if self.max_concurrent_check_discoveries == 0 {
            return Err(invalid(
                "max-concurrent-check-discoveries",
                "must be at least 1",
            ));
        }

        check_batch_range("batch-size", self.batch_size)?;
        check_batch_range("sync-chunk-size", self.sync_chunk_size)?;

        if self.memory_limit_mb < MIN_MEMORY_LIMIT_MB {
            return Err(invalid(
                "memory-limit-mb",
                format!("must be at least {MIN_MEMORY_LIMIT_MB}"),
            ));
        }

        if self.resource_sample_interval_ms == 0 {
            return Err(invalid("resource-sample-interval-ms", "must be at least 1"));
        }

        if self.max_pages_per_query == 0 {
            return Err(invalid("max-pages-per-query", "must be at least 1"));
        }

        if self.pr_states.is_empty() {
            return Err(invalid("pr-states", "must name at least one state"));
        }

        Ok(())
    }

    #[must_use]
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    #[must_use]
    pub fn resource_sample_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sample_interval_ms)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn check_batch_range(field: &'static str, value: usize) -> Result<(), ConfigError> {
    let (min, max) = BATCH_SIZE_RANGE;
    if value < min || value > max {
        return Err(invalid(
            field,
            format!("must be in [{min}, {max}], got {value}"),
        ));
    }
    Ok(())
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field,
        message: message.into(),
    }
}
