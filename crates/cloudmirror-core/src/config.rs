//! Configuration module for CloudMirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! Configuration is plain data. Components never read it globally: the caller
//! converts the relevant sections into option structs at call time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::SyncFilter;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for CloudMirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
    pub bandwidth: BandwidthConfig,
    pub filters: FiltersConfig,
    pub logging: LoggingConfig,
}

/// Where the mirror lives and where its state is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local mirror.
    pub root: PathBuf,
    /// SQLite database holding sync records.
    pub database: PathBuf,
    /// Identifier of the remote folder to mirror.
    pub remote_root: String,
}

/// Transfer engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of files transferred concurrently.
    pub concurrency: usize,
    /// Chunk size in KiB.
    pub chunk_size_kb: u64,
    /// Concurrent chunk fetches within a single file.
    pub chunk_parallelism: usize,
    /// Deadline for fetching one chunk, in seconds.
    pub chunk_timeout_secs: u64,
    /// Runs a file may end in `Failed` before it is reported as permanently failed.
    pub max_file_failures: u32,
}

/// Retry / backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per chunk for transient errors (including the first).
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomize delays to avoid synchronized retries.
    pub jitter: bool,
    /// Whole-file downloads allowed per content version when checksums mismatch.
    pub max_corruption_attempts: u32,
}

/// Aggregate bandwidth cap shared by every transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    /// Cap in KiB per second; `0` means unlimited.
    pub limit_kbps: u64,
    /// Bucket capacity in KiB (maximum burst).
    pub burst_kb: u64,
}

/// Entry filters applied before planning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub name_contains: Vec<String>,
    pub name_excludes: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudmirror")
            .join("config.yaml")
    }

    /// Chunk size in bytes.
    pub fn chunk_size_bytes(&self) -> u64 {
        self.transfer.chunk_size_kb.saturating_mul(1024)
    }
}

impl FiltersConfig {
    /// Build the runtime filter described by this section.
    pub fn to_filter(&self) -> SyncFilter {
        let mut filter = SyncFilter::new()
            .with_include_extensions(&self.include_extensions)
            .with_exclude_extensions(&self.exclude_extensions)
            .with_name_contains(self.name_contains.iter().cloned())
            .with_name_excludes(self.name_excludes.iter().cloned());
        if let Some(min) = self.min_size {
            filter = filter.with_min_size(min);
        }
        if let Some(max) = self.max_size {
            filter = filter.with_max_size(max);
        }
        filter
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            root: home.join("CloudMirror"),
            database: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cloudmirror")
                .join("state.db"),
            remote_root: "root".to_string(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_size_kb: 8 * 1024,
            chunk_parallelism: 1,
            chunk_timeout_secs: 60,
            max_file_failures: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter: true,
            max_corruption_attempts: 2,
        }
    }
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            limit_kbps: 0,
            burst_kb: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.remote_root.trim().is_empty() {
            errors.push(ValidationError::new("sync.remote_root", "must not be empty"));
        }

        // --- transfer ---
        if self.transfer.concurrency == 0 {
            errors.push(ValidationError::new(
                "transfer.concurrency",
                "must be greater than 0",
            ));
        }
        if self.transfer.chunk_size_kb == 0 {
            errors.push(ValidationError::new(
                "transfer.chunk_size_kb",
                "must be greater than 0",
            ));
        }
        if self.transfer.chunk_parallelism == 0 {
            errors.push(ValidationError::new(
                "transfer.chunk_parallelism",
                "must be greater than 0",
            ));
        }
        if self.transfer.chunk_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "transfer.chunk_timeout_secs",
                "must be greater than 0",
            ));
        }

        // --- retry ---
        if self.retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.retry.max_corruption_attempts == 0 {
            errors.push(ValidationError::new(
                "retry.max_corruption_attempts",
                "must be at least 1",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(ValidationError::new(
                "retry.base_delay_ms",
                format!(
                    "must not exceed retry.max_delay_ms ({})",
                    self.retry.max_delay_ms
                ),
            ));
        }

        // --- bandwidth ---
        if self.bandwidth.limit_kbps > 0 && self.bandwidth.burst_kb == 0 {
            errors.push(ValidationError::new(
                "bandwidth.burst_kb",
                "must be greater than 0 when a limit is set",
            ));
        }

        // --- filters ---
        if let (Some(min), Some(max)) = (self.filters.min_size, self.filters.max_size) {
            if min > max {
                errors.push(ValidationError::new(
                    "filters.min_size",
                    format!("must not exceed filters.max_size ({max})"),
                ));
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError::new(
                "logging.format",
                format!(
                    "invalid format '{}', expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// ```
/// use cloudmirror_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .transfer_concurrency(4)
///     .bandwidth_limit_kbps(512)
///     .build();
/// assert_eq!(config.transfer.concurrency, 4);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_database(mut self, database: PathBuf) -> Self {
        self.config.sync.database = database;
        self
    }

    pub fn sync_remote_root(mut self, remote_root: impl Into<String>) -> Self {
        self.config.sync.remote_root = remote_root.into();
        self
    }

    // --- transfer ---

    pub fn transfer_concurrency(mut self, n: usize) -> Self {
        self.config.transfer.concurrency = n;
        self
    }

    pub fn transfer_chunk_size_kb(mut self, kb: u64) -> Self {
        self.config.transfer.chunk_size_kb = kb;
        self
    }

    pub fn transfer_chunk_parallelism(mut self, n: usize) -> Self {
        self.config.transfer.chunk_parallelism = n;
        self
    }

    pub fn transfer_chunk_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transfer.chunk_timeout_secs = secs;
        self
    }

    pub fn transfer_max_file_failures(mut self, n: u32) -> Self {
        self.config.transfer.max_file_failures = n;
        self
    }

    // --- retry ---

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self
    }

    pub fn retry_jitter(mut self, jitter: bool) -> Self {
        self.config.retry.jitter = jitter;
        self
    }

    pub fn retry_max_corruption_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_corruption_attempts = n;
        self
    }

    // --- bandwidth ---

    pub fn bandwidth_limit_kbps(mut self, kbps: u64) -> Self {
        self.config.bandwidth.limit_kbps = kbps;
        self
    }

    pub fn bandwidth_burst_kb(mut self, kb: u64) -> Self {
        self.config.bandwidth.burst_kb = kb;
        self
    }

    // --- filters ---

    pub fn filters(mut self, filters: FiltersConfig) -> Self {
        self.config.filters = filters;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::Utc;

    use super::*;
    use crate::domain::RemoteEntry;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.transfer.concurrency, 3);
        assert_eq!(cfg.transfer.chunk_size_kb, 8192);
        assert_eq!(cfg.chunk_size_bytes(), 8 * 1024 * 1024);
        assert_eq!(cfg.transfer.chunk_parallelism, 1);
        assert_eq!(cfg.transfer.chunk_timeout_secs, 60);
        assert_eq!(cfg.transfer.max_file_failures, 3);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(cfg.retry.max_delay_ms, 60_000);
        assert!(cfg.retry.jitter);
        assert_eq!(cfg.retry.max_corruption_attempts, 2);
        assert_eq!(cfg.bandwidth.limit_kbps, 0);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, "text");
        assert_eq!(cfg.sync.remote_root, "root");
        assert!(cfg.sync.database.ends_with("cloudmirror/state.db"));
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  root: /tmp/mirror
  database: /tmp/mirror.db
  remote_root: "0AbCdEf"
transfer:
  concurrency: 6
  chunk_size_kb: 1024
  chunk_parallelism: 2
  chunk_timeout_secs: 30
  max_file_failures: 5
retry:
  max_attempts: 7
  base_delay_ms: 100
  max_delay_ms: 5000
  jitter: false
  max_corruption_attempts: 3
bandwidth:
  limit_kbps: 2048
  burst_kb: 512
filters:
  include_extensions: [jpg, png]
  min_size: 10
  name_excludes: ["~$"]
logging:
  level: debug
  format: json
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.root, PathBuf::from("/tmp/mirror"));
        assert_eq!(cfg.sync.remote_root, "0AbCdEf");
        assert_eq!(cfg.transfer.concurrency, 6);
        assert_eq!(cfg.chunk_size_bytes(), 1024 * 1024);
        assert_eq!(cfg.transfer.chunk_parallelism, 2);
        assert_eq!(cfg.retry.max_attempts, 7);
        assert!(!cfg.retry.jitter);
        assert_eq!(cfg.bandwidth.limit_kbps, 2048);
        assert_eq!(cfg.filters.include_extensions, vec!["jpg", "png"]);
        assert_eq!(cfg.filters.min_size, Some(10));
        assert_eq!(cfg.filters.max_size, None);
        assert_eq!(cfg.logging.format, "json");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_partial_yaml_uses_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"transfer:\n  concurrency: 8\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.transfer.concurrency, 8);
        assert_eq!(cfg.transfer.chunk_size_kb, 8192);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_invalid_yaml_fails() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"transfer: [not, a, map]\n").unwrap();
        tmp.flush().unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_each_error() {
        let cfg = ConfigBuilder::new()
            .transfer_concurrency(0)
            .transfer_chunk_size_kb(0)
            .retry_delays_ms(10_000, 100)
            .logging_level("loud")
            .logging_format("xml")
            .filters(FiltersConfig {
                min_size: Some(10),
                max_size: Some(5),
                ..FiltersConfig::default()
            })
            .build();
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for expected in [
            "transfer.concurrency",
            "transfer.chunk_size_kb",
            "retry.base_delay_ms",
            "logging.level",
            "logging.format",
            "filters.min_size",
        ] {
            assert!(fields.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn build_validated_reports_errors() {
        let result = ConfigBuilder::new().retry_max_attempts(0).build_validated();
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "retry.max_attempts: must be at least 1");
    }

    #[test]
    fn burst_required_when_limited() {
        let cfg = ConfigBuilder::new()
            .bandwidth_limit_kbps(100)
            .bandwidth_burst_kb(0)
            .build();
        assert_eq!(cfg.validate()[0].field, "bandwidth.burst_kb");
    }

    // -- Filters --

    #[test]
    fn filters_section_builds_filter() {
        let filters = FiltersConfig {
            exclude_extensions: vec!["tmp".into()],
            max_size: Some(100),
            ..FiltersConfig::default()
        };
        let filter = filters.to_filter();
        let entry = |path: &str, size| {
            RemoteEntry::file(
                "x".parse().unwrap(),
                path.parse().unwrap(),
                size,
                None,
                Utc::now(),
            )
        };
        assert!(filter.accepts(&entry("a.txt", 5)));
        assert!(!filter.accepts(&entry("a.tmp", 5)));
        assert!(!filter.accepts(&entry("a.txt", 101)));
    }
}
