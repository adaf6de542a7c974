//! Configuration loading for Cadence
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `CADENCE_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/cadence/config.toml`)
//! 4. Built-in defaults (every field has one)

use crate::db::{RetryPolicy, StoreLocation, StoreOptions};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database location and pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. In in-memory mode this is the snapshot target.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Work against an in-memory copy flushed periodically to `path`
    #[serde(default)]
    pub in_memory: bool,

    #[serde(default = "default_pool_min")]
    pub pool_min: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    /// How long one acquire attempt waits for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// SQLite busy_timeout applied to every pooled connection
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Minimum spacing between non-forced snapshot flushes
    #[serde(default = "default_flush_min_interval_secs")]
    pub flush_min_interval_secs: u64,
}

/// Retry policy for contended writes and pool exhaustion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Allowed extensions, with or without the leading dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound for one call into the enrichment collaborator
    #[serde(default = "default_enrich_timeout_ms")]
    pub enrich_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Circuit breaker: stop after this many failures in a row
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Seconds of audio (centred) fed to the extractor
    #[serde(default = "default_max_analysis_seconds")]
    pub max_analysis_seconds: f64,
    /// Optional cap on tracks processed per run
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station length including the seed
    #[serde(default = "default_station_size")]
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cadence").join("cadence.db"))
        .unwrap_or_else(|| PathBuf::from("./cadence_data/cadence.db"))
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    2000
}

fn default_busy_timeout_ms() -> u64 {
    250
}

fn default_flush_min_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_extensions() -> Vec<String> {
    ["mp3", "wav", "flac", "ogg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_enrich_timeout_ms() -> u64 {
    5000
}

fn default_max_consecutive_errors() -> u32 {
    10
}

fn default_max_analysis_seconds() -> f64 {
    90.0
}

fn default_station_size() -> usize {
    20
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_reconcile_interval_secs() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            in_memory: false,
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            flush_min_interval_secs: default_flush_min_interval_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            recursive: true,
            batch_size: default_batch_size(),
            enrich_timeout_ms: default_enrich_timeout_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: default_max_consecutive_errors(),
            max_analysis_seconds: default_max_analysis_seconds(),
            limit: None,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            size: default_station_size(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl DatabaseConfig {
    pub fn store_options(&self, retry: &RetryConfig) -> StoreOptions {
        let location = if self.in_memory {
            StoreLocation::InMemory {
                snapshot: Some(self.path.clone()),
            }
        } else {
            StoreLocation::Disk(self.path.clone())
        };

        StoreOptions {
            location,
            pool_min: self.pool_min,
            pool_max: self.pool_max,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            flush_min_interval: Duration::from_secs(self.flush_min_interval_secs),
            retry: retry.policy(),
        }
    }
}

impl CadenceConfig {
    /// Load configuration following the resolution priority
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration file");
                Self::from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CadenceConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_max == 0 {
            return Err(Error::Config("database.pool_max must be at least 1".to_string()));
        }
        if self.database.pool_min > self.database.pool_max {
            return Err(Error::Config(format!(
                "database.pool_min ({}) exceeds database.pool_max ({})",
                self.database.pool_min, self.database.pool_max
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.scan.batch_size == 0 {
            return Err(Error::Config("scan.batch_size must be at least 1".to_string()));
        }
        if self.scan.extensions.is_empty() {
            return Err(Error::Config("scan.extensions must not be empty".to_string()));
        }
        if self.analysis.max_consecutive_errors == 0 {
            return Err(Error::Config(
                "analysis.max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        if !(self.analysis.max_analysis_seconds > 0.0) {
            return Err(Error::Config(
                "analysis.max_analysis_seconds must be positive".to_string(),
            ));
        }
        if self.station.size == 0 {
            return Err(Error::Config("station.size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Find the config file to load, if any
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("cadence").join("config.toml"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = CadenceConfig::from_toml_str("").unwrap();
        assert_eq!(config.scan.batch_size, 100);
        assert_eq!(config.scan.extensions, vec!["mp3", "wav", "flac", "ogg"]);
        assert_eq!(config.analysis.max_consecutive_errors, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.database.in_memory);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = CadenceConfig::from_toml_str(
            r#"
            [database]
            in_memory = true
            pool_max = 4

            [scan]
            batch_size = 2
            extensions = [".mp3"]
            "#,
        )
        .unwrap();

        assert!(config.database.in_memory);
        assert_eq!(config.database.pool_max, 4);
        assert_eq!(config.database.pool_min, 1);
        assert_eq!(config.scan.batch_size, 2);
        assert!(config.scan.recursive);
    }

    #[test]
    fn test_validation_rejects_inverted_pool_bounds() {
        let result = CadenceConfig::from_toml_str(
            r#"
            [database]
            pool_min = 9
            pool_max = 2
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let result = CadenceConfig::from_toml_str("[scan]\nbatch_size = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_in_memory_maps_to_snapshot_location() {
        let mut config = CadenceConfig::default();
        config.database.in_memory = true;
        config.database.path = PathBuf::from("/tmp/library.db");

        let options = config.database.store_options(&config.retry);
        match options.location {
            StoreLocation::InMemory { snapshot } => {
                assert_eq!(snapshot, Some(PathBuf::from("/tmp/library.db")));
            }
            other => panic!("Expected in-memory location, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_cli_path_beats_environment() {
        std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
        let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")));
        assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

        let resolved = resolve_config_path(None);
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
        std::env::remove_var(CONFIG_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_load_reads_file_from_environment() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cadence.toml");
        std::fs::write(&path, "[station]\nsize = 7\n").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &path);
        let config = CadenceConfig::load(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.station.size, 7);
    }
}
