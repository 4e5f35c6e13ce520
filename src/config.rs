//! Configuration loading and validation
//!
//! The configuration is a JSON document keyed by snake_case option names,
//! stored at `{root}/config/config.json`. Missing fields take defaults;
//! out-of-range values are rejected with a Configuration error and the
//! prior config is retained by callers.

use crate::error::{CodelexError, CodelexResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log verbosity levels accepted by the `log_level` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive string for a `tracing` EnvFilter
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            // tracing has no level above error; both map to error
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Process-wide configuration
///
/// Constructed once and passed explicitly through construction; there is
/// no ambient access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base directory for all state
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Bearer token for private source fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Per-ingestion overall timeout, 30..=3600
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_seconds: u64,

    /// Parser hard cap, 1..=100
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,

    /// Worker pool width for per-file parsing, 1..=16
    #[serde(default = "default_max_parsers")]
    pub max_concurrent_parsers: usize,

    /// Per-call query timeout, 5..=300
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub require_confirmation_for_destructive: bool,

    /// Row batch size for streaming exports
    #[serde(default = "default_export_batch")]
    pub export_batch_size: usize,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".codelex")
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_processing_timeout() -> u64 {
    3600
}

fn default_max_file_size() -> u64 {
    10
}

fn default_max_parsers() -> usize {
    4
}

fn default_query_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_export_batch() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are total")
    }
}

impl Config {
    /// Load and validate a configuration file; missing fields take defaults.
    pub fn load(path: &Path) -> CodelexResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CodelexError::configuration(format!("cannot read {}: {}", path.display(), e))
                .with_suggestion("run any command once to write a default config")
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|e| {
            CodelexError::configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `{root}/config/config.json` if present, else defaults.
    pub fn load_or_default(root: &Path) -> CodelexResult<Self> {
        let path = root.join("config").join("config.json");
        if path.exists() {
            let mut config = Self::load(&path)?;
            config.storage_root = root.to_path_buf();
            Ok(config)
        } else {
            let mut config = Config::default();
            config.storage_root = root.to_path_buf();
            Ok(config)
        }
    }

    /// Write the document back to `{root}/config/config.json`.
    pub fn save(&self) -> CodelexResult<()> {
        let dir = self.storage_root.join("config");
        std::fs::create_dir_all(&dir)
            .map_err(|e| CodelexError::configuration(e.to_string()))?;
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CodelexError::configuration(e.to_string()))?;
        std::fs::write(dir.join("config.json"), text)
            .map_err(|e| CodelexError::configuration(e.to_string()))?;
        Ok(())
    }

    /// Range checks from the option table; rejected values leave the prior
    /// config untouched on the caller's side.
    pub fn validate(&self) -> CodelexResult<()> {
        check_range(
            "processing_timeout_seconds",
            self.processing_timeout_seconds,
            30,
            3600,
        )?;
        check_range("max_file_size_mb", self.max_file_size_mb, 1, 100)?;
        check_range(
            "max_concurrent_parsers",
            self.max_concurrent_parsers as u64,
            1,
            16,
        )?;
        check_range("query_timeout_seconds", self.query_timeout_seconds, 5, 300)?;
        if self.export_batch_size == 0 {
            return Err(CodelexError::configuration(
                "export_batch_size must be positive",
            ));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn store_dir(&self) -> PathBuf {
        self.storage_root.join("store")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.storage_root.join("repos")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.storage_root.join("exports")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.storage_root.join("logs")
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> CodelexResult<()> {
    if value < min || value > max {
        return Err(CodelexError::configuration(format!(
            "{} = {} out of range {}..={}",
            name, value, min, max
        ))
        .with_suggestion(format!("choose a value between {} and {}", min, max)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.query_timeout_seconds, 30);
        assert_eq!(config.max_file_size_mb, 10);
        assert!(config.require_confirmation_for_destructive);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_file_size_mb": 25}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_file_size_mb, 25);
        assert_eq!(config.query_timeout_seconds, 30);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"query_timeout_seconds": 2}"#).unwrap();
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"query_timeut_seconds": 10}"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_root = dir.path().to_path_buf();
        config.max_concurrent_parsers = 8;
        config.save().unwrap();
        let loaded = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.max_concurrent_parsers, 8);
    }
}
