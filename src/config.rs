//! Engine configuration.
//!
//! A `Config` travels with every rule evaluation. The two flags every host
//! sets are `dry_run` and `safe_mode`; the remaining keys tune resource
//! bounds and where reversible deletes keep their backups.
//!
//! # Configuration File Format
//!
//! ```toml
//! dry_run = false
//! safe_mode = true
//! regex_timeout_ms = 1000
//! undo_capacity = 200
//! backup_dir = "/home/me/.local/share/ruletidy/backups"
//! protected_paths = ["/mnt/archive/**"]
//! content_scan_limit = 10485760
//! ```
//!
//! Unknown keys are ignored so hosts can keep their own settings in the
//! same file.

use crate::regex_guard::DEFAULT_REGEX_TIMEOUT;
use crate::undo::DEFAULT_UNDO_CAPACITY;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default number of bytes `ContentContains` reads from a file.
pub const DEFAULT_CONTENT_SCAN_LIMIT: u64 = 10 * 1024 * 1024;

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Settings consulted by conditions, actions and the undo ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulate actions without touching the filesystem or metadata store.
    pub dry_run: bool,
    /// Refuse deletes of protected system paths and suppress `RunCommand`.
    pub safe_mode: bool,
    /// Upper bound for a single regex evaluation, in milliseconds.
    pub regex_timeout_ms: u64,
    /// Number of undo entries kept before the oldest is evicted.
    pub undo_capacity: usize,
    /// Where `Delete`/`DeleteToTrash` keep reversible backups.
    pub backup_dir: Option<PathBuf>,
    /// Extra glob patterns treated as protected in safe mode.
    pub protected_paths: Vec<String>,
    /// Bytes read by `ContentContains`.
    pub content_scan_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: false,
            safe_mode: true,
            regex_timeout_ms: DEFAULT_REGEX_TIMEOUT.as_millis() as u64,
            undo_capacity: DEFAULT_UNDO_CAPACITY,
            backup_dir: None,
            protected_paths: Vec::new(),
            content_scan_limit: DEFAULT_CONTENT_SCAN_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.ruletidy.toml` in the current directory
    /// 3. Look for `ruletidy/config.toml` in the user's config directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but
    /// cannot be read, or if any discovered file is invalid.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".ruletidy.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ruletidy").join("config.toml");
            if user_config.exists() {
                return Self::load_from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if the file does not exist,
    /// `ConfigError::IoError` if it cannot be read and
    /// `ConfigError::ConfigInvalid` if TOML parsing fails.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigInvalid` if the text is not valid TOML or
    /// a known key has the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Returns a copy with `dry_run` set.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns a copy with `safe_mode` set.
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Regex evaluation bound as a `Duration`.
    pub fn regex_timeout(&self) -> Duration {
        Duration::from_millis(self.regex_timeout_ms)
    }

    /// Directory holding delete backups.
    pub fn backup_root(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ruletidy-backups"))
    }

    /// Compiled `protected_paths`; invalid patterns are skipped with a warning.
    pub fn protected_patterns(&self) -> Vec<Pattern> {
        self.protected_paths
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid protected path pattern");
                    None
                }
            })
            .collect()
    }
}
