//! Runner configuration from environment variables and an optional TOML file.
//!
//! Values layer as defaults, then the file named by `ATOMIC_CONFIG`, then
//! `ATOMIC_*` environment variables. Invalid values fall back to the layer
//! below without crashing; each fallback is kept as a warning.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `ATOMIC_CONFIG` | unset | TOML file read before the variables below |
//! | `ATOMIC_BUNDLED_PATH` | `atomics` | Bundled catalog root |
//! | `ATOMIC_CUSTOM_PATH` | `custom` | Custom catalog root |
//! | `ATOMIC_LOCAL_PATH` | unset | Local overlay root |
//! | `ATOMIC_COMMAND_TIMEOUT` | 0 | Per-command timeout (secs, 0 = unbounded) |
//! | `ATOMIC_SCRATCH_ROOT` | OS temp dir | Parent of run scratch directories |
//! | `ATOMIC_RESULTS_FORMAT` | yaml | `json` or `yaml` |
//! | `ATOMIC_LOG_FORMAT` | pretty | `json` or `pretty` |
//! | `ATOMIC_LOG_LEVEL` | info | `EnvFilter` directive |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::FileCatalog;
use crate::engine::ResultFormat;
use crate::telemetry::{LogConfig, LogFormat};

pub const CONFIG_FILE_ENV: &str = "ATOMIC_CONFIG";

const DEFAULT_BUNDLED_PATH: &str = "atomics";
const DEFAULT_CUSTOM_PATH: &str = "custom";

/// Errors reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Effective configuration for one invocation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub bundled_path: PathBuf,
    pub custom_path: PathBuf,
    pub local_path: Option<PathBuf>,
    /// `None` waits without a ceiling.
    pub command_timeout: Option<Duration>,
    pub scratch_root: Option<PathBuf>,
    pub results_format: ResultFormat,
    pub log: LogConfig,
    /// Values that were ignored while loading.
    pub warnings: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bundled_path: PathBuf::from(DEFAULT_BUNDLED_PATH),
            custom_path: PathBuf::from(DEFAULT_CUSTOM_PATH),
            local_path: None,
            command_timeout: None,
            scratch_root: None,
            results_format: ResultFormat::default(),
            log: LogConfig::default(),
            warnings: Vec::new(),
        }
    }
}

/// Keys accepted in the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bundled_path: Option<PathBuf>,
    custom_path: Option<PathBuf>,
    local_path: Option<PathBuf>,
    command_timeout: Option<u64>,
    scratch_root: Option<PathBuf>,
    results_format: Option<String>,
    log_format: Option<String>,
    log_level: Option<String>,
}

/// Read and parse a TOML configuration file.
fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let body = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&body).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Non-empty env var value.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a `u64` env var; `None` when missing, a warning when invalid.
fn parse_u64(key: &str, warnings: &mut Vec<String>) -> Option<u64> {
    let raw = env_string(key)?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(format!("{}={} is not a number; ignored", key, raw));
            None
        }
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl RunnerConfig {
    /// Apply the file layer.
    fn apply_file(&mut self, file: FileConfig) {
        if let Some(p) = file.bundled_path {
            self.bundled_path = p;
        }
        if let Some(p) = file.custom_path {
            self.custom_path = p;
        }
        if file.local_path.is_some() {
            self.local_path = file.local_path;
        }
        if let Some(secs) = file.command_timeout {
            self.command_timeout = timeout_from_secs(secs);
        }
        if file.scratch_root.is_some() {
            self.scratch_root = file.scratch_root;
        }
        if let Some(f) = file.results_format {
            self.set_results_format("results_format", &f);
        }
        if let Some(f) = file.log_format {
            self.set_log_format("log_format", &f);
        }
        if let Some(level) = file.log_level {
            self.log.level = level;
        }
    }

    /// Apply the environment layer.
    fn apply_env(&mut self) {
        if let Some(p) = env_string("ATOMIC_BUNDLED_PATH") {
            self.bundled_path = PathBuf::from(p);
        }
        if let Some(p) = env_string("ATOMIC_CUSTOM_PATH") {
            self.custom_path = PathBuf::from(p);
        }
        if let Some(p) = env_string("ATOMIC_LOCAL_PATH") {
            self.local_path = Some(PathBuf::from(p));
        }
        if let Some(secs) = parse_u64("ATOMIC_COMMAND_TIMEOUT", &mut self.warnings) {
            self.command_timeout = timeout_from_secs(secs);
        }
        if let Some(p) = env_string("ATOMIC_SCRATCH_ROOT") {
            self.scratch_root = Some(PathBuf::from(p));
        }
        if let Some(f) = env_string("ATOMIC_RESULTS_FORMAT") {
            self.set_results_format("ATOMIC_RESULTS_FORMAT", &f);
        }
        if let Some(f) = env_string("ATOMIC_LOG_FORMAT") {
            self.set_log_format("ATOMIC_LOG_FORMAT", &f);
        }
        if let Some(level) = env_string("ATOMIC_LOG_LEVEL") {
            self.log.level = level;
        }
    }

    fn set_results_format(&mut self, key: &str, value: &str) {
        match value.parse() {
            Ok(format) => self.results_format = format,
            Err(e) => self.warnings.push(format!("{}: {}; ignored", key, e)),
        }
    }

    fn set_log_format(&mut self, key: &str, value: &str) {
        match value.parse::<LogFormat>() {
            Ok(format) => self.log.format = format,
            Err(e) => self.warnings.push(format!("{}: {}; ignored", key, e)),
        }
    }

    /// Technique source for this configuration.
    pub fn catalog(&self) -> FileCatalog {
        FileCatalog::new(
            self.bundled_path.clone(),
            Some(self.custom_path.clone()),
            self.local_path.clone(),
        )
    }

    /// Key/value summary of the effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            bundled_path: self.bundled_path.display().to_string(),
            custom_path: self.custom_path.display().to_string(),
            local_path: self
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            command_timeout_secs: self.command_timeout.map(|t| t.as_secs()).unwrap_or(0),
            scratch_root: self
                .scratch_root
                .clone()
                .unwrap_or_else(std::env::temp_dir)
                .display()
                .to_string(),
            results_format: self.results_format.to_string(),
            log_format: self.log.format.as_str().to_string(),
            log_level: self.log.level.clone(),
        }
    }
}

/// Effective configuration summary, printable as `KEY=VALUE` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub bundled_path: String,
    pub custom_path: String,
    pub local_path: String,
    pub command_timeout_secs: u64,
    pub scratch_root: String,
    pub results_format: String,
    pub log_format: String,
    pub log_level: String,
}

impl EffectiveConfig {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ATOMIC_BUNDLED_PATH", self.bundled_path.clone()),
            ("ATOMIC_CUSTOM_PATH", self.custom_path.clone()),
            ("ATOMIC_LOCAL_PATH", self.local_path.clone()),
            ("ATOMIC_COMMAND_TIMEOUT", self.command_timeout_secs.to_string()),
            ("ATOMIC_SCRATCH_ROOT", self.scratch_root.clone()),
            ("ATOMIC_RESULTS_FORMAT", self.results_format.clone()),
            ("ATOMIC_LOG_FORMAT", self.log_format.clone()),
            ("ATOMIC_LOG_LEVEL", self.log_level.clone()),
        ]
    }
}

/// Load configuration from `ATOMIC_CONFIG` and `ATOMIC_*` variables.
///
/// Missing or invalid values fall back without panicking.
pub fn load() -> RunnerConfig {
    let mut config = RunnerConfig::default();
    if let Some(path) = env_string(CONFIG_FILE_ENV) {
        match read_file(Path::new(&path)) {
            Ok(file) => config.apply_file(file),
            Err(e) => config.warnings.push(e.to_string()),
        }
    }
    config.apply_env();
    config
}

/// Load a specific file strictly, for validation.
pub fn load_file(path: &Path) -> Result<RunnerConfig, ConfigError> {
    let mut config = RunnerConfig::default();
    config.apply_file(read_file(path)?);
    Ok(config)
}
