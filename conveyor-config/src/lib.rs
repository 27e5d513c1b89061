//! Runtime configuration for the conveyor engine.
//!
//! Configuration is resolved in three layers: compiled-in defaults, an
//! optional config file (TOML or JSON, format inferred from the extension),
//! and `CONVEYOR_*` environment variables, which win over the file.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Raw, all-optional file representation before defaults are applied.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub retention: Option<RetentionSection>,
    #[serde(default)]
    pub worker: Option<WorkerSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetentionSection {
    #[serde(default)]
    pub completed_age_days: Option<u64>,
    #[serde(default)]
    pub completed_count: Option<usize>,
    #[serde(default)]
    pub failed_age_days: Option<u64>,
    #[serde(default)]
    pub failed_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub shutdown_grace_secs: Option<u64>,
    #[serde(default)]
    pub min_workers: Option<usize>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// How long and how many terminal jobs are kept before pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    pub completed_age: Duration,
    pub completed_count: usize,
    pub failed_age: Duration,
    pub failed_count: usize,
}

const DAY_SECS: u64 = 24 * 60 * 60;

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_age: Duration::from_secs(2 * DAY_SECS),
            completed_count: 100,
            failed_age: Duration::from_secs(7 * DAY_SECS),
            failed_count: 50,
        }
    }
}

/// Tuning for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight handlers before force-closing.
    pub shutdown_grace: Duration,
    /// Floor on the pool size so low-concurrency deployments still progress.
    pub min_workers: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
            min_workers: 5,
        }
    }
}

/// Fully-resolved engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConveyorConfig {
    pub retention: RetentionConfig,
    pub worker: WorkerSettings,
}

impl ConveyorConfig {
    /// Defaults plus environment overrides, no file involved.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a config file, then apply environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        let raw = parse_config_str(&contents, ext.as_deref())?;

        let mut cfg = Self::default();
        cfg.apply_raw(&raw);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_raw(&mut self, raw: &RawConfigFile) {
        if let Some(retention) = &raw.retention {
            if let Some(days) = retention.completed_age_days {
                self.retention.completed_age = Duration::from_secs(days * DAY_SECS);
            }
            if let Some(count) = retention.completed_count {
                self.retention.completed_count = count;
            }
            if let Some(days) = retention.failed_age_days {
                self.retention.failed_age = Duration::from_secs(days * DAY_SECS);
            }
            if let Some(count) = retention.failed_count {
                self.retention.failed_count = count;
            }
        }
        if let Some(worker) = &raw.worker {
            if let Some(ms) = worker.poll_interval_ms {
                self.worker.poll_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = worker.shutdown_grace_secs {
                self.worker.shutdown_grace = Duration::from_secs(secs);
            }
            if let Some(min) = worker.min_workers {
                self.worker.min_workers = min;
            }
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(days) = env_u64("CONVEYOR_COMPLETED_AGE_DAYS")? {
            self.retention.completed_age = Duration::from_secs(days * DAY_SECS);
        }
        if let Some(count) = env_u64("CONVEYOR_COMPLETED_COUNT")? {
            self.retention.completed_count = count as usize;
        }
        if let Some(days) = env_u64("CONVEYOR_FAILED_AGE_DAYS")? {
            self.retention.failed_age = Duration::from_secs(days * DAY_SECS);
        }
        if let Some(count) = env_u64("CONVEYOR_FAILED_COUNT")? {
            self.retention.failed_count = count as usize;
        }
        if let Some(ms) = env_u64("CONVEYOR_POLL_INTERVAL_MS")? {
            self.worker.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("CONVEYOR_SHUTDOWN_GRACE_SECS")? {
            self.worker.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(min) = env_u64("CONVEYOR_MIN_WORKERS")? {
            self.worker.min_workers = min as usize;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "worker poll interval must be greater than zero".into(),
            ));
        }
        if self.worker.shutdown_grace.is_zero() {
            return Err(ConfigError::Validation(
                "worker shutdown grace must be greater than zero".into(),
            ));
        }
        if self.worker.min_workers == 0 {
            return Err(ConfigError::Validation(
                "worker pool floor must be at least one".into(),
            ));
        }
        Ok(())
    }
}

/// Parse configuration from a string with an optional format hint.
pub fn parse_config_str(contents: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        Some("toml") => toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string())),
        Some("json") => {
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        other => Err(ConfigError::Parse(format!(
            "unsupported config format: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{name} must be a non-negative integer"))),
        Err(_) => Ok(None),
    }
}
