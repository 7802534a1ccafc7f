//! hntr configuration system.
//!
//! Loaded from `~/.hntr/config.toml`; every field has a default so an empty
//! (or missing) file yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HntrError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HntrConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Maximum number of records a single box may hold.
    #[serde(default = "default_records_limit")]
    pub records_limit: i64,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_path() -> String { "~/.hntr/hntr.db".into() }
fn default_records_limit() -> i64 { 100_000 }

impl Default for HntrConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            records_limit: default_records_limit(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl HntrConfig {
    /// Load config from the default path (~/.hntr/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HntrError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HntrError::Config(format!("Failed to parse config: {e}")))?;
        config.scheduler.validate()?;
        if config.records_limit < 1 {
            return Err(HntrError::Config("records_limit must be at least 1".into()));
        }
        Ok(config)
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the hntr home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hntr")
    }
}

/// Which execution backend consumes the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    /// In-process worker pool spawns the commands.
    #[default]
    Local,
    /// External agents pull jobs and push results back.
    Remote,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard wall-clock deadline per command.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Added on top of the job timeout to form the queue lease.
    #[serde(default = "default_lease_grace_secs")]
    pub lease_grace_secs: u64,
    /// Output lines per ingestion batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub backend: ExecutionBackend,
}

fn default_workers() -> usize { 2 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_job_timeout_secs() -> u64 { 60 }
fn default_lease_grace_secs() -> u64 { 30 }
fn default_batch_size() -> usize { 500 }
fn default_shell() -> String { "bash".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            lease_grace_secs: default_lease_grace_secs(),
            batch_size: default_batch_size(),
            shell: default_shell(),
            backend: ExecutionBackend::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HntrError::Config("scheduler.workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(HntrError::Config("scheduler.batch_size must be at least 1".into()));
        }
        if self.shell.trim().is_empty() {
            return Err(HntrError::Config("scheduler.shell must not be empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// How long a dequeued job stays invisible to other consumers.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs + self.lease_grace_secs)
    }
}
