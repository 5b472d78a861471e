//! Run configuration (`upp.toml`).
//!
//! Loaded and validated once before the pass starts, then passed by reference
//! to every component that needs it.

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "upp.toml";

pub const DEFAULT_MAX_RETRIES: usize = 3;

pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Remote `host:port` speaking the transfer protocol
    pub address: String,

    /// Root directory scanned for files to deliver
    pub repertory: PathBuf,

    /// Check-in endpoint; both pre-check and commit are skipped when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Shared secret mixed into the commit hash
    #[serde(default)]
    pub key: String,

    /// Content types eligible for delivery (empty admits everything)
    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_io_timeout_secs() -> u64 {
    DEFAULT_IO_TIMEOUT_SECS
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid config: {}", e)))?;
        config.url = config.url.take().filter(|u| !u.trim().is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(SyncError::Config("address must not be empty".to_string()));
        }

        let meta = std::fs::metadata(&self.repertory).map_err(|e| {
            SyncError::Config(format!(
                "repertory {} is not accessible: {}",
                self.repertory.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(SyncError::Config(format!(
                "repertory {} is not a directory",
                self.repertory.display()
            )));
        }

        if self.io_timeout_secs == 0 {
            return Err(SyncError::Config(
                "io_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn check_in_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn allows(&self, content_type: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|a| a == content_type)
    }
}
