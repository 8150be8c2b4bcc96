use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use cron::Schedule;
use serde::Deserialize;

use depfix::config::AuditConfig;
use depfix::fleet::{FleetOptions, MAX_CONCURRENCY, MAX_REPOSITORIES};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Cron expression with a seconds field.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_max_repositories")]
    pub max_repositories: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
    pub audit: AuditConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_schedule() -> String {
    "0 0 * * * *".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".depfix")
}

fn default_max_repositories() -> usize {
    MAX_REPOSITORIES
}

fn default_max_concurrency() -> usize {
    MAX_CONCURRENCY
}

fn default_min_interval() -> u64 {
    24 * 60 * 60
}

impl ScannerConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ScannerConfig = toml::from_str(content).context("failed to parse scanner configuration")?;
        config.audit.validate()?;
        config.cron()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn cron(&self) -> Result<Schedule> {
        Schedule::from_str(&self.schedule).with_context(|| format!("invalid schedule {:?}", self.schedule))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn fleet_options(&self) -> FleetOptions {
        FleetOptions {
            max_repositories: self.max_repositories,
            max_concurrency: self.max_concurrency,
            ..FleetOptions::default()
        }
    }
}
