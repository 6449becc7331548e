//! Daemon configuration file.
//!
//! ```toml
//! data_dir = "/var/lib/tidewatch"
//! docker_binary = "/usr/bin/docker"
//!
//! [monitor]
//! tick_interval = "10s"
//! max_concurrent_checks = 16
//! host_offline_threshold = 3
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tidewatch_health::MonitorConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub docker_binary: PathBuf,
    pub monitor: MonitorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/tidewatch"),
            docker_binary: PathBuf::from("docker"),
            monitor: MonitorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tidewatch.redb")
    }
}
