//! Monitor configuration.
//!
//! Durations are written the way operators write them in TOML: `"5s"`,
//! `"500ms"`, `"2m"`, or a bare number of seconds. Unparseable values fall
//! back to the field's default instead of failing startup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Engine-wide tuning knobs. Per-application intervals, timeouts and
/// thresholds live on the application records themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often the scheduler looks for due targets.
    pub tick_interval: String,
    /// Upper bound on evaluations running at once.
    pub max_concurrent_checks: usize,
    /// Slack on top of a probe's own timeout before the supervisor aborts it.
    pub probe_grace: String,
    /// Pause between stopping and starting a standalone container.
    pub restart_grace: String,
    /// Deadline for each runtime call made during recovery.
    pub recovery_timeout: String,
    pub host_check_interval: String,
    pub host_check_timeout: String,
    /// Consecutive failed host checks before a host is marked offline.
    pub host_offline_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: "10s".to_string(),
            max_concurrent_checks: 16,
            probe_grace: "2s".to_string(),
            restart_grace: "2s".to_string(),
            recovery_timeout: "60s".to_string(),
            host_check_interval: "60s".to_string(),
            host_check_timeout: "10s".to_string(),
            host_offline_threshold: 3,
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Scheduler tick, never below 10ms.
    pub fn tick_interval(&self) -> Duration {
        duration_or("tick_interval", &self.tick_interval, Duration::from_secs(10))
            .max(Duration::from_millis(10))
    }

    pub fn probe_grace(&self) -> Duration {
        duration_or("probe_grace", &self.probe_grace, Duration::from_secs(2))
    }

    pub fn restart_grace(&self) -> Duration {
        duration_or("restart_grace", &self.restart_grace, Duration::from_secs(2))
    }

    pub fn recovery_timeout(&self) -> Duration {
        duration_or("recovery_timeout", &self.recovery_timeout, Duration::from_secs(60))
    }

    pub fn host_check_interval(&self) -> Duration {
        duration_or("host_check_interval", &self.host_check_interval, Duration::from_secs(60))
    }

    pub fn host_check_timeout(&self) -> Duration {
        duration_or("host_check_timeout", &self.host_check_timeout, Duration::from_secs(10))
    }

    /// Concurrency bound, never zero.
    pub fn max_concurrent_checks(&self) -> usize {
        self.max_concurrent_checks.max(1)
    }
}

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn duration_or(field: &str, raw: &str, default: Duration) -> Duration {
    parse_duration(raw).unwrap_or_else(|| {
        warn!(field, value = raw, ?default, "unparseable duration, using default");
        default
    })
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else if let Some(days) = s.strip_suffix('d') {
        days.trim().parse::<u64>().ok().map(|d| Duration::from_secs(d * 86_400))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
