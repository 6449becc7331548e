//! Domain types for the Tidewatch state store.
//!
//! These types represent the persisted state of monitored applications,
//! monitored hosts, and health-check records. All types are serializable
//! to/from JSON for storage in redb tables.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a monitored application.
pub type ApplicationId = String;

/// Unique identifier for a monitored host.
pub type HostId = String;

/// Label a runtime unit may carry to bind it to an application id.
pub const APPLICATION_LABEL: &str = "tidewatch.application";

// ── Health status ─────────────────────────────────────────────────

/// Outcome of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Reachable but misbehaving (4xx, paused container, partial replicas).
    Degraded,
    Unhealthy,
    /// The workload's state could not be observed at all.
    Unknown,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Application ───────────────────────────────────────────────────

/// How a monitored application is executed on its host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A single, directly managed container.
    Standalone {
        /// Container name to match. Falls back to the application name.
        #[serde(default)]
        container_name: Option<String>,
    },
    /// A replicated service managed by the cluster orchestrator.
    ClusteredService {
        service_id: String,
        desired_replicas: u32,
    },
}

/// A deployed workload under health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredApplication {
    pub id: ApplicationId,
    /// Display name, also used to locate the running container.
    pub name: String,
    /// Host whose runtime executes this workload.
    pub host_id: HostId,
    /// Image reference used when forcing a service update.
    #[serde(default)]
    pub image: String,
    pub mode: ExecutionMode,
    /// HTTP(S) health endpoint. Takes precedence over every other probe.
    #[serde(default)]
    pub health_url: Option<String>,
    /// Domain for TCP probing (paired with `port`).
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub check_interval_secs: u64,
    pub check_timeout_secs: u64,
    /// Consecutive failures before recovery may fire.
    pub failure_threshold: u32,
    pub auto_recovery: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Unix timestamp (seconds) of the last completed check.
    #[serde(default)]
    pub last_checked_at: Option<u64>,
}

impl MonitoredApplication {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Per-check timeout, never shorter than one second.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs.max(1))
    }

    /// Failure threshold clamped to at least 1.
    pub fn effective_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Unix timestamp at which the next check is due.
    ///
    /// Never-checked applications are due at the epoch, i.e. immediately.
    pub fn next_due(&self) -> u64 {
        self.last_checked_at
            .unwrap_or(0)
            .saturating_add(self.check_interval_secs)
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_due()
    }

    /// Name used to find this application's container in standalone mode.
    pub fn container_name(&self) -> &str {
        match &self.mode {
            ExecutionMode::Standalone {
                container_name: Some(name),
            } if !name.trim().is_empty() => name,
            _ => &self.name,
        }
    }

    /// Apply a check outcome to the failure counter and last-checked stamp.
    pub fn record_check(&mut self, status: HealthStatus, now: u64) {
        if status.is_healthy() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.last_checked_at = Some(now);
    }

    /// Whether a check with `status` (already applied to the counter)
    /// warrants a recovery attempt.
    ///
    /// Only `Unhealthy` qualifies: `Degraded` is not an outage and `Unknown`
    /// means the state could not be observed.
    pub fn recovery_warranted(&self, status: HealthStatus) -> bool {
        status == HealthStatus::Unhealthy
            && self.auto_recovery
            && self.consecutive_failures >= self.effective_threshold()
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// Connectivity status of an execution host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Online,
    Offline,
}

/// An execution host whose runtime runs monitored applications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredHost {
    pub id: HostId,
    pub name: String,
    /// Runtime endpoint, e.g. `unix:///var/run/docker.sock` or `ssh://deploy@10.0.0.5`.
    pub endpoint: String,
    pub status: HostStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_health_check: Option<u64>,
    #[serde(default)]
    pub last_failure: Option<u64>,
}

impl MonitoredHost {
    pub fn next_due(&self, interval_secs: u64) -> u64 {
        self.last_health_check
            .unwrap_or(0)
            .saturating_add(interval_secs)
    }

    /// Apply a host check outcome.
    ///
    /// A healthy check brings the host online and clears the counter; the
    /// host goes offline once `offline_threshold` consecutive checks fail.
    pub fn record_check(&mut self, status: HealthStatus, now: u64, offline_threshold: u32) {
        if status.is_healthy() {
            self.consecutive_failures = 0;
            self.status = HostStatus::Online;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure = Some(now);
            if self.consecutive_failures >= offline_threshold.max(1) {
                self.status = HostStatus::Offline;
            }
        }
        self.last_health_check = Some(now);
    }
}

// ── Health-check records ──────────────────────────────────────────

/// The entity a health-check record belongs to. Exactly one, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CheckTarget {
    Application(ApplicationId),
    Host(HostId),
}

impl CheckTarget {
    pub fn id(&self) -> &str {
        match self {
            CheckTarget::Application(id) | CheckTarget::Host(id) => id,
        }
    }
}

impl fmt::Display for CheckTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckTarget::Application(id) => write!(f, "application {id}"),
            CheckTarget::Host(id) => write!(f, "host {id}"),
        }
    }
}

/// One immutable health observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckRecord {
    /// Assigned by the store on append; zero before that.
    pub id: u64,
    pub target: CheckTarget,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// HTTP status code or a probe-specific tag (`tcp`, `running`, `2/3`).
    pub status_code: Option<String>,
    pub detail: Option<String>,
    /// Unix timestamp (seconds).
    pub checked_at: u64,
}

impl HealthCheckRecord {
    pub fn new(target: CheckTarget, status: HealthStatus, response_time_ms: u64, checked_at: u64) -> Self {
        Self {
            id: 0,
            target,
            status,
            response_time_ms,
            status_code: None,
            detail: None,
            checked_at,
        }
    }

    pub fn with_status_code(mut self, code: Option<String>) -> Self {
        self.status_code = code;
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    /// Build the key for this record in its target's index table.
    pub fn index_key(&self) -> String {
        check_index_key(self.target.id(), self.checked_at, self.id)
    }
}

/// Index key `{target_id}\0{checked_at:020}:{id:020}`.
///
/// Zero-padding keeps lexicographic order equal to chronological order, with
/// the record id breaking ties inside one second. The NUL terminator sorts
/// below every printable byte, so one id's range never contains a longer id
/// that shares its prefix (`web` vs `web:10`).
pub fn check_index_key(target_id: &str, checked_at: u64, id: u64) -> String {
    format!("{target_id}\0{checked_at:020}:{id:020}")
}
