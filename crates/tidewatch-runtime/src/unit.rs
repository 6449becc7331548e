//! Runtime unit and service descriptions, plus container matching.

use std::collections::HashMap;
use std::fmt;

use tidewatch_state::APPLICATION_LABEL;

/// Lifecycle state of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl UnitState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => UnitState::Created,
            "running" => UnitState::Running,
            "paused" => UnitState::Paused,
            "restarting" => UnitState::Restarting,
            "removing" => UnitState::Removing,
            "exited" => UnitState::Exited,
            "dead" => UnitState::Dead,
            other => UnitState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Created => "created",
            UnitState::Running => "running",
            UnitState::Paused => "paused",
            UnitState::Restarting => "restarting",
            UnitState::Removing => "removing",
            UnitState::Exited => "exited",
            UnitState::Dead => "dead",
            UnitState::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// A container on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeUnit {
    pub id: String,
    pub name: String,
    pub state: UnitState,
    pub labels: HashMap<String, String>,
}

impl RuntimeUnit {
    pub fn new(id: &str, name: &str, state: UnitState) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state,
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// Running vs. desired replica counts of a clustered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceReplicas {
    pub running: u32,
    pub desired: u32,
}

impl ServiceReplicas {
    /// Parse a `running/desired` column, tolerating trailing annotations
    /// such as `2/3 (max 1 per node)`.
    pub fn parse(raw: &str) -> Option<Self> {
        let counts = raw.split_whitespace().next()?;
        let (running, desired) = counts.split_once('/')?;
        Some(Self {
            running: running.parse().ok()?,
            desired: desired.parse().ok()?,
        })
    }
}

/// Find the container belonging to an application.
///
/// An exact name or a `tidewatch.application` label match wins; otherwise
/// the first unit named `<name>-*`, `<name>.*` or `<name>_*` (compose and
/// swarm task naming) is taken.
pub fn find_unit<'a>(units: &'a [RuntimeUnit], app_id: &str, name: &str) -> Option<&'a RuntimeUnit> {
    let exact = units.iter().find(|u| {
        u.name.trim_start_matches('/') == name
            || u.labels.get(APPLICATION_LABEL).map(String::as_str) == Some(app_id)
    });
    exact.or_else(|| {
        units.iter().find(|u| {
            let unit_name = u.name.trim_start_matches('/');
            ['-', '.', '_'].iter().any(|sep| {
                unit_name
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with(*sep))
            })
        })
    })
}
