//! Seeding the store from a JSON file.
//!
//! The deployment subsystem normally registers applications and hosts.
//! `tidewatchd import` does the same from a file so the daemon can run on
//! its own.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use tidewatch_state::{MonitoredApplication, MonitoredHost, StateStore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub hosts: Vec<MonitoredHost>,
    pub applications: Vec<MonitoredApplication>,
}

impl SeedFile {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Upsert every host, then every application. Returns (hosts, applications).
    pub fn apply(&self, store: &StateStore) -> anyhow::Result<(usize, usize)> {
        for host in &self.hosts {
            store.put_host(host)?;
        }
        for app in &self.applications {
            if store.get_host(&app.host_id)?.is_none() {
                warn!(app_id = %app.id, host_id = %app.host_id, "application references an unknown host");
            }
            store.put_application(app)?;
        }
        Ok((self.hosts.len(), self.applications.len()))
    }
}
