//! Health history and uptime.

use std::time::Duration;

use tidewatch_state::{CheckTarget, HealthCheckRecord, StateStore};

use crate::epoch_secs;
use crate::error::{HealthError, HealthResult};

/// Read side of the health-check log.
#[derive(Clone)]
pub struct HealthHistory {
    store: StateStore,
}

impl HealthHistory {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Most recent checks of an application, newest first.
    pub fn history(&self, app_id: &str, limit: usize) -> HealthResult<Vec<HealthCheckRecord>> {
        if self.store.get_application(app_id)?.is_none() {
            return Err(HealthError::ApplicationNotFound(app_id.to_string()));
        }
        Ok(self
            .store
            .list_health_checks(&CheckTarget::Application(app_id.to_string()), limit)?)
    }

    /// Most recent checks of a host, newest first.
    pub fn host_history(&self, host_id: &str, limit: usize) -> HealthResult<Vec<HealthCheckRecord>> {
        if self.store.get_host(host_id)?.is_none() {
            return Err(HealthError::HostNotFound(host_id.to_string()));
        }
        Ok(self
            .store
            .list_health_checks(&CheckTarget::Host(host_id.to_string()), limit)?)
    }

    /// Percentage of healthy checks over the trailing `window`.
    pub fn uptime_percentage(&self, app_id: &str, window: Duration) -> HealthResult<f64> {
        self.uptime_percentage_at(app_id, window, epoch_secs())
    }

    /// Same as [`Self::uptime_percentage`], for the window ending at `now`.
    pub fn uptime_percentage_at(&self, app_id: &str, window: Duration, now: u64) -> HealthResult<f64> {
        if self.store.get_application(app_id)?.is_none() {
            return Err(HealthError::ApplicationNotFound(app_id.to_string()));
        }
        let from = now.saturating_sub(window.as_secs());
        let records = self.store.health_checks_between(
            &CheckTarget::Application(app_id.to_string()),
            from,
            now,
        )?;
        Ok(uptime(&records))
    }
}

/// `100 * healthy / total`, or 100 when there is nothing to judge by.
///
/// Degraded and Unknown checks count as down.
pub fn uptime(records: &[HealthCheckRecord]) -> f64 {
    if records.is_empty() {
        return 100.0;
    }
    let healthy = records.iter().filter(|r| r.status.is_healthy()).count();
    100.0 * healthy as f64 / records.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewatch_state::{ExecutionMode, HealthStatus, MonitoredApplication};

    fn seeded() -> (StateStore, HealthHistory) {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_application(&MonitoredApplication {
                id: "app-1".to_string(),
                name: "shop".to_string(),
                host_id: "host-1".to_string(),
                image: String::new(),
                mode: ExecutionMode::Standalone {
                    container_name: None,
                },
                health_url: None,
                domain: None,
                port: None,
                check_interval_secs: 30,
                check_timeout_secs: 5,
                failure_threshold: 3,
                auto_recovery: true,
                consecutive_failures: 0,
                last_checked_at: None,
            })
            .unwrap();
        let history = HealthHistory::new(store.clone());
        (store, history)
    }

    fn append(store: &StateStore, status: HealthStatus, at: u64) {
        store
            .append_health_check(HealthCheckRecord::new(
                CheckTarget::Application("app-1".to_string()),
                status,
                5,
                at,
            ))
            .unwrap();
    }

    #[test]
    fn empty_window_is_full_uptime() {
        let (_store, history) = seeded();
        assert_eq!(
            history
                .uptime_percentage_at("app-1", Duration::from_secs(3600), 10_000)
                .unwrap(),
            100.0
        );
    }

    #[test]
    fn degraded_and_unknown_count_as_down() {
        let (store, history) = seeded();
        append(&store, HealthStatus::Healthy, 9_000);
        append(&store, HealthStatus::Healthy, 9_100);
        append(&store, HealthStatus::Unhealthy, 9_200);
        append(&store, HealthStatus::Degraded, 9_300);
        assert_eq!(
            history
                .uptime_percentage_at("app-1", Duration::from_secs(3600), 10_000)
                .unwrap(),
            50.0
        );

        append(&store, HealthStatus::Unknown, 9_400);
        assert_eq!(
            history
                .uptime_percentage_at("app-1", Duration::from_secs(3600), 10_000)
                .unwrap(),
            40.0
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let (store, history) = seeded();
        append(&store, HealthStatus::Unhealthy, 6_399);
        append(&store, HealthStatus::Healthy, 6_400);
        append(&store, HealthStatus::Healthy, 10_000);
        append(&store, HealthStatus::Unhealthy, 10_001);
        assert_eq!(
            history
                .uptime_percentage_at("app-1", Duration::from_secs(3600), 10_000)
                .unwrap(),
            100.0
        );
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let (store, history) = seeded();
        for at in [100, 200, 300] {
            append(&store, HealthStatus::Healthy, at);
        }
        let records = history.history("app-1", 2).unwrap();
        assert_eq!(
            records.iter().map(|r| r.checked_at).collect::<Vec<_>>(),
            vec![300, 200]
        );
    }

    #[test]
    fn unknown_ids_are_errors() {
        let (_store, history) = seeded();
        assert!(matches!(
            history.history("nope", 10),
            Err(HealthError::ApplicationNotFound(_))
        ));
        assert!(matches!(
            history.host_history("nope", 10),
            Err(HealthError::HostNotFound(_))
        ));
    }
}
