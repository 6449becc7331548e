//! The public face of the health subsystem.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use tidewatch_runtime::RuntimeControl;
use tidewatch_state::{HealthCheckRecord, StateStore};

use crate::config::MonitorConfig;
use crate::error::{HealthError, HealthResult};
use crate::evaluator::{Evaluation, HealthEvaluator};
use crate::history::HealthHistory;
use crate::monitor::HealthMonitor;
use crate::recovery::{RecoveryEngine, RecoveryOutcome};

/// Health checks, scheduling, recovery and history behind one handle.
///
/// Cheap to clone; clones share locks, the concurrency limit, and the
/// recovery registry.
#[derive(Clone)]
pub struct HealthEngine {
    store: StateStore,
    monitor: HealthMonitor,
    recovery: RecoveryEngine,
    history: HealthHistory,
}

impl HealthEngine {
    pub fn new(store: StateStore, runtime: Arc<dyn RuntimeControl>, config: MonitorConfig) -> Self {
        let config = Arc::new(config);
        let recovery = RecoveryEngine::new(store.clone(), runtime.clone(), config.clone());
        let evaluator = HealthEvaluator::new(store.clone(), runtime, config.clone(), recovery.clone());
        let monitor = HealthMonitor::new(store.clone(), evaluator, config);
        Self {
            history: HealthHistory::new(store.clone()),
            store,
            monitor,
            recovery,
        }
    }

    /// Abort in-flight pass evaluations when `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.monitor = self.monitor.with_shutdown(shutdown);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The scheduler, for callers that want pass statistics as well as
    /// records.
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Check an application now and return the committed record. A recovery
    /// dispatched by this check keeps running in the background.
    pub async fn check_application_health(&self, app_id: &str) -> HealthResult<HealthCheckRecord> {
        Ok(self.check_application(app_id).await?.record)
    }

    /// Like [`check_application_health`](Self::check_application_health),
    /// with the counter and a handle to any recovery it started.
    pub async fn check_application(&self, app_id: &str) -> HealthResult<Evaluation> {
        self.monitor.check_application(app_id).await
    }

    pub async fn check_host_health(&self, host_id: &str) -> HealthResult<HealthCheckRecord> {
        self.monitor.check_host(host_id).await
    }

    /// Check every due application; returns one record per completed check.
    pub async fn monitor_all_applications(&self) -> HealthResult<Vec<HealthCheckRecord>> {
        Ok(self.monitor.monitor_all_applications().await?.records)
    }

    /// Check every due host; returns one record per completed check.
    pub async fn monitor_all_hosts(&self) -> HealthResult<Vec<HealthCheckRecord>> {
        Ok(self.monitor.monitor_all_hosts().await?.records)
    }

    /// Recover an application now, regardless of its counter.
    pub async fn attempt_recovery(&self, app_id: &str) -> HealthResult<RecoveryOutcome> {
        let app = self
            .store
            .get_application(app_id)?
            .ok_or_else(|| HealthError::ApplicationNotFound(app_id.to_string()))?;
        self.recovery.attempt(app).await
    }

    pub fn get_history(&self, app_id: &str, limit: usize) -> HealthResult<Vec<HealthCheckRecord>> {
        self.history.history(app_id, limit)
    }

    pub fn get_host_history(&self, host_id: &str, limit: usize) -> HealthResult<Vec<HealthCheckRecord>> {
        self.history.host_history(host_id, limit)
    }

    pub fn get_uptime(&self, app_id: &str, window: Duration) -> HealthResult<f64> {
        self.history.uptime_percentage(app_id, window)
    }

    /// Run the scheduler until `shutdown` is signalled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        self.monitor.run(shutdown).await
    }
}
