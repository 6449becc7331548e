//! The scheduler.
//!
//! Each pass lists targets, keeps the ones that are due, and fans their
//! evaluations out into a `JoinSet`. A semaphore bounds how many run at
//! once; per-target locks keep one target from being evaluated twice. A
//! target whose previous evaluation is still running (or still waiting for
//! a permit) is skipped until a later pass.
//!
//! `run()` starts both passes every tick without waiting for earlier passes,
//! so one hung target never delays the cadence for the others.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tidewatch_state::{HealthCheckRecord, StateStore};

use crate::config::MonitorConfig;
use crate::epoch_secs;
use crate::error::{HealthError, HealthResult};
use crate::evaluator::{Evaluation, HealthEvaluator};
use crate::flight::TargetLocks;
use crate::probe::format_secs;

/// What one scheduler pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Targets whose check was due.
    pub due: usize,
    /// Due targets left alone because an evaluation was still running.
    pub skipped_busy: usize,
    /// Records committed by this pass, in completion order.
    pub records: Vec<HealthCheckRecord>,
}

impl PassReport {
    /// Evaluations that finished and were committed.
    pub fn completed(&self) -> usize {
        self.records.len()
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    store: StateStore,
    evaluator: HealthEvaluator,
    config: Arc<MonitorConfig>,
    app_locks: Arc<TargetLocks>,
    host_locks: Arc<TargetLocks>,
    permits: Arc<Semaphore>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl HealthMonitor {
    pub fn new(store: StateStore, evaluator: HealthEvaluator, config: Arc<MonitorConfig>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_checks()));
        Self {
            store,
            evaluator,
            config,
            app_locks: Arc::new(TargetLocks::default()),
            host_locks: Arc::new(TargetLocks::default()),
            permits,
            shutdown: None,
        }
    }

    /// Abort in-flight evaluations when `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    // ── Direct checks ──────────────────────────────────────────────

    /// Evaluate one application now, waiting for any evaluation of it that
    /// is already running.
    pub async fn check_application(&self, app_id: &str) -> HealthResult<Evaluation> {
        let _claim = self.app_locks.claim(app_id).await;
        let app = self
            .store
            .get_application(app_id)?
            .ok_or_else(|| HealthError::ApplicationNotFound(app_id.to_string()))?;
        self.evaluator.evaluate_application(app).await
    }

    /// Evaluate one host now, waiting for any evaluation of it that is
    /// already running.
    pub async fn check_host(&self, host_id: &str) -> HealthResult<HealthCheckRecord> {
        let _claim = self.host_locks.claim(host_id).await;
        let host = self
            .store
            .get_host(host_id)?
            .ok_or_else(|| HealthError::HostNotFound(host_id.to_string()))?;
        self.evaluator.evaluate_host(host).await
    }

    // ── Passes ─────────────────────────────────────────────────────

    /// Evaluate every application whose check is due.
    pub async fn monitor_all_applications(&self) -> HealthResult<PassReport> {
        self.app_locks.prune();
        let now = epoch_secs();
        let mut report = PassReport::default();
        let mut tasks = JoinSet::new();

        for app in self.store.list_applications()? {
            if !app.is_due(now) {
                continue;
            }
            report.due += 1;
            let Some(claim) = self.app_locks.try_claim(&app.id) else {
                debug!(app_id = %app.id, "evaluation still running, skipped");
                report.skipped_busy += 1;
                continue;
            };

            let permits = self.permits.clone();
            let evaluator = self.evaluator.clone();
            tasks.spawn(async move {
                let _claim = claim;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(None);
                };
                let eval = evaluator.evaluate_application(app).await?;
                Ok(Some(eval.record))
            });
        }

        self.drain(tasks, report).await
    }

    /// Evaluate every host whose check is due.
    pub async fn monitor_all_hosts(&self) -> HealthResult<PassReport> {
        self.host_locks.prune();
        let now = epoch_secs();
        let interval = self.config.host_check_interval().as_secs();
        let mut report = PassReport::default();
        let mut tasks = JoinSet::new();

        for host in self.store.list_hosts()? {
            if host.next_due(interval) > now {
                continue;
            }
            report.due += 1;
            let Some(claim) = self.host_locks.try_claim(&host.id) else {
                debug!(host_id = %host.id, "host evaluation still running, skipped");
                report.skipped_busy += 1;
                continue;
            };

            let permits = self.permits.clone();
            let evaluator = self.evaluator.clone();
            tasks.spawn(async move {
                let _claim = claim;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(None);
                };
                evaluator.evaluate_host(host).await.map(Some)
            });
        }

        self.drain(tasks, report).await
    }

    /// Wait for a pass's evaluations, or abort them all on shutdown.
    ///
    /// Returns the first persistence error, after every task has finished.
    async fn drain(
        &self,
        mut tasks: JoinSet<HealthResult<Option<HealthCheckRecord>>>,
        mut report: PassReport,
    ) -> HealthResult<PassReport> {
        let mut shutdown = self.shutdown.clone();
        let mut first_error = None;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(Some(record)))) => report.records.push(record),
                    Some(Ok(Ok(None))) => {}
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "failed to record health check");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Some(Err(e)) if e.is_panic() => error!(error = %e, "evaluation task panicked"),
                    Some(Err(_)) => {}
                },
                _ = shutdown_signalled(&mut shutdown) => {
                    warn!(in_flight = tasks.len(), "shutdown requested, aborting evaluations");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    // ── Loop ───────────────────────────────────────────────────────

    /// Run both passes every `tick_interval` until `shutdown` is signalled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let monitor = self.clone().with_shutdown(shutdown);
        let tick = monitor.config.tick_interval();
        info!(
            tick = %format_secs(tick),
            max_concurrent = monitor.config.max_concurrent_checks(),
            "health monitor started"
        );

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = JoinSet::new();
        let mut shutdown = monitor.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let m = monitor.clone();
                    passes.spawn(async move {
                        if let Err(e) = m.monitor_all_applications().await {
                            error!(error = %e, "application pass failed");
                        }
                    });
                    let m = monitor.clone();
                    passes.spawn(async move {
                        if let Err(e) = m.monitor_all_hosts().await {
                            error!(error = %e, "host pass failed");
                        }
                    });
                }
                Some(joined) = passes.join_next(), if !passes.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "monitor pass panicked");
                        }
                    }
                }
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }

        passes.abort_all();
        while passes.join_next().await.is_some() {}
        info!("health monitor stopped");
    }
}

/// Resolves once the shutdown flag is true. Never resolves without a
/// receiver, or after the sender is gone.
async fn shutdown_signalled(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
