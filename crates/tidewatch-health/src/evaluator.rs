//! Health evaluator: one check of one target, start to finish.
//!
//! The probe runs in its own task under a supervising deadline of
//! `timeout + probe_grace`; a probe that outlives it is aborted. Whatever
//! happens, exactly one record is committed, together with the counter
//! update, in a single store transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tidewatch_runtime::RuntimeControl;
use tidewatch_state::{
    CheckTarget, HealthCheckRecord, HealthStatus, HostStatus, MonitoredApplication, MonitoredHost,
    StateStore,
};

use crate::config::MonitorConfig;
use crate::epoch_secs;
use crate::error::HealthResult;
use crate::flight::AbortOnDrop;
use crate::probe::{self, format_secs, ProbeOutcome};
use crate::recovery::{RecoveryEngine, RecoveryOutcome};
use crate::strategy::ProbeStrategy;

/// Result of evaluating an application.
#[derive(Debug)]
pub struct Evaluation {
    /// The persisted record, with its assigned id.
    pub record: HealthCheckRecord,
    /// Counter value after this check.
    pub consecutive_failures: u32,
    /// Set when this check crossed the threshold and a recovery was started.
    pub recovery: Option<JoinHandle<RecoveryOutcome>>,
}

#[derive(Clone)]
pub struct HealthEvaluator {
    store: StateStore,
    runtime: Arc<dyn RuntimeControl>,
    config: Arc<MonitorConfig>,
    recovery: RecoveryEngine,
}

impl HealthEvaluator {
    pub fn new(
        store: StateStore,
        runtime: Arc<dyn RuntimeControl>,
        config: Arc<MonitorConfig>,
        recovery: RecoveryEngine,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
            recovery,
        }
    }

    /// Probe an application, commit the result, and dispatch recovery if
    /// the check warrants it. Does not wait for the recovery.
    pub async fn evaluate_application(&self, app: MonitoredApplication) -> HealthResult<Evaluation> {
        let strategy = ProbeStrategy::select(&app);
        let timeout = app.check_timeout();
        let host = match strategy {
            ProbeStrategy::RuntimeState => self.store.get_host(&app.host_id)?,
            _ => None,
        };
        debug!(app_id = %app.id, %strategy, "evaluating application");

        let fallback = match strategy {
            ProbeStrategy::RuntimeState => HealthStatus::Unknown,
            _ => HealthStatus::Unhealthy,
        };
        let runtime = self.runtime.clone();
        let probe_app = app.clone();
        let started = Instant::now();
        let outcome = self
            .supervise(timeout, fallback, async move {
                match strategy {
                    ProbeStrategy::Http { url } => probe::http_probe(&url, timeout).await,
                    ProbeStrategy::Tcp { host, port } => probe::tcp_probe(&host, port, timeout).await,
                    ProbeStrategy::RuntimeState => {
                        probe::runtime_state_probe(runtime.as_ref(), host.as_ref(), &probe_app, timeout)
                            .await
                    }
                }
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let record = HealthCheckRecord::new(
            CheckTarget::Application(app.id.clone()),
            outcome.status,
            elapsed_ms,
            epoch_secs(),
        )
        .with_status_code(outcome.status_code)
        .with_detail(outcome.detail);
        let (app, record) = self.store.commit_application_check(record)?;

        match record.status {
            HealthStatus::Healthy => debug!(app_id = %app.id, elapsed_ms, "application healthy"),
            HealthStatus::Unknown => warn!(
                app_id = %app.id,
                detail = record.detail.as_deref().unwrap_or(""),
                failures = app.consecutive_failures,
                "application state unknown, monitoring degraded"
            ),
            status => warn!(
                app_id = %app.id,
                %status,
                detail = record.detail.as_deref().unwrap_or(""),
                failures = app.consecutive_failures,
                threshold = app.effective_threshold(),
                "application check failed"
            ),
        }

        let recovery = if app.recovery_warranted(record.status) {
            warn!(
                app_id = %app.id,
                failures = app.consecutive_failures,
                threshold = app.effective_threshold(),
                "failure threshold reached, dispatching recovery"
            );
            self.recovery.dispatch(app.clone())
        } else {
            None
        };

        Ok(Evaluation {
            record,
            consecutive_failures: app.consecutive_failures,
            recovery,
        })
    }

    /// Validate a host's runtime connection and commit the result.
    pub async fn evaluate_host(&self, host: MonitoredHost) -> HealthResult<HealthCheckRecord> {
        let timeout = self.config.host_check_timeout();
        let runtime = self.runtime.clone();
        let probe_host = host.clone();
        let started = Instant::now();
        let outcome = self
            .supervise(timeout, HealthStatus::Unhealthy, async move {
                probe::host_probe(runtime.as_ref(), &probe_host, timeout).await
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let record = HealthCheckRecord::new(
            CheckTarget::Host(host.id.clone()),
            outcome.status,
            elapsed_ms,
            epoch_secs(),
        )
        .with_status_code(outcome.status_code)
        .with_detail(outcome.detail);
        let (updated, record) = self
            .store
            .commit_host_check(record, self.config.host_offline_threshold)?;

        if updated.status != host.status {
            match updated.status {
                HostStatus::Online => info!(host_id = %host.id, "host back online"),
                HostStatus::Offline => warn!(
                    host_id = %host.id,
                    failures = updated.consecutive_failures,
                    "host marked offline"
                ),
            }
        } else if !record.status.is_healthy() {
            warn!(
                host_id = %host.id,
                detail = record.detail.as_deref().unwrap_or(""),
                failures = updated.consecutive_failures,
                "host check failed"
            );
        }
        Ok(record)
    }

    /// Run `probe` in its own task and give it `timeout + probe_grace`.
    ///
    /// An expired deadline aborts the task and yields `fallback`; a probe
    /// task that panics yields `Unknown`.
    async fn supervise<F>(&self, timeout: Duration, fallback: HealthStatus, probe: F) -> ProbeOutcome
    where
        F: std::future::Future<Output = ProbeOutcome> + Send + 'static,
    {
        let deadline = timeout + self.config.probe_grace();
        let mut task = tokio::spawn(probe);
        let _abort = AbortOnDrop(task.abort_handle());

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ProbeOutcome::unknown(format!("probe task failed: {e}")),
            Err(_) => {
                warn!(deadline = %format_secs(deadline), "probe exceeded its deadline, aborted");
                ProbeOutcome::new(fallback).detail(format!("timed out after {}", format_secs(timeout)))
            }
        }
    }
}
