//! Recovery engine.
//!
//! Restarts standalone containers and forces rolling updates of clustered
//! services. A recovery never propagates runtime errors: it logs them and
//! reports a failed [`RecoveryOutcome`], leaving the failure counter as it
//! was so the next threshold crossing can try again.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tidewatch_runtime::{find_unit, RuntimeControl, RuntimeError, RuntimeResult};
use tidewatch_state::{ExecutionMode, MonitoredApplication, MonitoredHost, StateStore};

use crate::config::MonitorConfig;
use crate::error::HealthResult;
use crate::flight::{RecoveryGuard, RecoveryLocks};
use crate::probe::format_secs;

/// Result of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub detail: String,
}

impl RecoveryOutcome {
    fn succeeded(detail: String) -> Self {
        Self {
            success: true,
            detail,
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RecoveryError {
    #[error("host {0} is not registered")]
    HostMissing(String),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("no container matching {0}")]
    ContainerNotFound(String),

    #[error("runtime rejected forced update of service {0}")]
    UpdateRejected(String),

    #[error("{action} timed out after {after}")]
    TimedOut { action: &'static str, after: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Clone)]
pub struct RecoveryEngine {
    store: StateStore,
    runtime: Arc<dyn RuntimeControl>,
    config: Arc<MonitorConfig>,
    in_flight: RecoveryLocks,
}

impl RecoveryEngine {
    pub fn new(store: StateStore, runtime: Arc<dyn RuntimeControl>, config: Arc<MonitorConfig>) -> Self {
        Self {
            store,
            runtime,
            config,
            in_flight: RecoveryLocks::default(),
        }
    }

    /// Whether a recovery for `app_id` is running right now.
    pub fn in_progress(&self, app_id: &str) -> bool {
        self.in_flight.is_active(app_id)
    }

    /// Start a recovery in the background.
    ///
    /// Returns `None` without doing anything when one is already running
    /// for the same application.
    pub fn dispatch(&self, app: MonitoredApplication) -> Option<JoinHandle<RecoveryOutcome>> {
        let Some(guard) = self.in_flight.try_begin(&app.id) else {
            debug!(app_id = %app.id, "recovery already in progress, suppressed");
            return None;
        };
        let engine = self.clone();
        Some(tokio::spawn(async move {
            let app_id = app.id.clone();
            engine.run(app, guard).await.unwrap_or_else(|e| {
                error!(%app_id, error = %e, "recovery could not be recorded");
                RecoveryOutcome::failed(e.to_string())
            })
        }))
    }

    /// Run a recovery now and wait for it.
    ///
    /// Only persistence failures are errors; a recovery that could not run
    /// or did not work is an unsuccessful outcome.
    pub async fn attempt(&self, app: MonitoredApplication) -> HealthResult<RecoveryOutcome> {
        let Some(guard) = self.in_flight.try_begin(&app.id) else {
            return Ok(RecoveryOutcome::failed("recovery already in progress"));
        };
        self.run(app, guard).await
    }

    async fn run(&self, app: MonitoredApplication, _guard: RecoveryGuard) -> HealthResult<RecoveryOutcome> {
        info!(
            app_id = %app.id,
            failures = app.consecutive_failures,
            "attempting recovery"
        );

        let host = self.store.get_host(&app.host_id)?;
        let result = match &host {
            Some(host) => self.remediate(&app, host).await,
            None => Err(RecoveryError::HostMissing(app.host_id.clone())),
        };

        match result {
            Ok(detail) => {
                self.store.reset_application_failures(&app.id)?;
                info!(app_id = %app.id, %detail, "recovery succeeded");
                Ok(RecoveryOutcome::succeeded(detail))
            }
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "recovery failed");
                Ok(RecoveryOutcome::failed(e.to_string()))
            }
        }
    }

    async fn remediate(&self, app: &MonitoredApplication, host: &MonitoredHost) -> Result<String, RecoveryError> {
        match &app.mode {
            ExecutionMode::ClusteredService { service_id, .. } => {
                let replicas = self
                    .bounded("inspect service", self.runtime.inspect_service(host, service_id))
                    .await?
                    .ok_or_else(|| RecoveryError::ServiceNotFound(service_id.clone()))?;

                let updated = self
                    .bounded(
                        "forced update",
                        self.runtime.force_update_service(host, service_id, &app.image),
                    )
                    .await?;
                if !updated {
                    return Err(RecoveryError::UpdateRejected(service_id.clone()));
                }
                Ok(format!(
                    "forced update of service {service_id} ({}/{} replicas were running)",
                    replicas.running, replicas.desired
                ))
            }
            ExecutionMode::Standalone { .. } => {
                let name = app.container_name();
                let units = self
                    .bounded("list containers", self.runtime.list_units(host, true))
                    .await?;
                let unit_id = find_unit(&units, &app.id, name)
                    .map(|u| u.id.clone())
                    .ok_or_else(|| RecoveryError::ContainerNotFound(name.to_string()))?;

                self.bounded("stop container", self.runtime.stop_unit(host, &unit_id))
                    .await?;
                tokio::time::sleep(self.config.restart_grace()).await;
                self.bounded("start container", self.runtime.start_unit(host, &unit_id))
                    .await?;
                Ok(format!("restarted container {name}"))
            }
        }
    }

    async fn bounded<T>(
        &self,
        action: &'static str,
        call: impl Future<Output = RuntimeResult<T>>,
    ) -> Result<T, RecoveryError> {
        let limit = self.config.recovery_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RecoveryError::TimedOut {
                action,
                after: format_secs(limit),
            }),
        }
    }
}
