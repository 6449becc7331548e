//! tidewatch-health — health monitoring and auto-recovery for Tidewatch.
//!
//! Decides, per application and per host, whether a workload is healthy;
//! keeps consecutive-failure counters and an append-only history; and
//! remediates applications that stay down past their threshold.
//!
//! # Architecture
//!
//! ```text
//! HealthEngine (public operations)
//!   ├── HealthMonitor (scheduler)
//!   │   ├── per-target single-flight locks
//!   │   ├── Semaphore(max_concurrent_checks)
//!   │   └── HealthEvaluator
//!   │       ├── ProbeStrategy::select() → http | tcp | runtime-state
//!   │       ├── supervised probe task (timeout + grace, aborted on expiry)
//!   │       ├── StateStore::commit_application_check()  (counter + record, one txn)
//!   │       └── RecoveryEngine::dispatch()  when Unhealthy ≥ threshold
//!   ├── RecoveryEngine
//!   │   ├── clustered:  inspect_service → force_update_service
//!   │   └── standalone: list_units → stop → grace → start
//!   └── HealthHistory (history, uptime)
//! ```
//!
//! # Status semantics
//!
//! `Degraded`, `Unhealthy` and `Unknown` all count as failures for the
//! counter and for uptime, but only `Unhealthy` can trigger recovery.
//! `Unknown` means the runtime could not be asked; restarting a workload we
//! cannot observe would be guesswork.

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod flight;
pub mod history;
pub mod monitor;
pub mod probe;
pub mod recovery;
pub mod strategy;

pub use config::MonitorConfig;
pub use engine::HealthEngine;
pub use error::{HealthError, HealthResult};
pub use evaluator::{Evaluation, HealthEvaluator};
pub use history::HealthHistory;
pub use monitor::{HealthMonitor, PassReport};
pub use probe::ProbeOutcome;
pub use recovery::{RecoveryEngine, RecoveryOutcome};
pub use strategy::ProbeStrategy;

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
