//! A scripted `RuntimeControl` held in memory, for tests and dry runs.
//!
//! Containers and services live in a map per host. Failure modes (runtime
//! outage, unreachable host, failing stop/start, rejected service updates)
//! and per-call latency can be switched on at any time, and every call is
//! counted so callers can assert exactly which remediation happened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use tidewatch_state::MonitoredHost;

use crate::error::{RuntimeError, RuntimeResult};
use crate::unit::{RuntimeUnit, ServiceReplicas, UnitState};
use crate::RuntimeControl;

#[derive(Default)]
struct World {
    units: HashMap<String, Vec<RuntimeUnit>>,
    services: HashMap<(String, String), ServiceReplicas>,
    unreachable_hosts: HashSet<String>,
    outage: bool,
    fail_stop: bool,
    fail_start: bool,
    reject_service_updates: bool,
    latency: Duration,
    calls: HashMap<&'static str, usize>,
}

/// Scripted runtime held entirely in process memory.
#[derive(Default)]
pub struct InMemoryRuntime {
    world: Mutex<World>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight gauge when a call finishes or is cancelled.
struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ──────────────────────────────────────────────────

    pub fn add_unit(&self, host_id: &str, unit: RuntimeUnit) {
        self.world()
            .units
            .entry(host_id.to_string())
            .or_default()
            .push(unit);
    }

    /// Change the state of a container by id or name. Returns false if absent.
    pub fn set_unit_state(&self, host_id: &str, unit: &str, state: UnitState) -> bool {
        let mut world = self.world();
        match find_mut(&mut world, host_id, unit) {
            Some(u) => {
                u.state = state;
                true
            }
            None => false,
        }
    }

    pub fn unit_state(&self, host_id: &str, unit: &str) -> Option<UnitState> {
        let mut world = self.world();
        find_mut(&mut world, host_id, unit).map(|u| u.state.clone())
    }

    pub fn set_service(&self, host_id: &str, service_id: &str, running: u32, desired: u32) {
        self.world().services.insert(
            (host_id.to_string(), service_id.to_string()),
            ServiceReplicas { running, desired },
        );
    }

    pub fn service(&self, host_id: &str, service_id: &str) -> Option<ServiceReplicas> {
        self.world()
            .services
            .get(&(host_id.to_string(), service_id.to_string()))
            .copied()
    }

    /// Make every call fail as if the runtime API were down.
    pub fn set_outage(&self, outage: bool) {
        self.world().outage = outage;
    }

    /// Make `validate_connection` report false for one host.
    pub fn set_host_reachable(&self, host_id: &str, reachable: bool) {
        let mut world = self.world();
        if reachable {
            world.unreachable_hosts.remove(host_id);
        } else {
            world.unreachable_hosts.insert(host_id.to_string());
        }
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.world().fail_stop = fail;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.world().fail_start = fail;
    }

    pub fn set_reject_service_updates(&self, reject: bool) {
        self.world().reject_service_updates = reject;
    }

    /// Delay every call by `latency` before it does anything.
    pub fn set_latency(&self, latency: Duration) {
        self.world().latency = latency;
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Number of calls made to a trait method, by method name.
    pub fn call_count(&self, method: &str) -> usize {
        self.world().calls.get(method).copied().unwrap_or(0)
    }

    /// Highest number of calls that were ever running at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn begin(&self, method: &'static str, host: &MonitoredHost) -> RuntimeResult<CallGuard<'_>> {
        let latency = {
            let mut world = self.world();
            *world.calls.entry(method).or_default() += 1;
            world.latency
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard(&self.in_flight);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.world().outage {
            return Err(RuntimeError::Unreachable {
                endpoint: host.endpoint.clone(),
                reason: "runtime API unavailable".to_string(),
            });
        }
        Ok(guard)
    }
}

fn find_mut<'a>(world: &'a mut World, host_id: &str, unit: &str) -> Option<&'a mut RuntimeUnit> {
    world
        .units
        .get_mut(host_id)?
        .iter_mut()
        .find(|u| u.id == unit || u.name == unit)
}

fn no_such_container(command: &str, unit_id: &str) -> RuntimeError {
    RuntimeError::Command {
        command: format!("{command} {unit_id}"),
        stderr: format!("No such container: {unit_id}"),
    }
}

#[async_trait]
impl RuntimeControl for InMemoryRuntime {
    async fn validate_connection(&self, host: &MonitoredHost) -> RuntimeResult<bool> {
        let _call = self.begin("validate_connection", host).await?;
        Ok(!self.world().unreachable_hosts.contains(&host.id))
    }

    async fn list_units(
        &self,
        host: &MonitoredHost,
        include_stopped: bool,
    ) -> RuntimeResult<Vec<RuntimeUnit>> {
        let _call = self.begin("list_units", host).await?;
        let world = self.world();
        let units = world.units.get(&host.id).cloned().unwrap_or_default();
        Ok(units
            .into_iter()
            .filter(|u| include_stopped || u.state == UnitState::Running)
            .collect())
    }

    async fn stop_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()> {
        let _call = self.begin("stop_unit", host).await?;
        let mut world = self.world();
        if world.fail_stop {
            return Err(RuntimeError::Command {
                command: format!("stop {unit_id}"),
                stderr: "stop rejected".to_string(),
            });
        }
        let unit = find_mut(&mut world, &host.id, unit_id).ok_or_else(|| no_such_container("stop", unit_id))?;
        unit.state = UnitState::Exited;
        Ok(())
    }

    async fn start_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()> {
        let _call = self.begin("start_unit", host).await?;
        let mut world = self.world();
        if world.fail_start {
            return Err(RuntimeError::Command {
                command: format!("start {unit_id}"),
                stderr: "start rejected".to_string(),
            });
        }
        let unit = find_mut(&mut world, &host.id, unit_id).ok_or_else(|| no_such_container("start", unit_id))?;
        unit.state = UnitState::Running;
        Ok(())
    }

    async fn inspect_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
    ) -> RuntimeResult<Option<ServiceReplicas>> {
        let _call = self.begin("inspect_service", host).await?;
        Ok(self.service(&host.id, service_id))
    }

    async fn force_update_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
        _image: &str,
    ) -> RuntimeResult<bool> {
        let _call = self.begin("force_update_service", host).await?;
        let mut world = self.world();
        if world.reject_service_updates {
            return Ok(false);
        }
        match world
            .services
            .get_mut(&(host.id.clone(), service_id.to_string()))
        {
            Some(replicas) => {
                replicas.running = replicas.desired;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
