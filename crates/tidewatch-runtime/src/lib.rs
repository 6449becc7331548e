//! tidewatch-runtime — the runtime control interface Tidewatch drives.
//!
//! The health engine never talks to a container runtime directly. It goes
//! through [`RuntimeControl`], which covers exactly what monitoring and
//! remediation need:
//!
//! ```text
//! RuntimeControl
//!   ├── validate_connection(host)            host health
//!   ├── list_units(host, include_stopped)    standalone probe + restart
//!   ├── stop_unit / start_unit               standalone recovery
//!   ├── inspect_service(host, service)       clustered probe
//!   └── force_update_service(host, ..)       clustered recovery
//! ```
//!
//! Two implementations ship here: [`DockerCliRuntime`], which shells out to
//! the `docker` CLI against each host's endpoint, and [`InMemoryRuntime`], a
//! scripted runtime for tests and dry runs.
//!
//! Callers are expected to wrap every call in their own deadline; the
//! adapters make no promise about how long a call can take.

pub mod docker;
pub mod error;
pub mod memory;
pub mod unit;

use async_trait::async_trait;

use tidewatch_state::MonitoredHost;

pub use docker::DockerCliRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::InMemoryRuntime;
pub use unit::{find_unit, RuntimeUnit, ServiceReplicas, UnitState};

/// Behavioural contract the engine expects from a container runtime.
#[async_trait]
pub trait RuntimeControl: Send + Sync {
    /// Whether the host's runtime endpoint answers.
    async fn validate_connection(&self, host: &MonitoredHost) -> RuntimeResult<bool>;

    /// Containers on the host. Stopped ones are included when asked.
    async fn list_units(
        &self,
        host: &MonitoredHost,
        include_stopped: bool,
    ) -> RuntimeResult<Vec<RuntimeUnit>>;

    async fn stop_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()>;

    async fn start_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()>;

    /// Replica counts for a service, or `None` if the service does not exist.
    async fn inspect_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
    ) -> RuntimeResult<Option<ServiceReplicas>>;

    /// Force a rolling replacement of every task of a service.
    ///
    /// An empty `image` keeps the service's current image.
    async fn force_update_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
        image: &str,
    ) -> RuntimeResult<bool>;
}
