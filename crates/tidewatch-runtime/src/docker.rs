//! Docker CLI adapter.
//!
//! Drives the `docker` binary with `-H <endpoint>` per host, so the same
//! daemon can reach local sockets, TCP endpoints, and `ssh://` hosts without
//! a separate API client. Every child process is spawned with
//! `kill_on_drop`, so a caller's deadline that drops the future also kills
//! the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use tidewatch_state::MonitoredHost;

use crate::error::{RuntimeError, RuntimeResult};
use crate::unit::{RuntimeUnit, ServiceReplicas, UnitState};
use crate::RuntimeControl;

const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.State}}\t{{.Labels}}";
const SERVICE_FORMAT: &str = "{{.ID}}\t{{.Name}}\t{{.Replicas}}";

/// Runtime control through the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    binary: PathBuf,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCliRuntime {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, host: &MonitoredHost, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        let endpoint = host.endpoint.trim();
        if !endpoint.is_empty() {
            cmd.arg("-H").arg(endpoint);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a docker subcommand and return its stdout.
    async fn run(&self, host: &MonitoredHost, args: &[&str]) -> RuntimeResult<String> {
        debug!(host_id = %host.id, ?args, "docker");
        let output = self.command(host, args).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RuntimeError::Command {
                command: format!("docker {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl RuntimeControl for DockerCliRuntime {
    async fn validate_connection(&self, host: &MonitoredHost) -> RuntimeResult<bool> {
        match self
            .run(host, &["version", "--format", "{{.Server.Version}}"])
            .await
        {
            Ok(version) => Ok(!version.trim().is_empty()),
            Err(RuntimeError::Command { stderr, .. }) => {
                debug!(host_id = %host.id, %stderr, "docker daemon not reachable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_units(
        &self,
        host: &MonitoredHost,
        include_stopped: bool,
    ) -> RuntimeResult<Vec<RuntimeUnit>> {
        let mut args = vec!["ps", "--no-trunc", "--format", PS_FORMAT];
        if include_stopped {
            args.push("--all");
        }
        let stdout = self.run(host, &args).await.map_err(|e| unreachable_on_command(host, e))?;
        parse_ps_output(&stdout)
    }

    async fn stop_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()> {
        self.run(host, &["stop", unit_id]).await.map(|_| ())
    }

    async fn start_unit(&self, host: &MonitoredHost, unit_id: &str) -> RuntimeResult<()> {
        self.run(host, &["start", unit_id]).await.map(|_| ())
    }

    async fn inspect_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
    ) -> RuntimeResult<Option<ServiceReplicas>> {
        let filter = format!("name={service_id}");
        let stdout = self
            .run(host, &["service", "ls", "--filter", &filter, "--format", SERVICE_FORMAT])
            .await
            .map_err(|e| unreachable_on_command(host, e))?;
        parse_service_ls(&stdout, service_id)
    }

    async fn force_update_service(
        &self,
        host: &MonitoredHost,
        service_id: &str,
        image: &str,
    ) -> RuntimeResult<bool> {
        let mut args = vec!["service", "update", "--force", "--detach"];
        if !image.trim().is_empty() {
            args.push("--image");
            args.push(image);
        }
        args.push(service_id);

        match self.run(host, &args).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::Command { stderr, .. }) => {
                warn!(host_id = %host.id, %service_id, %stderr, "forced service update rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// A failed listing means the daemon could not be queried at all.
fn unreachable_on_command(host: &MonitoredHost, err: RuntimeError) -> RuntimeError {
    match err {
        RuntimeError::Command { stderr, .. } => RuntimeError::Unreachable {
            endpoint: host.endpoint.clone(),
            reason: stderr,
        },
        other => other,
    }
}

fn parse_ps_output(stdout: &str) -> RuntimeResult<Vec<RuntimeUnit>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split('\t');
            let (Some(id), Some(names), Some(state)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(RuntimeError::Parse(format!("bad ps line: {line}")));
            };
            // A container can carry several comma-separated names.
            let name = names.split(',').next().unwrap_or(names);
            Ok(RuntimeUnit {
                id: id.to_string(),
                name: name.to_string(),
                state: UnitState::parse(state),
                labels: parse_labels(fields.next().unwrap_or("")),
            })
        })
        .collect()
}

fn parse_labels(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// `service ls --filter name=` is a prefix match; keep only the exact service.
fn parse_service_ls(stdout: &str, service_id: &str) -> RuntimeResult<Option<ServiceReplicas>> {
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let [id, name, replicas] = fields.as_slice() else {
            return Err(RuntimeError::Parse(format!("bad service line: {line}")));
        };
        if *name == service_id || id.starts_with(service_id) {
            return ServiceReplicas::parse(replicas)
                .map(Some)
                .ok_or_else(|| RuntimeError::Parse(format!("bad replica count: {replicas}")));
        }
    }
    Ok(None)
}
