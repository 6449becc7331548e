//! Health probes.
//!
//! Every probe returns a [`ProbeOutcome`]; none of them fail. Transport
//! errors, timeouts and missing workloads are statuses, and the text that
//! explains them ends up in the check record.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use tidewatch_runtime::{find_unit, RuntimeControl, UnitState};
use tidewatch_state::{ExecutionMode, HealthStatus, MonitoredApplication, MonitoredHost};

use crate::flight::AbortOnDrop;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Normalized result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    /// HTTP status code, or a probe-specific tag.
    pub status_code: Option<String>,
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            status_code: None,
            detail: None,
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).detail(detail)
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unknown).detail(detail)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.status_code = Some(code.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Render a duration as `5s` or `0.5s`.
pub(crate) fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}s", d.as_secs_f64())
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

/// Classify an HTTP status code.
///
/// 2xx and 3xx are healthy, 5xx unhealthy, anything else (4xx, 1xx)
/// degraded: the server answers but the endpoint is not right.
pub fn classify_status(status: StatusCode) -> ProbeOutcome {
    let code = status.as_u16().to_string();
    if status.is_success() || status.is_redirection() {
        ProbeOutcome::healthy().code(code)
    } else if status.is_server_error() {
        ProbeOutcome::unhealthy(format!("HTTP {status}")).code(code)
    } else {
        ProbeOutcome::new(HealthStatus::Degraded)
            .code(code)
            .detail(format!("HTTP {status}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HttpTarget {
    tls: bool,
    host: String,
    port: u16,
    authority: String,
    path: String,
}

impl HttpTarget {
    fn parse(url: &str) -> Result<Self, String> {
        let uri: http::Uri = url
            .trim()
            .parse()
            .map_err(|e| format!("invalid health URL {url}: {e}"))?;
        let (tls, default_port) = match uri.scheme_str() {
            Some("http") => (false, 80),
            Some("https") => (true, 443),
            Some(other) => return Err(format!("unsupported scheme {other} in {url}")),
            None => return Err(format!("health URL {url} is not absolute")),
        };
        let authority = uri
            .authority()
            .ok_or_else(|| format!("health URL {url} has no host"))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        Ok(Self {
            tls,
            host,
            port: authority.port_u16().unwrap_or(default_port),
            authority: authority.as_str().to_string(),
            path: uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }
}

/// GET `url` with a hard deadline.
pub async fn http_probe(url: &str, timeout: Duration) -> ProbeOutcome {
    let target = match HttpTarget::parse(url) {
        Ok(target) => target,
        Err(detail) => return ProbeOutcome::unhealthy(detail),
    };

    match tokio::time::timeout(timeout, fetch_status(&target)).await {
        Ok(Ok(status)) => {
            debug!(%url, %status, "http probe answered");
            classify_status(status)
        }
        Ok(Err(e)) => {
            debug!(%url, error = %e, "http probe failed");
            ProbeOutcome::unhealthy(e.to_string())
        }
        Err(_) => ProbeOutcome::unhealthy(format!("timed out after {}", format_secs(timeout))),
    }
}

async fn fetch_status(target: &HttpTarget) -> Result<StatusCode, BoxError> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
    if !target.tls {
        return send_get(tcp, target).await;
    }

    let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
        .map_err(|e| format!("invalid TLS server name {}: {e}", target.host))?;
    let tls = tls_connector()?.connect(server_name, tcp).await?;
    send_get(tls, target).await
}

async fn send_get<S>(stream: S, target: &HttpTarget) -> Result<StatusCode, BoxError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // The connection task dies with the probe, even if the server never answers.
    let _conn = AbortOnDrop(
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "probe connection closed");
            }
        })
        .abort_handle(),
    );

    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(target.path.as_str())
        .header(http::header::HOST, target.authority.as_str())
        .header(http::header::USER_AGENT, "tidewatch-health/0.1")
        .header(http::header::CONNECTION, "close")
        .body(Empty::<Bytes>::new())?;

    let resp = sender.send_request(req).await?;
    Ok(resp.status())
}

fn tls_connector() -> Result<tokio_rustls::TlsConnector, rustls::Error> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}

// ── TCP ────────────────────────────────────────────────────────────

/// Open (and immediately drop) a TCP connection.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => ProbeOutcome::healthy().code("tcp"),
        Ok(Err(e)) => {
            debug!(%host, port, error = %e, "tcp probe failed");
            ProbeOutcome::unhealthy(e.to_string())
        }
        Err(_) => ProbeOutcome::unhealthy(format!(
            "TCP connection timed out after {}",
            format_secs(timeout)
        )),
    }
}

// ── Runtime state ──────────────────────────────────────────────────

/// Ask the host's runtime whether the application's workload is running.
///
/// Any runtime failure (including no answer within `timeout`) is `Unknown`.
pub async fn runtime_state_probe(
    runtime: &dyn RuntimeControl,
    host: Option<&MonitoredHost>,
    app: &MonitoredApplication,
    timeout: Duration,
) -> ProbeOutcome {
    let Some(host) = host else {
        return ProbeOutcome::unknown(format!("host {} is not registered", app.host_id));
    };
    let no_answer = || {
        ProbeOutcome::unknown(format!(
            "runtime on host {} did not answer within {}",
            host.id,
            format_secs(timeout)
        ))
    };

    match &app.mode {
        ExecutionMode::Standalone { .. } => {
            let units = match tokio::time::timeout(timeout, runtime.list_units(host, true)).await {
                Ok(Ok(units)) => units,
                Ok(Err(e)) => return ProbeOutcome::unknown(e.to_string()),
                Err(_) => return no_answer(),
            };
            let name = app.container_name();
            match find_unit(&units, &app.id, name).map(|u| &u.state) {
                Some(UnitState::Running) => ProbeOutcome::healthy().code("running"),
                Some(UnitState::Paused) => ProbeOutcome::new(HealthStatus::Degraded)
                    .code("paused")
                    .detail(format!("container {name} is paused")),
                Some(state) => ProbeOutcome::unhealthy(format!("container {name} is {state}"))
                    .code(state.to_string()),
                None => ProbeOutcome::unhealthy("container not found"),
            }
        }
        ExecutionMode::ClusteredService {
            service_id,
            desired_replicas,
        } => {
            let replicas =
                match tokio::time::timeout(timeout, runtime.inspect_service(host, service_id)).await {
                    Ok(Ok(replicas)) => replicas,
                    Ok(Err(e)) => return ProbeOutcome::unknown(e.to_string()),
                    Err(_) => return no_answer(),
                };
            let Some(replicas) = replicas else {
                return ProbeOutcome::unhealthy(format!("service {service_id} not found"));
            };
            let desired = if replicas.desired == 0 {
                *desired_replicas
            } else {
                replicas.desired
            };
            let tag = format!("{}/{}", replicas.running, desired);
            if replicas.running == 0 {
                ProbeOutcome::unhealthy("no replicas running").code(tag)
            } else if replicas.running < desired {
                ProbeOutcome::new(HealthStatus::Degraded)
                    .detail(format!("only {tag} replicas running"))
                    .code(tag)
            } else {
                ProbeOutcome::healthy().code(tag)
            }
        }
    }
}

// ── Host ───────────────────────────────────────────────────────────

/// Check that the host's runtime endpoint answers.
///
/// For a host, an unreachable runtime is the failure itself, so errors and
/// timeouts are `Unhealthy` rather than `Unknown`.
pub async fn host_probe(
    runtime: &dyn RuntimeControl,
    host: &MonitoredHost,
    timeout: Duration,
) -> ProbeOutcome {
    match tokio::time::timeout(timeout, runtime.validate_connection(host)).await {
        Ok(Ok(true)) => ProbeOutcome::healthy().code("reachable"),
        Ok(Ok(false)) => ProbeOutcome::unhealthy(format!(
            "runtime endpoint {} is not reachable",
            host.endpoint
        )),
        Ok(Err(e)) => ProbeOutcome::unhealthy(e.to_string()),
        Err(_) => ProbeOutcome::unhealthy(format!("timed out after {}", format_secs(timeout))),
    }
}
