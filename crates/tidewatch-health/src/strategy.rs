//! Probe strategy selection.

use std::fmt;

use tidewatch_state::MonitoredApplication;

/// The single probe used for one evaluation of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStrategy {
    Http { url: String },
    Tcp { host: String, port: u16 },
    /// Ask the runtime for the container or service state.
    RuntimeState,
}

impl ProbeStrategy {
    /// Pick a strategy with fixed precedence: HTTP URL, then domain + port,
    /// then runtime state. Blank values count as unset.
    pub fn select(app: &MonitoredApplication) -> Self {
        if let Some(url) = non_blank(app.health_url.as_deref()) {
            return ProbeStrategy::Http {
                url: url.to_string(),
            };
        }
        match (non_blank(app.domain.as_deref()), app.port) {
            (Some(host), Some(port)) if port != 0 => ProbeStrategy::Tcp {
                host: host.to_string(),
                port,
            },
            _ => ProbeStrategy::RuntimeState,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProbeStrategy::Http { .. } => "http",
            ProbeStrategy::Tcp { .. } => "tcp",
            ProbeStrategy::RuntimeState => "runtime",
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStrategy::Http { url } => write!(f, "http {url}"),
            ProbeStrategy::Tcp { host, port } => write!(f, "tcp {host}:{port}"),
            ProbeStrategy::RuntimeState => f.write_str("runtime state"),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
