//! tidewatchd — the Tidewatch daemon.
//!
//! Runs the health monitor against a redb state store and the Docker CLI,
//! and exposes the engine's operations as one-shot commands.
//!
//! # Usage
//!
//! ```text
//! tidewatchd --config /etc/tidewatch.toml run
//! tidewatchd check app app-1
//! tidewatchd history app-1 --limit 50
//! tidewatchd uptime app-1 --window 7d
//! ```

mod config;
mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tidewatch_health::config::parse_duration;
use tidewatch_health::HealthEngine;
use tidewatch_runtime::DockerCliRuntime;
use tidewatch_state::{HealthCheckRecord, HealthStatus, StateStore};

use crate::config::DaemonConfig;
use crate::seed::SeedFile;

const DEFAULT_FILTER: &str = "info,tidewatchd=debug,tidewatch=debug";

#[derive(Parser)]
#[command(name = "tidewatchd", about = "Tidewatch health monitor", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to the docker binary (overrides the config file).
    #[arg(long, global = true)]
    docker: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the health monitor until Ctrl-C.
    Run,

    /// Check one application or host now.
    Check {
        #[command(subcommand)]
        target: CheckCommand,
    },

    /// Attempt recovery of an application now.
    Recover {
        /// Application ID.
        id: String,
    },

    /// Show recent health checks, newest first.
    History {
        /// Application ID (host ID with --host).
        id: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Treat the ID as a host.
        #[arg(long)]
        host: bool,
    },

    /// Show an application's uptime over a trailing window.
    Uptime {
        /// Application ID.
        id: String,

        /// Window length, e.g. "24h", "7d", "90m".
        #[arg(long, default_value = "24h")]
        window: String,
    },

    /// Register hosts and applications from a JSON file.
    Import {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum CheckCommand {
    /// Check an application.
    App { id: String },
    /// Check a host's runtime connection.
    Host { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(docker) = cli.docker {
        config.docker_binary = docker;
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let runtime = Arc::new(DockerCliRuntime::new(config.docker_binary.clone()));
    let engine = HealthEngine::new(store.clone(), runtime, config.monitor.clone());

    match cli.command {
        Command::Run => run(engine).await,
        Command::Check {
            target: CheckCommand::App { id },
        } => {
            let eval = engine.check_application(&id).await?;
            print_record(&eval.record);
            if let Some(recovery) = eval.recovery {
                println!("failure threshold reached, recovering...");
                let outcome = recovery.await?;
                println!(
                    "recovery {}: {}",
                    if outcome.success { "succeeded" } else { "failed" },
                    outcome.detail
                );
            }
            Ok(())
        }
        Command::Check {
            target: CheckCommand::Host { id },
        } => {
            let record = engine.check_host_health(&id).await?;
            print_record(&record);
            Ok(())
        }
        Command::Recover { id } => {
            let outcome = engine.attempt_recovery(&id).await?;
            println!("{}", outcome.detail);
            if !outcome.success {
                bail!("recovery of {id} failed");
            }
            Ok(())
        }
        Command::History { id, limit, host } => {
            let records = if host {
                engine.get_host_history(&id, limit)?
            } else {
                engine.get_history(&id, limit)?
            };
            if records.is_empty() {
                println!("no health checks recorded for {id}");
            }
            for record in &records {
                print_record(record);
            }
            Ok(())
        }
        Command::Uptime { id, window } => {
            let Some(span) = parse_duration(&window) else {
                bail!("invalid window {window:?}, expected e.g. \"24h\" or \"30m\"");
            };
            let uptime = engine.get_uptime(&id, span)?;
            println!("{id}: {uptime:.2}% over {window}");
            Ok(())
        }
        Command::Import { file } => {
            let (hosts, apps) = SeedFile::read(&file)?.apply(&store)?;
            println!("imported {hosts} host(s) and {apps} application(s)");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(engine: HealthEngine) -> anyhow::Result<()> {
    info!("tidewatch daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    } else {
        info!("shutdown signal received");
    }
    let _ = shutdown_tx.send(true);
    monitor.await?;

    info!("tidewatch daemon stopped");
    Ok(())
}

/// Unknown is not the same as down; make that obvious to whoever reads it.
fn render_status(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Unknown => "unknown (monitoring degraded)",
        other => other.as_str(),
    }
}

fn print_record(record: &HealthCheckRecord) {
    let mut line = format!(
        "[{}] {} {} {}ms",
        record.checked_at,
        record.target,
        render_status(record.status),
        record.response_time_ms
    );
    if let Some(code) = &record.status_code {
        line.push_str(&format!(" ({code})"));
    }
    if let Some(detail) = &record.detail {
        line.push_str(&format!(": {detail}"));
    }
    println!("{line}");
}
