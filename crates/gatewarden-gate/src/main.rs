use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gatewarden_core::GateSettings;
use gatewarden_gate::pod::ProcNetSource;
use gatewarden_gate::state::GateState;
use gatewarden_gate::sync::{GuardianBackend, HttpBackend, LocalBackend};
use gatewarden_gate::proxy;

/// Behavioral-anomaly gate: screens HTTP exchanges against learned criteria.
#[derive(Debug, Parser)]
#[command(name = "gatewarden", version)]
struct Args {
    /// Settings file (TOML). Missing file means built-in defaults.
    #[arg(long, default_value = "gatewarden.toml")]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8013")]
    listen: SocketAddr,

    /// Base URL of the protected service.
    #[arg(long)]
    upstream: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GATEWARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = if args.config.exists() {
        GateSettings::load(&args.config)
            .with_context(|| format!("loading settings from {}", args.config.display()))?
    } else {
        warn!(path = %args.config.display(), "settings file not found, using defaults");
        GateSettings::default()
    };

    let backend: Arc<dyn GuardianBackend> = if settings.backend_url.is_empty() {
        info!("no backend configured, learning locally");
        Arc::new(LocalBackend::new())
    } else {
        info!(url = settings.backend_url, "using learning backend");
        Arc::new(HttpBackend::new(&settings.backend_url))
    };

    let state = Arc::new(GateState::new(
        settings,
        backend,
        Arc::new(ProcNetSource::new()),
    ));
    state.sync().await;
    state.pod_monitor_sweep();

    let mut server = tokio::spawn(proxy::run(state.clone(), args.listen, args.upstream));
    let mut gate_tick = tokio::time::interval(state.settings.gate_tick());
    let mut pod_tick = tokio::time::interval(state.settings.pod_monitor_interval());
    let mut compromised = state.compromise_signal();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    let result = loop {
        tokio::select! {
            _ = gate_tick.tick() => state.tick().await,
            _ = pod_tick.tick() => state.pod_monitor_sweep(),
            // wait_for fires even when the latch happened before this loop
            // started, e.g. during the initial pod sweep.
            _ = compromised.wait_for(|latched| *latched) => {
                error!("gate compromised while blocking, terminating");
                break Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break Ok(());
            }
            _ = sigterm.recv() => {
                info!("shutting down on SIGTERM");
                break Ok(());
            }
            res = &mut server => {
                break res.context("proxy task").and_then(|r| r);
            }
        }
    };

    server.abort();
    // Final flush so the backend sees everything this instance learned.
    state.sync().await;
    result
}
