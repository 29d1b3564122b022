//! Observability pipeline service host.
//!
//! Runs one of the sample services (user or order) behind the request
//! pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     Inbound request
//!     ───────────────▶ http server ──▶ routing ──▶ pipeline ─────────────────────────▶ handler
//!                                                  correlation → logging →             │
//!                                                  timing → error handling             │
//!                                                                                      ▼
//!     Response (+ x-correlation-id) ◀──────────────────────────────────────── outbound ──▶ peer
//!                                                                              propagator   service
//!
//!     /health*  ──▶ health aggregator (checks run concurrently, individually timed out)
//!     /metrics  ──▶ metrics registry (Prometheus text)
//! ```

use std::path::PathBuf;

use clap::Parser;

use obs_pipeline::config::{self, ServiceConfig, ServiceKind};
use obs_pipeline::lifecycle::{self, signals};
use obs_pipeline::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "obs-pipeline")]
#[command(about = "Sample service behind the request observability pipeline", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which sample service to run (overrides the config file).
    #[arg(short, long, value_enum)]
    service: Option<ServiceKind>,

    /// Address to bind (overrides the config file).
    #[arg(short, long)]
    bind: Option<String>,
}

fn load(args: &Args) -> Result<ServiceConfig, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::load_default()?,
    };
    if let Some(kind) = args.service {
        config.service.kind = kind;
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    config::validation::validate_config(&config).map_err(config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load(&args)?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "obs-pipeline starting");
    tracing::info!(
        service = %config.service.display_name(),
        bind_address = %config.listener.bind_address,
        request_timeout_ms = config.timeouts.request_ms,
        peer_timeout_ms = config.peers.timeout_ms,
        "Configuration loaded"
    );

    let running = lifecycle::start(&config).await?;
    signals::spawn_signal_listener(running.shutdown());
    running.wait().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
