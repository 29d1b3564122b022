//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind the listener and begin accepting traffic
//! - Hand back a handle that can stop the service
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::Shutdown;
use crate::config::ServiceConfig;
use crate::http::{ServerError, ServiceServer};
use crate::observability::{MetricsError, MetricsRegistry};
use crate::services::{build_service, BuildError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error("service: {0}")]
    Build(#[from] BuildError),

    #[error("server: {0}")]
    Server(#[from] ServerError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A service accepting traffic in a background task.
pub struct RunningService {
    pub addr: SocketAddr,
    pub metrics: MetricsRegistry,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningService {
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for the server to exit on its own (after a signal).
    pub async fn wait(self) -> Result<(), StartupError> {
        self.task.await??;
        Ok(())
    }

    /// Trigger shutdown and wait for in-flight requests to drain.
    pub async fn stop(self) -> Result<(), StartupError> {
        self.shutdown.trigger();
        self.wait().await
    }
}

/// Build and start the configured service.
pub async fn start(config: &ServiceConfig) -> Result<RunningService, StartupError> {
    let metrics = MetricsRegistry::new(config.metrics.clone())?;
    let app = build_service(config, &metrics)?;
    let server = ServiceServer::new(app, config, metrics.clone())?;

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    let addr = listener
        .local_addr()
        .map_err(|source| StartupError::Bind { address, source })?;

    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tracing::info!(
        service = %config.service.display_name(),
        address = %addr,
        "Listening for connections"
    );

    Ok(RunningService {
        addr,
        metrics,
        shutdown,
        task,
    })
}
