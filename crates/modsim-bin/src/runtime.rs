// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulator runtime orchestration.
//!
//! The runtime wires the pieces together in order: configuration, scenario
//! registry, fleet supervisor, optional metrics server, then waits for a
//! shutdown signal and stops the fleet within the configured graceful
//! timeout.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use modsim_config::{load_config, SimConfig};
use modsim_core::scenario::ScenarioRegistry;
use modsim_server::{metrics, MetricsCollector, Supervisor};

use crate::error::BinResult;
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// SimRuntime
// =============================================================================

/// The assembled simulator process.
pub struct SimRuntime {
    config: Arc<SimConfig>,
    shutdown: ShutdownCoordinator,
}

impl SimRuntime {
    /// Creates a runtime from a validated configuration.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// The shutdown coordinator, for external triggers (tests, supervisors).
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Runs the simulator until shutdown is signaled.
    pub async fn run(self) -> BinResult<()> {
        info!(version = modsim_core::VERSION, "starting modsim");

        let registry = Arc::new(ScenarioRegistry::with_builtins());
        let supervisor = Arc::new(Supervisor::new(Arc::clone(&self.config), registry));

        supervisor.start().await?;

        let metrics_task = if self.config.metrics.enabled {
            let collector = Arc::new(MetricsCollector::new(Arc::clone(&supervisor)));
            let addr = SocketAddr::from(([0, 0, 0, 0], self.config.metrics.port));
            let endpoint = self.config.metrics.endpoint.clone();
            let shutdown = self.shutdown.subscribe();

            Some(tokio::spawn(async move {
                if let Err(e) = metrics::serve(collector, addr, &endpoint, shutdown).await {
                    warn!(error = %e, "metrics server failed");
                }
            }))
        } else {
            None
        };

        info!(
            slaves = supervisor.stats().active_slaves,
            port = self.config.server.port,
            "modsim is ready"
        );
        self.shutdown.wait_for_shutdown().await;

        info!("stopping fleet");
        supervisor.stop(self.config.server.graceful_timeout).await?;

        if let Some(task) = metrics_task {
            let _ = task.await;
        }

        info!("modsim shutdown complete");
        Ok(())
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the simulator runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<std::path::PathBuf>,
    config: Option<SimConfig>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly, bypassing the loader.
    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the runtime, loading configuration if necessary.
    pub fn build(self) -> BinResult<SimRuntime> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let path = self
                    .config_path
                    .unwrap_or_else(|| std::path::PathBuf::from("modsim.json"));
                load_config(path)?
            }
        };

        Ok(SimRuntime::new(config))
    }
}

// =============================================================================
// Tests
// =============================================================================
