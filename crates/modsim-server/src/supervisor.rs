// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The fleet supervisor.
//!
//! Owns every [`Slave`] in the process. Startup expands the configured IP
//! ranges (falling back to local interface addresses, then `0.0.0.0`),
//! starts slaves with bounded parallelism and tolerates partial failure:
//! the fleet runs as long as at least one slave bound. Shutdown is bounded
//! by a caller-supplied deadline.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use modsim_config::SimConfig;
use modsim_core::error::{SlaveError, SupervisorError, SupervisorResult};
use modsim_core::scenario::ScenarioRegistry;
use modsim_core::types::{ScenarioType, SlaveState, SupervisorState};

use crate::net::local_ipv4_addrs;
use crate::slave::Slave;

/// Upper bound on concurrently starting or stopping slaves.
pub const START_PARALLELISM: usize = 100;

// =============================================================================
// Supervisor
// =============================================================================

/// Process-wide owner of the slave fleet.
pub struct Supervisor {
    config: Arc<SimConfig>,
    registry: Arc<ScenarioRegistry>,
    state: AtomicU8,
    slaves: DashMap<String, Arc<Slave>>,
    current_scenario: Mutex<ScenarioType>,
    started_at: Mutex<Option<Instant>>,
}

impl Supervisor {
    /// Creates a supervisor with an empty fleet.
    pub fn new(config: Arc<SimConfig>, registry: Arc<ScenarioRegistry>) -> Self {
        Self {
            config,
            registry,
            state: AtomicU8::new(SupervisorState::Stopped as u8),
            slaves: DashMap::new(),
            current_scenario: Mutex::new(ScenarioType::Normal),
            started_at: Mutex::new(None),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The scenario most recently applied to the fleet.
    pub fn current_scenario(&self) -> ScenarioType {
        *self.current_scenario.lock()
    }

    /// The configuration the fleet runs with.
    pub fn config(&self) -> &Arc<SimConfig> {
        &self.config
    }

    /// All slaves, in no particular order.
    pub fn slaves(&self) -> Vec<Arc<Slave>> {
        self.slaves.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Looks up one slave by its `ip:port` id.
    pub fn slave(&self, id: &str) -> Option<Arc<Slave>> {
        self.slaves.get(id).map(|entry| Arc::clone(entry.value()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the fleet.
    ///
    /// Slaves start concurrently with at most [`START_PARALLELISM`] binds in
    /// flight. Individual failures are collected; the supervisor runs if at
    /// least one slave started and returns the first error if none did.
    pub async fn start(&self) -> SupervisorResult<()> {
        self.transition(SupervisorState::Stopped, SupervisorState::Starting, "start")?;

        let started = Instant::now();
        let ips = match self.plan_bind_ips().await {
            Ok(ips) => ips,
            Err(e) => {
                self.state
                    .store(SupervisorState::Stopped as u8, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(
            slaves = ips.len(),
            port = self.config.server.port,
            "starting fleet"
        );

        let semaphore = Arc::new(Semaphore::new(START_PARALLELISM));
        let mut joins: JoinSet<Result<Arc<Slave>, SlaveError>> = JoinSet::new();

        for (index, ip) in ips.iter().enumerate() {
            let slave = Arc::new(
                Slave::new(
                    IpAddr::V4(*ip),
                    self.config.server.port,
                    Arc::clone(&self.config),
                    Arc::clone(&self.registry),
                )
                .with_unit_id(self.config.slaves.unit_id_for(index)),
            );
            let semaphore = Arc::clone(&semaphore);

            joins.spawn(async move {
                // Closing the semaphore is not part of this flow, so the
                // acquire can only fail if the JoinSet is being torn down.
                let Ok(_permit) = semaphore.acquire().await else {
                    return Err(SlaveError::invalid_state(slave.id(), "start", "cancelled"));
                };
                slave.start().await.map(|()| slave)
            });
        }

        let mut failures: Vec<SlaveError> = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok(Ok(slave)) => {
                    self.slaves.insert(slave.id().to_string(), slave);
                }
                Ok(Err(e)) => failures.push(e),
                Err(e) => warn!(error = %e, "slave start task panicked"),
            }
        }

        if self.slaves.is_empty() {
            self.state
                .store(SupervisorState::Stopped as u8, Ordering::SeqCst);
            let first = failures
                .into_iter()
                .next()
                .unwrap_or_else(|| SlaveError::invalid_state("fleet", "start", "no addresses"));
            return Err(SupervisorError::AllSlavesFailed {
                attempted: ips.len(),
                first,
            });
        }

        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                running = self.slaves.len(),
                first = %failures[0],
                "partial fleet startup"
            );
        }

        // The configured default scenario takes effect from the first tick.
        let default_scenario = self.config.scenario.default_scenario_type();
        if default_scenario != ScenarioType::Normal {
            self.apply_scenario(default_scenario);
        }

        *self.started_at.lock() = Some(started);
        self.state
            .store(SupervisorState::Running as u8, Ordering::SeqCst);
        info!(
            active = self.slaves.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fleet started"
        );
        Ok(())
    }

    /// Stops the fleet, honoring `deadline`.
    ///
    /// Slaves stop concurrently with bounded parallelism. When the deadline
    /// expires the supervisor returns with the remaining stops abandoned.
    pub async fn stop(&self, deadline: Duration) -> SupervisorResult<()> {
        self.transition(SupervisorState::Running, SupervisorState::Stopping, "stop")?;

        info!(slaves = self.slaves.len(), "stopping fleet");

        let semaphore = Arc::new(Semaphore::new(START_PARALLELISM));
        let mut joins: JoinSet<()> = JoinSet::new();

        for entry in self.slaves.iter() {
            let slave = Arc::clone(entry.value());
            let semaphore = Arc::clone(&semaphore);
            joins.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Err(e) = slave.stop().await {
                    warn!(id = slave.id(), error = %e, "slave stop failed");
                }
            });
        }

        let drain = async {
            while joins.join_next().await.is_some() {}
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("fleet stop deadline expired with stops pending");
        }

        self.slaves.clear();
        *self.started_at.lock() = None;
        self.state
            .store(SupervisorState::Stopped as u8, Ordering::SeqCst);
        info!("fleet stopped");
        Ok(())
    }

    fn transition(
        &self,
        from: SupervisorState,
        to: SupervisorState,
        action: &'static str,
    ) -> SupervisorResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| {
                SupervisorError::invalid_state(action, SupervisorState::from_u8(actual).as_str())
            })
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Applies a scenario to every slave.
    pub fn apply_scenario(&self, scenario: ScenarioType) {
        *self.current_scenario.lock() = scenario;
        info!(scenario = %scenario, slaves = self.slaves.len(), "applying scenario");
        for entry in self.slaves.iter() {
            entry.value().apply_scenario(scenario);
        }
    }

    /// Folds every slave's counters into one aggregate snapshot.
    pub fn stats(&self) -> FleetStats {
        let mut stats = FleetStats {
            state: self.state(),
            scenario: self.current_scenario(),
            slave_count: self.slaves.len(),
            active_slaves: 0,
            total_requests: 0,
            total_errors: 0,
            bytes_in: 0,
            bytes_out: 0,
            uptime_seconds: self
                .started_at
                .lock()
                .map(|at| at.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        };

        for entry in self.slaves.iter() {
            let slave = entry.value();
            if slave.state() == SlaveState::Running {
                stats.active_slaves += 1;
            }
            let counters = slave.stats();
            stats.total_requests += counters.requests();
            stats.total_errors += counters.errors();
            stats.bytes_in += counters.bytes_in();
            stats.bytes_out += counters.bytes_out();
        }

        stats
    }

    // =========================================================================
    // IP Planning
    // =========================================================================

    /// Computes the bind address per slave.
    ///
    /// Configured ranges win. Without ranges, non-loopback local IPv4
    /// addresses are cycled to the fleet size (duplicate `ip:port` binds
    /// then fail; real deployments need virtual-IP provisioning). With no
    /// local addresses at all, everything binds `0.0.0.0`.
    async fn plan_bind_ips(&self) -> SupervisorResult<Vec<Ipv4Addr>> {
        let count = self.config.slaves.count;

        if !self.config.network.ip_ranges.is_empty() {
            let mut ips = self
                .config
                .expand_ip_ranges()
                .map_err(|e| SupervisorError::ip_planning(e.to_string()))?;
            ips.truncate(count);
            if ips.is_empty() {
                return Err(SupervisorError::ip_planning("configured ranges are empty"));
            }
            return Ok(ips);
        }

        let local = local_ipv4_addrs().await;
        if local.is_empty() {
            return Ok(vec![Ipv4Addr::UNSPECIFIED; count.min(1)]);
        }

        Ok(local.iter().copied().cycle().take(count).collect())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("slaves", &self.slaves.len())
            .field("scenario", &self.current_scenario())
            .finish()
    }
}

// =============================================================================
// FleetStats
// =============================================================================

/// Aggregate fleet counters.
///
/// Folded from per-slave atomics; the totals are not snapshot-atomic across
/// slaves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetStats {
    /// Supervisor lifecycle state.
    pub state: SupervisorState,

    /// Scenario most recently applied to the fleet.
    pub scenario: ScenarioType,

    /// Slaves owned by the supervisor.
    pub slave_count: usize,

    /// Slaves currently in `Running`.
    pub active_slaves: usize,

    /// Requests completed across the fleet.
    pub total_requests: u64,

    /// Errors across the fleet (exceptions plus drops).
    pub total_errors: u64,

    /// Bytes received across the fleet.
    pub bytes_in: u64,

    /// Bytes sent across the fleet.
    pub bytes_out: u64,

    /// Seconds since the fleet started; zero when stopped.
    pub uptime_seconds: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use modsim_config::IpRange;

    fn fleet_config(count: usize, port: u16) -> Arc<SimConfig> {
        let mut config = SimConfig::default();
        config.server.port = port;
        config.slaves.count = count;
        config.scenario.update_interval = Duration::from_millis(50);
        // The loopback /8 is bindable without provisioning.
        config.network.ip_ranges = vec![IpRange::span(
            "127.0.0.1",
            &format!("127.0.0.{count}"),
        )];
        Arc::new(config)
    }

    fn supervisor(config: Arc<SimConfig>) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            config,
            Arc::new(ScenarioRegistry::with_builtins()),
        ))
    }

    #[tokio::test]
    async fn test_start_three_slaves() {
        let supervisor = supervisor(fleet_config(3, 15502));
        supervisor.start().await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Running);
        let stats = supervisor.stats();
        assert_eq!(stats.slave_count, 3);
        assert_eq!(stats.active_slaves, 3);

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(supervisor.stats().slave_count, 0);
    }

    #[tokio::test]
    async fn test_unit_ids_follow_start_offset() {
        let mut config = SimConfig::default();
        config.server.port = 15504;
        config.slaves.count = 2;
        config.slaves.unit_id_start = 10;
        config.network.ip_ranges = vec![IpRange::span("127.0.0.1", "127.0.0.2")];
        let supervisor = supervisor(Arc::new(config));

        supervisor.start().await.unwrap();
        let mut unit_ids: Vec<u8> = supervisor.slaves().iter().map(|s| s.unit_id()).collect();
        unit_ids.sort_unstable();
        assert_eq!(unit_ids, vec![10, 11]);

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_running() {
        // One bindable loopback address and one TEST-NET address that
        // cannot bind: the fleet must come up with a single slave.
        let mut config = SimConfig::default();
        config.server.port = 15506;
        config.slaves.count = 2;
        config.network.ip_ranges = vec![
            IpRange::span("127.0.0.1", "127.0.0.1"),
            IpRange::span("203.0.113.1", "203.0.113.1"),
        ];
        let supervisor = supervisor(Arc::new(config));

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.stats().active_slaves, 1);

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_all_failures_return_first_error() {
        let mut config = SimConfig::default();
        config.server.port = 15508;
        config.slaves.count = 2;
        config.network.ip_ranges = vec![IpRange::span("203.0.113.1", "203.0.113.2")];
        let supervisor = supervisor(Arc::new(config));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::AllSlavesFailed { attempted: 2, .. }));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let supervisor = supervisor(fleet_config(1, 15510));
        supervisor.start().await.unwrap();

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidState { .. }));

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_scenario_fans_out() {
        let supervisor = supervisor(fleet_config(2, 15512));
        supervisor.start().await.unwrap();

        supervisor.apply_scenario(ScenarioType::VoltageSag);
        assert_eq!(supervisor.current_scenario(), ScenarioType::VoltageSag);
        for slave in supervisor.slaves() {
            assert_eq!(slave.scenario(), ScenarioType::VoltageSag);
        }

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_truncates_ips_to_slave_count() {
        let mut config = SimConfig::default();
        config.server.port = 15514;
        config.slaves.count = 2;
        config.network.ip_ranges = vec![IpRange::span("127.0.0.1", "127.0.0.10")];
        let supervisor = supervisor(Arc::new(config));

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.stats().slave_count, 2);

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
    }
}
