// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A single simulated Modbus slave.
//!
//! Each slave owns one TCP listener bound to `ip:port`, an accept loop that
//! spawns a protocol engine per connection, and a scenario ticker that
//! advances the attached scenario every `scenario.update_interval` and
//! refreshes the SLA knobs the engines read.
//!
//! Lifecycle transitions are compare-and-swap on an atomic state:
//! `start` requires `Stopped -> Starting -> Running`, `stop` requires
//! `Running -> Stopping -> Stopped`; anything else is rejected.

use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use modsim_config::SimConfig;
use modsim_core::error::{SlaveError, SlaveResult};
use modsim_core::registers::RegisterMap;
use modsim_core::scenario::{ScenarioHandler, ScenarioRegistry, SlaKnobs};
use modsim_core::stats::SlaveStats;
use modsim_core::types::{ScenarioType, SlaveState};
use modsim_proto::engine::{EngineOptions, ProtocolEngine};

type SharedHandler = Arc<Mutex<Box<dyn ScenarioHandler>>>;

// =============================================================================
// Slave
// =============================================================================

/// One simulated Modbus/TCP slave bound to its own address.
pub struct Slave {
    id: String,
    ip: IpAddr,
    port: u16,
    unit_id: u8,

    state: AtomicU8,
    registers: Arc<RegisterMap>,
    stats: Arc<SlaveStats>,
    sla: Arc<RwLock<SlaKnobs>>,
    handler: SharedHandler,

    config: Arc<SimConfig>,
    registry: Arc<ScenarioRegistry>,

    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    active_connections: Arc<AtomicUsize>,
}

impl Slave {
    /// Creates a slave bound to `ip:port` once started.
    ///
    /// The register bank is built from `slaves.default_registers`; an empty
    /// table falls back to the canonical EMS points.
    pub fn new(
        ip: IpAddr,
        port: u16,
        config: Arc<SimConfig>,
        registry: Arc<ScenarioRegistry>,
    ) -> Self {
        let registers = Arc::new(RegisterMap::new(
            modsim_core::registers::DEFAULT_SPACE_SIZE,
            modsim_core::registers::DEFAULT_SPACE_SIZE,
            modsim_core::registers::DEFAULT_SPACE_SIZE,
            modsim_core::registers::DEFAULT_SPACE_SIZE,
        ));
        if config.slaves.default_registers.is_empty() {
            registers.apply_definitions(&modsim_core::registers::default_register_table());
        } else {
            registers.apply_definitions(&config.slaves.default_registers);
        }

        let handler = registry.create(ScenarioType::Normal);
        let (shutdown, _) = broadcast::channel(1);

        Self {
            id: format!("{ip}:{port}"),
            ip,
            port,
            unit_id: 1,
            state: AtomicU8::new(SlaveState::Stopped as u8),
            registers,
            stats: Arc::new(SlaveStats::new()),
            sla: Arc::new(RwLock::new(SlaKnobs::default())),
            handler: Arc::new(Mutex::new(handler)),
            config,
            registry,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the Modbus unit id (1 to 255).
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Replaces the register bank.
    pub fn with_registers(mut self, registers: Arc<RegisterMap>) -> Self {
        self.registers = registers;
        self
    }

    /// The slave id, `ip:port`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configured unit id.
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// The address this slave binds.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SlaveState {
        SlaveState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The shared register bank.
    pub fn registers(&self) -> &Arc<RegisterMap> {
        &self.registers
    }

    /// The request counters.
    pub fn stats(&self) -> &Arc<SlaveStats> {
        &self.stats
    }

    /// The currently attached scenario.
    pub fn scenario(&self) -> ScenarioType {
        self.handler.lock().scenario_type()
    }

    /// The SLA knobs currently visible to the protocol engines.
    pub fn sla_knobs(&self) -> SlaKnobs {
        *self.sla.read()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Binds the listener and spawns the accept loop and scenario ticker.
    ///
    /// Not idempotent: a second `start` on a running slave fails. A bind
    /// failure reports the attempted address verbatim and returns the slave
    /// to `Stopped`.
    pub async fn start(&self) -> SlaveResult<()> {
        self.transition(SlaveState::Stopped, SlaveState::Starting, "start")?;

        let addr = self.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state
                    .store(SlaveState::Stopped as u8, Ordering::SeqCst);
                return Err(SlaveError::bind(addr.to_string(), e));
            }
        };

        self.stats.mark_started();

        let accept = tokio::spawn(accept_loop(
            self.connection_context(),
            listener,
            self.shutdown.subscribe(),
        ));
        let ticker = tokio::spawn(ticker_loop(
            self.ticker_context(),
            self.shutdown.subscribe(),
        ));
        self.tasks.lock().extend([accept, ticker]);

        self.state
            .store(SlaveState::Running as u8, Ordering::SeqCst);
        info!(id = %self.id, unit_id = self.unit_id, "slave started");
        Ok(())
    }

    /// Stops the ticker, closes the listener and waits for the accept loop.
    ///
    /// Live connections are closed immediately; in-flight requests are not
    /// drained.
    pub async fn stop(&self) -> SlaveResult<()> {
        self.transition(SlaveState::Running, SlaveState::Stopping, "stop")?;

        let _ = self.shutdown.send(());
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.state
            .store(SlaveState::Stopped as u8, Ordering::SeqCst);
        info!(
            id = %self.id,
            requests = self.stats.requests(),
            errors = self.stats.errors(),
            "slave stopped"
        );
        Ok(())
    }

    fn transition(&self, from: SlaveState, to: SlaveState, action: &'static str) -> SlaveResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| {
                SlaveError::invalid_state(&self.id, action, SlaveState::from_u8(actual).as_str())
            })
    }

    // =========================================================================
    // Scenario
    // =========================================================================

    /// Attaches a scenario; the next tick applies it.
    ///
    /// Safe to call in any state. Switching to `Normal` also resets the
    /// register bank to the canonical baseline.
    pub fn apply_scenario(&self, scenario: ScenarioType) {
        let mut fresh = self.registry.create(scenario);
        if scenario == ScenarioType::Normal {
            fresh.reset(&self.registers);
        }

        *self.handler.lock() = fresh;
        debug!(id = %self.id, scenario = %scenario, "scenario applied");
    }

    fn ticker_context(&self) -> TickerContext {
        TickerContext {
            id: self.id.clone(),
            registers: Arc::clone(&self.registers),
            handler: Arc::clone(&self.handler),
            sla: Arc::clone(&self.sla),
            config: Arc::clone(&self.config),
        }
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            id: self.id.clone(),
            unit_id: self.unit_id,
            registers: Arc::clone(&self.registers),
            stats: Arc::clone(&self.stats),
            sla: Arc::clone(&self.sla),
            config: Arc::clone(&self.config),
            active_connections: Arc::clone(&self.active_connections),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl std::fmt::Debug for Slave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slave")
            .field("id", &self.id)
            .field("unit_id", &self.unit_id)
            .field("state", &self.state())
            .field("scenario", &self.scenario())
            .finish()
    }
}

// =============================================================================
// Scenario Ticker
// =============================================================================

struct TickerContext {
    id: String,
    registers: Arc<RegisterMap>,
    handler: SharedHandler,
    sla: Arc<RwLock<SlaKnobs>>,
    config: Arc<SimConfig>,
}

impl TickerContext {
    fn tick(&self) {
        // A panicking handler must not take the slave down with it.
        let knobs = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut handler = self.handler.lock();
            let params = self.config.scenario_params(handler.scenario_type());
            handler.update(&self.registers, &params);
            handler.sla_knobs()
        }));

        match knobs {
            Ok(knobs) => *self.sla.write() = knobs,
            Err(_) => error!(id = %self.id, "scenario handler panicked"),
        }
    }
}

async fn ticker_loop(ctx: TickerContext, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(ctx.config.scenario.update_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => ctx.tick(),
        }
    }
}

// =============================================================================
// Accept Loop
// =============================================================================

#[derive(Clone)]
struct ConnectionContext {
    id: String,
    unit_id: u8,
    registers: Arc<RegisterMap>,
    stats: Arc<SlaveStats>,
    sla: Arc<RwLock<SlaKnobs>>,
    config: Arc<SimConfig>,
    active_connections: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

impl ConnectionContext {
    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let active = self.active_connections.load(Ordering::Relaxed);
        if active >= self.config.server.max_connections {
            debug!(id = %self.id, %peer, active, "connection cap reached, dropping");
            return;
        }

        let engine = ProtocolEngine::new(
            Arc::clone(&self.registers),
            Arc::clone(&self.stats),
            Arc::clone(&self.sla),
            EngineOptions {
                unit_id: self.unit_id,
                read_timeout: self.config.server.read_deadline(),
                write_timeout: self.config.server.write_deadline(),
            },
        );

        let id = self.id.clone();
        let counter = Arc::clone(&self.active_connections);
        let mut shutdown = self.shutdown.subscribe();
        counter.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            debug!(id = %id, %peer, "connection opened");
            tokio::select! {
                _ = shutdown.recv() => {}
                result = engine.serve(stream) => {
                    if let Err(e) = result {
                        debug!(id = %id, %peer, error = %e, "connection closed");
                    }
                }
            }
            counter.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn accept_loop(
    ctx: ConnectionContext,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => ctx.spawn_connection(stream, peer),
                Err(e) => {
                    // Transient accept errors (EMFILE and friends) must not
                    // kill the listener.
                    warn!(id = %ctx.id, error = %e, "accept failed");
                }
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn test_config(port: u16) -> Arc<SimConfig> {
        let mut config = SimConfig::default();
        config.server.port = port;
        config.scenario.update_interval = Duration::from_millis(20);
        Arc::new(config)
    }

    fn localhost_slave(port: u16) -> Slave {
        Slave::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            test_config(port),
            Arc::new(ScenarioRegistry::with_builtins()),
        )
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let slave = localhost_slave(0);
        assert_eq!(slave.state(), SlaveState::Stopped);

        // Port 0 binds an ephemeral port, good enough for lifecycle checks.
        slave.start().await.unwrap();
        assert_eq!(slave.state(), SlaveState::Running);

        slave.stop().await.unwrap();
        assert_eq!(slave.state(), SlaveState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let slave = localhost_slave(0);
        slave.start().await.unwrap();

        let err = slave.start().await.unwrap_err();
        assert!(matches!(err, SlaveError::InvalidState { .. }));

        slave.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let slave = localhost_slave(0);
        let err = slave.stop().await.unwrap_err();
        assert!(matches!(err, SlaveError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_bind_failure_reports_address_and_resets_state() {
        // TEST-NET-3 is never assigned locally, so the bind cannot succeed.
        let slave = Slave::new(
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
            5502,
            test_config(5502),
            Arc::new(ScenarioRegistry::with_builtins()),
        );

        let err = slave.start().await.unwrap_err();
        assert!(err.to_string().contains("203.0.113.1:5502"), "got: {err}");
        assert_eq!(slave.state(), SlaveState::Stopped);
    }

    #[tokio::test]
    async fn test_scenario_ticker_updates_registers() {
        let slave = localhost_slave(0);
        slave.start().await.unwrap();

        // Let a few ticks land, then check the voltage register stays in
        // the fluctuation envelope around the baseline.
        tokio::time::sleep(Duration::from_millis(120)).await;

        let voltage = slave.registers().get_scaled_value(40001).unwrap();
        assert!((voltage - 220.0).abs() <= 220.0 * 0.011, "voltage {voltage}");

        slave.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_scenario_refreshes_knobs_next_tick() {
        let slave = localhost_slave(0);
        slave.start().await.unwrap();

        slave.apply_scenario(ScenarioType::PacketLoss);
        assert_eq!(slave.scenario(), ScenarioType::PacketLoss);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(slave.sla_knobs().packet_loss_rate > 0.0);

        slave.apply_scenario(ScenarioType::Normal);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(slave.sla_knobs().packet_loss_rate, 0.0);

        slave.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_scenario_while_stopped_is_safe() {
        let slave = localhost_slave(0);
        slave.apply_scenario(ScenarioType::VoltageSag);
        assert_eq!(slave.scenario(), ScenarioType::VoltageSag);
    }
}
