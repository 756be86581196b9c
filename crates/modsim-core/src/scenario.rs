// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fault scenarios and the scenario registry.
//!
//! A scenario mutates a slave's register values on every tick and may expose
//! link-level fault parameters ([`SlaKnobs`]) that the protocol engine reads
//! before answering each request.
//!
//! Scenario state (accumulated energy, the voltage-sag clock) is per-device,
//! so the registry hands out *factories*: each slave builds its own handler
//! instance and two slaves never share a sag timer.
//!
//! Baseline after `reset`: 220.0 V / 15.5 A / 60.0 Hz / 0 kWh / 0.95 PF /
//! 3300 W.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::registers::RegisterMap;
use crate::types::{ScenarioParams, ScenarioType};

// =============================================================================
// Constants
// =============================================================================

/// Baseline line voltage in volts.
pub const BASE_VOLTAGE: f64 = 220.0;

/// Baseline line current in amperes.
pub const BASE_CURRENT: f64 = 15.5;

/// Baseline grid frequency in hertz.
pub const BASE_FREQUENCY: f64 = 60.0;

/// Baseline active power in watts.
pub const BASE_POWER: f64 = 3300.0;

/// Power factor applied to the voltage-current product.
pub const POWER_FACTOR: f64 = 0.95;

const DEFAULT_VOLTAGE_VARIANCE: f64 = 0.005;
const DEFAULT_FREQUENCY_VARIANCE: f64 = 0.0005;
const CURRENT_VARIANCE: f64 = 0.02;
const DEFAULT_SAG_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_SAG_FACTOR: f64 = 0.8;
const DEFAULT_JITTER_MIN: Duration = Duration::from_millis(100);
const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(500);
const DEFAULT_PACKET_LOSS_RATE: f64 = 0.05;

const ADDR_VOLTAGE: u16 = 40001;
const ADDR_CURRENT: u16 = 40002;
const ADDR_FREQUENCY: u16 = 40003;
const ADDR_ENERGY: u16 = 40004;
const ADDR_POWER_FACTOR: u16 = 40006;
const ADDR_POWER: u16 = 40007;

// =============================================================================
// SlaKnobs
// =============================================================================

/// Link-level fault parameters published by a scenario.
///
/// All-zero means disabled; the protocol engine treats a zero `jitter_max`
/// as "no delay" and a zero `packet_loss_rate` as "never drop".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlaKnobs {
    /// Lower bound of the uniform per-request delay.
    pub jitter_min: Duration,

    /// Upper bound (exclusive) of the uniform per-request delay.
    pub jitter_max: Duration,

    /// Probability in `[0, 1)` of silently dropping a response.
    pub packet_loss_rate: f64,
}

impl SlaKnobs {
    /// Returns `true` if the jitter delay is active.
    #[inline]
    pub fn jitter_enabled(&self) -> bool {
        self.jitter_max > Duration::ZERO
    }
}

// =============================================================================
// ScenarioHandler
// =============================================================================

/// A scenario handler owned by one slave.
pub trait ScenarioHandler: Send {
    /// The scenario this handler implements.
    fn scenario_type(&self) -> ScenarioType;

    /// Advances the simulation one tick, mutating the register map.
    fn update(&mut self, registers: &RegisterMap, params: &ScenarioParams);

    /// Restores the canonical baseline and clears accumulated state.
    fn reset(&mut self, registers: &RegisterMap);

    /// Link-level fault parameters after the most recent `update`.
    fn sla_knobs(&self) -> SlaKnobs {
        SlaKnobs::default()
    }
}

// =============================================================================
// Normal
// =============================================================================

/// Small fluctuations around the electrical baseline.
///
/// Voltage and frequency wander within the configured variances, current
/// within ±2%. Energy integrates power over the wall-clock time between
/// ticks.
#[derive(Debug, Default)]
pub struct NormalScenario {
    energy_kwh: f64,
    last_update: Option<Instant>,
}

impl NormalScenario {
    /// Creates a fresh handler with zero accumulated energy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated energy in kWh.
    pub fn energy_kwh(&self) -> f64 {
        self.energy_kwh
    }

    fn write_baseline(registers: &RegisterMap, energy_kwh: f64) {
        let _ = registers.set_scaled_value(ADDR_VOLTAGE, BASE_VOLTAGE);
        let _ = registers.set_scaled_value(ADDR_CURRENT, BASE_CURRENT);
        let _ = registers.set_scaled_value(ADDR_FREQUENCY, BASE_FREQUENCY);
        let _ = registers.set_scaled_value(ADDR_ENERGY, energy_kwh);
        let _ = registers.set_scaled_value(ADDR_POWER_FACTOR, POWER_FACTOR);
        let _ = registers.set_scaled_value(ADDR_POWER, BASE_POWER);
    }
}

impl ScenarioHandler for NormalScenario {
    fn scenario_type(&self) -> ScenarioType {
        ScenarioType::Normal
    }

    fn update(&mut self, registers: &RegisterMap, params: &ScenarioParams) {
        let mut rng = rand::thread_rng();

        let voltage_variance = if params.voltage_variance == 0.0 {
            DEFAULT_VOLTAGE_VARIANCE
        } else {
            params.voltage_variance
        };
        let frequency_variance = if params.frequency_variance == 0.0 {
            DEFAULT_FREQUENCY_VARIANCE
        } else {
            params.frequency_variance
        };

        let voltage = BASE_VOLTAGE * (1.0 + rng.gen_range(-1.0..1.0) * voltage_variance);
        let frequency = BASE_FREQUENCY * (1.0 + rng.gen_range(-1.0..1.0) * frequency_variance);
        let current = BASE_CURRENT * (1.0 + rng.gen_range(-1.0..1.0) * CURRENT_VARIANCE);
        let power = voltage * current * POWER_FACTOR;

        let now = Instant::now();
        if let Some(last) = self.last_update {
            let elapsed_hours = now.duration_since(last).as_secs_f64() / 3600.0;
            self.energy_kwh += power * elapsed_hours / 1000.0;
        }
        self.last_update = Some(now);

        let _ = registers.set_scaled_value(ADDR_VOLTAGE, voltage);
        let _ = registers.set_scaled_value(ADDR_CURRENT, current);
        let _ = registers.set_scaled_value(ADDR_FREQUENCY, frequency);
        let _ = registers.set_scaled_value(ADDR_ENERGY, self.energy_kwh);
        let _ = registers.set_scaled_value(ADDR_POWER_FACTOR, POWER_FACTOR);
        let _ = registers.set_scaled_value(ADDR_POWER, power);
    }

    fn reset(&mut self, registers: &RegisterMap) {
        self.energy_kwh = 0.0;
        self.last_update = Some(Instant::now());
        Self::write_baseline(registers, 0.0);
    }
}

// =============================================================================
// VoltageSag
// =============================================================================

/// Voltage drops to `sag_factor` of baseline for a configured duration
/// starting at the first tick, then recovers to Normal behavior.
///
/// The clock keeps running after the sag ends; a reset (or a scenario
/// switch) is required to repeat the sag.
#[derive(Debug, Default)]
pub struct VoltageSagScenario {
    normal: NormalScenario,
    started_at: Option<Instant>,
    duration: Duration,
    sag_factor: f64,
}

impl VoltageSagScenario {
    /// Creates a fresh handler; the sag arms on the first `update`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScenarioHandler for VoltageSagScenario {
    fn scenario_type(&self) -> ScenarioType {
        ScenarioType::VoltageSag
    }

    fn update(&mut self, registers: &RegisterMap, params: &ScenarioParams) {
        if self.started_at.is_none() {
            self.duration = if params.duration.is_zero() {
                DEFAULT_SAG_DURATION
            } else {
                params.duration
            };
            let factor = 1.0 - params.voltage_variance;
            self.sag_factor = if factor <= 0.0 || factor >= 1.0 {
                DEFAULT_SAG_FACTOR
            } else {
                factor
            };
            self.started_at = Some(Instant::now());
        }

        // Register values fluctuate normally; the sag scales the result.
        self.normal.update(registers, &ScenarioParams::default());

        let in_sag_window = self
            .started_at
            .is_some_and(|started_at| started_at.elapsed() < self.duration);
        if in_sag_window {
            if let Ok(voltage) = registers.get_scaled_value(ADDR_VOLTAGE) {
                let _ = registers.set_scaled_value(ADDR_VOLTAGE, voltage * self.sag_factor);
            }
            if let Ok(power) = registers.get_scaled_value(ADDR_POWER) {
                let _ = registers.set_scaled_value(ADDR_POWER, power * self.sag_factor);
            }
        }
    }

    fn reset(&mut self, registers: &RegisterMap) {
        self.started_at = None;
        self.normal.reset(registers);
    }
}

// =============================================================================
// Jitter
// =============================================================================

/// Normal register behavior plus a uniform per-request response delay.
#[derive(Debug, Default)]
pub struct JitterScenario {
    normal: NormalScenario,
    knobs: SlaKnobs,
}

impl JitterScenario {
    /// Creates a fresh handler; knobs publish after the first `update`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScenarioHandler for JitterScenario {
    fn scenario_type(&self) -> ScenarioType {
        ScenarioType::Jitter
    }

    fn update(&mut self, registers: &RegisterMap, params: &ScenarioParams) {
        self.knobs.jitter_min = if params.jitter_min.is_zero() {
            DEFAULT_JITTER_MIN
        } else {
            params.jitter_min
        };
        self.knobs.jitter_max = if params.jitter_max.is_zero() {
            DEFAULT_JITTER_MAX
        } else {
            params.jitter_max
        };

        self.normal.update(registers, &ScenarioParams::default());
    }

    fn reset(&mut self, registers: &RegisterMap) {
        self.knobs = SlaKnobs::default();
        self.normal.reset(registers);
    }

    fn sla_knobs(&self) -> SlaKnobs {
        self.knobs
    }
}

// =============================================================================
// PacketLoss
// =============================================================================

/// Normal register behavior plus silently dropped responses.
#[derive(Debug, Default)]
pub struct PacketLossScenario {
    normal: NormalScenario,
    knobs: SlaKnobs,
}

impl PacketLossScenario {
    /// Creates a fresh handler; the loss rate publishes after the first `update`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScenarioHandler for PacketLossScenario {
    fn scenario_type(&self) -> ScenarioType {
        ScenarioType::PacketLoss
    }

    fn update(&mut self, registers: &RegisterMap, params: &ScenarioParams) {
        self.knobs.packet_loss_rate = if params.packet_loss_rate == 0.0 {
            DEFAULT_PACKET_LOSS_RATE
        } else {
            params.packet_loss_rate
        };

        self.normal.update(registers, &ScenarioParams::default());
    }

    fn reset(&mut self, registers: &RegisterMap) {
        self.knobs = SlaKnobs::default();
        self.normal.reset(registers);
    }

    fn sla_knobs(&self) -> SlaKnobs {
        self.knobs
    }
}

// =============================================================================
// ScenarioRegistry
// =============================================================================

/// Factory producing a fresh handler instance.
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn ScenarioHandler> + Send + Sync>;

/// Maps scenario types to handler factories.
///
/// Built once at startup and shared read-only; every slave calls
/// [`ScenarioRegistry::create`] to obtain its own handler.
pub struct ScenarioRegistry {
    factories: HashMap<ScenarioType, HandlerFactory>,
}

impl ScenarioRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with the four built-in scenarios.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ScenarioType::Normal, || Box::new(NormalScenario::new()));
        registry.register(ScenarioType::VoltageSag, || {
            Box::new(VoltageSagScenario::new())
        });
        registry.register(ScenarioType::Jitter, || Box::new(JitterScenario::new()));
        registry.register(ScenarioType::PacketLoss, || {
            Box::new(PacketLossScenario::new())
        });
        registry
    }

    /// Registers a factory for a scenario type.
    pub fn register<F>(&mut self, scenario: ScenarioType, factory: F)
    where
        F: Fn() -> Box<dyn ScenarioHandler> + Send + Sync + 'static,
    {
        self.factories.insert(scenario, Box::new(factory));
    }

    /// Instantiates a fresh handler for a scenario type.
    ///
    /// Falls back to a `Normal` handler if the type is not registered, so a
    /// slave always has something to tick.
    pub fn create(&self, scenario: ScenarioType) -> Box<dyn ScenarioHandler> {
        match self.factories.get(&scenario) {
            Some(factory) => factory(),
            None => Box::new(NormalScenario::new()),
        }
    }

    /// Returns the registered scenario types.
    pub fn types(&self) -> Vec<ScenarioType> {
        ScenarioType::ALL
            .into_iter()
            .filter(|ty| self.factories.contains_key(ty))
            .collect()
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for ScenarioRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRegistry")
            .field("types", &self.types())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn voltage(registers: &RegisterMap) -> f64 {
        registers.get_scaled_value(ADDR_VOLTAGE).unwrap()
    }

    #[test]
    fn test_normal_stays_in_envelope() {
        let registers = RegisterMap::with_defaults();
        let mut handler = NormalScenario::new();
        let params = ScenarioParams::default();

        for _ in 0..20 {
            handler.update(&registers, &params);
            let v = voltage(&registers);
            let bound = BASE_VOLTAGE * 2.0 * DEFAULT_VOLTAGE_VARIANCE;
            assert!(
                (v - BASE_VOLTAGE).abs() <= bound,
                "voltage {v} outside envelope"
            );
        }
    }

    #[test]
    fn test_normal_energy_monotonic() {
        let registers = RegisterMap::with_defaults();
        let mut handler = NormalScenario::new();
        let params = ScenarioParams::default();

        let mut previous = 0.0;
        for _ in 0..10 {
            handler.update(&registers, &params);
            let energy = handler.energy_kwh();
            assert!(energy >= previous);
            previous = energy;
        }
    }

    #[test]
    fn test_normal_reset_restores_baseline() {
        let registers = RegisterMap::with_defaults();
        let mut handler = NormalScenario::new();
        handler.update(&registers, &ScenarioParams::default());
        handler.reset(&registers);

        assert_eq!(voltage(&registers), 220.0);
        assert_eq!(registers.get_scaled_value(ADDR_ENERGY).unwrap(), 0.0);
        assert_eq!(registers.get_scaled_value(ADDR_POWER).unwrap(), 3300.0);
        assert_eq!(handler.energy_kwh(), 0.0);
    }

    #[test]
    fn test_voltage_sag_applies_factor() {
        let registers = RegisterMap::with_defaults();
        let mut handler = VoltageSagScenario::new();
        let params = ScenarioParams {
            voltage_variance: 0.2,
            duration: Duration::from_secs(60),
            ..Default::default()
        };

        handler.update(&registers, &params);
        let v = voltage(&registers);
        assert!(v <= BASE_VOLTAGE * 0.8 * 1.01, "voltage {v} did not sag");

        let p = registers.get_scaled_value(ADDR_POWER).unwrap();
        assert!(p < BASE_POWER, "power {p} did not sag");
    }

    #[test]
    fn test_voltage_sag_recovers_after_duration() {
        let registers = RegisterMap::with_defaults();
        let mut handler = VoltageSagScenario::new();
        let params = ScenarioParams {
            voltage_variance: 0.2,
            duration: Duration::from_millis(10),
            ..Default::default()
        };

        handler.update(&registers, &params);
        std::thread::sleep(Duration::from_millis(20));
        handler.update(&registers, &params);

        let v = voltage(&registers);
        let bound = BASE_VOLTAGE * 2.0 * DEFAULT_VOLTAGE_VARIANCE;
        assert!(
            (v - BASE_VOLTAGE).abs() <= bound,
            "voltage {v} did not recover"
        );
    }

    #[test]
    fn test_voltage_sag_invalid_depth_uses_default() {
        let registers = RegisterMap::with_defaults();
        let mut handler = VoltageSagScenario::new();
        let params = ScenarioParams {
            voltage_variance: 1.5, // would give a negative factor
            duration: Duration::from_secs(60),
            ..Default::default()
        };

        handler.update(&registers, &params);
        assert_eq!(handler.sag_factor, DEFAULT_SAG_FACTOR);
    }

    #[test]
    fn test_jitter_publishes_knobs() {
        let registers = RegisterMap::with_defaults();
        let mut handler = JitterScenario::new();

        assert!(!handler.sla_knobs().jitter_enabled());

        handler.update(&registers, &ScenarioParams::default());
        let knobs = handler.sla_knobs();
        assert_eq!(knobs.jitter_min, DEFAULT_JITTER_MIN);
        assert_eq!(knobs.jitter_max, DEFAULT_JITTER_MAX);
        assert!(knobs.jitter_enabled());
    }

    #[test]
    fn test_packet_loss_publishes_rate() {
        let registers = RegisterMap::with_defaults();
        let mut handler = PacketLossScenario::new();

        handler.update(&registers, &ScenarioParams::default());
        assert_eq!(handler.sla_knobs().packet_loss_rate, DEFAULT_PACKET_LOSS_RATE);

        let params = ScenarioParams {
            packet_loss_rate: 0.25,
            ..Default::default()
        };
        handler.update(&registers, &params);
        assert_eq!(handler.sla_knobs().packet_loss_rate, 0.25);
    }

    #[test]
    fn test_registry_creates_independent_handlers() {
        let registry = ScenarioRegistry::with_builtins();
        let registers_a = RegisterMap::with_defaults();
        let registers_b = RegisterMap::with_defaults();

        let mut a = registry.create(ScenarioType::VoltageSag);
        let mut b = registry.create(ScenarioType::VoltageSag);
        let params = ScenarioParams {
            duration: Duration::from_secs(60),
            ..Default::default()
        };

        a.update(&registers_a, &params);
        std::thread::sleep(Duration::from_millis(5));
        b.update(&registers_b, &params);
        // Both handlers are inside their own sag window; neither panicked on
        // a shared clock, which is the property the factory design protects.
        assert_eq!(a.scenario_type(), ScenarioType::VoltageSag);
        assert_eq!(b.scenario_type(), ScenarioType::VoltageSag);
    }

    #[test]
    fn test_registry_lists_builtins() {
        let registry = ScenarioRegistry::with_builtins();
        assert_eq!(registry.types(), ScenarioType::ALL.to_vec());
    }
}
