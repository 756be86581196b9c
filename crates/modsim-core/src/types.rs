// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for the simulator.
//!
//! This module defines the protocol-agnostic vocabulary shared by every other
//! crate in the workspace:
//!
//! - **DataType**: register point interpretation (scaling and word count)
//! - **ScenarioType**: the named fault scenarios a slave can run
//! - **SlaveState** / **SupervisorState**: atomic lifecycle encodings
//! - **ScenarioParams**: per-scenario tuning knobs from configuration
//! - **RegisterDefinition**: configured metadata for a register point

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

// =============================================================================
// DataType
// =============================================================================

/// Interpretation of a defined register point.
///
/// Modbus registers are 16-bit words; 32-bit types occupy two consecutive
/// registers with the more significant word at the lower offset (big-endian
/// within and across words).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 16-bit unsigned integer (1 register).
    #[default]
    Uint16,

    /// 16-bit signed integer (1 register).
    Int16,

    /// 32-bit unsigned integer (2 registers).
    Uint32,

    /// 32-bit signed integer (2 registers).
    Int32,

    /// 32-bit IEEE 754 float (2 registers). Never scaled.
    Float32,
}

impl DataType {
    /// Returns the number of 16-bit registers this type occupies.
    #[inline]
    pub const fn register_count(&self) -> u16 {
        match self {
            Self::Uint16 | Self::Int16 => 1,
            Self::Uint32 | Self::Int32 | Self::Float32 => 2,
        }
    }

    /// Returns `true` if this type spans more than one register.
    #[inline]
    pub const fn is_multi_word(&self) -> bool {
        self.register_count() > 1
    }

    /// Returns the canonical name of this type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint16" | "u16" => Ok(Self::Uint16),
            "int16" | "i16" => Ok(Self::Int16),
            "uint32" | "u32" => Ok(Self::Uint32),
            "int32" | "i32" => Ok(Self::Int32),
            "float32" | "f32" => Ok(Self::Float32),
            other => Err(ScenarioError::unknown_data_type(other)),
        }
    }
}

// =============================================================================
// ScenarioType
// =============================================================================

/// The named fault scenarios a slave can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    /// Small fluctuations around the electrical baseline.
    #[default]
    Normal,

    /// Voltage drops to a sag factor for a configured duration, then recovers.
    VoltageSag,

    /// Normal register values plus a per-request response delay.
    Jitter,

    /// Normal register values plus silently dropped responses.
    PacketLoss,
}

impl ScenarioType {
    /// All scenario types, in registry order.
    pub const ALL: [ScenarioType; 4] = [
        Self::Normal,
        Self::VoltageSag,
        Self::Jitter,
        Self::PacketLoss,
    ];

    /// Returns the canonical configuration name of this scenario.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::VoltageSag => "voltage_sag",
            Self::Jitter => "jitter",
            Self::PacketLoss => "packet_loss",
        }
    }

    /// Returns a one-line human description, used by the CLI listing.
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Normal => "normal fluctuation (voltage ±0.5%, frequency ±0.05%)",
            Self::VoltageSag => "voltage sag to 80% for a configured duration",
            Self::Jitter => "response delay between 100 and 500 ms",
            Self::PacketLoss => "silently dropped responses (5%)",
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScenarioType {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "voltage_sag" | "voltage-sag" => Ok(Self::VoltageSag),
            "jitter" => Ok(Self::Jitter),
            "packet_loss" | "packet-loss" => Ok(Self::PacketLoss),
            other => Err(ScenarioError::unknown_scenario(other)),
        }
    }
}

// =============================================================================
// Lifecycle States
// =============================================================================

/// Lifecycle state of a single slave.
///
/// Stored as an atomic `u8`; transitions happen by compare-and-swap, so the
/// discriminant values are part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SlaveState {
    /// Not running; the only state `start` accepts.
    #[default]
    Stopped = 0,

    /// `start` in progress (binding the listener).
    Starting = 1,

    /// Accept loop and scenario ticker are live.
    Running = 2,

    /// `stop` in progress (joining tasks).
    Stopping = 3,
}

impl SlaveState {
    /// Decodes the atomic representation.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Returns the canonical name of this state.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of the supervisor, same encoding as [`SlaveState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SupervisorState {
    /// Not running.
    #[default]
    Stopped = 0,

    /// Fleet startup in progress.
    Starting = 1,

    /// At least one slave is serving.
    Running = 2,

    /// Fleet shutdown in progress.
    Stopping = 3,
}

impl SupervisorState {
    /// Decodes the atomic representation.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Returns the canonical name of this state.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ScenarioParams
// =============================================================================

/// Per-scenario tuning knobs.
///
/// All fields default to zero / disabled; each scenario handler substitutes
/// its own documented default for a zero value, so an empty `ScenarioParams`
/// always yields the canonical behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScenarioParams {
    /// Whether this scenario is selectable.
    pub enabled: bool,

    /// Scenario duration (voltage sag). Zero means the handler default (10 s).
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Relative voltage fluctuation, e.g. `0.005` for ±0.5%.
    /// For voltage sag this is the sag depth (`0.2` sags to 80%).
    pub voltage_variance: f64,

    /// Relative frequency fluctuation, e.g. `0.0005` for ±0.05%.
    pub frequency_variance: f64,

    /// Lower bound of the per-request delay (jitter scenario).
    #[serde(with = "humantime_serde")]
    pub jitter_min: Duration,

    /// Upper bound of the per-request delay (jitter scenario).
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,

    /// Probability in `[0, 1)` of silently dropping a response.
    pub packet_loss_rate: f64,
}

// humantime_serde helper: serializes `Duration` as a humantime string
// ("1s", "500ms") and accepts either that or a bare number of seconds.
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Seconds(f64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => humantime::parse_duration(&s).map_err(de::Error::custom),
            Repr::Seconds(secs) if secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
            Repr::Seconds(secs) => Err(de::Error::custom(format!(
                "negative duration: {secs}"
            ))),
        }
    }
}

// =============================================================================
// RegisterDefinition
// =============================================================================

/// Configured metadata for one register point.
///
/// Keyed by the user-facing Modbus address (e.g. `40001`); the wire-level
/// offset for holding registers is `address - 40001`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    /// User-facing Modbus address.
    pub address: u16,

    /// Point name, e.g. `"LineVoltage"`.
    pub name: String,

    /// Value interpretation.
    #[serde(default)]
    pub data_type: DataType,

    /// Encoding factor: raw = round(value × scale). Ignored for `Float32`.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Engineering value installed at register-map construction.
    #[serde(default)]
    pub default_value: f64,

    /// Engineering unit, e.g. `"V"`.
    #[serde(default)]
    pub unit: String,

    /// Whether Modbus single-write function codes may modify this point.
    #[serde(default)]
    pub writable: bool,

    /// Advisory lower bound; not enforced on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    /// Advisory upper bound; not enforced on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

fn default_scale() -> f64 {
    1.0
}

impl RegisterDefinition {
    /// Creates a definition with the given address, name and type.
    pub fn new(address: u16, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            address,
            name: name.into(),
            data_type,
            scale: 1.0,
            default_value: 0.0,
            unit: String::new(),
            writable: false,
            min_value: None,
            max_value: None,
        }
    }

    /// Sets the scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the default engineering value.
    pub fn with_default(mut self, value: f64) -> Self {
        self.default_value = value;
        self
    }

    /// Sets the engineering unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Marks the point writable.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_register_count() {
        assert_eq!(DataType::Uint16.register_count(), 1);
        assert_eq!(DataType::Int16.register_count(), 1);
        assert_eq!(DataType::Uint32.register_count(), 2);
        assert_eq!(DataType::Int32.register_count(), 2);
        assert_eq!(DataType::Float32.register_count(), 2);
        assert!(DataType::Uint32.is_multi_word());
        assert!(!DataType::Int16.is_multi_word());
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!("uint16".parse::<DataType>().unwrap(), DataType::Uint16);
        assert_eq!("U32".parse::<DataType>().unwrap(), DataType::Uint32);
        assert_eq!("float32".parse::<DataType>().unwrap(), DataType::Float32);
        assert!("uint64".parse::<DataType>().is_err());
    }

    #[test]
    fn test_scenario_type_round_trip() {
        for ty in ScenarioType::ALL {
            assert_eq!(ty.as_str().parse::<ScenarioType>().unwrap(), ty);
        }
        assert!("meltdown".parse::<ScenarioType>().is_err());
    }

    #[test]
    fn test_slave_state_encoding() {
        for state in [
            SlaveState::Stopped,
            SlaveState::Starting,
            SlaveState::Running,
            SlaveState::Stopping,
        ] {
            assert_eq!(SlaveState::from_u8(state as u8), state);
        }
        assert_eq!(SlaveState::from_u8(200), SlaveState::Stopped);
    }

    #[test]
    fn test_scenario_params_defaults() {
        let params = ScenarioParams::default();
        assert!(!params.enabled);
        assert_eq!(params.duration, Duration::ZERO);
        assert_eq!(params.voltage_variance, 0.0);
        assert_eq!(params.packet_loss_rate, 0.0);
    }

    #[test]
    fn test_scenario_params_json_round_trip() {
        let params = ScenarioParams {
            enabled: true,
            duration: Duration::from_secs(10),
            voltage_variance: 0.2,
            frequency_variance: 0.0005,
            jitter_min: Duration::from_millis(100),
            jitter_max: Duration::from_millis(500),
            packet_loss_rate: 0.05,
        };

        let json = serde_json::to_string(&params).unwrap();
        let back: ScenarioParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_register_definition_builder() {
        let def = RegisterDefinition::new(40001, "LineVoltage", DataType::Uint16)
            .with_scale(10.0)
            .with_default(220.0)
            .with_unit("V");

        assert_eq!(def.address, 40001);
        assert_eq!(def.scale, 10.0);
        assert_eq!(def.default_value, 220.0);
        assert!(!def.writable);
    }
}
