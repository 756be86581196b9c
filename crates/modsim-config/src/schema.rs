// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for the simulator.
//!
//! ```text
//! SimConfig
//! ├── server: ServerConfig       - port, I/O deadlines, connection cap
//! ├── network: NetworkConfig     - interface name and virtual-IP ranges
//! ├── slaves: SlavesConfig       - fleet size, unit ids, register table
//! ├── scenario: ScenarioConfig   - default scenario, tick interval, params
//! ├── logging: LoggingConfig     - level/format/output hints
//! └── metrics: MetricsConfig     - metrics endpoint hints
//! ```
//!
//! The configuration is an immutable value: it is loaded and validated once
//! at startup and shared behind `Arc` thereafter. The persistent format is
//! human-readable JSON that round-trips through `save_config`/`load_config`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use modsim_core::registers::default_register_table;
use modsim_core::types::{RegisterDefinition, ScenarioParams, ScenarioType};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default Modbus/TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Default per-connection read/write deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on supervisor shutdown.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-process connection cap (advisory).
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Default fleet size.
pub const DEFAULT_SLAVE_COUNT: usize = 100;

/// Maximum fleet size.
pub const MAX_SLAVE_COUNT: usize = 10_000;

/// Default scenario tick period.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Default metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

// =============================================================================
// SimConfig
// =============================================================================

/// The root configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    /// Modbus server settings shared by every slave.
    pub server: ServerConfig,

    /// Virtual-IP provisioning settings.
    pub network: NetworkConfig,

    /// Fleet composition.
    pub slaves: SlavesConfig,

    /// Scenario engine settings.
    pub scenario: ScenarioConfig,

    /// Logging hints.
    pub logging: LoggingConfig,

    /// Metrics endpoint hints.
    pub metrics: MetricsConfig,
}

impl SimConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.slaves.validate()?;
        self.scenario.validate()?;
        self.metrics.validate()?;
        for range in &self.network.ip_ranges {
            range.validate()?;
        }
        Ok(())
    }

    /// Expands every configured IP range into a flat address list.
    pub fn expand_ip_ranges(&self) -> ConfigResult<Vec<Ipv4Addr>> {
        let mut addresses = Vec::new();
        for range in &self.network.ip_ranges {
            addresses.extend(range.expand()?);
        }
        Ok(addresses)
    }

    /// Looks up the parameters configured for a scenario, if any.
    pub fn scenario_params(&self, scenario: ScenarioType) -> ScenarioParams {
        self.scenario
            .scenarios
            .get(scenario.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

// =============================================================================
// ServerConfig
// =============================================================================

/// Modbus server settings shared by every slave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port each slave binds.
    pub port: u16,

    /// Per-connection read deadline. Zero disables the deadline.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Per-connection write deadline. Zero disables the deadline.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Per-process connection cap (advisory).
    pub max_connections: usize,

    /// Bound on supervisor shutdown.
    #[serde(with = "humantime_serde")]
    pub graceful_timeout: Duration,
}

impl ServerConfig {
    /// Validates the server section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::validation("server.port", "must not be zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "server.max_connections",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// The read deadline as an option (zero means none).
    pub fn read_deadline(&self) -> Option<Duration> {
        (!self.read_timeout.is_zero()).then_some(self.read_timeout)
    }

    /// The write deadline as an option (zero means none).
    pub fn write_deadline(&self) -> Option<Duration> {
        (!self.write_timeout.is_zero()).then_some(self.write_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            graceful_timeout: DEFAULT_GRACEFUL_TIMEOUT,
        }
    }
}

// =============================================================================
// NetworkConfig
// =============================================================================

/// Virtual-IP provisioning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// NIC name used by the virtual-IP provisioner.
    pub interface: String,

    /// Address ranges to bind slaves to, in order.
    pub ip_ranges: Vec<IpRange>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            ip_ranges: Vec::new(),
        }
    }
}

// =============================================================================
// IpRange
// =============================================================================

/// An IPv4 address range, either CIDR or start-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IpRange {
    /// First address of an inclusive range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Last address of an inclusive range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    /// CIDR notation, e.g. `"192.168.100.0/24"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

impl IpRange {
    /// Creates a start-end range.
    pub fn span(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            cidr: None,
        }
    }

    /// Creates a CIDR range.
    pub fn cidr(cidr: impl Into<String>) -> Self {
        Self {
            start: None,
            end: None,
            cidr: Some(cidr.into()),
        }
    }

    /// Validates that the range is parseable.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(cidr) = &self.cidr {
            parse_cidr(cidr)?;
            return Ok(());
        }

        let (Some(start), Some(end)) = (&self.start, &self.end) else {
            return Err(ConfigError::invalid_ip_range(
                "either cidr or both start and end must be set",
            ));
        };

        let start: Ipv4Addr = start
            .parse()
            .map_err(|_| ConfigError::invalid_ip_range(format!("invalid start address: {start}")))?;
        let end: Ipv4Addr = end
            .parse()
            .map_err(|_| ConfigError::invalid_ip_range(format!("invalid end address: {end}")))?;
        if u32::from(start) > u32::from(end) {
            return Err(ConfigError::invalid_ip_range(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(())
    }

    /// Expands the range into a flat address list.
    ///
    /// CIDR expansion drops the network and broadcast addresses when the
    /// block has more than two addresses. Start-end expansion is inclusive.
    pub fn expand(&self) -> ConfigResult<Vec<Ipv4Addr>> {
        self.validate()?;

        if let Some(cidr) = &self.cidr {
            let (network, prefix_len) = parse_cidr(cidr)?;
            let base = u32::from(network);
            let host_bits = 32 - prefix_len;
            if host_bits > 16 {
                return Err(ConfigError::invalid_ip_range(format!(
                    "CIDR block too large ({cidr}); use /16 or smaller"
                )));
            }
            let count = 1u64 << host_bits;

            let mut addresses: Vec<Ipv4Addr> =
                (0..count).map(|i| Ipv4Addr::from(base + i as u32)).collect();
            if addresses.len() > 2 {
                addresses = addresses[1..addresses.len() - 1].to_vec();
            }
            return Ok(addresses);
        }

        // validate() guarantees both endpoints parse.
        let start: u32 = self.start.as_deref().and_then(|s| s.parse::<Ipv4Addr>().ok())
            .map(u32::from)
            .ok_or_else(|| ConfigError::invalid_ip_range("missing start address"))?;
        let end: u32 = self.end.as_deref().and_then(|s| s.parse::<Ipv4Addr>().ok())
            .map(u32::from)
            .ok_or_else(|| ConfigError::invalid_ip_range("missing end address"))?;

        Ok((start..=end).map(Ipv4Addr::from).collect())
    }
}

/// Parses CIDR notation into the masked network address and prefix length.
fn parse_cidr(cidr: &str) -> ConfigResult<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| ConfigError::invalid_ip_range(format!("invalid CIDR: {cidr}")))?;

    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| ConfigError::invalid_ip_range(format!("invalid CIDR address: {cidr}")))?;
    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| ConfigError::invalid_ip_range(format!("invalid CIDR prefix: {cidr}")))?;
    if prefix_len > 32 {
        return Err(ConfigError::invalid_ip_range(format!(
            "CIDR prefix out of range: {cidr}"
        )));
    }

    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix_len))
}

// =============================================================================
// SlavesConfig
// =============================================================================

/// Fleet composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlavesConfig {
    /// Number of slaves to run (1 to 10 000).
    pub count: usize,

    /// Base for unit-id assignment: slave `i` gets
    /// `((unit_id_start - 1 + i) mod 255) + 1`.
    pub unit_id_start: u8,

    /// Register table installed into every slave.
    pub default_registers: Vec<RegisterDefinition>,
}

impl SlavesConfig {
    /// Validates the slaves section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.count == 0 {
            return Err(ConfigError::validation("slaves.count", "must be at least 1"));
        }
        if self.count > MAX_SLAVE_COUNT {
            return Err(ConfigError::validation(
                "slaves.count",
                format!("must not exceed {MAX_SLAVE_COUNT}"),
            ));
        }
        if self.unit_id_start == 0 {
            return Err(ConfigError::validation(
                "slaves.unit_id_start",
                "must be between 1 and 255",
            ));
        }
        Ok(())
    }

    /// Computes the unit id assigned to slave index `i`.
    pub fn unit_id_for(&self, index: usize) -> u8 {
        ((usize::from(self.unit_id_start) - 1 + index) % 255 + 1) as u8
    }
}

impl Default for SlavesConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_SLAVE_COUNT,
            unit_id_start: 1,
            default_registers: default_register_table(),
        }
    }
}

// =============================================================================
// ScenarioConfig
// =============================================================================

/// Scenario engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Scenario applied to the fleet at startup.
    pub default_scenario: String,

    /// Tick period for scenario updates.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,

    /// Per-scenario parameters, keyed by scenario name.
    pub scenarios: HashMap<String, ScenarioParams>,
}

impl ScenarioConfig {
    /// Validates the scenario section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.update_interval.is_zero() {
            return Err(ConfigError::validation(
                "scenario.update_interval",
                "must be greater than zero",
            ));
        }
        self.default_scenario
            .parse::<ScenarioType>()
            .map_err(|e| ConfigError::validation("scenario.default_scenario", e.to_string()))?;
        for name in self.scenarios.keys() {
            name.parse::<ScenarioType>()
                .map_err(|e| ConfigError::validation("scenario.scenarios", e.to_string()))?;
        }
        Ok(())
    }

    /// The parsed default scenario.
    pub fn default_scenario_type(&self) -> ScenarioType {
        self.default_scenario.parse().unwrap_or_default()
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let mut scenarios = HashMap::new();
        scenarios.insert(
            ScenarioType::Normal.as_str().to_string(),
            ScenarioParams {
                enabled: true,
                voltage_variance: 0.005,
                frequency_variance: 0.0005,
                ..Default::default()
            },
        );
        scenarios.insert(
            ScenarioType::VoltageSag.as_str().to_string(),
            ScenarioParams {
                enabled: true,
                duration: Duration::from_secs(10),
                voltage_variance: 0.20,
                ..Default::default()
            },
        );
        scenarios.insert(
            ScenarioType::Jitter.as_str().to_string(),
            ScenarioParams {
                enabled: true,
                jitter_min: Duration::from_millis(100),
                jitter_max: Duration::from_millis(500),
                ..Default::default()
            },
        );
        scenarios.insert(
            ScenarioType::PacketLoss.as_str().to_string(),
            ScenarioParams {
                enabled: true,
                packet_loss_rate: 0.05,
                ..Default::default()
            },
        );

        Self {
            default_scenario: ScenarioType::Normal.as_str().to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            scenarios,
        }
    }
}

// =============================================================================
// LoggingConfig
// =============================================================================

/// Logging hints consumed by the binary at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Log format: text, json, compact.
    pub format: String,

    /// Output path; `"stdout"` for the console.
    pub output_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output_path: "stdout".to_string(),
        }
    }
}

// =============================================================================
// MetricsConfig
// =============================================================================

/// Metrics endpoint hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve metrics at all.
    pub enabled: bool,

    /// HTTP path of the metrics endpoint.
    pub endpoint: String,

    /// TCP port of the metrics server.
    pub port: u16,
}

impl MetricsConfig {
    /// Validates the metrics section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.enabled && !self.endpoint.starts_with('/') {
            return Err(ConfigError::validation(
                "metrics.endpoint",
                "must start with '/'",
            ));
        }
        if self.enabled && self.port == 0 {
            return Err(ConfigError::validation("metrics.port", "must not be zero"));
        }
        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
            port: DEFAULT_METRICS_PORT,
        }
    }
}

// humantime_serde helper: serializes `Duration` as a humantime string
// ("1s", "500ms") and accepts either that or a bare number of seconds.
mod humantime_serde {
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
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = SimConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.slaves.count, DEFAULT_SLAVE_COUNT);
        assert_eq!(config.scenario.scenarios.len(), 4);
        assert_eq!(config.slaves.default_registers.len(), 6);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SimConfig::default();
        config.slaves.count = 0;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.slaves.count = MAX_SLAVE_COUNT + 1;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.scenario.default_scenario = "meltdown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unit_id_assignment_wraps() {
        let slaves = SlavesConfig {
            unit_id_start: 254,
            ..Default::default()
        };
        assert_eq!(slaves.unit_id_for(0), 254);
        assert_eq!(slaves.unit_id_for(1), 255);
        assert_eq!(slaves.unit_id_for(2), 1);
    }

    #[test]
    fn test_ip_range_span_expansion_is_inclusive() {
        let range = IpRange::span("192.168.1.101", "192.168.1.103");
        let ips = range.expand().unwrap();
        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(192, 168, 1, 101),
                Ipv4Addr::new(192, 168, 1, 102),
                Ipv4Addr::new(192, 168, 1, 103),
            ]
        );
    }

    #[test]
    fn test_cidr_expansion_drops_network_and_broadcast() {
        let range = IpRange::cidr("10.0.0.0/30");
        let ips = range.expand().unwrap();
        assert_eq!(
            ips,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );

        let range = IpRange::cidr("10.0.0.0/24");
        assert_eq!(range.expand().unwrap().len(), 254);
    }

    #[test]
    fn test_cidr_masks_host_bits() {
        let range = IpRange::cidr("10.0.0.77/30");
        let ips = range.expand().unwrap();
        assert_eq!(
            ips,
            vec![Ipv4Addr::new(10, 0, 0, 77), Ipv4Addr::new(10, 0, 0, 78)]
        );
    }

    #[test]
    fn test_ip_range_validation() {
        assert!(IpRange::cidr("not-a-cidr").validate().is_err());
        assert!(IpRange::cidr("10.0.0.0/33").validate().is_err());
        assert!(IpRange::span("10.0.0.5", "10.0.0.1").validate().is_err());
        assert!(IpRange::default().validate().is_err());
        assert!(IpRange::span("10.0.0.1", "bogus").validate().is_err());
        assert!(IpRange::cidr("10.0.0.0/24").validate().is_ok());
    }

    #[test]
    fn test_scenario_params_lookup() {
        let config = SimConfig::default();
        let params = config.scenario_params(ScenarioType::PacketLoss);
        assert_eq!(params.packet_loss_rate, 0.05);

        let params = config.scenario_params(ScenarioType::VoltageSag);
        assert_eq!(params.voltage_variance, 0.20);
        assert_eq!(params.duration, Duration::from_secs(10));
    }

    #[test]
    fn test_read_deadline_zero_means_none() {
        let mut server = ServerConfig::default();
        assert!(server.read_deadline().is_some());
        server.read_timeout = Duration::ZERO;
        assert!(server.read_deadline().is_none());
    }
}
