// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and saving.
//!
//! The loading pipeline:
//!
//! 1. Read and parse the JSON file (a missing file yields the defaults)
//! 2. Apply `MODSIM_*` environment variable overrides
//! 3. Validate
//!
//! `save_config` writes pretty-printed JSON that `load_config` reads back
//! unchanged.

use std::env;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::SimConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MODSIM";

// =============================================================================
// Loading
// =============================================================================

/// Loads configuration from a JSON file.
///
/// A missing file is not an error: the defaults are used, matching the
/// behavior of running without any configuration. Parse and validation
/// failures are errors.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<SimConfig> {
    let path = path.as_ref();

    let mut config = if path.exists() {
        info!(path = %path.display(), "loading configuration");
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::parse(path, e.to_string()))?
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        SimConfig::default()
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;

    debug!(
        slaves = config.slaves.count,
        port = config.server.port,
        scenario = %config.scenario.default_scenario,
        "configuration ready"
    );

    Ok(config)
}

/// Saves configuration as pretty-printed JSON.
pub fn save_config(config: &SimConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::parse(path, e.to_string()))?;
    fs::write(path, json).map_err(|e| ConfigError::io(path, e))?;
    Ok(())
}

// =============================================================================
// Environment Overrides
// =============================================================================

/// Applies `MODSIM_*` environment variable overrides.
fn apply_env_overrides(config: &mut SimConfig) -> ConfigResult<()> {
    if let Some(value) = env_override("SERVER_PORT") {
        config.server.port = parse_env("SERVER_PORT", &value)?;
    }
    if let Some(value) = env_override("SLAVES_COUNT") {
        config.slaves.count = parse_env("SLAVES_COUNT", &value)?;
    }
    if let Some(value) = env_override("SLAVES_UNIT_ID_START") {
        config.slaves.unit_id_start = parse_env("SLAVES_UNIT_ID_START", &value)?;
    }
    if let Some(value) = env_override("SCENARIO_DEFAULT") {
        config.scenario.default_scenario = value;
    }
    if let Some(value) = env_override("NETWORK_INTERFACE") {
        config.network.interface = value;
    }
    if let Some(value) = env_override("LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Some(value) = env_override("METRICS_PORT") {
        config.metrics.port = parse_env("METRICS_PORT", &value)?;
    }
    if let Some(value) = env_override("METRICS_ENABLED") {
        config.metrics.enabled = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
    }
    Ok(())
}

fn env_override(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{suffix}")).ok()
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| {
        ConfigError::invalid_env_var(
            format!("{ENV_PREFIX}_{suffix}"),
            format!("cannot parse '{value}'"),
        )
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IpRange;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/modsim.json").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut config = SimConfig::default();
        config.slaves.count = 42;
        config.server.port = 5502;
        config.network.ip_ranges = vec![IpRange::span("192.168.1.101", "192.168.1.200")];

        let file = NamedTempFile::with_suffix(".json").unwrap();
        save_config(&config, file.path()).unwrap();

        let loaded = load_config(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(b"{ not json").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(br#"{"slaves": {"count": 0}}"#).unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(br#"{"server": {"port": 1502}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 1502);
        assert_eq!(config.slaves.count, SimConfig::default().slaves.count);
    }
}
