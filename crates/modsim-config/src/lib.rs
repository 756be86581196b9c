// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration for the Modbus/TCP slave fleet simulator.
//!
//! The configuration is an immutable value loaded once at startup:
//! a JSON file (optional, defaults apply when missing), `MODSIM_*`
//! environment overrides, then validation. See [`schema::SimConfig`].

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, save_config, ENV_PREFIX};
pub use schema::{
    IpRange, LoggingConfig, MetricsConfig, NetworkConfig, ScenarioConfig, ServerConfig, SimConfig,
    SlavesConfig,
};
