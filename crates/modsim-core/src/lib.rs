// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core domain types for the Modbus/TCP slave fleet simulator.
//!
//! This crate holds everything a simulated slave is made of, independent of
//! any wire protocol or runtime concern:
//!
//! - [`registers::RegisterMap`]: the four-space register bank with typed,
//!   scaled points
//! - [`scenario`]: fault scenarios and the factory registry
//! - [`stats::SlaveStats`]: lock-free per-slave request counters
//! - [`error`]: the simulator error hierarchy
//! - [`types`]: shared enums and configuration-facing value types

pub mod error;
pub mod registers;
pub mod scenario;
pub mod stats;
pub mod types;

pub use error::{
    RegisterError, RegisterResult, ScenarioError, SimError, SimResult, SlaveError, SlaveResult,
    SupervisorError, SupervisorResult,
};
pub use registers::{RegisterMap, RegisterMeta};
pub use scenario::{ScenarioHandler, ScenarioRegistry, SlaKnobs};
pub use stats::{SlaveStats, StatsSnapshot};
pub use types::{
    DataType, RegisterDefinition, ScenarioParams, ScenarioType, SlaveState, SupervisorState,
};

/// Workspace version, injected at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
