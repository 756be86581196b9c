// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for the simulator core.
//!
//! ```text
//! SimError (root)
//! ├── RegisterError    - Register bank bounds and writability violations
//! ├── ScenarioError    - Unknown scenario or data type names
//! ├── SlaveError       - Slave lifecycle and bind failures
//! └── SupervisorError  - Fleet orchestration failures
//! ```
//!
//! Register errors never escape the protocol layer; they are converted into
//! Modbus exception responses and counted. Slave bind errors are aggregated
//! by the supervisor, which tolerates partial fleet startup.

use thiserror::Error;

// =============================================================================
// SimError - Root Error Type
// =============================================================================

/// The root error type for the simulator core.
#[derive(Debug, Error)]
pub enum SimError {
    /// Register bank error.
    #[error("Register error: {0}")]
    Register(#[from] RegisterError),

    /// Scenario error.
    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    /// Slave lifecycle error.
    #[error("Slave error: {0}")]
    Slave(#[from] SlaveError),

    /// Supervisor error.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

impl SimError {
    /// Returns the error type as a string for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SimError::Register(_) => "register",
            SimError::Scenario(_) => "scenario",
            SimError::Slave(_) => "slave",
            SimError::Supervisor(_) => "supervisor",
        }
    }
}

// =============================================================================
// RegisterError
// =============================================================================

/// Register bank access errors.
///
/// `OutOfRange` maps to Modbus exception 0x02 (Illegal Data Address) at the
/// protocol layer; `NotWritable` does too, per the single-write contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Address plus quantity falls outside the configured space.
    #[error("{space} address out of range: {address} (quantity {quantity})")]
    OutOfRange {
        /// Human name of the address space ("coil", "holding register", ...).
        space: &'static str,
        /// The starting address of the failed access.
        address: u16,
        /// The number of elements requested.
        quantity: u16,
    },

    /// Write attempted on a point defined as read-only.
    #[error("register {address} is not writable")]
    NotWritable {
        /// The user-facing address of the point.
        address: u16,
    },
}

impl RegisterError {
    /// Creates an out-of-range error for a single-element access.
    pub fn out_of_range(space: &'static str, address: u16) -> Self {
        Self::OutOfRange {
            space,
            address,
            quantity: 1,
        }
    }

    /// Creates an out-of-range error for a bulk access.
    pub fn out_of_range_bulk(space: &'static str, address: u16, quantity: u16) -> Self {
        Self::OutOfRange {
            space,
            address,
            quantity,
        }
    }

    /// Creates a not-writable error.
    pub fn not_writable(address: u16) -> Self {
        Self::NotWritable { address }
    }
}

// =============================================================================
// ScenarioError
// =============================================================================

/// Scenario and data-type name resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    /// No scenario registered under this name.
    #[error("unknown scenario: {name}")]
    UnknownScenario {
        /// The unresolved name.
        name: String,
    },

    /// No data type with this name.
    #[error("unknown data type: {name}")]
    UnknownDataType {
        /// The unresolved name.
        name: String,
    },
}

impl ScenarioError {
    /// Creates an unknown-scenario error.
    pub fn unknown_scenario(name: impl Into<String>) -> Self {
        Self::UnknownScenario { name: name.into() }
    }

    /// Creates an unknown-data-type error.
    pub fn unknown_data_type(name: impl Into<String>) -> Self {
        Self::UnknownDataType { name: name.into() }
    }
}

// =============================================================================
// SlaveError
// =============================================================================

/// Slave lifecycle errors.
#[derive(Debug, Error)]
pub enum SlaveError {
    /// The listener could not be bound. Reported verbatim with the address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The `ip:port` the slave attempted to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle transition was attempted from the wrong state.
    #[error("slave {id} cannot {action} while {state}")]
    InvalidState {
        /// The slave id (`ip:port`).
        id: String,
        /// The attempted action ("start" or "stop").
        action: &'static str,
        /// The state the slave was actually in.
        state: &'static str,
    },
}

impl SlaveError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(id: impl Into<String>, action: &'static str, state: &'static str) -> Self {
        Self::InvalidState {
            id: id.into(),
            action,
            state,
        }
    }
}

// =============================================================================
// SupervisorError
// =============================================================================

/// Fleet orchestration errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Every slave failed to start; carries the first failure.
    #[error("all {attempted} slaves failed to start: {first}")]
    AllSlavesFailed {
        /// How many starts were attempted.
        attempted: usize,
        /// The first slave failure observed.
        #[source]
        first: SlaveError,
    },

    /// A lifecycle transition was attempted from the wrong state.
    #[error("supervisor cannot {action} while {state}")]
    InvalidState {
        /// The attempted action ("start" or "stop").
        action: &'static str,
        /// The state the supervisor was actually in.
        state: &'static str,
    },

    /// IP planning failed (range expansion or interface discovery).
    #[error("failed to plan bind addresses: {message}")]
    IpPlanning {
        /// What went wrong.
        message: String,
    },
}

impl SupervisorError {
    /// Creates an invalid-state error.
    pub fn invalid_state(action: &'static str, state: &'static str) -> Self {
        Self::InvalidState { action, state }
    }

    /// Creates an IP planning error.
    pub fn ip_planning(message: impl Into<String>) -> Self {
        Self::IpPlanning {
            message: message.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// A Result type with SimError.
pub type SimResult<T> = Result<T, SimError>;

/// A Result type with RegisterError.
pub type RegisterResult<T> = Result<T, RegisterError>;

/// A Result type with SlaveError.
pub type SlaveResult<T> = Result<T, SlaveError>;

/// A Result type with SupervisorError.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

// =============================================================================
// Tests
// =============================================================================
