// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the modsim binary.

use thiserror::Error;

/// Result type alias for modsim-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the modsim binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] modsim_config::ConfigError),

    /// Simulator core error.
    #[error("Simulator error: {0}")]
    Sim(#[from] modsim_core::SimError),

    /// Virtual-IP provisioner error.
    #[error("Provisioner error: {0}")]
    Provisioner(#[from] modsim_server::ProvisionerError),

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl BinError {
    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Sim(_) => 2,
            Self::Provisioner(_) => 3,
            Self::Runtime(_) => 4,
            Self::Io(_) => 5,
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<modsim_core::SupervisorError> for BinError {
    fn from(err: modsim_core::SupervisorError) -> Self {
        Self::Sim(err.into())
    }
}

impl From<modsim_core::SlaveError> for BinError {
    fn from(err: modsim_core::SlaveError) -> Self {
        Self::Sim(err.into())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {cause}");
        source = cause.source();
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err: BinError = modsim_config::ConfigError::validation("x", "y").into();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(BinError::runtime("boom").exit_code(), 4);
    }

    #[test]
    fn test_supervisor_error_converts_through_sim() {
        let err: BinError = modsim_core::SupervisorError::invalid_state("start", "running").into();
        assert!(matches!(err, BinError::Sim(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
