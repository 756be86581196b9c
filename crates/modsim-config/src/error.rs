// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// A Result type with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("failed to access config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Parser error message.
        message: String,
    },

    /// A field failed validation.
    #[error("validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Why it failed.
        message: String,
    },

    /// An IP range is malformed.
    #[error("invalid IP range: {message}")]
    InvalidIpRange {
        /// Why the range is invalid.
        message: String,
    },

    /// An environment override could not be parsed.
    #[error("invalid environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// The variable name.
        name: String,
        /// Why it could not be applied.
        message: String,
    },
}

impl ConfigError {
    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-IP-range error.
    pub fn invalid_ip_range(message: impl Into<String>) -> Self {
        Self::InvalidIpRange {
            message: message.into(),
        }
    }

    /// Creates an invalid-environment-variable error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::validation("slaves.count", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "validation failed for 'slaves.count': must be at least 1"
        );
    }

    #[test]
    fn test_ip_range_error_display() {
        let err = ConfigError::invalid_ip_range("bad CIDR");
        assert!(err.to_string().contains("bad CIDR"));
    }
}
