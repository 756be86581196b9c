// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! Subcommands:
//!
//! - `run`: start the simulator fleet (default)
//! - `validate`: validate the configuration file
//! - `generate`: write an example configuration file
//! - `scenario list`: list available fault scenarios
//! - `network setup|teardown|list`: manage virtual IPs
//! - `version`: show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// modsim - high-density Modbus/TCP slave fleet simulator
///
/// Impersonates up to thousands of independent Modbus slaves, each bound to
/// its own IPv4 address, for load testing Energy Management Systems.
#[derive(Parser, Debug)]
#[command(
    name = "modsim",
    author = "Sylvex <contact@sylvex.io>",
    version = modsim_core::VERSION,
    about = "High-density Modbus/TCP slave fleet simulator",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "modsim.json",
        env = "MODSIM_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "MODSIM_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "MODSIM_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the simulator fleet
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Write an example configuration file
    Generate(GenerateArgs),

    /// Manage fault scenarios
    #[command(subcommand)]
    Scenario(ScenarioCommands),

    /// Manage virtual IP addresses
    #[command(subcommand)]
    Network(NetworkCommands),

    /// Show version information
    Version,
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Override the number of slaves
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Override the Modbus port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind a single IP address instead of the configured ranges
    #[arg(short, long)]
    pub ip: Option<String>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Print the parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,
}

/// Arguments for the `generate` command.
#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Output file path
    #[arg(short, long, default_value = "modsim.json")]
    pub output: PathBuf,
}

/// Scenario management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ScenarioCommands {
    /// List available fault scenarios
    List,
}

/// Network management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum NetworkCommands {
    /// Add virtual IP addresses to an interface
    Setup(NetworkSetupArgs),

    /// Remove the configured virtual IP addresses
    Teardown(NetworkArgs),

    /// List IPv4 addresses on the interface
    List(NetworkArgs),
}

/// Arguments for `network setup`.
#[derive(Args, Debug, Default, Clone)]
pub struct NetworkSetupArgs {
    /// Network interface name
    #[arg(short, long)]
    pub interface: Option<String>,

    /// First address of a start-end range
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    /// Last address of a start-end range
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// CIDR notation range
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub cidr: Option<String>,
}

/// Arguments for `network teardown` and `network list`.
#[derive(Args, Debug, Default, Clone)]
pub struct NetworkArgs {
    /// Network interface name
    #[arg(short, long)]
    pub interface: Option<String>,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
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
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["modsim"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from(["modsim", "run", "-n", "50", "-p", "5502", "-i", "10.0.0.1"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.count, Some(50));
        assert_eq!(args.port, Some(5502));
        assert_eq!(args.ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_config_path_flag() {
        let cli = Cli::parse_from(["modsim", "-c", "/etc/modsim/config.json"]);
        assert_eq!(cli.config, PathBuf::from("/etc/modsim/config.json"));
    }

    #[test]
    fn test_quiet_and_verbose_levels() {
        let cli = Cli::parse_from(["modsim", "-q"]);
        assert_eq!(cli.effective_log_level(), "warn");

        let cli = Cli::parse_from(["modsim", "-v"]);
        assert_eq!(cli.effective_log_level(), "debug");

        let cli = Cli::parse_from(["modsim", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(), "trace");
    }

    #[test]
    fn test_scenario_list_command() {
        let cli = Cli::parse_from(["modsim", "scenario", "list"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Scenario(ScenarioCommands::List))
        ));
    }

    #[test]
    fn test_network_setup_with_cidr() {
        let cli = Cli::parse_from([
            "modsim", "network", "setup", "-i", "eth1", "--cidr", "10.0.0.0/24",
        ]);
        let Some(Commands::Network(NetworkCommands::Setup(args))) = cli.command else {
            panic!("expected network setup");
        };
        assert_eq!(args.interface.as_deref(), Some("eth1"));
        assert_eq!(args.cidr.as_deref(), Some("10.0.0.0/24"));
    }

    #[test]
    fn test_network_setup_start_requires_end() {
        let result = Cli::try_parse_from(["modsim", "network", "setup", "--start", "10.0.0.1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_output_path() {
        let cli = Cli::parse_from(["modsim", "generate", "-o", "example.json"]);
        let Some(Commands::Generate(args)) = cli.command else {
            panic!("expected generate command");
        };
        assert_eq!(args.output, PathBuf::from("example.json"));
    }
}
