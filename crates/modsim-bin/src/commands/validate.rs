// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use modsim_config::load_config;

use crate::cli::{Cli, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Parses and validates the configuration file without starting anything.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config = load_config(&cli.config)?;

    println!("Configuration is valid");
    println!("  Slaves:    {}", config.slaves.count);
    println!("  Port:      {}", config.server.port);
    println!("  Interface: {}", config.network.interface);
    println!("  IP ranges: {}", config.network.ip_ranges.len());
    println!("  Scenario:  {}", config.scenario.default_scenario);

    if args.show_config {
        let rendered = serde_json::to_string_pretty(&config)
            .map_err(|e| BinError::runtime(e.to_string()))?;
        println!("{rendered}");
    }

    Ok(())
}
