// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `scenario` command group.

use modsim_core::types::ScenarioType;

use crate::cli::ScenarioCommands;
use crate::error::BinResult;

/// Dispatches scenario subcommands.
pub fn scenario(command: ScenarioCommands) -> BinResult<()> {
    match command {
        ScenarioCommands::List => list(),
    }
}

fn list() -> BinResult<()> {
    println!("Available scenarios:");
    for ty in ScenarioType::ALL {
        println!("  {:<14} {}", ty.as_str(), ty.description());
    }
    Ok(())
}
