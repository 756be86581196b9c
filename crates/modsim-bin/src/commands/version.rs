// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::error::BinResult;

/// Prints version information.
pub fn version() -> BinResult<()> {
    println!("modsim {}", modsim_core::VERSION);
    Ok(())
}
