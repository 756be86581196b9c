// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary support library for the modsim CLI.
//!
//! Split from `main.rs` so the CLI surface, runtime orchestration and
//! shutdown handling stay testable.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;
