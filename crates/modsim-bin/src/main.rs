// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! modsim - high-density Modbus/TCP slave fleet simulator.
//!
//! Main binary entry point.

use clap::Parser;

use modsim_bin::cli::Cli;
use modsim_bin::commands;
use modsim_bin::error::report_error_and_exit;
use modsim_bin::logging::init_logging;

/// Application entry point.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.effective_log_level(), cli.log_format);

    if let Err(error) = commands::execute(cli).await {
        report_error_and_exit(error);
    }
}
