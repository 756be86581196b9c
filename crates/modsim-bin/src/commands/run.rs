// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;

use modsim_config::{load_config, IpRange};

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::SimRuntime;

/// Starts the simulator fleet with optional CLI overrides.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let mut config = load_config(&cli.config)?;

    if let Some(count) = args.count {
        config.slaves.count = count;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ip) = args.ip {
        config.network.ip_ranges = vec![IpRange::span(ip.clone(), ip)];
    }
    config.validate()?;

    info!(
        slaves = config.slaves.count,
        port = config.server.port,
        "launching simulator"
    );

    SimRuntime::new(config).run().await
}
