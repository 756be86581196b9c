// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `network` command group.
//!
//! Provisioner failures are fatal here, unlike during fleet startup where
//! slaves simply fail their own binds.

use modsim_config::{load_config, IpRange};
use modsim_server::new_provisioner;

use crate::cli::{Cli, NetworkArgs, NetworkCommands, NetworkSetupArgs};
use crate::error::BinResult;

/// Dispatches network subcommands.
pub async fn network(cli: &Cli, command: NetworkCommands) -> BinResult<()> {
    match command {
        NetworkCommands::Setup(args) => setup(cli, args).await,
        NetworkCommands::Teardown(args) => teardown(cli, args).await,
        NetworkCommands::List(args) => list(cli, args).await,
    }
}

async fn setup(cli: &Cli, args: NetworkSetupArgs) -> BinResult<()> {
    let config = load_config(&cli.config)?;
    let interface = args.interface.unwrap_or(config.network.interface);

    let ranges = if let Some(cidr) = args.cidr {
        vec![IpRange::cidr(cidr)]
    } else if let (Some(start), Some(end)) = (args.start, args.end) {
        vec![IpRange::span(start, end)]
    } else {
        config.network.ip_ranges
    };

    let mut provisioner = new_provisioner(&interface);
    provisioner.setup(&ranges).await?;
    println!("Virtual IP setup complete on {interface}");
    Ok(())
}

async fn teardown(cli: &Cli, args: NetworkArgs) -> BinResult<()> {
    let config = load_config(&cli.config)?;
    let interface = args.interface.unwrap_or(config.network.interface);

    // Teardown targets whatever the configured ranges describe; the
    // provisioner tracks addresses it added within one process lifetime.
    let mut provisioner = new_provisioner(&interface);
    provisioner.setup(&config.network.ip_ranges).await?;
    provisioner.teardown().await?;
    println!("Virtual IP teardown complete on {interface}");
    Ok(())
}

async fn list(cli: &Cli, args: NetworkArgs) -> BinResult<()> {
    let config = load_config(&cli.config)?;
    let interface = args.interface.unwrap_or(config.network.interface);

    let provisioner = new_provisioner(&interface);
    let ips = provisioner.list().await?;

    if ips.is_empty() {
        println!("No IPv4 addresses configured on {interface}");
        return Ok(());
    }

    println!("Configured IPv4 addresses on {interface} ({}):", ips.len());
    for ip in ips {
        println!("  - {ip}");
    }
    Ok(())
}
