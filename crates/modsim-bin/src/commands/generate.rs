// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `generate` command.

use modsim_config::{save_config, IpRange, SimConfig};

use crate::cli::{Cli, GenerateArgs};
use crate::error::BinResult;

/// Writes an example configuration file.
pub fn generate(_cli: &Cli, args: GenerateArgs) -> BinResult<()> {
    let mut config = SimConfig::default();
    config.network.ip_ranges = vec![IpRange::span("192.168.1.101", "192.168.1.200")];

    save_config(&config, &args.output)?;
    println!("Example configuration written to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_generate_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("example.json");

        let cli = crate::cli::Cli::parse_from(["modsim"]);
        generate(
            &cli,
            GenerateArgs {
                output: output.clone(),
            },
        )
        .unwrap();

        let loaded = modsim_config::load_config(&output).unwrap();
        assert_eq!(loaded.network.ip_ranges.len(), 1);
    }
}
