// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod generate;
mod network;
mod run;
mod scenario;
mod validate;
mod version;

pub use generate::generate;
pub use network::network;
pub use run::run;
pub use scenario::scenario;
pub use validate::validate;
pub use version::version;

use crate::cli::{Cli, Commands};
use crate::error::BinResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => run::run(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Generate(args) => generate::generate(&cli, args),
        Commands::Scenario(command) => scenario::scenario(command),
        Commands::Network(command) => network::network(&cli, command).await,
        Commands::Version => version::version(),
    }
}
