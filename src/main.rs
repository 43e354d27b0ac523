// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    deskfleet_config::init_logging(cli.verbose);

    let mut config = deskfleet_config::load(cli.config.as_deref())?;
    if let Some(bind) = &cli.bind {
        config.http.bind = bind.clone();
    }
    if let Some(data_root) = &cli.data_root {
        config.data_root = deskfleet_config::DataRootConfig(data_root.clone());
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Serve => deskfleet_hub::run(config, None).await,
    }
}
