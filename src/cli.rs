// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Hub: HTTP + websocket server and the agent registry.
    Serve,
    /// Print the effective configuration as YAML and exit.
    ShowConfig,
}

#[derive(Parser, Debug)]
#[command(
    name = "deskfleetd",
    about = "Orchestration engine for a fleet of sandboxed-desktop LLM agents",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a config file. Overrides $DESKFLEET_CONFIG and the default
    /// search path.
    #[arg(long, short = 'c', env = "DESKFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the HTTP/websocket bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the data root directory.
    #[arg(long)]
    pub data_root: Option<String>,

    /// Increase log verbosity. Repeat for more (-v debug, -vv trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}
