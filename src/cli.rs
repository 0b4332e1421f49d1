// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start this node: load config, join the mesh, serve the HTTP API.
    ///
    /// Runs until interrupted (SIGINT/SIGTERM). Seed peers configured under
    /// `seeds` are fetched on startup; the mesh heartbeat/sweep and
    /// optimization loop tickers run for the lifetime of the process.
    Start {
        /// Path to the node config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Override `bind_addr` from the config.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print this node's identity (as seen by peers) and exit.
    Identity {
        /// Path to the node config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration (after merging all layers) and exit.
    ShowConfig {
        /// Path to the node config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "swarmd",
    about = "Peer-to-peer swarm node: mesh discovery, delegation, attestation, reputation",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v = debug, -vv = trace). RUST_LOG, if set, wins.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "swarmd", &mut std::io::stdout());
}
