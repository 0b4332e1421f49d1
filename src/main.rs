// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};
use swarm_core::identity::NodeIdentity;
use swarm_core::SwarmNode;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Start { config, bind } => run_start(config.as_deref(), bind).await,
        Commands::Identity { config } => run_identity(config.as_deref()),
        Commands::ShowConfig { config } => run_show_config(config.as_deref()),
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
    }
}

async fn run_start(config_path: Option<&Path>, bind_override: Option<String>) -> Result<()> {
    let mut config = swarm_config::load(config_path).context("loading config")?;
    if let Some(bind) = bind_override {
        config.bind_addr = bind;
    }

    let node_id = load_or_create_node_id(&config)?;
    let identity = NodeIdentity::new(
        node_id,
        if config.node_name.is_empty() { "swarmd".to_string() } else { config.node_name.clone() },
        config.api_url.clone(),
        config.capabilities.clone(),
    );

    let secret = resolve_secret(&config)?;
    let bind_addr = config.bind_addr.clone();
    let seeds = config.seeds.clone();

    let node = SwarmNode::new(identity.clone(), config, secret);
    node.spawn_background_tasks(&seeds);

    tracing::info!(node_id = %identity.node_id, bind_addr = %bind_addr, "swarmd starting");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    axum::serve(listener, node.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http api")?;

    node.shutdown().await;
    tracing::info!("swarmd stopped");
    Ok(())
}

fn run_identity(config_path: Option<&Path>) -> Result<()> {
    let config = swarm_config::load(config_path).context("loading config")?;
    let node_id = load_or_create_node_id(&config)?;
    let identity = NodeIdentity::new(
        node_id,
        if config.node_name.is_empty() { "swarmd".to_string() } else { config.node_name.clone() },
        config.api_url.clone(),
        config.capabilities.clone(),
    );
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

fn run_show_config(config_path: Option<&Path>) -> Result<()> {
    let config = swarm_config::load(config_path).context("loading config")?;
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

/// A node's `node_id` survives restarts: it's read from (or created in) a
/// small file next to its reputation store, or under the user's config dir
/// when no reputation path is configured. Ephemeral single-process runs
/// (tests, `swarm-core`'s own doctests) go through `NodeIdentity::new`
/// directly and never touch this.
fn load_or_create_node_id(config: &swarm_config::Config) -> Result<String> {
    let path = node_id_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let generated = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &generated).with_context(|| format!("writing {}", path.display()))?;
    Ok(generated)
}

fn node_id_path(config: &swarm_config::Config) -> PathBuf {
    if !config.reputation_path.is_empty() {
        if let Some(dir) = Path::new(&config.reputation_path).parent() {
            return dir.join("node_id");
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("swarmd")
        .join("node_id")
}

/// The HMAC secret shared across the mesh. A configured `swarm_secret` is
/// hex-decoded; an empty one means single-node/test use, so a random secret
/// is minted for this process only (no two independently-started nodes would
/// ever verify each other's attestations with it, which is the point — a
/// real deployment must set `swarm_secret`).
fn resolve_secret(config: &swarm_config::Config) -> Result<Vec<u8>> {
    if config.swarm_secret.is_empty() {
        tracing::warn!("no swarm_secret configured, generating an ephemeral one for this process");
        let mut bytes = vec![0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        return Ok(bytes);
    }
    hex::decode(&config.swarm_secret).context("swarm_secret must be hex-encoded")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `-v` = debug, `-vv` or more = trace, default = info. `RUST_LOG`, if set
/// and parseable, always wins over the verbosity count.
fn init_logging(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    fmt().with_env_filter(filter).with_target(false).init();
}
