//! Phoenix node entry point.
//!
//! Assembles a full node from an optional TOML configuration, starts it
//! against the in-process network server and runs until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tokio::signal;
use tracing::{error, info, warn};

use phoenix_config::NodeConfig;
use phoenix_node::{BasicLightServer, InProcServer, NodeService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let matches = Command::new("phoenix-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Phoenix blockchain node")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Directory for chain data, keys and journals")
                .default_value("phoenix-data"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML node configuration file"),
        )
        .arg(
            Arg::new("mine")
                .long("mine")
                .help("Enable sealing even on a non-consensus node")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("max-peers")
                .long("max-peers")
                .value_name("N")
                .help("Peer connection limit")
                .default_value("50"),
        )
        .get_matches();

    let data_dir = PathBuf::from(matches.get_one::<String>("data-dir").unwrap());
    let mine = matches.get_flag("mine");
    let max_peers: usize = matches
        .get_one::<String>("max-peers")
        .unwrap()
        .parse()
        .context("--max-peers must be a number")?;

    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            NodeConfig::from_file(Path::new(path)).context("loading node configuration")?
        }
        None => NodeConfig::default(),
    };

    info!("🚀 Starting Phoenix node");
    info!("Data directory: {}", data_dir.display());
    info!("Network id: {}", config.network_id);

    if let Err(e) = run_node(config, data_dir, mine, max_peers).await {
        error!("❌ Node failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_node(config: NodeConfig, data_dir: PathBuf, mine: bool, max_peers: usize) -> Result<()> {
    let light_serv = config.light_serv;

    let node = NodeService::new(config, &data_dir)
        .await
        .context("node assembly failed")?;
    info!("✅ Node assembled");
    info!(
        "Chain id: {}, mode: {}, head: {}",
        node.chain_config().chain_id,
        node.validator_mode(),
        node.chain().current_header().number
    );

    if light_serv > 0 {
        node.add_light_server(Arc::new(BasicLightServer::new(light_serv)))
            .context("registering light server")?;
        info!("Light serving enabled at {}%", light_serv);
    }

    let server = Arc::new(InProcServer::new(max_peers));
    node.start(server).await.context("node start failed")?;
    info!("✅ Phoenix node started");

    if mine && !node.is_mining() {
        node.start_mining().context("enabling mining")?;
        info!("⛏️  Mining enabled by flag");
    }

    let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("📶 Received shutdown signal (Ctrl+C)");
        }
        _ = term_signal.recv() => {
            info!("📶 Received shutdown signal (SIGTERM)");
        }
    }

    info!("🛑 Stopping node...");
    if let Err(e) = node.stop().await {
        warn!("Shutdown finished with error: {}", e);
    } else {
        info!("✅ Node stopped cleanly");
    }

    Ok(())
}
