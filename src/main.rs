use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use block_processor::memory::{genesis_block, MemoryServices};
use block_processor::SystemClock;
use blockchain::Blockchain;
use chain::ChainConfig;
use clap::Parser;
use containers::PublicKey;
use metrics::Metrics;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Chain config (YAML). Devnet parameters when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start a new network from genesis instead of syncing.
    #[arg(long)]
    network_start: bool,

    /// Return from boot without waiting for the started state.
    #[arg(long)]
    skip_started_check: bool,

    /// Seed for the genesis generator key.
    #[arg(long, default_value = "genesis")]
    genesis_generator: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ChainConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ChainConfig::devnet(),
    };
    config.options.network_start |= args.network_start;
    config.options.skip_started_check |= args.skip_started_check;

    let generator = PublicKey::from_seed(&args.genesis_generator);
    let genesis = Arc::new(genesis_block(config.nethash, generator)?);

    let clock = Arc::new(SystemClock::new(config.epoch));
    let memory = MemoryServices::new(genesis.clone(), Vec::new(), 0);
    let services = memory.services_with_clock(clock);
    let metrics = Arc::new(Metrics::new()?);

    let blockchain = Blockchain::new(Arc::new(config), services, genesis, metrics);
    blockchain.boot(args.skip_started_check).await;
    info!(height = blockchain.get_last_height(), "Node running");

    tokio::signal::ctrl_c().await?;
    blockchain.dispose();
    info!("Node stopped");
    Ok(())
}
