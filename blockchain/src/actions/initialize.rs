use crate::service::Blockchain;
use crate::states::Event;
use anyhow::{bail, Context, Result};
use block_processor::calculate_round;
use tracing::{error, info};

/// Load the chain from the database and bring up the network layer.
pub async fn initialize(blockchain: &Blockchain) -> Result<()> {
    match load_chain(blockchain).await {
        Ok(event) => blockchain.dispatch(event),
        Err(err) => {
            error!(error = %format!("{err:#}"), "Failed to initialize blockchain");
            blockchain.dispatch(Event::Failure);
        }
    }
    Ok(())
}

async fn load_chain(blockchain: &Blockchain) -> Result<Event> {
    let config = blockchain.config();
    let services = blockchain.services();
    let state = blockchain.state_store();

    let last_block = services
        .database
        .get_last_block()
        .await
        .context("unable to load last block")?;

    if last_block.height() == 1 && last_block.header().payload_hash != config.nethash {
        bail!(
            "genesis payload hash {} differs from configured nethash {}",
            last_block.header().payload_hash,
            config.nethash
        );
    }

    let recent = services
        .database
        .get_top_blocks(config.options.max_last_blocks)
        .await
        .context("unable to load recent blocks")?;
    for block in recent {
        state.set_last_block(block);
    }
    state.set_last_block(last_block.clone());
    state.set_last_stored_block_height(last_block.height());
    state.reset_last_downloaded_block();
    info!(
        height = last_block.height(),
        id = %last_block.id(),
        "Last block in database"
    );

    // Rounds past the head belong to blocks that never made it to disk.
    let round = calculate_round(last_block.height(), config);
    services.database.delete_round(round.round + 1).await?;

    services.pool.readd_transactions().await?;
    services.network.boot().await?;

    if state.is_network_start() {
        Ok(Event::NetworkStart)
    } else {
        Ok(Event::Started)
    }
}
