use crate::service::Blockchain;
use crate::states::Event;
use anyhow::Result;
use block_processor::is_block_chained;
use chain::config::{MAX_NO_BLOCK_ATTEMPTS, MAX_P2P_UPDATE_ATTEMPTS, MAX_QUEUED_JOBS};
use containers::Block;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn check_last_downloaded_block_synced(blockchain: &Blockchain) -> Result<()> {
    let state = blockchain.state_store();
    let mut event = Event::NotSynced;

    let queued = blockchain.queue_size();
    debug!(queued, "Queued chunks of blocks");
    if queued > MAX_QUEUED_JOBS {
        event = Event::Paused;
    }

    if state.no_block_counter() > MAX_NO_BLOCK_ATTEMPTS && blockchain.is_queue_idle() {
        info!(
            attempts = state.no_block_counter(),
            "Tried to sync from different peers, the network looks to be missing blocks"
        );
        state.set_no_block_counter(0);
        event = Event::NetworkHalted;

        let p2p_updates = state.p2p_update_counter() + 1;
        if p2p_updates > MAX_P2P_UPDATE_ATTEMPTS {
            info!("Network keeps missing blocks, checking network health");
            match blockchain.services().network.check_network_health().await {
                Ok(status) if status.forked => {
                    state.set_number_of_blocks_to_rollback(status.blocks_to_rollback);
                    event = Event::Fork;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Network health check failed"),
            }
            state.set_p2p_update_counter(0);
        } else {
            state.set_p2p_update_counter(p2p_updates);
        }
    }

    if blockchain.is_synced(Some(&state.last_downloaded_block())) {
        state.set_no_block_counter(0);
        state.set_p2p_update_counter(0);
        event = Event::Synced;
    }

    if state.is_network_start() {
        event = Event::Synced;
    }

    blockchain.dispatch(event);
    Ok(())
}

pub async fn download_blocks(blockchain: &Blockchain) -> Result<()> {
    let state = blockchain.state_store();
    let last_downloaded = state.last_downloaded_block();

    let blocks = match blockchain
        .services()
        .network
        .download_blocks_from_height(last_downloaded.height())
        .await
    {
        Ok(blocks) => blocks,
        Err(err) => {
            warn!(height = last_downloaded.height(), error = %err, "Failed to download blocks");
            Vec::new()
        }
    };

    if blockchain.is_stopped() {
        return Ok(());
    }

    let blocks: Vec<Arc<Block>> = blocks.into_iter().map(Arc::new).collect();
    let chained = blocks
        .first()
        .is_some_and(|first| is_block_chained(&last_downloaded, first, blockchain.processor().slots()));

    match blocks.last() {
        Some(last) if chained => {
            let transactions: usize = blocks.iter().map(|block| block.number_of_transactions()).sum();
            info!(
                count = blocks.len(),
                transactions,
                from = last_downloaded.height() + 1,
                to = last.height(),
                "Downloaded new blocks"
            );
            state.set_no_block_counter(0);
            state.set_last_downloaded_block(last.clone());
            blockchain.enqueue_blocks(blocks);
            blockchain.dispatch(Event::Downloaded);
        }
        _ => {
            match blocks.first() {
                None => info!(
                    height = last_downloaded.height(),
                    "Could not download any blocks from any peer"
                ),
                Some(first) => warn!(
                    height = first.height(),
                    id = %first.id(),
                    last_downloaded = last_downloaded.height(),
                    "Downloaded block not accepted"
                ),
            }

            if blockchain.is_queue_idle() {
                state.set_no_block_counter(state.no_block_counter() + 1);
            }
            state.reset_last_downloaded_block();
            blockchain.dispatch(Event::NoBlock);
        }
    }
    Ok(())
}

pub fn download_finished(blockchain: &Blockchain) {
    info!("Block download finished");
    let state = blockchain.state_store();

    if state.is_network_start() {
        // Genesis start only skips the first sync.
        state.set_network_start(false);
        blockchain.dispatch(Event::SyncFinished);
    } else if blockchain.is_queue_idle() {
        blockchain.dispatch(Event::ProcessFinished);
    }
}

pub fn check_last_block_synced(blockchain: &Blockchain) {
    let event = if blockchain.is_synced(None) {
        Event::Synced
    } else {
        Event::NotSynced
    };
    blockchain.dispatch(event);
}

pub fn syncing_complete(blockchain: &Blockchain) {
    info!(height = blockchain.get_last_height(), "Blockchain 100% in sync");
    blockchain.dispatch(Event::SyncFinished);
}
