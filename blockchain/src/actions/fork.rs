use crate::service::Blockchain;
use crate::states::Event;
use anyhow::{bail, Result};
use block_processor::{calculate_round, BlockProcessorResult, RevertBlockHandler};
use rand::Rng;
use tracing::{error, info, warn};

/// Rollback depth bounds used when the network did not report one.
const MIN_RANDOM_ROLLBACK: u64 = 4;
const MAX_RANDOM_ROLLBACK: u64 = 102;

pub async fn start_fork_recovery(blockchain: &Blockchain) -> Result<()> {
    info!("Starting fork recovery");
    blockchain.clear_and_stop_queue();
    // The chunk in flight still writes the head and the store.
    blockchain.wait_for_queue_idle().await;

    if let Err(err) = remove_blocks(blockchain).await {
        error!(error = %err, "Fork recovery failed, state is possibly corrupted");
        blockchain.dispatch(Event::Failure);
        return Ok(());
    }

    let state = blockchain.state_store();
    state.set_number_of_blocks_to_rollback(None);
    if let Err(err) = blockchain.services().network.refresh_peers_after_fork().await {
        warn!(error = %err, "Failed to refresh peers after fork");
    }

    blockchain.dispatch(Event::Success);
    blockchain.resume_queue();
    Ok(())
}

async fn remove_blocks(blockchain: &Blockchain) -> Result<()> {
    let state = blockchain.state_store();
    let count = state
        .number_of_blocks_to_rollback()
        .unwrap_or_else(|| rand::thread_rng().gen_range(MIN_RANDOM_ROLLBACK..=MAX_RANDOM_ROLLBACK));

    let from = state.last_height();
    let target = from.saturating_sub(count).max(1);
    info!(count, from, to = target, "Removing blocks to recover from fork");

    let revert = RevertBlockHandler::new(state.clone(), blockchain.services().clone());
    while state.last_height() > target {
        let head = state.last_block();
        if revert.execute(&head).await == BlockProcessorResult::Corrupted {
            bail!("could not revert block {} ({})", head.height(), head.id());
        }
    }

    state.set_last_stored_block_height(target);
    state.reset_last_downloaded_block();
    blockchain.metrics().set_chain_height(target);

    let round = calculate_round(target, blockchain.config());
    blockchain.services().database.delete_round(round.round + 1).await?;
    Ok(())
}
