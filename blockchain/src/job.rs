use crate::queue::QueueJob;
use crate::service::Blockchain;
use crate::states::SyncState;
use anyhow::Result;
use block_processor::helpers::not_chained_reasons;
use block_processor::{BlockProcessorResult, ProcessorError};
use containers::Block;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, warn};

/// One chunk of consecutive blocks, processed in order.
///
/// The first block that is not accepted ends the chunk: everything after
/// it would build on a block the chain does not have.
pub struct ProcessBlocksJob {
    blockchain: Weak<Blockchain>,
    blocks: Vec<Arc<Block>>,
}

impl ProcessBlocksJob {
    pub fn new(blockchain: Weak<Blockchain>, blocks: Vec<Arc<Block>>) -> Self {
        Self { blockchain, blocks }
    }

    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    async fn process(&self, blockchain: &Blockchain) -> Result<()> {
        let (Some(first), Some(last)) = (self.blocks.first(), self.blocks.last()) else {
            return Ok(());
        };

        let state = blockchain.state_store();
        let head = state.last_block();
        let slots = blockchain.processor().slots();
        debug!(
            from = first.height(),
            to = last.height(),
            head = head.height(),
            "Processing chunk of blocks"
        );

        let reasons = not_chained_reasons(&head, first, slots);
        if !reasons.is_empty() {
            warn!(
                height = first.height(),
                id = %first.id(),
                head = head.height(),
                reasons = %reasons.join(", "),
                "Discarding chunk, first block is not chained to the head"
            );
            blockchain.clear_queue();
            blockchain.reset_last_downloaded_block();
            return Ok(());
        }

        let metrics = blockchain.metrics();
        let mut accepted: Vec<Arc<Block>> = Vec::new();
        let mut last_result = None;
        let mut last_processed = None;
        let mut fork_block = None;

        for block in &self.blocks {
            if slots.is_future_block(block) {
                error!(
                    height = block.height(),
                    id = %block.id(),
                    "Discarded block because it takes a future slot"
                );
                break;
            }

            let started = Instant::now();
            let result = blockchain.processor().process(block).await;
            metrics.observe_processing_time(started.elapsed().as_secs_f64());
            metrics.record_block_result(result.as_str());

            last_result = Some(result);
            last_processed = Some(block.clone());

            match result {
                BlockProcessorResult::Accepted => {
                    accepted.push(block.clone());
                    blockchain.reset_wake_up();
                }
                BlockProcessorResult::Corrupted => {
                    error!(
                        height = block.height(),
                        id = %block.id(),
                        "State is possibly corrupted, halting block processing"
                    );
                    blockchain.clear_and_stop_queue();
                    return Ok(());
                }
                BlockProcessorResult::Rollback => {
                    state.set_last_downloaded_block(block.clone());
                    fork_block = Some(block.clone());
                    break;
                }
                _ => break,
            }
        }

        if let Some(last_accepted) = accepted.last() {
            if let Err(err) = blockchain.services().database.save_blocks(&accepted).await {
                error!(
                    from = first.height(),
                    to = last_accepted.height(),
                    error = %err,
                    "Could not save blocks to database"
                );
                return Err(ProcessorError::Persistence(err).into());
            }
            state.set_last_stored_block_height(last_accepted.height());
        }
        metrics.set_chain_height(state.last_height());

        match (last_result, last_processed, fork_block) {
            (
                Some(BlockProcessorResult::Accepted | BlockProcessorResult::DiscardedButCanBeBroadcasted),
                Some(block),
                _,
            ) => {
                if state.is_started() && blockchain.state() == SyncState::NewBlock {
                    blockchain.services().network.broadcast_block(block).await;
                }
            }
            (_, _, Some(block)) => blockchain.fork_block(block, None),
            _ => {
                blockchain.clear_queue();
                blockchain.reset_last_downloaded_block();
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl QueueJob for ProcessBlocksJob {
    async fn handle(self) -> Result<()> {
        let Some(blockchain) = self.blockchain.upgrade() else {
            return Ok(());
        };
        self.process(&blockchain).await
    }
}
