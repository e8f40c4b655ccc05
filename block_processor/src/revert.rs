use crate::contracts::{BlockchainEvent, Services};
use crate::error::ProcessorError;
use crate::processor::BlockProcessorResult;
use crate::store::StateStore;
use containers::Block;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Undoes a block that has already been applied on top of the chain.
#[derive(Clone)]
pub struct RevertBlockHandler {
    state: Arc<StateStore>,
    services: Services,
}

impl RevertBlockHandler {
    pub fn new(state: Arc<StateStore>, services: Services) -> Self {
        Self { state, services }
    }

    /// Either `Reverted` or `Corrupted`.
    pub async fn execute(&self, block: &Arc<Block>) -> BlockProcessorResult {
        match self.revert(block).await {
            Ok(()) => BlockProcessorResult::Reverted,
            Err(err) => {
                error!(
                    height = block.height(),
                    id = %block.id(),
                    error = %err,
                    "Failed to revert block, state is possibly corrupted"
                );
                BlockProcessorResult::Corrupted
            }
        }
    }

    async fn revert(&self, block: &Arc<Block>) -> Result<(), ProcessorError> {
        self.services
            .database
            .revert_block(block)
            .await
            .map_err(ProcessorError::Persistence)?;

        for transaction in block.transactions() {
            if let Err(err) = self.services.pool.add_transaction(transaction).await {
                warn!(
                    transaction = %transaction.id(),
                    error = %err,
                    "Failed to return reverted transaction to the pool"
                );
            }
        }

        let previous_height = block.height().saturating_sub(1);
        let previous = match self.state.last_block_at_height(previous_height) {
            Some(previous) => previous,
            None => {
                debug!(height = previous_height, "Predecessor not cached, reading durable tip");
                self.services
                    .database
                    .get_last_block()
                    .await
                    .map_err(ProcessorError::Persistence)?
            }
        };

        if previous.height() + 1 != block.height() {
            return Err(ProcessorError::Corruption(format!(
                "predecessor at height {} cannot precede block at height {}",
                previous.height(),
                block.height()
            )));
        }
        if let Some(expected) = block.previous_block() {
            if expected != previous.id() {
                return Err(ProcessorError::Corruption(format!(
                    "predecessor {} is not the parent {} of the reverted block",
                    previous.id(),
                    expected
                )));
            }
        }

        self.state.set_last_block(previous);
        self.services
            .events
            .dispatch(BlockchainEvent::BlockReverted(block.clone()));
        Ok(())
    }
}
