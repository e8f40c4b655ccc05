use crate::contracts::{BlockchainEvent, Services};
use crate::error::ProcessorError;
use crate::helpers::{calculate_round, not_chained_reasons, Slots};
use crate::processor::BlockProcessorResult;
use crate::revert::RevertBlockHandler;
use crate::store::StateStore;
use chain::ChainConfig;
use containers::Block;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies a chained block with a valid generator and fresh transactions.
pub(crate) struct AcceptBlockHandler<'a> {
    pub state: &'a Arc<StateStore>,
    pub services: &'a Services,
}

impl AcceptBlockHandler<'_> {
    pub async fn execute(&self, block: &Arc<Block>) -> BlockProcessorResult {
        let err = match self.apply(block).await {
            Ok(()) => return BlockProcessorResult::Accepted,
            Err(err) => err,
        };

        warn!(
            height = block.height(),
            id = %block.id(),
            error = %err,
            "Refused new block"
        );

        let result = if self.state.last_height() == block.height() {
            let revert = RevertBlockHandler::new(self.state.clone(), self.services.clone());
            revert.execute(block).await
        } else {
            BlockProcessorResult::Rejected
        };
        self.state.reset_last_downloaded_block();
        result
    }

    async fn apply(&self, block: &Arc<Block>) -> Result<(), ProcessorError> {
        // The head moves first so the block counts as provisionally accepted
        // and the failure path knows to revert it.
        self.state.set_last_block(block.clone());

        self.services
            .database
            .apply_block(block)
            .await
            .map_err(ProcessorError::Persistence)?;

        if let Some(forked) = self.state.forked_block() {
            if forked.height() == block.height() {
                info!(height = block.height(), "Successfully recovered from fork");
                self.state.clear_forked_block();
            }
        }

        for transaction in block.transactions() {
            self.services
                .pool
                .remove_forged_transaction(transaction)
                .await
                .map_err(ProcessorError::Persistence)?;
        }

        if self.state.last_downloaded_block().height() < block.height() {
            self.state.set_last_downloaded_block(block.clone());
        }

        self.services
            .events
            .dispatch(BlockchainEvent::BlockApplied(block.clone()));
        Ok(())
    }
}

/// Why a block that does not extend the head was not taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnchainedReason {
    NotReadyToAcceptNewHeight,
    AlreadyInBlockchain,
    EqualToLastBlock,
    InvalidTimestamp,
    DoubleForging,
    GeneratorMismatch,
}

impl UnchainedReason {
    pub fn classify(head: &Block, block: &Block, is_valid_generator: bool) -> Self {
        if block.height() > head.height() + 1 {
            UnchainedReason::NotReadyToAcceptNewHeight
        } else if block.height() < head.height() {
            UnchainedReason::AlreadyInBlockchain
        } else if block.height() == head.height() && block.id() == head.id() {
            UnchainedReason::EqualToLastBlock
        } else if block.timestamp() < head.timestamp() {
            UnchainedReason::InvalidTimestamp
        } else if block.height() == head.height() && is_valid_generator {
            UnchainedReason::DoubleForging
        } else {
            UnchainedReason::GeneratorMismatch
        }
    }
}

pub(crate) struct UnchainedHandler<'a> {
    pub config: &'a ChainConfig,
    pub services: &'a Services,
    pub slots: &'a Slots,
    pub is_valid_generator: bool,
}

impl UnchainedHandler<'_> {
    pub fn execute(&self, head: &Block, block: &Block) -> BlockProcessorResult {
        let reason = UnchainedReason::classify(head, block, self.is_valid_generator);
        let height = block.height();
        let id = block.id();

        match reason {
            UnchainedReason::NotReadyToAcceptNewHeight => {
                info!(
                    height,
                    id = %id,
                    head = head.height(),
                    "Block disregarded because blockchain is not ready to accept it"
                );
                BlockProcessorResult::Rejected
            }
            UnchainedReason::AlreadyInBlockchain => {
                debug!(height, id = %id, "Block disregarded because already in blockchain");
                BlockProcessorResult::DiscardedButCanBeBroadcasted
            }
            UnchainedReason::EqualToLastBlock => {
                debug!(height, id = %id, "Block disregarded because it is the last block");
                BlockProcessorResult::DiscardedButCanBeBroadcasted
            }
            UnchainedReason::InvalidTimestamp => {
                warn!(
                    height,
                    id = %id,
                    timestamp = block.timestamp(),
                    head_timestamp = head.timestamp(),
                    "Block disregarded because it is older than the last block"
                );
                BlockProcessorResult::Rejected
            }
            UnchainedReason::DoubleForging => {
                let round = calculate_round(height, self.config);
                let active = self.services.validators.active_validators(&round);
                if active.contains(block.generator()) {
                    warn!(
                        height,
                        id = %id,
                        head_id = %head.id(),
                        generator = %block.generator(),
                        "Detected double forging"
                    );
                    BlockProcessorResult::Rollback
                } else {
                    warn!(
                        height,
                        id = %id,
                        generator = %block.generator(),
                        "Competing block from a generator outside the active set"
                    );
                    BlockProcessorResult::Rejected
                }
            }
            UnchainedReason::GeneratorMismatch => {
                let reasons = not_chained_reasons(head, block, self.slots);
                warn!(
                    height,
                    id = %id,
                    head = head.height(),
                    reasons = %reasons.join(", "),
                    "Block disregarded because it is not chained"
                );
                BlockProcessorResult::Rejected
            }
        }
    }
}
