use crate::contracts::Services;
use crate::error::{ConsistencyError, ProcessorError};
use crate::handlers::{AcceptBlockHandler, UnchainedHandler};
use crate::helpers::{is_block_chained, Slots};
use crate::store::StateStore;
use chain::ChainConfig;
use containers::{Block, PublicKey, TransactionId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Terminal outcome of running one block through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockProcessorResult {
    Accepted,
    DiscardedButCanBeBroadcasted,
    Rejected,
    Rollback,
    Reverted,
    Corrupted,
}

impl BlockProcessorResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockProcessorResult::Accepted => "accepted",
            BlockProcessorResult::DiscardedButCanBeBroadcasted => "discarded_but_can_be_broadcasted",
            BlockProcessorResult::Rejected => "rejected",
            BlockProcessorResult::Rollback => "rollback",
            BlockProcessorResult::Reverted => "reverted",
            BlockProcessorResult::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for BlockProcessorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered decision chain from a candidate block to a [`BlockProcessorResult`].
///
/// Stages, first failure wins:
///
/// 1. verification (structure and signatures)
/// 2. one transaction version per block
/// 3. per-sender nonce order
/// 4. generator slot and chaining against the head
/// 5. no already forged transactions
/// 6. apply, reverting on failure
#[derive(Clone)]
pub struct BlockProcessor {
    config: Arc<ChainConfig>,
    state: Arc<StateStore>,
    services: Services,
    slots: Slots,
}

impl BlockProcessor {
    pub fn new(config: Arc<ChainConfig>, state: Arc<StateStore>, services: Services) -> Self {
        let slots = Slots::new(config.clone(), services.clock.clone());
        Self {
            config,
            state,
            services,
            slots,
        }
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    pub async fn process(&self, block: &Arc<Block>) -> BlockProcessorResult {
        if let Err(err) = self.verify_block(block) {
            warn!(error = %err, "Block verification failed");
            self.state.reset_last_downloaded_block();
            return BlockProcessorResult::Rejected;
        }

        if let Err(err) = self
            .check_incompatible_transactions(block)
            .and_then(|()| self.check_nonce_order(block))
        {
            warn!(error = %err, "Block rejected");
            return BlockProcessorResult::Rejected;
        }

        let is_valid_generator = self
            .slots
            .is_valid_generator(block, self.services.validators.as_ref());
        let head = self.state.last_block();

        if !is_block_chained(&head, block, &self.slots) {
            let handler = UnchainedHandler {
                config: &self.config,
                services: &self.services,
                slots: &self.slots,
                is_valid_generator,
            };
            return handler.execute(&head, block);
        }

        if !is_valid_generator {
            let err = ProcessorError::Consistency {
                height: block.height(),
                id: block.id(),
                reason: ConsistencyError::InvalidGenerator(*block.generator()),
            };
            warn!(error = %err, "Block rejected");
            self.state.reset_last_downloaded_block();
            return BlockProcessorResult::Rejected;
        }

        match self.check_forged_transactions(block).await {
            Ok(()) => {}
            Err(err @ ProcessorError::Replay { .. }) => {
                warn!(error = %err, "Block disregarded");
                return BlockProcessorResult::DiscardedButCanBeBroadcasted;
            }
            Err(err) => {
                warn!(
                    height = block.height(),
                    id = %block.id(),
                    error = %err,
                    "Could not look up forged transactions"
                );
                self.state.reset_last_downloaded_block();
                return BlockProcessorResult::Rejected;
            }
        }

        AcceptBlockHandler {
            state: &self.state,
            services: &self.services,
        }
        .execute(block)
        .await
    }

    fn verify_block(&self, block: &Block) -> Result<(), ProcessorError> {
        let verifier = &self.services.verifier;
        let mut verification = verifier.verify(block);

        if verification.contains_multi_signatures {
            let mut handlers_verified = true;
            for transaction in block.transactions() {
                match verifier.verify_transaction(transaction) {
                    Ok(true) => {}
                    Ok(false) => {
                        handlers_verified = false;
                        verification
                            .errors
                            .push(format!("transaction {} failed handler verification", transaction.id()));
                        break;
                    }
                    Err(err) => {
                        handlers_verified = false;
                        verification.errors.push(err.to_string());
                        break;
                    }
                }
            }

            if handlers_verified {
                // Cached verification state cannot be trusted for
                // multi-signature payloads; re-run it.
                verification = verifier.verify(block);
            } else {
                verification.verified = false;
            }
        }

        if verification.verified {
            return Ok(());
        }

        Err(ProcessorError::Validation {
            height: block.height(),
            id: block.id(),
            reasons: verification.errors.join(", "),
        })
    }

    fn check_incompatible_transactions(&self, block: &Block) -> Result<(), ProcessorError> {
        let mut versions = block.transactions().iter().map(|tx| tx.version());
        let Some(first) = versions.next() else {
            return Ok(());
        };
        if versions.all(|version| version == first) {
            return Ok(());
        }
        Err(ProcessorError::Consistency {
            height: block.height(),
            id: block.id(),
            reason: ConsistencyError::IncompatibleTransactions,
        })
    }

    fn check_nonce_order(&self, block: &Block) -> Result<(), ProcessorError> {
        let mut nonces: HashMap<PublicKey, u64> = HashMap::new();

        for transaction in block.transactions() {
            let Some(nonce) = transaction.nonce() else {
                continue;
            };
            let sender = *transaction.sender();
            let previous = *nonces
                .entry(sender)
                .or_insert_with(|| self.services.wallets.get_nonce(&sender));

            if previous.checked_add(1) != Some(nonce) {
                return Err(ProcessorError::Consistency {
                    height: block.height(),
                    id: block.id(),
                    reason: ConsistencyError::NonceOutOfOrder {
                        sender,
                        previous,
                        transaction: transaction.id(),
                        nonce,
                    },
                });
            }
            nonces.insert(sender, nonce);
        }
        Ok(())
    }

    /// Replay check against persisted history and blocks accepted in memory
    /// but not stored yet.
    async fn check_forged_transactions(&self, block: &Block) -> Result<(), ProcessorError> {
        if block.transactions().is_empty() {
            return Ok(());
        }

        let ids: Vec<TransactionId> = block.transactions().iter().map(|tx| tx.id()).collect();
        let mut forged: HashSet<TransactionId> = self
            .services
            .database
            .get_forged_transaction_ids(&ids)
            .await
            .map_err(ProcessorError::Persistence)?
            .into_iter()
            .collect();

        let last_stored = self.state.last_stored_block_height();
        if self.state.last_height() != last_stored {
            let requested: HashSet<TransactionId> = ids.iter().copied().collect();
            for unstored in self.state.last_blocks_above(last_stored) {
                debug!(height = unstored.height(), "Checking unstored block for forged transactions");
                forged.extend(
                    unstored
                        .transactions()
                        .iter()
                        .map(|tx| tx.id())
                        .filter(|id| requested.contains(id)),
                );
            }
        }

        if forged.is_empty() {
            return Ok(());
        }

        Err(ProcessorError::Replay {
            height: block.height(),
            id: block.id(),
            forged: ids.into_iter().filter(|id| forged.contains(id)).collect(),
        })
    }
}
