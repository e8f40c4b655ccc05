use containers::{BlockId, PublicKey, TransactionId};
use thiserror::Error;

/// Why a block could not be taken on as the new chain head.
///
/// Everything except `Persistence` is resolved inside the pipeline and
/// turned into a [`crate::BlockProcessorResult`].
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("block {height} ({id}) failed verification: {reasons}")]
    Validation {
        height: u64,
        id: BlockId,
        reasons: String,
    },
    #[error("block {height} ({id}) not accepted: {reason}")]
    Consistency {
        height: u64,
        id: BlockId,
        reason: ConsistencyError,
    },
    #[error("block {height} ({id}) contains {} already forged transactions", forged.len())]
    Replay {
        height: u64,
        id: BlockId,
        forged: Vec<TransactionId>,
    },
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
    #[error("state is possibly corrupted: {0}")]
    Corruption(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("transactions do not share one version")]
    IncompatibleTransactions,
    #[error(
        "invalid nonce order for sender {sender}: preceding nonce {previous}, transaction {transaction} has nonce {nonce}"
    )]
    NonceOutOfOrder {
        sender: PublicKey,
        previous: u64,
        transaction: TransactionId,
        nonce: u64,
    },
    #[error("{0}")]
    NotChained(String),
    #[error("generator {0} is not allowed to forge in this slot")]
    InvalidGenerator(PublicKey),
}
