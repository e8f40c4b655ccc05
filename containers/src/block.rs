use crate::{BlockId, Bytes32, PublicKey, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block height must be at least 1")]
    ZeroHeight,
    #[error("block at height {height} must reference a previous block")]
    MissingPreviousBlock { height: u64 },
    #[error("genesis block cannot reference a previous block")]
    GenesisWithPreviousBlock,
    #[error("header declares {declared} transactions but block carries {actual}")]
    TransactionCountMismatch { declared: u32, actual: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: u8,
    pub height: u64,
    pub previous_block: Option<BlockId>,
    /// Seconds since the network epoch.
    pub timestamp: u64,
    pub generator_public_key: PublicKey,
    pub payload_hash: Bytes32,
    pub payload_length: u32,
    pub number_of_transactions: u32,
    pub total_amount: u64,
    pub total_fee: u64,
    pub reward: u64,
}

impl BlockHeader {
    /// Content hash over every header field. This is the block id.
    pub fn hash(&self) -> BlockId {
        let mut hasher = Sha256::new();
        hasher.update([self.version]);
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.previous_block.unwrap_or_default().as_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.generator_public_key.as_bytes());
        hasher.update(self.payload_hash.as_bytes());
        hasher.update(self.payload_length.to_le_bytes());
        hasher.update(self.number_of_transactions.to_le_bytes());
        hasher.update(self.total_amount.to_le_bytes());
        hasher.update(self.total_fee.to_le_bytes());
        hasher.update(self.reward.to_le_bytes());
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        BlockId::from(id)
    }
}

/// An immutable block: header, its content hash and the ordered transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    header: BlockHeader,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Result<Self, BlockError> {
        match (header.height, header.previous_block) {
            (0, _) => return Err(BlockError::ZeroHeight),
            (1, Some(_)) => return Err(BlockError::GenesisWithPreviousBlock),
            (height, None) if height > 1 => return Err(BlockError::MissingPreviousBlock { height }),
            _ => {}
        }

        if header.number_of_transactions as usize != transactions.len() {
            return Err(BlockError::TransactionCountMismatch {
                declared: header.number_of_transactions,
                actual: transactions.len(),
            });
        }

        Ok(Self {
            id: header.hash(),
            header,
            transactions,
        })
    }

    /// Hash committing to the ordered transaction ids.
    pub fn payload_hash(transactions: &[Transaction]) -> Bytes32 {
        let mut hasher = Sha256::new();
        for transaction in transactions {
            hasher.update(transaction.id().as_bytes());
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Bytes32::from(hash)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn previous_block(&self) -> Option<BlockId> {
        self.header.previous_block
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn generator(&self) -> &PublicKey {
        &self.header.generator_public_key
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn number_of_transactions(&self) -> usize {
        self.transactions.len()
    }
}

/// Duplicate tracking for the most recently received block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPing {
    pub count: u32,
    /// Network time of the first sighting.
    pub first: u64,
    /// Network time of the latest sighting.
    pub last: u64,
    pub from_forger: bool,
    pub block: BlockHeader,
}

impl BlockPing {
    pub fn new(block: &Block, from_forger: bool, now: u64) -> Self {
        Self {
            count: 1,
            first: now,
            last: now,
            from_forger,
            block: block.header().clone(),
        }
    }

    /// Whether this ping tracks `block`.
    pub fn matches(&self, block: &Block) -> bool {
        self.block.height == block.height() && self.block.hash() == block.id()
    }
}
