//! Boundaries to the subsystems the pipeline consumes but does not own.
//!
//! Every collaborator is a trait object so the controller can be wired
//! against real services or the in-memory ones in [`crate::memory`].

use crate::helpers::RoundInfo;
use anyhow::Result;
use containers::{Block, PublicKey, Transaction, TransactionId};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// Outcome of structural and signature verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockVerification {
    pub verified: bool,
    pub errors: Vec<String>,
    pub contains_multi_signatures: bool,
}

impl BlockVerification {
    pub fn ok() -> Self {
        Self {
            verified: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            errors: vec![error.into()],
            contains_multi_signatures: false,
        }
    }
}

pub trait Verifier: Send + Sync {
    fn verify(&self, block: &Block) -> BlockVerification;

    /// Handler-level signature check, run for every transaction of a block
    /// that carries multi-signatures.
    fn verify_transaction(&self, transaction: &Transaction) -> Result<bool>;
}

/// Durable block storage.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Apply the block to world state without persisting it.
    async fn apply_block(&self, block: &Block) -> Result<()>;

    async fn save_blocks(&self, blocks: &[Arc<Block>]) -> Result<()>;

    async fn revert_block(&self, block: &Block) -> Result<()>;

    /// The durable tip.
    async fn get_last_block(&self) -> Result<Arc<Block>>;

    /// Up to `count` blocks from the tip, ascending by height.
    async fn get_top_blocks(&self, count: usize) -> Result<Vec<Arc<Block>>>;

    async fn delete_round(&self, round: u64) -> Result<()>;

    /// Subset of `ids` that already appear in persisted blocks.
    async fn get_forged_transaction_ids(&self, ids: &[TransactionId]) -> Result<Vec<TransactionId>>;
}

pub trait WalletRepository: Send + Sync {
    /// Nonce of the sender's last confirmed transaction.
    fn get_nonce(&self, sender: &PublicKey) -> u64;
}

#[async_trait::async_trait]
pub trait TransactionPool: Send + Sync {
    async fn add_transaction(&self, transaction: &Transaction) -> Result<()>;

    async fn remove_forged_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Re-validate and re-add everything the pool held before a restart.
    async fn readd_transactions(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanseOptions {
    pub force_ping: bool,
    pub peer_count: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub forked: bool,
    pub blocks_to_rollback: Option<u64>,
}

#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn boot(&self) -> Result<()>;

    fn has_peers(&self) -> bool;

    async fn broadcast_block(&self, block: Arc<Block>);

    async fn check_network_health(&self) -> Result<NetworkStatus>;

    async fn cleanse_peers(&self, options: CleanseOptions) -> Result<()>;

    /// Blocks above `height`, ascending. Empty when peers have nothing new.
    async fn download_blocks_from_height(&self, height: u64) -> Result<Vec<Block>>;

    async fn refresh_peers_after_fork(&self) -> Result<()>;
}

pub trait ValidatorSet: Send + Sync {
    /// Active validators for the round, in forging order.
    fn active_validators(&self, round: &RoundInfo) -> Vec<PublicKey>;
}

/// Network time in seconds since the configured epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    epoch: u64,
}

impl SystemClock {
    pub fn new(epoch: u64) -> Self {
        Self { epoch }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        unix.saturating_sub(self.epoch)
    }
}

#[derive(Clone, Debug)]
pub enum BlockchainEvent {
    BlockReceived(Arc<Block>),
    BlockDisregarded(Arc<Block>),
    BlockApplied(Arc<Block>),
    BlockReverted(Arc<Block>),
    ForgerMissing,
    RoundApplied,
    StateStarted,
}

impl BlockchainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BlockchainEvent::BlockReceived(_) => "block.received",
            BlockchainEvent::BlockDisregarded(_) => "block.disregarded",
            BlockchainEvent::BlockApplied(_) => "block.applied",
            BlockchainEvent::BlockReverted(_) => "block.reverted",
            BlockchainEvent::ForgerMissing => "forger.missing",
            BlockchainEvent::RoundApplied => "round.applied",
            BlockchainEvent::StateStarted => "state.started",
        }
    }
}

/// Fire-and-forget notifications.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: BlockchainEvent);

    fn subscribe(&self) -> broadcast::Receiver<BlockchainEvent>;
}

/// Everything the pipeline and the controller call out to.
#[derive(Clone)]
pub struct Services {
    pub database: Arc<dyn Database>,
    pub pool: Arc<dyn TransactionPool>,
    pub wallets: Arc<dyn WalletRepository>,
    pub validators: Arc<dyn ValidatorSet>,
    pub verifier: Arc<dyn Verifier>,
    pub network: Arc<dyn NetworkMonitor>,
    pub events: Arc<dyn EventDispatcher>,
    pub clock: Arc<dyn Clock>,
}
