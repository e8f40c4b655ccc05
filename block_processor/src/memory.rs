//! In-process collaborators.
//!
//! Used by the node binary when running without external services and by
//! tests, which drive them through their inspection and failure-injection
//! helpers.

use crate::contracts::*;
use crate::helpers::RoundInfo;
use anyhow::{anyhow, bail, Result};
use containers::{Block, BlockError, BlockHeader, BlockId, Bytes32, PublicKey, Transaction, TransactionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Genesis block whose payload hash is the network hash.
pub fn genesis_block(nethash: Bytes32, generator: PublicKey) -> Result<Block, BlockError> {
    let header = BlockHeader {
        version: 0,
        height: 1,
        previous_block: None,
        timestamp: 0,
        generator_public_key: generator,
        payload_hash: nethash,
        payload_length: 0,
        number_of_transactions: 0,
        total_amount: 0,
        total_fee: 0,
        reward: 0,
    };
    Block::new(header, vec![])
}

/// Block on top of `parent` carrying `transactions`.
pub fn forge_block(
    parent: &Block,
    generator: PublicKey,
    timestamp: u64,
    transactions: Vec<Transaction>,
) -> Result<Block, BlockError> {
    let header = BlockHeader {
        version: 0,
        height: parent.height() + 1,
        previous_block: Some(parent.id()),
        timestamp,
        generator_public_key: generator,
        payload_hash: Block::payload_hash(&transactions),
        payload_length: (transactions.len() * 32) as u32,
        number_of_transactions: transactions.len() as u32,
        total_amount: transactions.iter().map(|tx| tx.amount()).sum(),
        total_fee: transactions.iter().map(|tx| tx.fee()).sum(),
        reward: 0,
    };
    Block::new(header, transactions)
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    blocks: Mutex<Vec<Arc<Block>>>,
    applied: Mutex<Vec<BlockId>>,
    deleted_rounds: Mutex<Vec<u64>>,
    fail_apply: AtomicBool,
    fail_save: AtomicBool,
    fail_revert: AtomicBool,
    apply_delay_ms: AtomicU64,
}

impl MemoryDatabase {
    pub fn new(genesis: Arc<Block>) -> Self {
        Self {
            blocks: Mutex::new(vec![genesis]),
            ..Self::default()
        }
    }

    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Make every apply take at least `delay`.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.apply_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_revert(&self, fail: bool) {
        self.fail_revert.store(fail, Ordering::SeqCst);
    }

    /// Persist blocks directly, bypassing failure injection.
    pub fn seed(&self, blocks: &[Arc<Block>]) {
        self.blocks.lock().extend(blocks.iter().cloned());
    }

    pub fn stored_height(&self) -> u64 {
        self.blocks.lock().last().map(|block| block.height()).unwrap_or_default()
    }

    pub fn stored_blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.lock().clone()
    }

    pub fn applied(&self) -> Vec<BlockId> {
        self.applied.lock().clone()
    }

    pub fn deleted_rounds(&self) -> Vec<u64> {
        self.deleted_rounds.lock().clone()
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn apply_block(&self, block: &Block) -> Result<()> {
        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_apply.load(Ordering::SeqCst) {
            bail!("failed to apply block {}", block.height());
        }
        self.applied.lock().push(block.id());
        Ok(())
    }

    async fn save_blocks(&self, blocks: &[Arc<Block>]) -> Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            bail!("failed to save {} blocks", blocks.len());
        }
        self.blocks.lock().extend(blocks.iter().cloned());
        Ok(())
    }

    async fn revert_block(&self, block: &Block) -> Result<()> {
        if self.fail_revert.load(Ordering::SeqCst) {
            bail!("failed to revert block {}", block.height());
        }
        let mut blocks = self.blocks.lock();
        if blocks.last().map(|last| last.id()) == Some(block.id()) {
            blocks.pop();
        }
        self.applied.lock().retain(|id| *id != block.id());
        Ok(())
    }

    async fn get_last_block(&self) -> Result<Arc<Block>> {
        self.blocks
            .lock()
            .last()
            .cloned()
            .ok_or_else(|| anyhow!("database holds no blocks"))
    }

    async fn get_top_blocks(&self, count: usize) -> Result<Vec<Arc<Block>>> {
        let blocks = self.blocks.lock();
        let start = blocks.len().saturating_sub(count);
        Ok(blocks[start..].to_vec())
    }

    async fn delete_round(&self, round: u64) -> Result<()> {
        self.deleted_rounds.lock().push(round);
        Ok(())
    }

    async fn get_forged_transaction_ids(&self, ids: &[TransactionId]) -> Result<Vec<TransactionId>> {
        let forged: HashSet<TransactionId> = self
            .blocks
            .lock()
            .iter()
            .flat_map(|block| block.transactions().iter().map(|tx| tx.id()))
            .collect();
        Ok(ids.iter().copied().filter(|id| forged.contains(id)).collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTransactionPool {
    transactions: Mutex<Vec<Transaction>>,
    removed: Mutex<Vec<TransactionId>>,
    readded: AtomicUsize,
}

impl MemoryTransactionPool {
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.lock().clone()
    }

    pub fn removed(&self) -> Vec<TransactionId> {
        self.removed.lock().clone()
    }

    pub fn readd_count(&self) -> usize {
        self.readded.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransactionPool for MemoryTransactionPool {
    async fn add_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.transactions.lock().push(transaction.clone());
        Ok(())
    }

    async fn remove_forged_transaction(&self, transaction: &Transaction) -> Result<()> {
        let id = transaction.id();
        self.transactions.lock().retain(|tx| tx.id() != id);
        self.removed.lock().push(id);
        Ok(())
    }

    async fn readd_transactions(&self) -> Result<()> {
        self.readded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryWallets {
    nonces: Mutex<HashMap<PublicKey, u64>>,
}

impl MemoryWallets {
    pub fn set_nonce(&self, sender: PublicKey, nonce: u64) {
        self.nonces.lock().insert(sender, nonce);
    }
}

impl WalletRepository for MemoryWallets {
    fn get_nonce(&self, sender: &PublicKey) -> u64 {
        self.nonces.lock().get(sender).copied().unwrap_or_default()
    }
}

/// The same ordered validator list for every round.
#[derive(Debug, Default)]
pub struct StaticValidators {
    validators: Mutex<Vec<PublicKey>>,
}

impl StaticValidators {
    pub fn new(validators: Vec<PublicKey>) -> Self {
        Self {
            validators: Mutex::new(validators),
        }
    }

    pub fn set(&self, validators: Vec<PublicKey>) {
        *self.validators.lock() = validators;
    }
}

impl ValidatorSet for StaticValidators {
    fn active_validators(&self, _round: &RoundInfo) -> Vec<PublicKey> {
        self.validators.lock().clone()
    }
}

/// Scriptable peer layer: no transport, just recorded calls.
#[derive(Debug, Default)]
pub struct StaticNetworkMonitor {
    has_peers: AtomicBool,
    booted: AtomicBool,
    status: Mutex<NetworkStatus>,
    health_checks: AtomicUsize,
    cleansed: Mutex<Vec<CleanseOptions>>,
    broadcasts: Mutex<Vec<Arc<Block>>>,
    downloads: Mutex<VecDeque<Vec<Block>>>,
    download_requests: Mutex<Vec<u64>>,
    fork_refreshes: AtomicUsize,
}

impl StaticNetworkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_has_peers(&self, has_peers: bool) {
        self.has_peers.store(has_peers, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: NetworkStatus) {
        *self.status.lock() = status;
    }

    /// Queue a response for the next download request.
    pub fn push_download(&self, blocks: Vec<Block>) {
        self.downloads.lock().push_back(blocks);
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn cleansed(&self) -> Vec<CleanseOptions> {
        self.cleansed.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<Arc<Block>> {
        self.broadcasts.lock().clone()
    }

    pub fn download_requests(&self) -> Vec<u64> {
        self.download_requests.lock().clone()
    }

    pub fn fork_refreshes(&self) -> usize {
        self.fork_refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NetworkMonitor for StaticNetworkMonitor {
    async fn boot(&self) -> Result<()> {
        self.booted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_peers(&self) -> bool {
        self.has_peers.load(Ordering::SeqCst)
    }

    async fn broadcast_block(&self, block: Arc<Block>) {
        self.broadcasts.lock().push(block);
    }

    async fn check_network_health(&self) -> Result<NetworkStatus> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(*self.status.lock())
    }

    async fn cleanse_peers(&self, options: CleanseOptions) -> Result<()> {
        self.cleansed.lock().push(options);
        Ok(())
    }

    async fn download_blocks_from_height(&self, height: u64) -> Result<Vec<Block>> {
        self.download_requests.lock().push(height);
        Ok(self.downloads.lock().pop_front().unwrap_or_default())
    }

    async fn refresh_peers_after_fork(&self) -> Result<()> {
        self.fork_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Broadcast bus that also keeps every event for inspection.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<BlockchainEvent>,
    history: Mutex<Vec<BlockchainEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
        }
    }
}

impl EventBus {
    pub fn history(&self) -> Vec<BlockchainEvent> {
        self.history.lock().clone()
    }

    /// Number of recorded events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.history.lock().iter().filter(|event| event.name() == name).count()
    }
}

impl EventDispatcher for EventBus {
    fn dispatch(&self, event: BlockchainEvent) {
        self.history.lock().push(event.clone());
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<BlockchainEvent> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl Verifier for AcceptAllVerifier {
    fn verify(&self, _block: &Block) -> BlockVerification {
        BlockVerification::ok()
    }

    fn verify_transaction(&self, _transaction: &Transaction) -> Result<bool> {
        Ok(true)
    }
}

/// Verifier with per-block and per-transaction verdicts.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    rejected_blocks: Mutex<HashSet<BlockId>>,
    multi_signature_blocks: Mutex<HashSet<BlockId>>,
    rejected_transactions: Mutex<HashSet<TransactionId>>,
    verifications: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn reject_block(&self, id: BlockId) {
        self.rejected_blocks.lock().insert(id);
    }

    pub fn mark_multi_signature(&self, id: BlockId) {
        self.multi_signature_blocks.lock().insert(id);
    }

    pub fn reject_transaction(&self, id: TransactionId) {
        self.rejected_transactions.lock().insert(id);
    }

    /// Number of block verifications performed.
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, block: &Block) -> BlockVerification {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        let mut verification = if self.rejected_blocks.lock().contains(&block.id()) {
            BlockVerification::failed(format!("block {} has an invalid signature", block.id()))
        } else {
            BlockVerification::ok()
        };
        verification.contains_multi_signatures =
            self.multi_signature_blocks.lock().contains(&block.id());
        verification
    }

    fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        Ok(!self.rejected_transactions.lock().contains(&transaction.id()))
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Concrete in-memory collaborators, kept alongside the type-erased
/// [`Services`] built from them.
#[derive(Clone)]
pub struct MemoryServices {
    pub database: Arc<MemoryDatabase>,
    pub pool: Arc<MemoryTransactionPool>,
    pub wallets: Arc<MemoryWallets>,
    pub validators: Arc<StaticValidators>,
    pub verifier: Arc<ScriptedVerifier>,
    pub network: Arc<StaticNetworkMonitor>,
    pub events: Arc<EventBus>,
    pub clock: Arc<ManualClock>,
}

impl MemoryServices {
    pub fn new(genesis: Arc<Block>, validators: Vec<PublicKey>, now: u64) -> Self {
        Self {
            database: Arc::new(MemoryDatabase::new(genesis)),
            pool: Arc::new(MemoryTransactionPool::default()),
            wallets: Arc::new(MemoryWallets::default()),
            validators: Arc::new(StaticValidators::new(validators)),
            verifier: Arc::new(ScriptedVerifier::default()),
            network: Arc::new(StaticNetworkMonitor::new()),
            events: Arc::new(EventBus::default()),
            clock: Arc::new(ManualClock::new(now)),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            database: self.database.clone(),
            pool: self.pool.clone(),
            wallets: self.wallets.clone(),
            validators: self.validators.clone(),
            verifier: self.verifier.clone(),
            network: self.network.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Same collaborators with a different clock.
    pub fn services_with_clock(&self, clock: Arc<dyn Clock>) -> Services {
        Services {
            clock,
            ..self.services()
        }
    }
}
