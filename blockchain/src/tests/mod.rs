mod queue_tests;

use crate::Blockchain;
use block_processor::memory::{forge_block, genesis_block, MemoryServices};
use chain::ChainConfig;
use containers::{Block, PublicKey, Transaction};
use metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const BLOCKTIME: u64 = 8;

pub(crate) fn validators() -> Vec<PublicKey> {
    (0..5)
        .map(|index| PublicKey::from_seed(&format!("validator-{index}")))
        .collect()
}

/// Block after `parent` in the next slot, forged by the scheduled validator.
pub(crate) fn create_test_block(parent: &Block, validators: &[PublicKey], transactions: Vec<Transaction>) -> Arc<Block> {
    let timestamp = parent.timestamp() + BLOCKTIME;
    let generator = validators[((timestamp / BLOCKTIME) % validators.len() as u64) as usize];
    Arc::new(forge_block(parent, generator, timestamp, transactions).unwrap())
}

pub(crate) fn create_test_chain(genesis: Arc<Block>, validators: &[PublicKey], length: u64) -> Vec<Arc<Block>> {
    let mut blocks = vec![genesis];
    while (blocks.len() as u64) < length {
        let parent = blocks.last().unwrap().clone();
        blocks.push(create_test_block(&parent, validators, vec![]));
    }
    blocks
}

pub(crate) struct Harness {
    pub validators: Vec<PublicKey>,
    pub memory: MemoryServices,
    pub chain: Vec<Arc<Block>>,
    pub blockchain: Arc<Blockchain>,
}

impl Harness {
    /// Controller over a stored chain of `length` blocks. The head is loaded
    /// from the database on boot.
    pub fn new(length: u64, configure: impl FnOnce(&mut ChainConfig)) -> Self {
        let mut config = ChainConfig::devnet();
        configure(&mut config);

        let validators = validators();
        let genesis = Arc::new(genesis_block(config.nethash, validators[0]).unwrap());
        let chain = create_test_chain(genesis.clone(), &validators, length);
        let now = chain.last().unwrap().timestamp() + BLOCKTIME;

        let memory = MemoryServices::new(genesis.clone(), validators.clone(), now);
        memory.database.seed(&chain[1..]);

        let metrics = Arc::new(Metrics::new().unwrap());
        let blockchain = Blockchain::new(Arc::new(config), memory.services(), genesis, metrics);

        Self {
            validators,
            memory,
            chain,
            blockchain,
        }
    }

    /// Node that boots straight into `Idle` without syncing.
    pub async fn started(length: u64) -> Self {
        let harness = Self::new(length, |config| config.options.network_start = true);
        assert!(harness.blockchain.boot(true).await);
        let blockchain = harness.blockchain.clone();
        wait_until(move || blockchain.state_store().is_started()).await;
        harness
    }

    /// `count` blocks on top of the current head; the clock moves along.
    pub fn extend(&self, count: usize) -> Vec<Arc<Block>> {
        let mut parent = self.blockchain.get_last_block();
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = create_test_block(&parent, &self.validators, vec![]);
            parent = block.clone();
            blocks.push(block);
        }
        self.memory.clock.set(parent.timestamp() + BLOCKTIME);
        blocks
    }
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}
