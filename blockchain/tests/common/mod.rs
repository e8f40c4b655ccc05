//! Node fixtures for end-to-end sync tests.

#![allow(dead_code)]

use block_processor::memory::{forge_block, genesis_block, MemoryServices};
use blockchain::Blockchain;
use chain::ChainConfig;
use containers::{Block, PublicKey};
use metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;

pub const BLOCKTIME: u64 = 8;

pub fn validators() -> Vec<PublicKey> {
    (0..5)
        .map(|index| PublicKey::from_seed(&format!("validator-{index}")))
        .collect()
}

/// The canonical chain as the rest of the network sees it.
pub struct NetworkChain {
    pub config: ChainConfig,
    pub validators: Vec<PublicKey>,
    /// Index `i` holds height `i + 1`.
    pub blocks: Vec<Arc<Block>>,
}

impl NetworkChain {
    pub fn new(length: u64) -> Self {
        let config = ChainConfig::devnet();
        let validators = validators();
        let genesis = Arc::new(genesis_block(config.nethash, validators[0]).unwrap());
        let mut blocks = vec![genesis];
        while (blocks.len() as u64) < length {
            let parent = blocks.last().unwrap().clone();
            let timestamp = parent.timestamp() + BLOCKTIME;
            let generator = validators[((timestamp / BLOCKTIME) % validators.len() as u64) as usize];
            blocks.push(Arc::new(forge_block(&parent, generator, timestamp, vec![]).unwrap()));
        }
        Self {
            config,
            validators,
            blocks,
        }
    }

    pub fn tip(&self) -> &Arc<Block> {
        self.blocks.last().unwrap()
    }

    /// Blocks at heights `from..=to`, as a peer would send them.
    pub fn range(&self, from: u64, to: u64) -> Vec<Block> {
        self.blocks[(from - 1) as usize..to as usize]
            .iter()
            .map(|block| (**block).clone())
            .collect()
    }
}

pub struct Node {
    pub memory: MemoryServices,
    pub blockchain: Arc<Blockchain>,
}

impl Node {
    /// Node that has the first `stored` blocks of `network` on disk and a
    /// clock one slot past the network tip.
    pub fn new(network: &NetworkChain, stored: u64) -> Self {
        let genesis = network.blocks[0].clone();
        let now = network.tip().timestamp() + BLOCKTIME;
        let memory = MemoryServices::new(genesis.clone(), network.validators.clone(), now);
        memory.database.seed(&network.blocks[1..stored as usize]);
        memory.network.set_has_peers(true);

        let blockchain = Blockchain::new(
            Arc::new(network.config.clone()),
            memory.services(),
            genesis,
            Arc::new(Metrics::new().unwrap()),
        );
        Self { memory, blockchain }
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}
