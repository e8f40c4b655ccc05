//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use block_processor::memory::{forge_block, genesis_block, MemoryServices};
use block_processor::{BlockProcessor, StateStore};
use chain::ChainConfig;
use containers::{Block, Bytes32, PublicKey, Transaction};
use std::sync::Arc;

pub const BLOCKTIME: u64 = 8;
pub const VALIDATORS: usize = 5;

pub fn validators() -> Vec<PublicKey> {
    (0..VALIDATORS)
        .map(|index| PublicKey::from_seed(&format!("validator-{index}")))
        .collect()
}

/// Validator scheduled for the slot starting at `timestamp`.
pub fn scheduled(validators: &[PublicKey], timestamp: u64) -> PublicKey {
    validators[((timestamp / BLOCKTIME) % validators.len() as u64) as usize]
}

/// Next block forged in the slot after `parent`, by the scheduled validator.
pub fn next_block(parent: &Block, validators: &[PublicKey], transactions: Vec<Transaction>) -> Arc<Block> {
    let timestamp = parent.timestamp() + BLOCKTIME;
    Arc::new(forge_block(parent, scheduled(validators, timestamp), timestamp, transactions).unwrap())
}

pub struct TestChain {
    pub config: Arc<ChainConfig>,
    pub validators: Vec<PublicKey>,
    pub memory: MemoryServices,
    pub state: Arc<StateStore>,
    pub processor: BlockProcessor,
    /// Index `i` holds height `i + 1`.
    pub blocks: Vec<Arc<Block>>,
}

impl TestChain {
    /// Chain of `length` blocks, all stored, head at `length`.
    pub fn new(length: u64) -> Self {
        let config = Arc::new(ChainConfig::devnet());
        let validators = validators();
        let genesis = Arc::new(genesis_block(config.nethash, validators[0]).unwrap());

        let mut blocks = vec![genesis.clone()];
        for _ in 1..length {
            let parent = blocks.last().unwrap().clone();
            blocks.push(next_block(&parent, &validators, vec![]));
        }

        let head = blocks.last().unwrap().clone();
        let now = head.timestamp() + 10 * BLOCKTIME;
        let memory = MemoryServices::new(genesis.clone(), validators.clone(), now);
        memory.database.seed(&blocks[1..]);

        let state = Arc::new(StateStore::new(genesis, config.options.max_last_blocks));
        for block in &blocks[1..] {
            state.set_last_block(block.clone());
        }
        state.set_last_stored_block_height(head.height());

        let processor = BlockProcessor::new(config.clone(), state.clone(), memory.services());

        Self {
            config,
            validators,
            memory,
            state,
            processor,
            blocks,
        }
    }

    pub fn head(&self) -> Arc<Block> {
        self.state.last_block()
    }

    pub fn block(&self, height: u64) -> Arc<Block> {
        self.blocks[(height - 1) as usize].clone()
    }

    pub fn next(&self, transactions: Vec<Transaction>) -> Arc<Block> {
        next_block(&self.head(), &self.validators, transactions)
    }

    /// Competing block at the head's height, forged one slot later by the
    /// validator scheduled for that slot.
    pub fn competing_head(&self) -> Arc<Block> {
        let head = self.head();
        let parent = self.block(head.height() - 1);
        let timestamp = head.timestamp() + BLOCKTIME;
        Arc::new(forge_block(&parent, scheduled(&self.validators, timestamp), timestamp, vec![]).unwrap())
    }

    /// Block with an arbitrary parent id, height and timestamp.
    pub fn detached(&self, height: u64, timestamp: u64, generator: PublicKey) -> Arc<Block> {
        let mut parent = (*self.head()).clone();
        let mut header = parent.header().clone();
        header.height = height - 1;
        header.previous_block = Some(Bytes32::digest(b"elsewhere"));
        header.number_of_transactions = 0;
        parent = Block::new(header, vec![]).unwrap();
        Arc::new(forge_block(&parent, generator, timestamp, vec![]).unwrap())
    }
}
