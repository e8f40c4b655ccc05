use containers::{Block, BlockPing};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Owner of the chain head and the markers the sync loop steers by.
///
/// Only the accept path and the revert path move the head; everything
/// else reads it.
#[derive(Debug)]
pub struct StateStore {
    inner: RwLock<Inner>,
    max_last_blocks: usize,
}

#[derive(Debug)]
struct Inner {
    last_block: Arc<Block>,
    last_downloaded_block: Option<Arc<Block>>,
    last_stored_block_height: u64,
    forked_block: Option<Arc<Block>>,
    number_of_blocks_to_rollback: Option<u64>,
    /// Recently accepted blocks by height.
    last_blocks: BTreeMap<u64, Arc<Block>>,
    started: bool,
    network_start: bool,
    wake_up_set: bool,
    no_block_counter: u32,
    p2p_update_counter: u32,
    block_ping: Option<BlockPing>,
}

impl StateStore {
    pub fn new(last_block: Arc<Block>, max_last_blocks: usize) -> Self {
        let mut last_blocks = BTreeMap::new();
        last_blocks.insert(last_block.height(), last_block.clone());
        Self {
            inner: RwLock::new(Inner {
                last_stored_block_height: last_block.height(),
                last_block,
                last_downloaded_block: None,
                forked_block: None,
                number_of_blocks_to_rollback: None,
                last_blocks,
                started: false,
                network_start: false,
                wake_up_set: false,
                no_block_counter: 0,
                p2p_update_counter: 0,
                block_ping: None,
            }),
            max_last_blocks: max_last_blocks.max(1),
        }
    }

    pub fn last_block(&self) -> Arc<Block> {
        self.inner.read().last_block.clone()
    }

    pub fn last_height(&self) -> u64 {
        self.inner.read().last_block.height()
    }

    /// Move the head to `block` and record it in the recent-blocks cache.
    ///
    /// Cached blocks at or above the new height are dropped first, so a
    /// revert leaves no stale successors behind.
    pub fn set_last_block(&self, block: Arc<Block>) {
        let mut inner = self.inner.write();
        let height = block.height();
        inner.last_blocks.split_off(&height);
        inner.last_blocks.insert(height, block.clone());
        while inner.last_blocks.len() > self.max_last_blocks {
            inner.last_blocks.pop_first();
        }
        debug!(height, id = %block.id(), "Chain head moved");
        inner.last_block = block;
    }

    /// Recent blocks, ascending by height.
    pub fn last_blocks(&self) -> Vec<Arc<Block>> {
        self.inner.read().last_blocks.values().cloned().collect()
    }

    pub fn last_block_at_height(&self, height: u64) -> Option<Arc<Block>> {
        self.inner.read().last_blocks.get(&height).cloned()
    }

    /// Cached blocks strictly above `height`.
    pub fn last_blocks_above(&self, height: u64) -> Vec<Arc<Block>> {
        self.inner
            .read()
            .last_blocks
            .range(height + 1..)
            .map(|(_, block)| block.clone())
            .collect()
    }

    /// Highest block handed to the queue, or the head when nothing is pending.
    pub fn last_downloaded_block(&self) -> Arc<Block> {
        let inner = self.inner.read();
        inner
            .last_downloaded_block
            .clone()
            .unwrap_or_else(|| inner.last_block.clone())
    }

    pub fn set_last_downloaded_block(&self, block: Arc<Block>) {
        self.inner.write().last_downloaded_block = Some(block);
    }

    /// Re-sync the last-downloaded marker to the head.
    pub fn reset_last_downloaded_block(&self) {
        let mut inner = self.inner.write();
        inner.last_downloaded_block = Some(inner.last_block.clone());
    }

    pub fn last_stored_block_height(&self) -> u64 {
        self.inner.read().last_stored_block_height
    }

    pub fn set_last_stored_block_height(&self, height: u64) {
        self.inner.write().last_stored_block_height = height;
    }

    pub fn forked_block(&self) -> Option<Arc<Block>> {
        self.inner.read().forked_block.clone()
    }

    pub fn set_forked_block(&self, block: Arc<Block>) {
        self.inner.write().forked_block = Some(block);
    }

    pub fn clear_forked_block(&self) {
        self.inner.write().forked_block = None;
    }

    pub fn number_of_blocks_to_rollback(&self) -> Option<u64> {
        self.inner.read().number_of_blocks_to_rollback
    }

    pub fn set_number_of_blocks_to_rollback(&self, count: Option<u64>) {
        self.inner.write().number_of_blocks_to_rollback = count;
    }

    pub fn is_started(&self) -> bool {
        self.inner.read().started
    }

    pub fn set_started(&self, started: bool) {
        self.inner.write().started = started;
    }

    pub fn is_network_start(&self) -> bool {
        self.inner.read().network_start
    }

    pub fn set_network_start(&self, network_start: bool) {
        self.inner.write().network_start = network_start;
    }

    pub fn is_wake_up_set(&self) -> bool {
        self.inner.read().wake_up_set
    }

    pub fn set_wake_up_set(&self, set: bool) {
        self.inner.write().wake_up_set = set;
    }

    pub fn no_block_counter(&self) -> u32 {
        self.inner.read().no_block_counter
    }

    pub fn set_no_block_counter(&self, value: u32) {
        self.inner.write().no_block_counter = value;
    }

    pub fn p2p_update_counter(&self) -> u32 {
        self.inner.read().p2p_update_counter
    }

    pub fn set_p2p_update_counter(&self, value: u32) {
        self.inner.write().p2p_update_counter = value;
    }

    /// Count another sighting of the tracked block. False when `block` is
    /// not the one being tracked.
    pub fn ping_block(&self, block: &Block, now: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.block_ping.as_mut() {
            Some(ping) if ping.matches(block) => {
                ping.count += 1;
                ping.last = now;
                true
            }
            _ => false,
        }
    }

    /// Start tracking `block`, replacing the previous ping unless it was
    /// for a higher block.
    pub fn push_ping_block(&self, block: &Block, from_forger: bool, now: u64) {
        let mut inner = self.inner.write();
        if let Some(ping) = &inner.block_ping {
            if ping.block.height > block.height() {
                return;
            }
            if ping.count > 1 {
                debug!(
                    height = ping.block.height,
                    count = ping.count,
                    "Block was pinged more than once"
                );
            }
        }
        inner.block_ping = Some(BlockPing::new(block, from_forger, now));
    }

    pub fn block_ping(&self) -> Option<BlockPing> {
        self.inner.read().block_ping.clone()
    }
}
