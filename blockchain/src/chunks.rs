use chain::config::CHUNK_MAX_TRANSACTIONS;
use containers::Block;
use std::collections::VecDeque;
use std::sync::Arc;

/// Split `blocks` into queue-sized chunks, preserving order.
///
/// A chunk ends once it holds [`CHUNK_MAX_TRANSACTIONS`] transactions or
/// `max_blocks` blocks. A block at a milestone height always opens a new
/// chunk; each milestone is used at most once.
pub fn chunk_blocks(blocks: Vec<Arc<Block>>, max_blocks: usize, milestone_heights: &[u64]) -> Vec<Vec<Arc<Block>>> {
    let Some(first_height) = blocks.first().map(|block| block.height()) else {
        return Vec::new();
    };

    let mut milestones: VecDeque<u64> = milestone_heights
        .iter()
        .copied()
        .filter(|height| *height > first_height)
        .collect();
    let max_blocks = max_blocks.max(1);

    let mut chunks = Vec::new();
    let mut chunk: Vec<Arc<Block>> = Vec::new();
    let mut transactions = 0;

    for block in blocks {
        while milestones.front().is_some_and(|height| *height < block.height()) {
            milestones.pop_front();
        }
        if milestones.front() == Some(&block.height()) {
            milestones.pop_front();
            if !chunk.is_empty() {
                chunks.push(std::mem::take(&mut chunk));
                transactions = 0;
            }
        }

        transactions += block.number_of_transactions();
        chunk.push(block);

        if transactions >= CHUNK_MAX_TRANSACTIONS || chunk.len() >= max_blocks {
            chunks.push(std::mem::take(&mut chunk));
            transactions = 0;
        }
    }

    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}
