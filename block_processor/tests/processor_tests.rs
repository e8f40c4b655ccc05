//! Acceptance pipeline outcomes against a seeded in-memory chain.

use block_processor::memory::forge_block;
use block_processor::{BlockProcessorResult, EventDispatcher};
use containers::{PublicKey, Transaction};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;

mod common;
use common::*;

#[tokio::test]
async fn test_accepts_next_block() {
    let chain = TestChain::new(10);
    let sender = PublicKey::from_seed("alice");
    let tx = Transaction::nonced(sender, None, 1, 100, 1);
    let block = chain.next(vec![tx.clone()]);

    let result = chain.processor.process(&block).await;

    assert_eq!(result, BlockProcessorResult::Accepted);
    assert_eq!(chain.head().id(), block.id());
    assert_eq!(chain.state.last_downloaded_block().height(), 11);
    assert_eq!(chain.memory.pool.removed(), vec![tx.id()]);
    assert_eq!(chain.memory.events.count("block.applied"), 1);
}

#[tokio::test]
async fn test_accept_clears_resolved_fork_marker() {
    let chain = TestChain::new(10);
    let block = chain.next(vec![]);
    chain.state.set_forked_block(block.clone());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Accepted);
    assert!(chain.state.forked_block().is_none());
}

#[tokio::test]
async fn test_double_forging_by_active_validator_rolls_back() {
    let chain = TestChain::new(443);
    let block = chain.competing_head();
    assert_eq!(block.height(), 443);
    assert_ne!(block.id(), chain.head().id());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rollback);
    assert_eq!(chain.head().height(), 443);
}

#[tokio::test]
async fn test_double_forging_outside_active_set_is_rejected() {
    let chain = TestChain::new(443);
    let block = chain.competing_head();
    // An empty active set cannot rule the generator out of the slot, but the
    // generator is not an active validator either.
    chain.memory.validators.set(vec![]);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
}

#[tokio::test]
async fn test_block_two_above_head_is_rejected() {
    let chain = TestChain::new(443);
    let timestamp = chain.head().timestamp() + 2 * BLOCKTIME;
    let block = chain.detached(445, timestamp, scheduled(&chain.validators, timestamp));

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
    assert_eq!(chain.head().height(), 443);
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    NotReadyToAcceptNewHeight,
    AlreadyInBlockchain,
    EqualToLastBlock,
    InvalidTimestamp,
    DoubleForging,
    InvalidGenerator,
}

#[rstest]
#[case::not_ready(Branch::NotReadyToAcceptNewHeight, BlockProcessorResult::Rejected)]
#[case::already_in_blockchain(Branch::AlreadyInBlockchain, BlockProcessorResult::DiscardedButCanBeBroadcasted)]
#[case::equal_to_last_block(Branch::EqualToLastBlock, BlockProcessorResult::DiscardedButCanBeBroadcasted)]
#[case::invalid_timestamp(Branch::InvalidTimestamp, BlockProcessorResult::Rejected)]
#[case::double_forging(Branch::DoubleForging, BlockProcessorResult::Rollback)]
#[case::invalid_generator(Branch::InvalidGenerator, BlockProcessorResult::Rejected)]
#[tokio::test]
async fn test_unchained_branches(#[case] branch: Branch, #[case] expected: BlockProcessorResult) {
    let chain = TestChain::new(20);
    let head = chain.head();

    let block = match branch {
        Branch::NotReadyToAcceptNewHeight => {
            let timestamp = head.timestamp() + 2 * BLOCKTIME;
            chain.detached(22, timestamp, scheduled(&chain.validators, timestamp))
        }
        Branch::AlreadyInBlockchain => chain.block(15),
        Branch::EqualToLastBlock => head.clone(),
        Branch::InvalidTimestamp => {
            let parent = chain.block(19);
            Arc::new(forge_block(&parent, chain.validators[0], head.timestamp() - 1, vec![]).unwrap())
        }
        Branch::DoubleForging => chain.competing_head(),
        Branch::InvalidGenerator => {
            let timestamp = head.timestamp() + BLOCKTIME;
            let scheduled = scheduled(&chain.validators, timestamp);
            let other = *chain
                .validators
                .iter()
                .find(|validator| **validator != scheduled)
                .unwrap();
            Arc::new(forge_block(&head, other, timestamp, vec![]).unwrap())
        }
    };

    assert_eq!(chain.processor.process(&block).await, expected);
    assert_eq!(chain.head().id(), head.id());
}

#[tokio::test]
async fn test_unchained_outcome_is_repeatable() {
    let chain = TestChain::new(20);
    let block = chain.competing_head();
    let first = chain.processor.process(&block).await;
    let second = chain.processor.process(&block).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_invalid_generator_resets_last_downloaded() {
    let chain = TestChain::new(20);
    let head = chain.head();
    let timestamp = head.timestamp() + BLOCKTIME;
    let wrong = chain.validators[((timestamp / BLOCKTIME + 1) % VALIDATORS as u64) as usize];
    let block = Arc::new(forge_block(&head, wrong, timestamp, vec![]).unwrap());
    chain.state.set_last_downloaded_block(block.clone());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
    assert_eq!(chain.state.last_downloaded_block().id(), head.id());
}

#[tokio::test]
async fn test_failed_verification_is_rejected() {
    let chain = TestChain::new(10);
    let block = chain.next(vec![]);
    chain.memory.verifier.reject_block(block.id());
    chain.state.set_last_downloaded_block(block.clone());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
    assert_eq!(chain.state.last_downloaded_block().height(), 10);
}

#[tokio::test]
async fn test_multi_signature_blocks_are_reverified() {
    let chain = TestChain::new(10);
    let tx = Transaction::nonced(PublicKey::from_seed("alice"), None, 1, 5, 1);
    let block = chain.next(vec![tx]);
    chain.memory.verifier.mark_multi_signature(block.id());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Accepted);
    assert_eq!(chain.memory.verifier.verifications(), 2);
}

#[tokio::test]
async fn test_multi_signature_handler_failure_is_rejected() {
    let chain = TestChain::new(10);
    let tx = Transaction::nonced(PublicKey::from_seed("alice"), None, 1, 5, 1);
    let block = chain.next(vec![tx.clone()]);
    chain.memory.verifier.mark_multi_signature(block.id());
    chain.memory.verifier.reject_transaction(tx.id());

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
}

#[tokio::test]
async fn test_mixed_transaction_versions_are_rejected() {
    let chain = TestChain::new(10);
    let alice = PublicKey::from_seed("alice");
    let block = chain.next(vec![
        Transaction::legacy(alice, None, 5, 1, 100),
        Transaction::nonced(alice, None, 1, 5, 1),
    ]);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
}

#[rstest]
#[case::in_order(vec![4, 5, 6], BlockProcessorResult::Accepted)]
#[case::gap(vec![4, 6], BlockProcessorResult::Rejected)]
#[case::replayed_nonce(vec![3], BlockProcessorResult::Rejected)]
#[tokio::test]
async fn test_nonce_order(#[case] nonces: Vec<u64>, #[case] expected: BlockProcessorResult) {
    let chain = TestChain::new(10);
    let alice = PublicKey::from_seed("alice");
    chain.memory.wallets.set_nonce(alice, 3);
    let transactions = nonces
        .into_iter()
        .map(|nonce| Transaction::nonced(alice, None, nonce, 1, 1))
        .collect();

    assert_eq!(chain.processor.process(&chain.next(transactions)).await, expected);
}

#[rstest]
#[case(0)]
#[case(u64::MAX)]
#[tokio::test]
async fn test_nonce_after_exhausted_wallet_is_rejected(#[case] nonce: u64) {
    let chain = TestChain::new(10);
    let alice = PublicKey::from_seed("alice");
    chain.memory.wallets.set_nonce(alice, u64::MAX);
    let block = chain.next(vec![Transaction::nonced(alice, None, nonce, 1, 1)]);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Rejected);
}

#[tokio::test]
async fn test_nonces_are_tracked_per_sender() {
    let chain = TestChain::new(10);
    let alice = PublicKey::from_seed("alice");
    let bob = PublicKey::from_seed("bob");
    chain.memory.wallets.set_nonce(bob, 7);
    let block = chain.next(vec![
        Transaction::nonced(alice, None, 1, 1, 1),
        Transaction::nonced(bob, None, 8, 1, 1),
        Transaction::nonced(alice, None, 2, 1, 1),
    ]);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Accepted);
}

#[tokio::test]
async fn test_persisted_transaction_is_discarded() {
    let chain = TestChain::new(10);
    let tx = Transaction::legacy(PublicKey::from_seed("alice"), None, 5, 1, 100);
    let stored = chain.next(vec![tx.clone()]);
    chain.memory.database.seed(&[stored]);

    let block = chain.next(vec![tx]);
    assert_eq!(
        chain.processor.process(&block).await,
        BlockProcessorResult::DiscardedButCanBeBroadcasted
    );
}

#[tokio::test]
async fn test_unstored_transaction_is_discarded() {
    let chain = TestChain::new(10);
    let tx = Transaction::legacy(PublicKey::from_seed("alice"), None, 5, 1, 100);
    let first = chain.next(vec![tx.clone()]);
    assert_eq!(chain.processor.process(&first).await, BlockProcessorResult::Accepted);

    // Accepted in memory, not yet saved.
    assert_eq!(chain.state.last_stored_block_height(), 10);
    let replay = chain.next(vec![tx]);
    assert_eq!(
        chain.processor.process(&replay).await,
        BlockProcessorResult::DiscardedButCanBeBroadcasted
    );
}

#[tokio::test]
async fn test_apply_failure_reverts_to_cached_predecessor() {
    let chain = TestChain::new(10);
    let tx = Transaction::nonced(PublicKey::from_seed("alice"), None, 1, 5, 1);
    let block = chain.next(vec![tx.clone()]);
    chain.memory.database.fail_apply(true);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Reverted);
    assert_eq!(chain.head().id(), chain.block(10).id());
    assert_eq!(chain.state.last_downloaded_block().height(), 10);
    assert_eq!(chain.memory.pool.transactions(), vec![tx]);
    assert_eq!(chain.memory.events.count("block.reverted"), 1);
}

#[tokio::test]
async fn test_failed_revert_is_corruption() {
    let chain = TestChain::new(10);
    let block = chain.next(vec![]);
    chain.memory.database.fail_apply(true);
    chain.memory.database.fail_revert(true);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Corrupted);
}

#[tokio::test]
async fn test_events_are_observable_by_subscribers() {
    let chain = TestChain::new(3);
    let mut receiver = chain.memory.events.subscribe();
    let block = chain.next(vec![]);

    assert_eq!(chain.processor.process(&block).await, BlockProcessorResult::Accepted);
    assert_eq!(receiver.recv().await.unwrap().name(), "block.applied");
}
