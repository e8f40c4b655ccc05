use crate::contracts::{Clock, ValidatorSet};
use chain::ChainConfig;
use containers::{Block, PublicKey};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundInfo {
    pub round: u64,
    /// Height of the first block of the round.
    pub round_height: u64,
    pub next_round: u64,
    pub max_validators: u64,
}

/// Round containing `height`.
///
/// Rounds are counted across milestones: every milestone that changes the
/// active validator count closes off the rounds completed under the
/// previous count.
pub fn calculate_round(height: u64, config: &ChainConfig) -> RoundInfo {
    let height = height.max(1);
    let mut milestones = config
        .milestones
        .iter()
        .filter(|milestone| milestone.height <= height);

    let mut active = milestones
        .next()
        .map(|milestone| milestone.active_validators.max(1))
        .unwrap_or(1);
    let mut round = 1;
    let mut round_height = 1;

    for milestone in milestones {
        if milestone.active_validators == active || milestone.active_validators == 0 {
            continue;
        }
        let completed = milestone.height.saturating_sub(round_height) / active;
        round += completed;
        round_height += completed * active;
        active = milestone.active_validators;
    }

    let completed = (height - round_height) / active;
    round += completed;
    round_height += completed * active;

    RoundInfo {
        round,
        round_height,
        next_round: round + 1,
        max_validators: active,
    }
}

/// Slot arithmetic against the node clock.
#[derive(Clone)]
pub struct Slots {
    config: Arc<ChainConfig>,
    clock: Arc<dyn Clock>,
}

impl Slots {
    pub fn new(config: Arc<ChainConfig>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn time(&self) -> u64 {
        self.clock.now()
    }

    pub fn blocktime(&self, height: u64) -> u64 {
        self.config.milestone_at(height).blocktime.max(1)
    }

    pub fn slot_number(&self, timestamp: u64, height: u64) -> u64 {
        timestamp / self.blocktime(height)
    }

    pub fn current_slot(&self, height: u64) -> u64 {
        self.slot_number(self.time(), height)
    }

    /// Whether `block` was forged in a slot that has not started yet.
    pub fn is_future_block(&self, block: &Block) -> bool {
        self.slot_number(block.timestamp(), block.height()) > self.current_slot(block.height())
    }

    /// Whether the validator scheduled for the block's slot is its generator.
    pub fn is_valid_generator(&self, block: &Block, validators: &dyn ValidatorSet) -> bool {
        let round = calculate_round(block.height(), &self.config);
        let active = validators.active_validators(&round);
        if active.is_empty() {
            debug!(
                height = block.height(),
                round = round.round,
                "No active validators known for round, accepting generator"
            );
            return true;
        }

        let slot = self.slot_number(block.timestamp(), block.height());
        let expected: &PublicKey = &active[(slot % active.len() as u64) as usize];
        if expected != block.generator() {
            debug!(
                height = block.height(),
                slot,
                expected = %expected,
                generator = %block.generator(),
                "Generator not scheduled for slot"
            );
            return false;
        }
        true
    }
}

/// Reasons `next` does not directly extend `previous`, empty when it does.
pub fn not_chained_reasons(previous: &Block, next: &Block, slots: &Slots) -> Vec<String> {
    let mut reasons = Vec::new();
    if next.height() != previous.height() + 1 {
        reasons.push(format!(
            "height {} is not one above {}",
            next.height(),
            previous.height()
        ));
    }
    if next.previous_block() != Some(previous.id()) {
        reasons.push(format!(
            "previous block {} is not {}",
            next.previous_block()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "missing".to_string()),
            previous.id()
        ));
    }
    let previous_slot = slots.slot_number(previous.timestamp(), previous.height());
    let next_slot = slots.slot_number(next.timestamp(), next.height());
    if next_slot <= previous_slot {
        reasons.push(format!("slot {next_slot} is not after previous slot {previous_slot}"));
    }
    reasons
}

pub fn is_block_chained(previous: &Block, next: &Block, slots: &Slots) -> bool {
    not_chained_reasons(previous, next, slots).is_empty()
}
