use crate::service::Blockchain;
use block_processor::BlockchainEvent;
use tracing::{error, info};

pub fn check_later(blockchain: &Blockchain) {
    if !blockchain.is_stopped() && !blockchain.state_store().is_wake_up_set() {
        blockchain.set_wake_up();
    }
}

pub fn blockchain_ready(blockchain: &Blockchain) {
    let state = blockchain.state_store();
    if state.is_started() {
        return;
    }
    state.set_started(true);
    info!(height = state.last_height(), "Blockchain is ready");
    blockchain.services().events.dispatch(BlockchainEvent::StateStarted);
}

/// Startup or fork recovery failed: stop taking blocks.
pub fn exit_app(blockchain: &Blockchain) {
    error!("Blockchain cannot continue, block processing halted");
    blockchain.clear_and_stop_queue();
}
