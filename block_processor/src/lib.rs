pub mod contracts;
pub mod error;
pub mod handlers;
pub mod helpers;
pub mod memory;
pub mod processor;
pub mod revert;
pub mod store;

pub use contracts::*;
pub use error::{ConsistencyError, ProcessorError};
pub use helpers::{calculate_round, is_block_chained, RoundInfo, Slots};
pub use processor::{BlockProcessor, BlockProcessorResult};
pub use revert::RevertBlockHandler;
pub use store::StateStore;
