//! Node lifecycle and chain extension.
//!
//! The [`Blockchain`] controller owns a [`SyncStateMachine`] and a
//! single-consumer [`BlockQueue`] of [`ProcessBlocksJob`]s. Incoming blocks
//! are chunked into jobs; the queue worker runs one job at a time through
//! the acceptance pipeline, so the chain head has exactly one writer.
//!
//! ## State Machine
//!
//! - **Init**: verify genesis, boot the network layer
//! - **SyncingWithNetwork**: download and process blocks until synced
//! - **Idle / NewBlock**: follow the network block by block
//! - **Fork**: roll back and resync
//! - **Stopped / Exit**: terminal until the next `START`
pub mod actions;
pub mod chunks;
pub mod job;
pub mod queue;
pub mod service;
pub mod states;

pub use chunks::chunk_blocks;
pub use job::ProcessBlocksJob;
pub use queue::{BlockQueue, QueueEvent, QueueJob};
pub use service::Blockchain;
pub use states::{Action, Event, SyncPhase, SyncState, SyncStateMachine, Transition};

#[cfg(test)]
mod tests;
