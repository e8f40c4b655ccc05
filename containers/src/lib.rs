pub mod block;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockError, BlockHeader, BlockPing};
pub use transaction::{LegacyTransaction, NoncedTransaction, Transaction};
pub use types::{BlockId, Bytes32, PublicKey, TransactionId};
