use crate::{PublicKey, TransactionId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version 1 transaction. Ordered by timestamp, carries no nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTransaction {
    pub id: TransactionId,
    pub sender_public_key: PublicKey,
    pub recipient: Option<PublicKey>,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
}

/// Version 2 transaction. Ordered per sender by `nonce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoncedTransaction {
    pub id: TransactionId,
    pub sender_public_key: PublicKey,
    pub recipient: Option<PublicKey>,
    pub nonce: u64,
    pub amount: u64,
    pub fee: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum Transaction {
    #[serde(rename = "1")]
    V1(LegacyTransaction),
    #[serde(rename = "2")]
    V2(NoncedTransaction),
}

impl Transaction {
    pub fn legacy(sender: PublicKey, recipient: Option<PublicKey>, amount: u64, fee: u64, timestamp: u64) -> Self {
        let id = transaction_id(1, &sender, &[amount, fee, timestamp]);
        Transaction::V1(LegacyTransaction {
            id,
            sender_public_key: sender,
            recipient,
            amount,
            fee,
            timestamp,
        })
    }

    pub fn nonced(sender: PublicKey, recipient: Option<PublicKey>, nonce: u64, amount: u64, fee: u64) -> Self {
        let id = transaction_id(2, &sender, &[nonce, amount, fee]);
        Transaction::V2(NoncedTransaction {
            id,
            sender_public_key: sender,
            recipient,
            nonce,
            amount,
            fee,
        })
    }

    pub fn id(&self) -> TransactionId {
        match self {
            Transaction::V1(tx) => tx.id,
            Transaction::V2(tx) => tx.id,
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            Transaction::V1(_) => 1,
            Transaction::V2(_) => 2,
        }
    }

    pub fn sender(&self) -> &PublicKey {
        match self {
            Transaction::V1(tx) => &tx.sender_public_key,
            Transaction::V2(tx) => &tx.sender_public_key,
        }
    }

    /// `None` for versions that predate nonces.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Transaction::V1(_) => None,
            Transaction::V2(tx) => Some(tx.nonce),
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Transaction::V1(tx) => tx.amount,
            Transaction::V2(tx) => tx.amount,
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            Transaction::V1(tx) => tx.fee,
            Transaction::V2(tx) => tx.fee,
        }
    }
}

fn transaction_id(version: u8, sender: &PublicKey, fields: &[u64]) -> TransactionId {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(sender.as_bytes());
    for field in fields {
        hasher.update(field.to_le_bytes());
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&hasher.finalize());
    TransactionId::from(id)
}
