//! Transactions, as the consensus core sees them.
//!
//! The core never interprets transaction contents. It carries opaque bodies
//! between peers, asks the validator seam whether a body is acceptable, and
//! asks storage whether a hash is already recorded for a chain. Everything
//! else (scripts, balances, the mempool) lives outside this crate.

use serde::{Deserialize, Serialize};

use crate::Hash;

/// An opaque versioned transaction body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTransaction {
    pub version: u8,
    pub body: Vec<u8>,
}

impl VersionedTransaction {
    pub fn new(version: u8, body: Vec<u8>) -> Self {
        VersionedTransaction { version, body }
    }

    /// The hash snapshots reference this transaction by.
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new_derive_key("vela.transaction");
        hasher.update(&[self.version]);
        hasher.update(&self.body);
        *hasher.finalize().as_bytes()
    }
}

/// Why the validator rejected a transaction.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// The validation seam to the transaction engine.
///
/// Implementations must be cheap to call twice: the core rechecks a
/// transaction when commitments reach threshold and again before signing.
pub trait TransactionValidator: Send + Sync {
    fn validate(&self, tx: &VersionedTransaction) -> Result<(), TransactionError>;
}

/// Accepts every well-formed body. Stands in until a transaction engine is
/// wired to the node; also what most consensus tests want.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughValidator;

impl TransactionValidator for PassthroughValidator {
    fn validate(&self, _tx: &VersionedTransaction) -> Result<(), TransactionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_version_and_body() {
        let tx = VersionedTransaction::new(1, vec![1, 2, 3]);
        assert_ne!(tx.hash(), VersionedTransaction::new(2, vec![1, 2, 3]).hash());
        assert_ne!(tx.hash(), VersionedTransaction::new(1, vec![1, 2]).hash());
        assert_eq!(tx.hash(), tx.clone().hash());
    }
}
