//! Cache and final rounds.
//!
//! A `CacheRound` is a chain's open head: it accepts snapshots with strictly
//! increasing timestamps until the round gap is exhausted. Sealing it yields
//! an immutable `FinalRound` that later snapshots, on any chain, may
//! reference.

use serde::{Deserialize, Serialize};

use crate::consensus::snapshot::{RoundLink, Snapshot};
use crate::Hash;

/// Why a snapshot was rejected by its round.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("snapshot timestamp {snapshot} not after round timestamp {latest}")]
    OutOfOrder { snapshot: u64, latest: u64 },
    #[error("snapshot would stretch the round past the gap")]
    GapExceeded,
    #[error("transaction already recorded in this round")]
    DuplicateTransaction,
    #[error("snapshot round or references do not match")]
    ReferenceMismatch,
}

/// A chain's open round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheRound {
    pub node_id: Hash,
    pub number: u64,
    /// Max timestamp observed in the round; monotonic non-decreasing.
    pub timestamp: u64,
    pub references: RoundLink,
    pub snapshots: Vec<Snapshot>,
}

impl CacheRound {
    /// Open an empty round.
    pub fn new(node_id: Hash, number: u64, references: RoundLink) -> Self {
        CacheRound {
            node_id,
            number,
            timestamp: 0,
            references,
            snapshots: Vec::new(),
        }
    }

    /// The timestamp window covered by the contained snapshots, as
    /// `(start, end)`. An empty round yields `(u64::MAX, 0)`.
    pub fn gap(&self) -> (u64, u64) {
        let mut start = u64::MAX;
        let mut end = 0u64;
        for s in &self.snapshots {
            start = start.min(s.timestamp);
            end = end.max(s.timestamp);
        }
        (start, end)
    }

    /// Check a snapshot against this round; with `finalize` it is appended
    /// and the round timestamp advances.
    ///
    /// Enforces: matching chain, number, and references; strictly increasing
    /// timestamps; the round-gap bound; one snapshot per transaction.
    pub fn validate_snapshot(
        &mut self,
        s: &Snapshot,
        finalize: bool,
        round_gap: u64,
    ) -> Result<(), RoundError> {
        if s.node_id != self.node_id
            || s.round_number != self.number
            || s.references != self.references
        {
            return Err(RoundError::ReferenceMismatch);
        }
        let mut latest = 0u64;
        for existing in &self.snapshots {
            if existing.transaction == s.transaction {
                return Err(RoundError::DuplicateTransaction);
            }
            latest = latest.max(existing.timestamp);
        }
        if latest >= s.timestamp {
            return Err(RoundError::OutOfOrder {
                snapshot: s.timestamp,
                latest,
            });
        }
        let (start, _) = self.gap();
        let start = start.min(s.timestamp);
        if s.timestamp - start >= round_gap {
            return Err(RoundError::GapExceeded);
        }
        if finalize {
            self.snapshots.push(s.clone());
            self.timestamp = self.timestamp.max(s.timestamp);
        }
        Ok(())
    }

    /// Seal the round. Returns `None` while the round holds no snapshots:
    /// an empty round has no timestamp window and cannot be referenced.
    pub fn as_final(&self) -> Option<FinalRound> {
        if self.snapshots.is_empty() {
            return None;
        }
        let (start, end) = self.gap();
        let mut hasher = blake3::Hasher::new_derive_key("vela.round.final");
        hasher.update(&self.node_id);
        hasher.update(&self.number.to_le_bytes());
        for s in &self.snapshots {
            hasher.update(&s.hash);
        }
        Some(FinalRound {
            node_id: self.node_id,
            number: self.number,
            start,
            end,
            hash: *hasher.finalize().as_bytes(),
        })
    }
}

/// A chain's sealed round. Never mutated once produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalRound {
    pub node_id: Hash,
    pub number: u64,
    pub start: u64,
    pub end: u64,
    pub hash: Hash,
}

impl FinalRound {
    /// The synthetic round 0 every chain starts from.
    pub fn genesis(node_id: Hash, epoch: u64) -> Self {
        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&node_id);
        data.extend_from_slice(&epoch.to_le_bytes());
        FinalRound {
            node_id,
            number: 0,
            start: epoch,
            end: epoch,
            hash: crate::hash_domain(b"vela.round.genesis", &data),
        }
    }
}
