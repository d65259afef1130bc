//! Snapshots: the entries of the DAG ledger.

use serde::{Deserialize, Serialize};

use crate::crypto::cosi::CosiSignature;
use crate::Hash;

/// The two DAG edges leaving a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLink {
    /// Hash of the prior final round on the same chain.
    pub self_hash: Hash,
    /// Hash of a final round on another chain.
    pub external: Hash,
}

/// An entry proposed by a committee node recording one transaction plus its
/// DAG links.
///
/// `hash` is derived from the payload and never serialized; receivers
/// recompute it before trusting an incoming snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u8,
    /// The proposing chain.
    pub node_id: Hash,
    pub round_number: u64,
    pub references: RoundLink,
    /// Hash reference to the carried transaction.
    pub transaction: Hash,
    /// Nanoseconds since the UNIX epoch; zero until the proposer stamps it.
    pub timestamp: u64,
    /// Aggregate collective signature, present once committed.
    pub signature: Option<CosiSignature>,
    /// Payload hash; excluded from the wire and from the payload digest.
    #[serde(skip)]
    pub hash: Hash,
}

impl Snapshot {
    /// A fresh unstamped snapshot for the proposer path.
    pub fn new(node_id: Hash, transaction: Hash) -> Self {
        Snapshot {
            version: crate::constants::SNAPSHOT_VERSION,
            node_id,
            round_number: 0,
            references: RoundLink {
                self_hash: [0u8; 32],
                external: [0u8; 32],
            },
            transaction,
            timestamp: 0,
            signature: None,
            hash: [0u8; 32],
        }
    }

    /// Deterministic digest over every payload field, excluding signatures.
    ///
    /// Stable across implementations: fixed field order, little-endian
    /// integers.
    pub fn payload_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new_derive_key("vela.snapshot.payload");
        hasher.update(&[self.version]);
        hasher.update(&self.node_id);
        hasher.update(&self.round_number.to_le_bytes());
        hasher.update(&self.references.self_hash);
        hasher.update(&self.references.external);
        hasher.update(&self.transaction);
        hasher.update(&self.timestamp.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// A finalized snapshot together with its global write position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotWithTopologicalOrder {
    pub snapshot: Snapshot,
    pub topological_order: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cosi::CosiSignature;
    use std::collections::BTreeMap;

    fn sample() -> Snapshot {
        let mut s = Snapshot::new([1u8; 32], [2u8; 32]);
        s.round_number = 7;
        s.references = RoundLink {
            self_hash: [3u8; 32],
            external: [4u8; 32],
        };
        s.timestamp = 1_000_000_000;
        s
    }

    #[test]
    fn payload_hash_ignores_signature() {
        let mut s = sample();
        let before = s.payload_hash();
        s.signature = Some(CosiSignature::aggregate_commitments(&BTreeMap::new()).unwrap());
        assert_eq!(before, s.payload_hash());
    }

    #[test]
    fn payload_hash_covers_every_field() {
        let base = sample().payload_hash();

        let mut s = sample();
        s.timestamp += 1;
        assert_ne!(base, s.payload_hash());

        let mut s = sample();
        s.round_number += 1;
        assert_ne!(base, s.payload_hash());

        let mut s = sample();
        s.references.external = [9u8; 32];
        assert_ne!(base, s.payload_hash());

        let mut s = sample();
        s.transaction = [9u8; 32];
        assert_ne!(base, s.payload_hash());
    }

    #[test]
    fn derived_hash_not_serialized() {
        let mut s = sample();
        s.hash = s.payload_hash();
        let bytes = bincode::serialize(&s).unwrap();
        let back: Snapshot = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.hash, [0u8; 32]);
        assert_eq!(back.payload_hash(), s.hash);
    }
}
