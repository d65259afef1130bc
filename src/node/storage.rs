//! Persistent storage for consensus data.
//!
//! Provides a `Store` trait carrying the contract the consensus core needs
//! (transactions and their gossip cache, final rounds, cross-chain links,
//! round heads, topologically ordered snapshots, committee membership)
//! plus a sled-backed implementation.
//!
//! Storage *reads* surface recoverable errors; failed consensus-critical
//! *writes* are escalated to panics by the callers, never absorbed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::consensus::committee::CommitteeMember;
use crate::consensus::round::FinalRound;
use crate::consensus::snapshot::{RoundLink, SnapshotWithTopologicalOrder};
use crate::network::PeerId;
use crate::transaction::VersionedTransaction;
use crate::Hash;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A chain's persisted head-round marker.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RoundHead {
    number: u64,
    references: RoundLink,
    start: u64,
}

/// Trait for consensus storage backends.
pub trait Store: Send + Sync {
    fn read_transaction(&self, hash: &Hash)
        -> Result<Option<VersionedTransaction>, StorageError>;
    fn write_transaction(&self, tx: &VersionedTransaction) -> Result<(), StorageError>;

    /// Fetch a transaction seen in gossip but not yet persisted.
    fn cache_get_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<VersionedTransaction>, StorageError>;
    fn cache_put_transaction(
        &self,
        peer: PeerId,
        tx: &VersionedTransaction,
    ) -> Result<(), StorageError>;

    fn read_round(&self, hash: &Hash) -> Result<Option<FinalRound>, StorageError>;
    fn write_round(&self, round: &FinalRound) -> Result<(), StorageError>;

    /// The highest round number of `to` referenced from `from`'s chain, or
    /// `None` when `from` has never referenced `to`.
    fn read_link(&self, from: &Hash, to: &Hash) -> Result<Option<u64>, StorageError>;

    /// Persist a chain's new head round and advance the cross-chain link to
    /// its external reference.
    fn start_new_round(
        &self,
        node: &Hash,
        number: u64,
        references: &RoundLink,
        start: u64,
    ) -> Result<(), StorageError>;

    /// Rewrite the references of a head round that holds no snapshots yet.
    fn update_empty_head_round(
        &self,
        node: &Hash,
        number: u64,
        references: &RoundLink,
    ) -> Result<(), StorageError>;

    fn write_snapshot(&self, snapshot: &SnapshotWithTopologicalOrder) -> Result<(), StorageError>;

    /// Whether the chain already records this transaction.
    fn check_transaction_in_node(&self, node: &Hash, tx_hash: &Hash)
        -> Result<bool, StorageError>;

    /// Whether any finalized snapshot carries this transaction.
    fn is_transaction_finalized(&self, tx_hash: &Hash) -> Result<bool, StorageError>;

    fn read_snapshots_for_round(
        &self,
        node: &Hash,
        number: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StorageError>;
    fn read_snapshots_since_topology(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StorageError>;

    /// The highest assigned topological order, 0 when empty.
    fn last_topology(&self) -> Result<u64, StorageError>;

    fn read_committee(&self) -> Result<Vec<CommitteeMember>, StorageError>;
    fn write_committee_member(&self, member: &CommitteeMember) -> Result<(), StorageError>;
}

/// Globally monotonic topological positions, one per persisted snapshot.
#[derive(Debug)]
pub struct TopologyCounter {
    last: AtomicU64,
}

impl TopologyCounter {
    /// Resume counting after the given position.
    pub fn new(last: u64) -> Self {
        TopologyCounter {
            last: AtomicU64::new(last),
        }
    }

    /// The next unique position. Positions start at 1.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Sled-backed storage implementation.
pub struct SledStore {
    #[allow(dead_code)]
    db: sled::Db,
    transactions: sled::Tree,
    tx_cache: sled::Tree,
    rounds: sled::Tree,
    round_heads: sled::Tree,
    links: sled::Tree,
    snapshots: sled::Tree,
    round_index: sled::Tree,
    node_txs: sled::Tree,
    finalized_txs: sled::Tree,
    committee: sled::Tree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn io_err(e: sled::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

fn pair_key(a: &Hash, b: &Hash) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(a);
    key[32..].copy_from_slice(b);
    key
}

impl SledStore {
    /// Open or create a sled database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(io_err)?;
        Self::from_db(db)
    }

    /// Open a temporary in-memory database (for testing).
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(io_err)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(SledStore {
            transactions: db.open_tree("transactions").map_err(io_err)?,
            tx_cache: db.open_tree("tx_cache").map_err(io_err)?,
            rounds: db.open_tree("rounds").map_err(io_err)?,
            round_heads: db.open_tree("round_heads").map_err(io_err)?,
            links: db.open_tree("links").map_err(io_err)?,
            snapshots: db.open_tree("snapshots").map_err(io_err)?,
            round_index: db.open_tree("round_index").map_err(io_err)?,
            node_txs: db.open_tree("node_txs").map_err(io_err)?,
            finalized_txs: db.open_tree("finalized_txs").map_err(io_err)?,
            committee: db.open_tree("committee").map_err(io_err)?,
            db,
        })
    }

    /// Advance `from → external.node` to the external round's number.
    fn advance_link(&self, from: &Hash, references: &RoundLink) -> Result<(), StorageError> {
        let external = match self.read_round(&references.external)? {
            Some(round) => round,
            None => return Ok(()),
        };
        let key = pair_key(from, &external.node_id);
        let current = self
            .links
            .get(key)
            .map_err(io_err)?
            .map(|v| decode::<u64>(&v))
            .transpose()?;
        if current.map_or(true, |number| external.number > number) {
            self.links
                .insert(key, encode(&external.number)?)
                .map_err(io_err)?;
        }
        Ok(())
    }

    fn read_snapshot_at(&self, topology: u64) -> Result<SnapshotWithTopologicalOrder, StorageError> {
        let bytes = self
            .snapshots
            .get(topology.to_be_bytes())
            .map_err(io_err)?
            .ok_or_else(|| StorageError::Io(format!("missing snapshot at topology {topology}")))?;
        let mut entry: SnapshotWithTopologicalOrder = decode(&bytes)?;
        entry.snapshot.hash = entry.snapshot.payload_hash();
        Ok(entry)
    }
}

impl Store for SledStore {
    fn read_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<VersionedTransaction>, StorageError> {
        self.transactions
            .get(hash)
            .map_err(io_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    fn write_transaction(&self, tx: &VersionedTransaction) -> Result<(), StorageError> {
        self.transactions
            .insert(tx.hash(), encode(tx)?)
            .map_err(io_err)?;
        Ok(())
    }

    fn cache_get_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<VersionedTransaction>, StorageError> {
        self.tx_cache
            .get(hash)
            .map_err(io_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    fn cache_put_transaction(
        &self,
        _peer: PeerId,
        tx: &VersionedTransaction,
    ) -> Result<(), StorageError> {
        self.tx_cache
            .insert(tx.hash(), encode(tx)?)
            .map_err(io_err)?;
        Ok(())
    }

    fn read_round(&self, hash: &Hash) -> Result<Option<FinalRound>, StorageError> {
        self.rounds
            .get(hash)
            .map_err(io_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    fn write_round(&self, round: &FinalRound) -> Result<(), StorageError> {
        self.rounds
            .insert(round.hash, encode(round)?)
            .map_err(io_err)?;
        Ok(())
    }

    fn read_link(&self, from: &Hash, to: &Hash) -> Result<Option<u64>, StorageError> {
        self.links
            .get(pair_key(from, to))
            .map_err(io_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    fn start_new_round(
        &self,
        node: &Hash,
        number: u64,
        references: &RoundLink,
        start: u64,
    ) -> Result<(), StorageError> {
        let head = RoundHead {
            number,
            references: *references,
            start,
        };
        self.round_heads
            .insert(node, encode(&head)?)
            .map_err(io_err)?;
        self.advance_link(node, references)
    }

    fn update_empty_head_round(
        &self,
        node: &Hash,
        number: u64,
        references: &RoundLink,
    ) -> Result<(), StorageError> {
        let start = self
            .round_heads
            .get(node)
            .map_err(io_err)?
            .map(|v| decode::<RoundHead>(&v))
            .transpose()?
            .map(|h| h.start)
            .unwrap_or(0);
        let head = RoundHead {
            number,
            references: *references,
            start,
        };
        self.round_heads
            .insert(node, encode(&head)?)
            .map_err(io_err)?;
        self.advance_link(node, references)
    }

    fn write_snapshot(&self, snapshot: &SnapshotWithTopologicalOrder) -> Result<(), StorageError> {
        let s = &snapshot.snapshot;
        let topology = snapshot.topological_order.to_be_bytes();
        self.snapshots
            .insert(topology, encode(snapshot)?)
            .map_err(io_err)?;

        let mut round_key = Vec::with_capacity(48);
        round_key.extend_from_slice(&s.node_id);
        round_key.extend_from_slice(&s.round_number.to_be_bytes());
        round_key.extend_from_slice(&topology);
        self.round_index
            .insert(round_key, &topology)
            .map_err(io_err)?;

        self.node_txs
            .insert(pair_key(&s.node_id, &s.transaction), &topology)
            .map_err(io_err)?;
        self.finalized_txs
            .insert(s.transaction, &topology)
            .map_err(io_err)?;
        Ok(())
    }

    fn check_transaction_in_node(
        &self,
        node: &Hash,
        tx_hash: &Hash,
    ) -> Result<bool, StorageError> {
        self.node_txs
            .contains_key(pair_key(node, tx_hash))
            .map_err(io_err)
    }

    fn is_transaction_finalized(&self, tx_hash: &Hash) -> Result<bool, StorageError> {
        self.finalized_txs.contains_key(tx_hash).map_err(io_err)
    }

    fn read_snapshots_for_round(
        &self,
        node: &Hash,
        number: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StorageError> {
        let mut prefix = Vec::with_capacity(40);
        prefix.extend_from_slice(node);
        prefix.extend_from_slice(&number.to_be_bytes());
        let mut out = Vec::new();
        for item in self.round_index.scan_prefix(prefix) {
            let (_, topology) = item.map_err(io_err)?;
            let topology = u64::from_be_bytes(
                topology
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Serialization("bad topology index".into()))?,
            );
            out.push(self.read_snapshot_at(topology)?);
        }
        Ok(out)
    }

    fn read_snapshots_since_topology(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StorageError> {
        let mut out = Vec::new();
        for item in self.snapshots.range(offset.to_be_bytes()..) {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = item.map_err(io_err)?;
            let mut entry: SnapshotWithTopologicalOrder = decode(&bytes)?;
            entry.snapshot.hash = entry.snapshot.payload_hash();
            out.push(entry);
        }
        Ok(out)
    }

    fn last_topology(&self) -> Result<u64, StorageError> {
        match self.snapshots.last().map_err(io_err)? {
            Some((key, _)) => Ok(u64::from_be_bytes(key.as_ref().try_into().map_err(
                |_| StorageError::Serialization("bad snapshot key".into()),
            )?)),
            None => Ok(0),
        }
    }

    fn read_committee(&self) -> Result<Vec<CommitteeMember>, StorageError> {
        let mut members = Vec::new();
        for item in self.committee.iter() {
            let (_, bytes) = item.map_err(io_err)?;
            members.push(decode(&bytes)?);
        }
        Ok(members)
    }

    fn write_committee_member(&self, member: &CommitteeMember) -> Result<(), StorageError> {
        self.committee
            .insert(member.node_id, encode(member)?)
            .map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::snapshot::Snapshot;
    use crate::crypto::keys::Keypair;

    fn store() -> SledStore {
        SledStore::temporary().unwrap()
    }

    fn snapshot(node: u8, round: u64, tx: u8, topology: u64) -> SnapshotWithTopologicalOrder {
        let mut s = Snapshot::new([node; 32], [tx; 32]);
        s.round_number = round;
        s.timestamp = topology * 1_000;
        s.hash = s.payload_hash();
        SnapshotWithTopologicalOrder {
            snapshot: s,
            topological_order: topology,
        }
    }

    #[test]
    fn transaction_round_trip_and_cache() {
        let store = store();
        let tx = VersionedTransaction::new(1, vec![1, 2, 3]);
        assert!(store.read_transaction(&tx.hash()).unwrap().is_none());

        store.cache_put_transaction([9u8; 32], &tx).unwrap();
        assert_eq!(store.cache_get_transaction(&tx.hash()).unwrap(), Some(tx.clone()));
        assert!(store.read_transaction(&tx.hash()).unwrap().is_none());

        store.write_transaction(&tx).unwrap();
        assert_eq!(store.read_transaction(&tx.hash()).unwrap(), Some(tx));
    }

    #[test]
    fn snapshots_keep_topological_order_and_hash() {
        let store = store();
        for topo in 1..=5u64 {
            store.write_snapshot(&snapshot(1, 1, topo as u8, topo)).unwrap();
        }
        assert_eq!(store.last_topology().unwrap(), 5);

        let since = store.read_snapshots_since_topology(3, 10).unwrap();
        assert_eq!(
            since.iter().map(|s| s.topological_order).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        // The derived hash is rebuilt on read.
        assert_eq!(since[0].snapshot.hash, since[0].snapshot.payload_hash());
        assert_ne!(since[0].snapshot.hash, [0u8; 32]);

        let limited = store.read_snapshots_since_topology(1, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn round_index_scopes_by_chain_and_number() {
        let store = store();
        store.write_snapshot(&snapshot(1, 1, 1, 1)).unwrap();
        store.write_snapshot(&snapshot(1, 2, 2, 2)).unwrap();
        store.write_snapshot(&snapshot(2, 1, 3, 3)).unwrap();

        let round = store.read_snapshots_for_round(&[1u8; 32], 1).unwrap();
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].topological_order, 1);
        assert!(store.read_snapshots_for_round(&[3u8; 32], 1).unwrap().is_empty());
    }

    #[test]
    fn node_transaction_presence() {
        let store = store();
        store.write_snapshot(&snapshot(1, 1, 7, 1)).unwrap();
        assert!(store
            .check_transaction_in_node(&[1u8; 32], &[7u8; 32])
            .unwrap());
        assert!(!store
            .check_transaction_in_node(&[2u8; 32], &[7u8; 32])
            .unwrap());
        assert!(store.is_transaction_finalized(&[7u8; 32]).unwrap());
        assert!(!store.is_transaction_finalized(&[8u8; 32]).unwrap());
    }

    #[test]
    fn starting_a_round_advances_the_link() {
        let store = store();
        let external = FinalRound {
            node_id: [2u8; 32],
            number: 9,
            start: 0,
            end: 0,
            hash: [0xab; 32],
        };
        store.write_round(&external).unwrap();

        let references = RoundLink {
            self_hash: [1u8; 32],
            external: external.hash,
        };
        assert_eq!(store.read_link(&[1u8; 32], &[2u8; 32]).unwrap(), None);
        store
            .start_new_round(&[1u8; 32], 4, &references, 1_000)
            .unwrap();
        assert_eq!(store.read_link(&[1u8; 32], &[2u8; 32]).unwrap(), Some(9));

        // A later head referencing an older external never regresses it.
        let older = FinalRound {
            number: 3,
            hash: [0xcd; 32],
            ..external
        };
        store.write_round(&older).unwrap();
        store
            .update_empty_head_round(
                &[1u8; 32],
                4,
                &RoundLink {
                    self_hash: [1u8; 32],
                    external: older.hash,
                },
            )
            .unwrap();
        assert_eq!(store.read_link(&[1u8; 32], &[2u8; 32]).unwrap(), Some(9));
    }

    #[test]
    fn committee_membership_round_trip() {
        let store = store();
        let member = CommitteeMember {
            node_id: [1u8; 32],
            signer: Keypair::generate().public,
            accepted_at: 77,
        };
        store.write_committee_member(&member).unwrap();
        let members = store.read_committee().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].node_id, member.node_id);
        assert_eq!(members[0].accepted_at, 77);
    }

    #[test]
    fn topology_counter_is_monotonic() {
        let counter = TopologyCounter::new(41);
        assert_eq!(counter.next(), 42);
        assert_eq!(counter.next(), 43);
    }
}
