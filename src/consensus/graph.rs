//! The local round graph: every chain's open and sealed head.
//!
//! Chains are entries in a registry keyed by node id; nothing holds a back
//! pointer. The dispatcher is the only writer. After every handled action it
//! refreshes the *final cache*, a per-chain summary of sealed heads that
//! peers compare against to pick a topological offset for graph sync.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::consensus::committee::CommitteeMember;
use crate::consensus::round::{CacheRound, FinalRound};
use crate::consensus::snapshot::RoundLink;
use crate::Hash;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("round graph needs at least two chains, got {0}")]
    CommitteeTooSmall(usize),
}

/// A chain's current rounds: the sealed head and the open head above it.
#[derive(Clone, Debug)]
pub struct ChainRounds {
    pub final_round: FinalRound,
    pub cache: CacheRound,
}

/// One chain's sealed head, as advertised to peers for graph sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub node_id: Hash,
    pub number: u64,
    pub hash: Hash,
}

/// The per-chain round registry.
#[derive(Debug, Default)]
pub struct RoundGraph {
    chains: HashMap<Hash, ChainRounds>,
    /// Latest timestamp observed across all chains.
    pub graph_timestamp: u64,
    final_cache: Vec<SyncPoint>,
}

impl RoundGraph {
    pub fn new() -> Self {
        RoundGraph::default()
    }

    /// Seed every chain with its synthetic genesis round and an open round 1.
    ///
    /// Each chain's first external reference points at the genesis round of
    /// the next member in sorted order, so no chain references itself.
    /// Returns the genesis rounds for persistence.
    pub fn bootstrap(
        &mut self,
        members: &[CommitteeMember],
        epoch: u64,
    ) -> Result<Vec<FinalRound>, GraphError> {
        if members.len() < 2 {
            return Err(GraphError::CommitteeTooSmall(members.len()));
        }
        let mut ids: Vec<Hash> = members.iter().map(|m| m.node_id).collect();
        ids.sort();
        let rounds: Vec<FinalRound> = ids
            .iter()
            .map(|id| FinalRound::genesis(*id, epoch))
            .collect();
        for (i, genesis) in rounds.iter().enumerate() {
            let external = rounds[(i + 1) % rounds.len()];
            let cache = CacheRound::new(
                genesis.node_id,
                1,
                RoundLink {
                    self_hash: genesis.hash,
                    external: external.hash,
                },
            );
            self.chains.insert(
                genesis.node_id,
                ChainRounds {
                    final_round: *genesis,
                    cache,
                },
            );
        }
        self.refresh_final_cache();
        Ok(rounds)
    }

    pub fn chain(&self, node_id: &Hash) -> Option<&ChainRounds> {
        self.chains.get(node_id)
    }

    /// Working copy of a chain's open round.
    pub fn cache_copy(&self, node_id: &Hash) -> Option<CacheRound> {
        self.chains.get(node_id).map(|c| c.cache.clone())
    }

    /// Working copy of a chain's sealed head.
    pub fn final_copy(&self, node_id: &Hash) -> Option<FinalRound> {
        self.chains.get(node_id).map(|c| c.final_round)
    }

    /// Install a chain's new rounds. The pair must describe one chain.
    pub fn assign_round(&mut self, final_round: FinalRound, cache: CacheRound) {
        if final_round.node_id != cache.node_id {
            panic!(
                "round graph corrupted: assigning rounds of {} under {}",
                hex::encode(cache.node_id),
                hex::encode(final_round.node_id)
            );
        }
        self.chains
            .insert(cache.node_id, ChainRounds { final_round, cache });
    }

    pub fn chains(&self) -> impl Iterator<Item = (&Hash, &ChainRounds)> {
        self.chains.iter()
    }

    /// Rebuild the sync summary and the observed graph timestamp.
    pub fn refresh_final_cache(&mut self) -> &[SyncPoint] {
        let mut points: Vec<SyncPoint> = self
            .chains
            .values()
            .map(|c| SyncPoint {
                node_id: c.final_round.node_id,
                number: c.final_round.number,
                hash: c.final_round.hash,
            })
            .collect();
        points.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        self.final_cache = points;
        self.graph_timestamp = self
            .chains
            .values()
            .map(|c| c.final_round.end.max(c.cache.timestamp))
            .max()
            .unwrap_or(0);
        &self.final_cache
    }

    pub fn final_cache(&self) -> &[SyncPoint] {
        &self.final_cache
    }
}

/// Compare a remote graph summary against the local one and pick the
/// topological offset a lagging neighbor must be fed from.
///
/// For every remote chain we have caught up with (local number at or past
/// the remote's), `last_topology` supplies the write position of the last
/// snapshot in the remote's head round; the smallest such position wins.
/// Rounds with no recorded snapshots (a synthetic genesis head) clamp to 1
/// so a fresh neighbor receives history from the first snapshot. Returns 0
/// when the remote is ahead everywhere.
pub fn topological_offset<F>(local: &[SyncPoint], remote: &[SyncPoint], mut last_topology: F) -> u64
where
    F: FnMut(&SyncPoint) -> Option<u64>,
{
    let by_id: HashMap<&Hash, &SyncPoint> = local.iter().map(|p| (&p.node_id, p)).collect();
    let mut offset = 0u64;
    for r in remote {
        let l = match by_id.get(&r.node_id) {
            Some(l) => l,
            None => continue,
        };
        if l.number < r.number {
            continue;
        }
        let topo = last_topology(r).unwrap_or(1).max(1);
        if offset == 0 || topo < offset {
            offset = topo;
        }
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    fn members(n: u8) -> Vec<CommitteeMember> {
        (1..=n)
            .map(|i| CommitteeMember {
                node_id: [i; 32],
                signer: Keypair::generate().public,
                accepted_at: 0,
            })
            .collect()
    }

    #[test]
    fn bootstrap_weaves_chains_without_self_reference() {
        let mut graph = RoundGraph::new();
        let rounds = graph.bootstrap(&members(3), 1_000).unwrap();
        assert_eq!(rounds.len(), 3);
        for (id, chain) in graph.chains() {
            assert_eq!(chain.cache.number, 1);
            assert_eq!(chain.cache.references.self_hash, chain.final_round.hash);
            let external = rounds
                .iter()
                .find(|r| r.hash == chain.cache.references.external)
                .unwrap();
            assert_ne!(external.node_id, *id);
        }
    }

    #[test]
    fn bootstrap_rejects_singleton() {
        let mut graph = RoundGraph::new();
        assert_eq!(
            graph.bootstrap(&members(1), 0).unwrap_err(),
            GraphError::CommitteeTooSmall(1)
        );
    }

    #[test]
    fn final_cache_tracks_observed_time() {
        let mut graph = RoundGraph::new();
        graph.bootstrap(&members(2), 500).unwrap();
        assert_eq!(graph.graph_timestamp, 500);

        let mut chain = graph.chain(&[1u8; 32]).unwrap().clone();
        chain.cache.timestamp = 9_000;
        graph.assign_round(chain.final_round, chain.cache);
        graph.refresh_final_cache();
        assert_eq!(graph.graph_timestamp, 9_000);
        assert_eq!(graph.final_cache().len(), 2);
    }

    #[test]
    fn offset_picks_minimum_over_caught_up_chains() {
        let point = |id: u8, number: u64| SyncPoint {
            node_id: [id; 32],
            number,
            hash: [id; 32],
        };
        let local = vec![point(1, 5), point(2, 3)];
        let remote = vec![point(1, 4), point(2, 9)];
        // Chain 2 is ahead of us and must be skipped; chain 1 yields its topo.
        let offset = topological_offset(&local, &remote, |p| {
            assert_eq!(p.node_id, [1u8; 32]);
            Some(42)
        });
        assert_eq!(offset, 42);
    }

    #[test]
    fn offset_clamps_empty_rounds_to_one() {
        let point = |id: u8, number: u64| SyncPoint {
            node_id: [id; 32],
            number,
            hash: [id; 32],
        };
        let local = vec![point(1, 1)];
        let remote = vec![point(1, 0)];
        assert_eq!(topological_offset(&local, &remote, |_| None), 1);
    }
}
