//! Round operations that consult storage: best-round selection and
//! new-round construction.

use crate::consensus::round::{CacheRound, FinalRound};
use crate::consensus::snapshot::Snapshot;
use crate::node::storage::StorageError;
use crate::node::Dispatcher;

/// The outcome of starting a chain's next round.
pub(crate) struct NewRound {
    /// The prior cache round, sealed.
    pub sealed: FinalRound,
    /// Set when the external reference was not resolvable and a placeholder
    /// must stand in for it.
    pub dummy: bool,
}

/// Why a round could not be started yet. All variants are transient; the
/// caller re-queues and retries.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RoundStartError {
    #[error("prior round has no snapshots to seal")]
    NotCollected,
    #[error("self reference does not match the sealed round")]
    SelfMismatch,
    #[error("external round not known yet")]
    ExternalUnknown,
    #[error("chain not accepted yet")]
    NotAccepted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Dispatcher {
    /// The best external reference for a snapshot stamped at `ts`: the most
    /// recent final round of another chain that is at least one gap old and
    /// would advance our recorded cross-chain link. Ties break by higher
    /// round number, then lexicographic node id.
    pub(crate) fn determine_best_round(&self, ts: u64) -> Option<FinalRound> {
        let node = &self.node;
        let round_gap = node.consensus.round_gap;
        let mut best: Option<FinalRound> = None;
        for (id, chain) in self.graph.chains() {
            if *id == node.node_id {
                continue;
            }
            let round = chain.final_round;
            if round.end + round_gap > ts {
                continue;
            }
            let link = match node.store.read_link(&node.node_id, &round.node_id) {
                Ok(link) => link,
                Err(e) => {
                    tracing::debug!(error = %e, "link read failed during best-round selection");
                    continue;
                }
            };
            if link.is_some_and(|number| round.number <= number) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => match round.number.cmp(&current.number) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => round.node_id < current.node_id,
                },
            };
            if better {
                best = Some(round);
            }
        }
        best
    }

    /// Seal `cache` and validate the snapshot's references for the round
    /// above it.
    ///
    /// `Err` means the round may become startable later (missing snapshots,
    /// unresolved external): re-queue. `Ok(None)` means the references can
    /// never be adopted (stale or non-advancing external): drop. With
    /// `allow_dummy`, an unknown external yields a placeholder round for
    /// the finalization replay path instead of an error.
    pub(crate) fn start_new_round(
        &self,
        s: &Snapshot,
        cache: &CacheRound,
        allow_dummy: bool,
    ) -> Result<Option<NewRound>, RoundStartError> {
        if s.round_number != cache.number + 1 {
            panic!(
                "starting round {} above cache round {}",
                s.round_number, cache.number
            );
        }
        let node = &self.node;
        let sealed = cache.as_final().ok_or(RoundStartError::NotCollected)?;
        if s.references.self_hash != sealed.hash {
            return Err(RoundStartError::SelfMismatch);
        }

        let external = match node.store.read_round(&s.references.external)? {
            Some(round) => round,
            None if allow_dummy => {
                return Ok(Some(NewRound {
                    sealed,
                    dummy: true,
                }))
            }
            None => return Err(RoundStartError::ExternalUnknown),
        };
        if external.node_id == s.node_id {
            return Ok(None);
        }
        if let Some(previous) = node.store.read_round(&cache.references.external)? {
            if external.start + node.consensus.reference_window() < previous.start {
                return Ok(None);
            }
        }
        let link = node.store.read_link(&s.node_id, &external.node_id)?;
        if link.is_some_and(|number| external.number <= number) {
            return Ok(None);
        }
        Ok(Some(NewRound {
            sealed,
            dummy: false,
        }))
    }

    /// Replay path ahead of accepting a finalization: if the snapshot sits
    /// one round above the chain's head, roll the head forward, with a
    /// placeholder external reference when the real one is not yet known.
    pub(crate) fn try_to_start_new_round(&mut self, s: &Snapshot) -> Result<(), RoundStartError> {
        let (cache, _) = match self.graph.chain(&s.node_id) {
            Some(chain) => (chain.cache.clone(), chain.final_round),
            None if s.round_number == 0 => return Ok(()),
            None => return Err(RoundStartError::NotAccepted),
        };
        if s.round_number != cache.number + 1 {
            return Ok(());
        }

        let dummy_external = cache.references.external;
        let new_round = match self.start_new_round(s, &cache, true)? {
            Some(new_round) => new_round,
            None => return Ok(()),
        };
        let sealed = new_round.sealed;

        let mut references = s.references;
        if new_round.dummy {
            // Keep the previous external until the real round is seen.
            references.external = dummy_external;
        }
        let cache = CacheRound {
            node_id: s.node_id,
            number: s.round_number,
            timestamp: s.timestamp,
            references,
            snapshots: Vec::new(),
        };
        if let Err(e) = self.node.store.write_round(&sealed) {
            panic!("sealed round write failed: {e}");
        }
        if let Err(e) = self.node.store.start_new_round(
            &cache.node_id,
            cache.number,
            &cache.references,
            sealed.start,
        ) {
            panic!("new round write failed: {e}");
        }
        self.graph.assign_round(sealed, cache);
        Ok(())
    }
}
