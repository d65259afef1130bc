//! The proposer path: announce, collect commitments, collect responses.
//!
//! One of our snapshots moves `SelfEmpty → SelfCommitment → SelfResponse`.
//! The announcement handler owns all round bookkeeping for our own chain
//! (timestamp stamping, empty-head reference refresh, round-gap rollover),
//! so that by the time peers see the announcement its round and references
//! are settled.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::consensus::round::CacheRound;
use crate::consensus::snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder};
use crate::crypto::cosi::{Commitment, CosiSignature};
use crate::network::PeerId;
use crate::node::storage::StorageError;
use crate::node::{CosiAggregator, Dispatcher};
use crate::Hash;

impl Dispatcher {
    /// Handle `SelfEmpty`: stamp, place into a round, and announce one of
    /// our own snapshots.
    pub(crate) async fn send_announcement(
        &mut self,
        peer_id: PeerId,
        mut s: Snapshot,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        if !node.is_caught_up() {
            node.clock
                .sleep(Duration::from_millis(crate::constants::CATCH_UP_RETRY_MS))
                .await;
            node.requeue_snapshot(peer_id, s, false);
            return Ok(());
        }

        if s.node_id != node.node_id
            || s.version != crate::constants::SNAPSHOT_VERSION
            || s.signature.is_some()
            || s.timestamp != 0
        {
            panic!(
                "proposer handed a foreign or stamped snapshot: node {} version {}",
                hex::encode(s.node_id),
                s.version
            );
        }

        let (tx, finalized) = match node.check_transaction(&s.transaction) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "transaction lookup failed, requeueing proposal");
                node.requeue_snapshot(peer_id, s, false);
                return Ok(());
            }
        };
        let tx = match (tx, finalized) {
            (_, true) | (None, false) => return Ok(()),
            (Some(tx), false) => tx,
        };
        if !node.validate_kernel_snapshot(&s, &tx) {
            return Ok(());
        }
        if let Err(e) = node.store.write_transaction(&tx) {
            tracing::warn!(error = %e, "transaction write failed, dropping proposal");
            return Ok(());
        }

        if self.is_initial_accept(&s) {
            s.timestamp = node.clock.now_nanos();
            s.hash = s.payload_hash();
            let record = Arc::new(Mutex::new(CosiAggregator::new(s.clone(), tx)));
            node.aggregators.set(s.transaction, record.clone());
            node.aggregators.set(s.hash, record);
            node.broadcast_announcement(&s).await;
            return Ok(());
        }

        // One in-flight aggregation per transaction.
        if node.aggregators.get(&s.transaction).is_some() {
            return Ok(());
        }
        let record = Arc::new(Mutex::new(CosiAggregator::new(s.clone(), tx)));
        node.aggregators.set(s.transaction, record.clone());

        let round_gap = node.consensus.round_gap;
        let mut cache = match self.graph.cache_copy(&s.node_id) {
            Some(cache) => cache,
            None => panic!("round graph has no rounds for our own chain"),
        };
        let mut final_round = match self.graph.final_copy(&s.node_id) {
            Some(round) => round,
            None => panic!("round graph has no final round for our own chain"),
        };

        // Do not open our first round before anyone has heard from us.
        if cache.snapshots.is_empty() && !node.has_broadcasted() {
            node.clock.sleep(Duration::from_nanos(round_gap / 2)).await;
            node.clear_and_requeue(s);
            return Ok(());
        }

        // Snapshot timestamps are strictly monotonic within a round.
        loop {
            s.timestamp = node.clock.now_nanos();
            if s.timestamp > cache.timestamp {
                break;
            }
            node.clock
                .sleep(Duration::from_millis(crate::constants::TIMESTAMP_WAIT_MS))
                .await;
        }

        if cache.snapshots.is_empty() {
            // An empty head may sit on a stale external; adopt a much newer
            // round before stamping anything into this one.
            let external = match node.store.read_round(&cache.references.external)? {
                Some(round) => round,
                None => panic!(
                    "own head references unknown external round {}",
                    hex::encode(cache.references.external)
                ),
            };
            let best = self.determine_best_round(s.timestamp);
            let stale_after = external.start
                + node.consensus.reference_window() * node.consensus.proposer_refresh_factor;
            if let Some(best) = best {
                if best.node_id != final_round.node_id && stale_after < best.start {
                    let link = node.store.read_link(&cache.node_id, &best.node_id)?;
                    if link.is_some_and(|number| best.number <= number) {
                        node.clear_and_requeue(s);
                        return Ok(());
                    }
                    cache = CacheRound::new(
                        cache.node_id,
                        cache.number,
                        RoundLink {
                            self_hash: final_round.hash,
                            external: best.hash,
                        },
                    );
                    if let Err(e) = node.store.update_empty_head_round(
                        &cache.node_id,
                        cache.number,
                        &cache.references,
                    ) {
                        panic!("empty head update failed: {e}");
                    }
                    self.graph.assign_round(final_round, cache);
                    node.clear_and_requeue(s);
                    return Ok(());
                }
            }
        } else {
            let (start, _) = cache.gap();
            if s.timestamp >= start + round_gap {
                // Time outran the round: seal it and open the next one.
                let best = match self.determine_best_round(s.timestamp) {
                    Some(best) => best,
                    None => {
                        node.clock.sleep(Duration::from_nanos(round_gap / 2)).await;
                        node.clear_and_requeue(s);
                        return Ok(());
                    }
                };
                if best.node_id == final_round.node_id {
                    panic!(
                        "rollover selected our own chain {} as external reference",
                        hex::encode(best.node_id)
                    );
                }

                final_round = match cache.as_final() {
                    Some(sealed) => sealed,
                    None => panic!("sealing a round that holds snapshots failed"),
                };
                cache = CacheRound::new(
                    s.node_id,
                    final_round.number + 1,
                    RoundLink {
                        self_hash: final_round.hash,
                        external: best.hash,
                    },
                );
                if let Err(e) = node.store.write_round(&final_round) {
                    panic!("sealed round write failed: {e}");
                }
                if let Err(e) = node.store.start_new_round(
                    &cache.node_id,
                    cache.number,
                    &cache.references,
                    final_round.start,
                ) {
                    panic!("new round write failed: {e}");
                }
            }
        }
        cache.timestamp = s.timestamp;

        s.round_number = cache.number;
        s.references = cache.references;
        s.hash = s.payload_hash();
        self.graph.assign_round(final_round, cache);

        record.lock().snapshot = s.clone();
        node.aggregators.set(s.hash, record);
        node.broadcast_announcement(&s).await;
        Ok(())
    }

    /// Handle `SelfCommitment`: record a peer's commitment; at threshold,
    /// aggregate and send challenges.
    pub(crate) async fn handle_commitment(
        &mut self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        commitment: Commitment,
        want_tx: bool,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        if !node.is_caught_up() {
            node.clock
                .sleep(Duration::from_millis(crate::constants::CATCH_UP_RETRY_MS))
                .await;
            return Ok(());
        }

        let record = match node.aggregators.get(&snapshot_hash) {
            Some(record) => record,
            None => return Ok(()),
        };

        // Everything under one short lock; challenge sends happen after.
        let (signature, tx, recipients) = {
            let mut aggregator = record.lock();
            if !aggregator.mark_committed(peer_id) {
                return Ok(());
            }
            let view = node.committee_view(aggregator.snapshot.timestamp);
            if !view.contains(&peer_id) {
                return Ok(());
            }
            let base = view.threshold();
            if aggregator.commitments.len() >= base {
                return Ok(());
            }
            let index = match view.index_of(&peer_id) {
                Some(index) => index,
                None => return Ok(()),
            };
            aggregator.commitments.insert(index, commitment);
            aggregator.want_txs.insert(peer_id, want_tx);
            if aggregator.commitments.len() < base {
                return Ok(());
            }

            let (tx, finalized) = node.check_transaction(&aggregator.snapshot.transaction)?;
            let tx = match (tx, finalized) {
                (_, true) | (None, false) => return Ok(()),
                (Some(tx), false) => tx,
            };
            let signature = match CosiSignature::aggregate_commitments(&aggregator.commitments) {
                Ok(signature) => signature,
                Err(e) => {
                    tracing::warn!(error = %e, "commitment aggregation failed");
                    return Ok(());
                }
            };
            aggregator.snapshot.signature = Some(signature);
            let recipients: Vec<(PeerId, bool)> = aggregator
                .want_txs
                .iter()
                .map(|(peer, want)| (*peer, *want))
                .collect();
            (signature, tx, recipients)
        };

        for (peer, want_tx) in recipients {
            let body = if want_tx { Some(tx.clone()) } else { None };
            if let Err(e) = node
                .peer
                .send_challenge(peer, snapshot_hash, signature, body)
                .await
            {
                tracing::debug!(peer = %hex::encode(&peer[..8]), error = %e, "challenge send failed");
            }
        }
        Ok(())
    }

    /// Handle `SelfResponse`: record a verified response; once every
    /// commitment has its response, aggregate, verify, persist, and
    /// broadcast the finalization.
    pub(crate) async fn handle_response(
        &mut self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        response: [u8; 32],
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        if !node.is_caught_up() {
            node.clock
                .sleep(Duration::from_millis(crate::constants::CATCH_UP_RETRY_MS))
                .await;
            return Ok(());
        }

        let record = match node.aggregators.get(&snapshot_hash) {
            Some(record) => record,
            None => return Ok(()),
        };

        let s = {
            let mut aggregator = record.lock();
            if aggregator.has_responded(&peer_id) {
                return Ok(());
            }
            let view = node.committee_view(aggregator.snapshot.timestamp);
            if !view.contains(&peer_id) {
                return Ok(());
            }
            if aggregator.responses.len() >= aggregator.commitments.len() {
                return Ok(());
            }

            let (tx, finalized) = node.check_transaction(&aggregator.snapshot.transaction)?;
            if finalized || tx.is_none() {
                return Ok(());
            }

            aggregator.mark_responded(peer_id);
            let index = match view.index_of(&peer_id) {
                Some(index) => index,
                None => return Ok(()),
            };
            aggregator.responses.insert(index, response);
            if aggregator.responses.len() != aggregator.commitments.len() {
                return Ok(());
            }

            let mut signature = match aggregator.snapshot.signature {
                Some(signature) => signature,
                None => return Ok(()),
            };
            if let Err(e) = signature.aggregate_responses(&aggregator.responses) {
                tracing::warn!(error = %e, "response aggregation failed");
                return Ok(());
            }
            aggregator.snapshot.signature = Some(signature);

            let base = view.threshold();
            if !signature.verify(&snapshot_hash, &view.keys(), base) {
                tracing::warn!(
                    snapshot = %hex::encode(&snapshot_hash[..8]),
                    "aggregate signature failed verification"
                );
                return Ok(());
            }
            aggregator.snapshot.clone()
        };

        if self.is_initial_accept(&s) {
            self.finalize_initial_accept(&s);
            node.broadcast_finalization(&s).await;
            node.aggregators.remove(&s.transaction);
            node.aggregators.remove(&s.hash);
            return node.reload_committee();
        }

        let round_gap = node.consensus.round_gap;
        let mut cache = match self.graph.cache_copy(&s.node_id) {
            Some(cache) => cache,
            None => panic!("round graph lost our own chain"),
        };
        if s.round_number > cache.number {
            panic!(
                "signed snapshot is ahead of its own chain: {} > {}",
                s.round_number, cache.number
            );
        }
        if s.round_number < cache.number
            || s.references != cache.references
            || cache.validate_snapshot(&s, false, round_gap).is_err()
        {
            node.clear_and_requeue(s);
            return Ok(());
        }

        let entry = SnapshotWithTopologicalOrder {
            snapshot: s.clone(),
            topological_order: node.topology.next(),
        };
        if let Err(e) = node.store.write_snapshot(&entry) {
            panic!("snapshot write failed: {e}");
        }
        if let Err(e) = cache.validate_snapshot(&s, true, round_gap) {
            panic!("snapshot failed re-validation after write: {e}");
        }
        let final_round = match self.graph.final_copy(&s.node_id) {
            Some(round) => round,
            None => panic!("round graph lost our own final round"),
        };
        self.graph.assign_round(final_round, cache);

        node.broadcast_finalization(&s).await;
        node.aggregators.remove(&s.transaction);
        node.aggregators.remove(&s.hash);
        node.reload_committee()
    }
}
