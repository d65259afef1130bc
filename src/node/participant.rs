//! The participant path: commit to announcements, answer challenges, and
//! accept finalizations.
//!
//! An external snapshot moves `ExternalAnnouncement → ExternalChallenge →
//! Finalization`. The announcement handler enforces the round advancement
//! rules for the proposing chain before committing; the finalization
//! acceptor is the only place external snapshots enter the round graph and
//! storage.

use std::time::Duration;

use rand::rngs::OsRng;

use crate::consensus::round::CacheRound;
use crate::consensus::snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder};
use crate::crypto::cosi::{self, CosiSignature};
use crate::network::PeerId;
use crate::node::storage::StorageError;
use crate::node::{CosiVerifier, Dispatcher};
use crate::transaction::VersionedTransaction;
use crate::Hash;

impl Dispatcher {
    /// Handle `ExternalAnnouncement`: apply the round advancement rules for
    /// the proposing chain, then commit.
    pub(crate) async fn handle_announcement(
        &mut self,
        peer_id: PeerId,
        s: Snapshot,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        if !node.is_caught_up() {
            node.clock
                .sleep(Duration::from_millis(crate::constants::CATCH_UP_RETRY_MS))
                .await;
            return Ok(());
        }

        if s.node_id == node.node_id
            || s.signature.is_some()
            || s.version != crate::constants::SNAPSHOT_VERSION
            || s.timestamp == 0
        {
            panic!(
                "announcement entry let through an invalid snapshot: node {} version {}",
                hex::encode(s.node_id),
                s.version
            );
        }

        // Reject announcements from too far in the future or the past.
        let window = node.consensus.reference_window();
        if s.timestamp > node.clock.now_nanos() + window {
            return Ok(());
        }
        if s.timestamp + window * 2 < self.graph.graph_timestamp {
            return Ok(());
        }

        let (tx, finalized) = node.check_transaction(&s.transaction)?;
        if finalized {
            return Ok(());
        }

        let (nonce, commitment) = cosi::commit(&mut OsRng);
        let want_tx = tx.is_none();

        if self.is_initial_accept(&s) {
            self.verifiers.insert(
                s.hash,
                CosiVerifier {
                    snapshot: s.clone(),
                    nonce,
                },
            );
            if let Err(e) = node
                .peer
                .send_commitment(s.node_id, s.hash, commitment, want_tx)
                .await
            {
                tracing::debug!(error = %e, "commitment send failed");
            }
            return Ok(());
        }

        let round_gap = node.consensus.round_gap;
        let (mut cache, mut final_round) = match self.graph.chain(&s.node_id) {
            Some(chain) => (chain.cache.clone(), chain.final_round),
            None => {
                tracing::debug!(
                    node = %hex::encode(&s.node_id[..8]),
                    "announcement from a chain the graph does not know"
                );
                return Ok(());
            }
        };

        if s.round_number < cache.number {
            return Ok(());
        }
        if s.round_number > cache.number + 1 {
            node.requeue_snapshot(peer_id, s, false);
            return Ok(());
        }
        if s.timestamp <= final_round.start + round_gap {
            return Ok(());
        }
        if s.round_number == cache.number && s.references != cache.references {
            // The proposer may have re-referenced an empty head; adopt the
            // new external only when it is far enough ahead of ours.
            if !cache.snapshots.is_empty() {
                return Ok(());
            }
            if s.references.self_hash != cache.references.self_hash {
                return Ok(());
            }
            let old = match node.store.read_round(&cache.references.external)? {
                Some(round) => round,
                None => {
                    tracing::warn!(
                        round = %hex::encode(&cache.references.external[..8]),
                        "head references a round missing from storage"
                    );
                    return Ok(());
                }
            };
            let external = match node.store.read_round(&s.references.external)? {
                Some(round) => round,
                None => return Ok(()),
            };
            let refresh_window =
                node.consensus.reference_window() * node.consensus.participant_refresh_factor;
            if old.start + refresh_window > external.start {
                return Ok(());
            }
            let link = node.store.read_link(&cache.node_id, &external.node_id)?;
            if link.is_some_and(|number| external.number <= number) {
                return Ok(());
            }
            let new_cache = CacheRound::new(
                cache.node_id,
                cache.number,
                RoundLink {
                    self_hash: s.references.self_hash,
                    external: s.references.external,
                },
            );
            if let Err(e) = node.store.update_empty_head_round(
                &new_cache.node_id,
                new_cache.number,
                &new_cache.references,
            ) {
                panic!("empty head update failed: {e}");
            }
            self.graph.assign_round(final_round, new_cache);
            node.requeue_snapshot(peer_id, s, false);
            return Ok(());
        }
        if s.round_number == cache.number + 1 {
            match self.start_new_round(&s, &cache, false) {
                Err(e) => {
                    tracing::debug!(
                        node = %hex::encode(&s.node_id[..8]),
                        round = s.round_number,
                        error = %e,
                        "cannot start announced round yet"
                    );
                    node.requeue_snapshot(peer_id, s, false);
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(new_round)) => {
                    final_round = new_round.sealed;
                    cache = CacheRound {
                        node_id: s.node_id,
                        number: s.round_number,
                        timestamp: s.timestamp,
                        references: s.references,
                        snapshots: Vec::new(),
                    };
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
        }
        self.graph.assign_round(final_round, cache.clone());

        if cache.validate_snapshot(&s, false, round_gap).is_err() {
            return Ok(());
        }

        self.verifiers.insert(
            s.hash,
            CosiVerifier {
                snapshot: s.clone(),
                nonce,
            },
        );
        if let Err(e) = node
            .peer
            .send_commitment(s.node_id, s.hash, commitment, want_tx)
            .await
        {
            tracing::debug!(error = %e, "commitment send failed");
        }
        Ok(())
    }

    /// Handle `ExternalChallenge`: compute and return our response scalar.
    pub(crate) async fn handle_challenge(
        &mut self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        signature: CosiSignature,
        transaction: Option<VersionedTransaction>,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        if !node.is_caught_up() {
            node.clock
                .sleep(Duration::from_millis(crate::constants::CATCH_UP_RETRY_MS))
                .await;
            return Ok(());
        }

        let s = match self.verifiers.get(&snapshot_hash) {
            Some(verifier) => verifier.snapshot.clone(),
            None => return Ok(()),
        };

        if let Some(tx) = transaction {
            node.store.cache_put_transaction(peer_id, &tx)?;
        }

        let (tx, finalized) = node.check_transaction(&s.transaction)?;
        let tx = match (tx, finalized) {
            (_, true) | (None, false) => return Ok(()),
            (Some(tx), false) => tx,
        };
        if !node.validate_kernel_snapshot(&s, &tx) {
            return Ok(());
        }
        if let Err(e) = node.store.write_transaction(&tx) {
            tracing::warn!(error = %e, "transaction write failed, dropping challenge");
            return Ok(());
        }

        let publics = node.committee_view(s.timestamp).keys();
        let response = {
            let verifier = match self.verifiers.get(&snapshot_hash) {
                Some(verifier) => verifier,
                None => return Ok(()),
            };
            match signature.response(&node.keypair, &verifier.nonce, &publics, &snapshot_hash) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "response computation failed");
                    return Ok(());
                }
            }
        };
        if let Err(e) = node.peer.send_response(peer_id, snapshot_hash, response).await {
            tracing::debug!(error = %e, "response send failed");
        }
        Ok(())
    }

    /// Handle `Finalization`: re-verify, replay round starts if the chain
    /// is behind, resolve the transaction, and accept.
    pub(crate) async fn handle_finalization(
        &mut self,
        peer_id: PeerId,
        mut s: Snapshot,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();
        s.hash = s.payload_hash();
        if !node.verify_finalization(&s) {
            tracing::warn!(
                snapshot = %hex::encode(&s.hash[..8]),
                "queued finalization no longer verifies"
            );
            return Ok(());
        }

        if let Err(e) = self.try_to_start_new_round(&s) {
            tracing::debug!(
                node = %hex::encode(&s.node_id[..8]),
                round = s.round_number,
                error = %e,
                "finalized round cannot start yet"
            );
            node.requeue_snapshot(peer_id, s, true);
            return Ok(());
        }

        let tx = match self.check_final_snapshot_transaction(&s) {
            Ok(Some(tx)) => tx,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "transaction unresolved, requeueing finalization");
                node.requeue_snapshot(peer_id, s, true);
                return Ok(());
            }
        };
        self.accept_finalization(peer_id, s, tx).await
    }

    /// Resolve a finalized snapshot's transaction: `None` when the chain
    /// already has it or the body is not available/acceptable yet.
    fn check_final_snapshot_transaction(
        &self,
        s: &Snapshot,
    ) -> Result<Option<VersionedTransaction>, StorageError> {
        let node = &self.node;
        if node
            .store
            .check_transaction_in_node(&s.node_id, &s.transaction)?
        {
            return Ok(None);
        }
        let (tx, _) = node.check_transaction(&s.transaction)?;
        let tx = match tx {
            Some(tx) => tx,
            None => return Ok(None),
        };
        if !node.validate_kernel_snapshot(s, &tx) {
            return Ok(None);
        }
        Ok(Some(tx))
    }

    /// The finalization acceptor: the only writer of committed external
    /// snapshots. The resolved transaction is required up front so a
    /// snapshot is never accepted ahead of its body.
    async fn accept_finalization(
        &mut self,
        peer_id: PeerId,
        s: Snapshot,
        _tx: VersionedTransaction,
    ) -> Result<(), StorageError> {
        let node = self.node.clone();

        if self.is_initial_accept(&s) {
            self.finalize_initial_accept(&s);
            self.verifiers.remove(&s.hash);
            return node.reload_committee();
        }

        let round_gap = node.consensus.round_gap;
        let (mut cache, mut final_round) = match self.graph.chain(&s.node_id) {
            Some(chain) => (chain.cache.clone(), chain.final_round),
            None => {
                tracing::debug!(
                    node = %hex::encode(&s.node_id[..8]),
                    "finalization for a chain the graph does not know"
                );
                return Ok(());
            }
        };

        if s.round_number < cache.number {
            return Ok(());
        }
        if s.round_number > cache.number + 1 {
            node.requeue_snapshot(peer_id, s, true);
            return Ok(());
        }
        if s.round_number == cache.number && s.references != cache.references {
            if s.node_id == node.node_id {
                return Ok(());
            }
            if !cache.snapshots.is_empty() {
                return Ok(());
            }
            if let Err(e) =
                node.store
                    .update_empty_head_round(&cache.node_id, cache.number, &s.references)
            {
                panic!("empty head update failed: {e}");
            }
            let new_cache = CacheRound::new(cache.node_id, cache.number, s.references);
            self.graph.assign_round(final_round, new_cache);
            node.requeue_snapshot(peer_id, s, true);
            return Ok(());
        }
        if s.round_number == cache.number + 1 {
            match self.start_new_round(&s, &cache, false) {
                Err(e) => {
                    tracing::debug!(error = %e, "cannot start finalized round yet");
                    node.requeue_snapshot(peer_id, s, true);
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(new_round)) => {
                    final_round = new_round.sealed;
                    cache = CacheRound {
                        node_id: s.node_id,
                        number: s.round_number,
                        timestamp: s.timestamp,
                        references: s.references,
                        snapshots: Vec::new(),
                    };
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
        }

        if cache.validate_snapshot(&s, false, round_gap).is_err() {
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
        // The round graph adopts the new state only after the inclusion
        // validation succeeded; this assignment is authoritative.
        self.graph.assign_round(final_round, cache);

        self.verifiers.remove(&s.hash);
        node.aggregators.remove(&s.transaction);
        node.aggregators.remove(&s.hash);
        node.reload_committee()
    }
}
