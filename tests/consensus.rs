//! End-to-end consensus scenarios.
//!
//! Each test assembles one node with a manual clock, a recording transport,
//! and a temporary store, then plays the other committee members by hand:
//! crafting commitments and responses with the collective-signing kit and
//! feeding them through the node's entry points. The dispatcher is driven
//! one action at a time so every assertion sees a settled state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::OsRng;

use vela::clock::ManualClock;
use vela::config::ConsensusConfig;
use vela::consensus::committee::CommitteeMember;
use vela::consensus::round::FinalRound;
use vela::consensus::snapshot::Snapshot;
use vela::crypto::cosi::{self, Commitment, CosiSignature, PrivateNonce};
use vela::crypto::keys::{Keypair, PublicKey};
use vela::network::{NetworkError, Peer, PeerId};
use vela::node::storage::{SledStore, Store};
use vela::node::{Dispatcher, Node, NodeInit};
use vela::transaction::{PassthroughValidator, VersionedTransaction};
use vela::Hash;

const EPOCH: u64 = 1_000_000_000;
const GAP: u64 = 3_000_000_000;

// ── Recording transport ─────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum Sent {
    Announcement { to: PeerId, snapshot: Snapshot },
    Commitment { to: PeerId },
    Challenge { to: PeerId, signature: CosiSignature },
    Response { to: PeerId },
    Finalization { to: PeerId, snapshot: Snapshot },
    Confirm { to: PeerId },
}

#[derive(Default)]
struct RecordingPeer {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingPeer {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut self.sent.lock())
    }

    fn announcements(&self) -> Vec<(PeerId, Snapshot)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                Sent::Announcement { to, snapshot } => Some((*to, snapshot.clone())),
                _ => None,
            })
            .collect()
    }

    fn challenges(&self) -> Vec<(PeerId, CosiSignature)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                Sent::Challenge { to, signature } => Some((*to, *signature)),
                _ => None,
            })
            .collect()
    }

    fn finalizations(&self) -> Vec<(PeerId, Snapshot)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                Sent::Finalization { to, snapshot } => Some((*to, snapshot.clone())),
                _ => None,
            })
            .collect()
    }

    fn confirms(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, Sent::Confirm { .. }))
            .count()
    }

    fn commitments(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, Sent::Commitment { .. }))
            .count()
    }
}

#[async_trait::async_trait]
impl Peer for RecordingPeer {
    async fn send_announcement(&self, to: PeerId, snapshot: &Snapshot) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Announcement {
            to,
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    async fn send_commitment(
        &self,
        to: PeerId,
        _snapshot_hash: Hash,
        _commitment: Commitment,
        _want_tx: bool,
    ) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Commitment { to });
        Ok(())
    }

    async fn send_challenge(
        &self,
        to: PeerId,
        _snapshot_hash: Hash,
        signature: CosiSignature,
        _transaction: Option<VersionedTransaction>,
    ) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Challenge { to, signature });
        Ok(())
    }

    async fn send_response(
        &self,
        to: PeerId,
        _snapshot_hash: Hash,
        _response: [u8; 32],
    ) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Response { to });
        Ok(())
    }

    async fn send_finalization(&self, to: PeerId, snapshot: &Snapshot) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Finalization {
            to,
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    async fn send_confirm(&self, to: PeerId, _snapshot_hash: Hash) -> Result<(), NetworkError> {
        self.sent.lock().push(Sent::Confirm { to });
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    node: Arc<Node>,
    dispatcher: Dispatcher,
    clock: Arc<ManualClock>,
    peer: Arc<RecordingPeer>,
    store: Arc<SledStore>,
    /// Committee keypairs; index 0 is this node's.
    keypairs: Vec<Keypair>,
    members: Vec<CommitteeMember>,
}

impl Harness {
    fn new(committee_size: usize) -> Harness {
        let keypairs: Vec<Keypair> = (0..committee_size).map(|_| Keypair::generate()).collect();
        let members: Vec<CommitteeMember> = keypairs
            .iter()
            .map(|kp| CommitteeMember {
                node_id: kp.public.fingerprint(),
                signer: kp.public,
                accepted_at: 0,
            })
            .collect();
        let clock = Arc::new(ManualClock::new(EPOCH));
        let peer = Arc::new(RecordingPeer::default());
        let store = Arc::new(SledStore::temporary().unwrap());

        let (node, dispatcher) = Node::new(NodeInit {
            keypair: keypairs[0].clone(),
            consensus: ConsensusConfig::default(),
            committee: members.clone(),
            epoch: EPOCH,
            clock: clock.clone(),
            store: store.clone(),
            peer: peer.clone(),
            tx_validator: Arc::new(PassthroughValidator),
        })
        .unwrap();
        node.set_broadcasted(true);

        Harness {
            node,
            dispatcher,
            clock,
            peer,
            store,
            keypairs,
            members,
        }
    }

    fn our_id(&self) -> Hash {
        self.node.node_id
    }

    /// Committee signing keys in sorted (mask) order.
    fn publics(&self) -> Vec<PublicKey> {
        self.node.committee_view(self.clock_now()).keys()
    }

    fn clock_now(&self) -> u64 {
        use vela::clock::Clock;
        self.clock.now_nanos()
    }

    /// Drain every pending action.
    async fn settle(&mut self) -> usize {
        let mut handled = 0;
        while self.dispatcher.step().await {
            handled += 1;
        }
        handled
    }

    /// The other members' ids, in committee order.
    fn other_ids(&self) -> Vec<Hash> {
        self.members
            .iter()
            .map(|m| m.node_id)
            .filter(|id| *id != self.our_id())
            .collect()
    }

    fn keypair_for(&self, node_id: &Hash) -> &Keypair {
        self.keypairs
            .iter()
            .find(|kp| kp.public.fingerprint() == *node_id)
            .unwrap()
    }

    /// Run the announcement phase for one of our transactions and return
    /// the announced snapshot.
    async fn announce(&mut self, tx: &VersionedTransaction) -> Snapshot {
        self.node.propose(tx.clone()).unwrap();
        self.settle().await;
        let announcements = self.peer.announcements();
        assert!(!announcements.is_empty(), "no announcement broadcast");
        let snapshot = announcements.last().unwrap().1.clone();
        self.peer.take();
        snapshot
    }

    /// Play `signers` peers through commitment and response collection for
    /// an announced snapshot, returning the challenge they were sent.
    async fn sign_round(&mut self, announced: &Snapshot, signers: &[Hash]) -> CosiSignature {
        let snapshot_hash = announced.payload_hash();
        let mut nonces: BTreeMap<Hash, PrivateNonce> = BTreeMap::new();
        for id in signers {
            let (nonce, commitment) = cosi::commit(&mut OsRng);
            nonces.insert(*id, nonce);
            self.node
                .aggregate_self_commitments(*id, snapshot_hash, commitment, false);
        }
        self.settle().await;

        let challenges = self.peer.challenges();
        assert_eq!(
            challenges.len(),
            signers.len(),
            "challenge should reach every committed peer"
        );
        let signature = challenges[0].1;

        let publics = self.publics();
        for id in signers {
            let response = signature
                .response(self.keypair_for(id), &nonces[id], &publics, &snapshot_hash)
                .unwrap();
            self.node
                .aggregate_self_responses(*id, snapshot_hash, response)
                .unwrap();
        }
        self.settle().await;
        signature
    }
}

fn transaction(seed: u8) -> VersionedTransaction {
    VersionedTransaction::new(1, vec![seed; 16])
}

/// Craft a threshold-signed snapshot for another chain, as its proposer and
/// committee would have produced it.
fn signed_snapshot(
    harness: &Harness,
    proposer: &Hash,
    round_number: u64,
    references: vela::consensus::snapshot::RoundLink,
    tx: &VersionedTransaction,
    timestamp: u64,
) -> Snapshot {
    let mut s = Snapshot::new(*proposer, tx.hash());
    s.round_number = round_number;
    s.references = references;
    s.timestamp = timestamp;
    s.hash = s.payload_hash();

    let publics = harness.publics();
    let view = harness.node.committee_view(timestamp);
    let signer_ids: Vec<Hash> = harness.members.iter().map(|m| m.node_id).take(4).collect();

    let mut nonces = BTreeMap::new();
    let mut commitments = BTreeMap::new();
    for id in &signer_ids {
        let index = view.index_of(id).unwrap();
        let (nonce, commitment) = cosi::commit(&mut OsRng);
        nonces.insert(index, (id, nonce));
        commitments.insert(index, commitment);
    }
    let mut signature = CosiSignature::aggregate_commitments(&commitments).unwrap();
    let mut responses = BTreeMap::new();
    for (index, (id, nonce)) in &nonces {
        let response = signature
            .response(harness.keypair_for(*id), nonce, &publics, &s.hash)
            .unwrap();
        responses.insert(*index, response);
    }
    signature.aggregate_responses(&responses).unwrap();
    assert!(signature.verify(&s.hash, &publics, view.threshold()));
    s.signature = Some(signature);
    s
}

// ── Scenarios ───────────────────────────────────────────────────────────

/// Committee of 5, threshold 4: a full propose → commit → respond →
/// finalize pass for one of our snapshots.
#[tokio::test]
async fn happy_path_proposer() {
    let mut harness = Harness::new(5);
    harness.clock.set(EPOCH + 2 * GAP);

    let tx = transaction(1);
    let announced = harness.announce(&tx).await;
    assert_eq!(announced.node_id, harness.our_id());
    assert_eq!(announced.round_number, 1);
    assert!(announced.signature.is_none());

    let signers = harness.other_ids();
    assert_eq!(signers.len(), 4);
    harness.sign_round(&announced, &signers).await;

    // Finalization reaches every other member.
    let finalizations = harness.peer.finalizations();
    assert_eq!(finalizations.len(), 4);
    let finalized = &finalizations[0].1;
    assert_eq!(finalized.transaction, tx.hash());
    assert!(finalized.signature.is_some());

    // Persisted with the first topological position, and present in the
    // open round.
    assert_eq!(harness.store.last_topology().unwrap(), 1);
    let our_id = harness.our_id();
    let chain = harness.dispatcher.graph().chain(&our_id).unwrap();
    assert_eq!(chain.cache.snapshots.len(), 1);
    assert_eq!(chain.cache.snapshots[0].transaction, tx.hash());

    // The aggregate verifies against the committee keys at the snapshot's
    // timestamp with threshold weight.
    let view = harness.node.committee_view(finalized.timestamp);
    assert!(finalized.signature.unwrap().verify(
        &finalized.payload_hash(),
        &view.keys(),
        view.threshold()
    ));

    // Aggregation state is gone once finalized.
    assert!(harness.node.aggregators().is_empty());

    // The graph summary advertises every chain's sealed head, and a fresh
    // neighbor would be fed from the first snapshot.
    let points = harness.node.sync_points();
    assert_eq!(points.len(), 5);
    assert_eq!(harness.node.sync_offset(&points).unwrap(), 1);
    let batch = harness.node.sync_batch(1).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].snapshot.transaction, tx.hash());
}

/// The proposer spin-waits until its stamp exceeds the cache timestamp, so
/// timestamps stay strictly monotonic within a round.
#[tokio::test]
async fn proposer_timestamps_stay_monotonic() {
    let mut harness = Harness::new(5);
    let t1 = EPOCH + 2 * GAP;
    harness.clock.set(t1);

    let first = harness.announce(&transaction(1)).await;
    let signers = harness.other_ids();
    harness.sign_round(&first, &signers).await;
    harness.peer.take();

    // Wall clock falls behind the round's latest timestamp.
    harness.clock.set(first.timestamp - 500_000_000);
    let second = harness.announce(&transaction(2)).await;
    assert!(
        second.timestamp > first.timestamp,
        "stamp {} must exceed cache timestamp {}",
        second.timestamp,
        first.timestamp
    );
    assert_eq!(second.round_number, first.round_number);
}

/// Once the gap is exhausted the proposer seals its round and opens the
/// next one against the best external reference.
#[tokio::test]
async fn proposer_rolls_over_after_gap() {
    let mut harness = Harness::new(5);
    harness.clock.set(EPOCH + 2 * GAP);

    let first = harness.announce(&transaction(1)).await;
    let signers = harness.other_ids();
    harness.sign_round(&first, &signers).await;
    harness.peer.take();

    harness.clock.set(first.timestamp + GAP + 1);
    let second = harness.announce(&transaction(2)).await;

    assert_eq!(second.round_number, first.round_number + 1);
    let our_id = harness.our_id();
    let chain = harness.dispatcher.graph().chain(&our_id).unwrap();
    assert_eq!(chain.final_round.number, first.round_number);
    assert_eq!(chain.cache.number, first.round_number + 1);
    assert_eq!(second.references.self_hash, chain.final_round.hash);
    // The external reference is another chain's round, never our own.
    let external_round = harness
        .store
        .read_round(&second.references.external)
        .unwrap()
        .unwrap();
    assert_ne!(external_round.node_id, our_id);

    // The new head is persisted: its link to the external chain advanced.
    let link = harness
        .store
        .read_link(&our_id, &external_round.node_id)
        .unwrap();
    assert_eq!(link, Some(external_round.number));
}

/// A participant rewrites an empty head's external reference when the
/// announcing proposer picked a far newer round, then retries the
/// announcement.
#[tokio::test]
async fn participant_refreshes_stale_reference() {
    let mut harness = Harness::new(5);
    let proposer = harness.other_ids()[0];
    let proposer_chain = harness.dispatcher.graph().chain(&proposer).unwrap();
    let old_references = proposer_chain.cache.references;

    // A much newer external round on a chain the proposer has not linked.
    let fresh = FinalRound {
        node_id: harness.other_ids()[3],
        number: 5,
        start: EPOCH + 330 * GAP * 10,
        end: EPOCH + 330 * GAP * 10 + GAP / 2,
        hash: vela::hash_domain(b"test.round", b"fresh-external"),
    };
    harness.store.write_round(&fresh).unwrap();

    harness.clock.set(fresh.start + 2 * GAP);
    let mut announced = Snapshot::new(proposer, transaction(3).hash());
    announced.round_number = 1;
    announced.references = vela::consensus::snapshot::RoundLink {
        self_hash: old_references.self_hash,
        external: fresh.hash,
    };
    announced.timestamp = harness.clock_now() - GAP;

    harness
        .node
        .queue_external_announcement(proposer, announced.clone());
    let handled = harness.settle().await;
    assert!(handled >= 2, "refresh must requeue the announcement");

    let chain = harness.dispatcher.graph().chain(&proposer).unwrap();
    assert_eq!(chain.cache.references.self_hash, old_references.self_hash);
    assert_eq!(chain.cache.references.external, fresh.hash);

    // After adopting the references the retried announcement is committed to.
    assert_eq!(harness.peer.commitments(), 1);
}

/// A second commitment from the same peer changes nothing.
#[tokio::test]
async fn duplicate_commitment_is_dropped() {
    let mut harness = Harness::new(5);
    harness.clock.set(EPOCH + 2 * GAP);

    let announced = harness.announce(&transaction(1)).await;
    let snapshot_hash = announced.payload_hash();
    let peer = harness.other_ids()[0];

    let (_, commitment) = cosi::commit(&mut OsRng);
    harness
        .node
        .aggregate_self_commitments(peer, snapshot_hash, commitment, false);
    harness.settle().await;

    let (_, second) = cosi::commit(&mut OsRng);
    harness
        .node
        .aggregate_self_commitments(peer, snapshot_hash, second, true);
    harness.settle().await;

    let record = harness.node.aggregators().get(&snapshot_hash).unwrap();
    let aggregator = record.lock();
    assert_eq!(aggregator.commitments.len(), 1);
    let view = harness.node.committee_view(announced.timestamp);
    let index = view.index_of(&peer).unwrap();
    assert_eq!(aggregator.commitments.get(&index), Some(&commitment));
}

/// A response that fails verification never becomes an action.
#[tokio::test]
async fn invalid_response_never_enqueued() {
    let mut harness = Harness::new(5);
    harness.clock.set(EPOCH + 2 * GAP);

    let announced = harness.announce(&transaction(1)).await;
    let snapshot_hash = announced.payload_hash();

    // Collect threshold commitments so the aggregate exists.
    let signers = harness.other_ids();
    let mut nonces = BTreeMap::new();
    for id in &signers {
        let (nonce, commitment) = cosi::commit(&mut OsRng);
        nonces.insert(*id, nonce);
        harness
            .node
            .aggregate_self_commitments(*id, snapshot_hash, commitment, false);
    }
    harness.settle().await;
    assert_eq!(harness.peer.challenges().len(), 4);

    // A garbage scalar is dropped at the entry point.
    harness
        .node
        .aggregate_self_responses(signers[0], snapshot_hash, [7u8; 32])
        .unwrap();
    assert!(!harness.dispatcher.step().await, "nothing may be enqueued");

    let record = harness.node.aggregators().get(&snapshot_hash).unwrap();
    assert!(record.lock().responses.is_empty());
}

/// Two proposals for the same transaction produce one aggregation and one
/// announcement burst.
#[tokio::test]
async fn duplicate_proposal_deduplicated() {
    let mut harness = Harness::new(5);
    harness.clock.set(EPOCH + 2 * GAP);

    let tx = transaction(1);
    harness.node.propose(tx.clone()).unwrap();
    harness.node.propose(tx.clone()).unwrap();
    harness.settle().await;

    // 4 peers, one announcement each; the second proposal was dropped.
    assert_eq!(harness.peer.announcements().len(), 4);
    assert_eq!(harness.node.aggregators().len(), 2); // tx hash + payload hash
}

/// An externally finalized snapshot is verified, confirmed, applied once,
/// and ignored on re-delivery.
#[tokio::test]
async fn finalization_applies_once() {
    let mut harness = Harness::new(5);
    let proposer = harness.other_ids()[0];
    let references = harness
        .dispatcher
        .graph()
        .chain(&proposer)
        .unwrap()
        .cache
        .references;

    let tx = transaction(9);
    harness.store.cache_put_transaction(proposer, &tx).unwrap();
    let snapshot = signed_snapshot(&harness, &proposer, 1, references, &tx, EPOCH + 2 * GAP);

    harness
        .node
        .verify_and_queue_finalization(proposer, snapshot.clone())
        .await
        .unwrap();
    assert_eq!(harness.peer.confirms(), 1);
    harness.settle().await;

    assert_eq!(harness.store.last_topology().unwrap(), 1);
    let chain = harness.dispatcher.graph().chain(&proposer).unwrap();
    assert_eq!(chain.cache.snapshots.len(), 1);
    assert!(harness
        .store
        .check_transaction_in_node(&proposer, &tx.hash())
        .unwrap());

    // Re-delivery confirms again but never re-queues or re-applies.
    harness
        .node
        .verify_and_queue_finalization(proposer, snapshot)
        .await
        .unwrap();
    assert_eq!(harness.peer.confirms(), 2);
    assert!(!harness.dispatcher.step().await);
    assert_eq!(harness.store.last_topology().unwrap(), 1);
}

/// A finalization with a broken aggregate is rejected at the entry point.
#[tokio::test]
async fn tampered_finalization_rejected() {
    let mut harness = Harness::new(5);
    let proposer = harness.other_ids()[0];
    let references = harness
        .dispatcher
        .graph()
        .chain(&proposer)
        .unwrap()
        .cache
        .references;

    let tx = transaction(9);
    harness.store.cache_put_transaction(proposer, &tx).unwrap();
    let mut snapshot = signed_snapshot(&harness, &proposer, 1, references, &tx, EPOCH + 2 * GAP);
    // Mutating the payload after signing invalidates the aggregate.
    snapshot.timestamp += 1;

    harness
        .node
        .verify_and_queue_finalization(proposer, snapshot)
        .await
        .unwrap();
    assert_eq!(harness.peer.confirms(), 0);
    assert!(!harness.dispatcher.step().await);
    assert_eq!(harness.store.last_topology().unwrap(), 0);
}
