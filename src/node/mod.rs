//! The consensus node: action queue, registries, and the dispatcher.
//!
//! The node splits into two halves. The shared half ([`Node`]) is what peer
//! tasks touch: entry points that validate and enqueue actions, the
//! aggregator registry (read when verifying peer responses before they are
//! queued), the committee table, and storage. The owned half
//! ([`Dispatcher`]) is a single task that drains the action queue and is
//! the only writer of the round graph and the verifier registry: exactly
//! one handler runs at a time, so every state transition for a snapshot is
//! totally ordered by the queue.

pub mod participant;
pub mod proposer;
pub mod rounds;
pub mod storage;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::ConsensusConfig;
use crate::consensus::committee::{Committee, CommitteeMember, CommitteeView};
use crate::consensus::graph::{self, GraphError, RoundGraph, SyncPoint};
use crate::consensus::round::CacheRound;
use crate::consensus::snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder};
use crate::crypto::cosi::{Commitment, CosiSignature, PrivateNonce};
use crate::crypto::keys::Keypair;
use crate::network::{Peer, PeerId};
use crate::transaction::{TransactionValidator, VersionedTransaction};
use crate::Hash;
use storage::{StorageError, Store, TopologyCounter};

/// Node errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("round graph error: {0}")]
    Graph(#[from] GraphError),
}

/// One unit of consensus work, drained by the dispatcher in enqueue order.
#[derive(Clone, Debug)]
pub enum CosiAction {
    /// Propose one of our own snapshots.
    SelfEmpty {
        peer_id: PeerId,
        snapshot: Box<Snapshot>,
    },
    /// A peer answered our announcement with a commitment.
    SelfCommitment {
        peer_id: PeerId,
        snapshot_hash: Hash,
        commitment: Commitment,
        want_tx: bool,
    },
    /// A peer answered our challenge with a response scalar.
    SelfResponse {
        peer_id: PeerId,
        snapshot_hash: Hash,
        response: [u8; 32],
    },
    /// Another chain announced a snapshot.
    ExternalAnnouncement {
        peer_id: PeerId,
        snapshot: Box<Snapshot>,
    },
    /// A proposer challenged us with an aggregate commitment.
    ExternalChallenge {
        peer_id: PeerId,
        snapshot_hash: Hash,
        signature: CosiSignature,
        transaction: Option<VersionedTransaction>,
    },
    /// A signed snapshot arrived for acceptance.
    Finalization {
        peer_id: PeerId,
        snapshot: Box<Snapshot>,
    },
}

/// Proposer-side aggregation state for one in-flight snapshot.
pub struct CosiAggregator {
    pub snapshot: Snapshot,
    pub transaction: VersionedTransaction,
    /// Which peers asked for the transaction body with the challenge.
    pub want_txs: HashMap<PeerId, bool>,
    /// Commitments by sorted committee position.
    pub commitments: BTreeMap<usize, Commitment>,
    /// Responses by sorted committee position.
    pub responses: BTreeMap<usize, [u8; 32]>,
    committed: HashSet<PeerId>,
    responded: HashSet<PeerId>,
}

impl CosiAggregator {
    fn new(snapshot: Snapshot, transaction: VersionedTransaction) -> Self {
        CosiAggregator {
            snapshot,
            transaction,
            want_txs: HashMap::new(),
            commitments: BTreeMap::new(),
            responses: BTreeMap::new(),
            committed: HashSet::new(),
            responded: HashSet::new(),
        }
    }

    /// Record that a peer committed. False when it already had.
    pub(crate) fn mark_committed(&mut self, peer: PeerId) -> bool {
        self.committed.insert(peer)
    }

    pub(crate) fn has_responded(&self, peer: &PeerId) -> bool {
        self.responded.contains(peer)
    }

    pub(crate) fn mark_responded(&mut self, peer: PeerId) {
        self.responded.insert(peer);
    }
}

/// Participant-side verifier state: the announced snapshot and our secret
/// commitment nonce, kept until finalization.
pub struct CosiVerifier {
    pub snapshot: Snapshot,
    pub(crate) nonce: PrivateNonce,
}

/// In-flight aggregators, shared between the dispatcher and the peer tasks
/// that verify responses before enqueuing them.
///
/// One record may sit under two keys, the transaction hash (for dedup
/// before the snapshot is stamped) and the payload hash (once assigned),
/// and is freed when both entries are gone.
#[derive(Default)]
pub struct AggregatorRegistry {
    inner: RwLock<HashMap<Hash, Arc<Mutex<CosiAggregator>>>>,
}

impl AggregatorRegistry {
    pub fn get(&self, key: &Hash) -> Option<Arc<Mutex<CosiAggregator>>> {
        self.inner.read().get(key).cloned()
    }

    pub(crate) fn set(&self, key: Hash, aggregator: Arc<Mutex<CosiAggregator>>) {
        self.inner.write().insert(key, aggregator);
    }

    pub(crate) fn remove(&self, key: &Hash) {
        self.inner.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Everything needed to assemble a node.
pub struct NodeInit {
    pub keypair: Keypair,
    pub consensus: ConsensusConfig,
    /// The genesis committee, ourselves included.
    pub committee: Vec<CommitteeMember>,
    /// Epoch timestamp the genesis rounds are stamped with.
    pub epoch: u64,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn Store>,
    pub peer: Arc<dyn Peer>,
    pub tx_validator: Arc<dyn TransactionValidator>,
}

/// The shared half of the node.
pub struct Node {
    pub node_id: Hash,
    pub(crate) keypair: Keypair,
    pub(crate) consensus: ConsensusConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) peer: Arc<dyn Peer>,
    pub(crate) tx_validator: Arc<dyn TransactionValidator>,
    committee: RwLock<Committee>,
    pub(crate) aggregators: AggregatorRegistry,
    actions: mpsc::UnboundedSender<CosiAction>,
    pub(crate) topology: TopologyCounter,
    caught_up: AtomicBool,
    broadcasted: AtomicBool,
    sync_points: RwLock<Vec<SyncPoint>>,
}

impl Node {
    /// Assemble the shared node and its dispatcher.
    ///
    /// Seeds the round graph with every committee chain's genesis round and
    /// persists those rounds and head markers so cross-chain lookups resolve.
    pub fn new(init: NodeInit) -> Result<(Arc<Node>, Dispatcher), NodeError> {
        let node_id = init.keypair.public.fingerprint();
        let committee = Committee::new(init.committee.clone());

        let mut graph = RoundGraph::new();
        let genesis_rounds = graph.bootstrap(&init.committee, init.epoch)?;
        for round in &genesis_rounds {
            init.store.write_round(round)?;
        }
        for (_, chain) in graph.chains() {
            init.store.start_new_round(
                &chain.cache.node_id,
                chain.cache.number,
                &chain.cache.references,
                chain.final_round.start,
            )?;
        }

        let last = init.store.last_topology()?;
        let (actions, receiver) = mpsc::unbounded_channel();

        let node = Arc::new(Node {
            node_id,
            keypair: init.keypair,
            consensus: init.consensus,
            clock: init.clock,
            store: init.store,
            peer: init.peer,
            tx_validator: init.tx_validator,
            committee: RwLock::new(committee),
            aggregators: AggregatorRegistry::default(),
            actions,
            topology: TopologyCounter::new(last),
            caught_up: AtomicBool::new(true),
            broadcasted: AtomicBool::new(false),
            sync_points: RwLock::new(graph.final_cache().to_vec()),
        });
        let dispatcher = Dispatcher {
            node: node.clone(),
            actions: receiver,
            graph,
            verifiers: HashMap::new(),
            shutdown: CancellationToken::new(),
        };
        Ok((node, dispatcher))
    }

    // ── Entry points (called from peer tasks; validate, then enqueue) ──

    /// Propose one of our own transactions. The snapshot is stamped and
    /// placed into a round by the proposer path.
    pub fn propose(&self, transaction: VersionedTransaction) -> Result<(), StorageError> {
        self.store
            .cache_put_transaction(self.node_id, &transaction)?;
        let snapshot = Snapshot::new(self.node_id, transaction.hash());
        self.enqueue(CosiAction::SelfEmpty {
            peer_id: self.node_id,
            snapshot: Box::new(snapshot),
        });
        Ok(())
    }

    /// Queue a snapshot announced by another chain. Silently ignores
    /// non-members, version mismatches, stamped signatures, and zero
    /// timestamps.
    pub fn queue_external_announcement(&self, peer_id: PeerId, mut snapshot: Snapshot) {
        if !self.committee.read().contains(&snapshot.node_id) {
            return;
        }
        if snapshot.version != crate::constants::SNAPSHOT_VERSION {
            return;
        }
        if snapshot.node_id == self.node_id || snapshot.node_id != peer_id {
            return;
        }
        if snapshot.signature.is_some() || snapshot.timestamp == 0 {
            return;
        }
        snapshot.hash = snapshot.payload_hash();
        self.enqueue(CosiAction::ExternalAnnouncement {
            peer_id,
            snapshot: Box::new(snapshot),
        });
    }

    /// Queue a peer's commitment for one of our announcements.
    pub fn aggregate_self_commitments(
        &self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        commitment: Commitment,
        want_tx: bool,
    ) {
        if !self.committee.read().contains(&peer_id) {
            return;
        }
        self.enqueue(CosiAction::SelfCommitment {
            peer_id,
            snapshot_hash,
            commitment,
            want_tx,
        });
    }

    /// Queue a challenge received from a proposer.
    pub fn queue_external_challenge(
        &self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        signature: CosiSignature,
        transaction: Option<VersionedTransaction>,
    ) {
        if !self.committee.read().contains(&peer_id) {
            return;
        }
        self.enqueue(CosiAction::ExternalChallenge {
            peer_id,
            snapshot_hash,
            signature,
            transaction,
        });
    }

    /// Verify a peer's response scalar against the stored aggregate, then
    /// queue it. Invalid responses never reach the dispatcher.
    pub fn aggregate_self_responses(
        &self,
        peer_id: PeerId,
        snapshot_hash: Hash,
        response: [u8; 32],
    ) -> Result<(), StorageError> {
        if !self.committee.read().contains(&peer_id) {
            return Ok(());
        }
        let record = match self.aggregators.get(&snapshot_hash) {
            Some(record) => record,
            None => return Ok(()),
        };
        let (transaction, timestamp) = {
            let aggregator = record.lock();
            (
                aggregator.snapshot.transaction,
                aggregator.snapshot.timestamp,
            )
        };
        let (tx, finalized) = self.check_transaction(&transaction)?;
        if finalized || tx.is_none() {
            return Ok(());
        }

        let view = self.committee_view(timestamp);
        let index = match view.index_of(&peer_id) {
            Some(index) => index,
            None => return Ok(()),
        };
        let publics = view.keys();
        let verified = {
            let aggregator = record.lock();
            let signature = match aggregator.snapshot.signature {
                Some(signature) => signature,
                None => return Ok(()),
            };
            let commitment = match aggregator.commitments.get(&index) {
                Some(commitment) => *commitment,
                None => return Ok(()),
            };
            signature
                .verify_response(&publics, index, &commitment, &response, &snapshot_hash)
                .is_ok()
        };
        if !verified {
            tracing::debug!(
                peer = %hex::encode(&peer_id[..8]),
                snapshot = %hex::encode(&snapshot_hash[..8]),
                "dropping response that fails verification"
            );
            return Ok(());
        }
        self.enqueue(CosiAction::SelfResponse {
            peer_id,
            snapshot_hash,
            response,
        });
        Ok(())
    }

    /// Verify an incoming finalization's aggregate signature; on success,
    /// confirm receipt to the sender and queue it unless the chain already
    /// records the transaction.
    pub async fn verify_and_queue_finalization(
        &self,
        peer_id: PeerId,
        mut snapshot: Snapshot,
    ) -> Result<(), StorageError> {
        if !self.committee.read().contains(&peer_id) {
            return Ok(());
        }
        if snapshot.version != crate::constants::SNAPSHOT_VERSION || snapshot.signature.is_none() {
            return Ok(());
        }
        snapshot.hash = snapshot.payload_hash();
        if !self.verify_finalization(&snapshot) {
            tracing::warn!(
                snapshot = %hex::encode(&snapshot.hash[..8]),
                node = %hex::encode(&snapshot.node_id[..8]),
                "finalization aggregate failed verification"
            );
            return Ok(());
        }

        if let Err(e) = self.peer.send_confirm(peer_id, snapshot.hash).await {
            tracing::debug!(error = %e, "confirm send failed");
        }

        if self
            .store
            .check_transaction_in_node(&snapshot.node_id, &snapshot.transaction)?
        {
            return Ok(());
        }
        self.enqueue(CosiAction::Finalization {
            peer_id,
            snapshot: Box::new(snapshot),
        });
        Ok(())
    }

    // ── Shared helpers ──

    /// Membership at a timestamp, for signature checks and mask indexing.
    pub fn committee_view(&self, timestamp: u64) -> CommitteeView {
        self.committee.read().view(timestamp)
    }

    /// Check the aggregate on a finalized snapshot against the membership
    /// active at its timestamp.
    pub(crate) fn verify_finalization(&self, snapshot: &Snapshot) -> bool {
        let signature = match snapshot.signature {
            Some(signature) => signature,
            None => return false,
        };
        let view = self.committee_view(snapshot.timestamp);
        signature.verify(&snapshot.hash, &view.keys(), view.threshold())
    }

    /// Look a transaction up in storage or the gossip cache; `true` means it
    /// is already finalized somewhere.
    pub(crate) fn check_transaction(
        &self,
        tx_hash: &Hash,
    ) -> Result<(Option<VersionedTransaction>, bool), StorageError> {
        if self.store.is_transaction_finalized(tx_hash)? {
            return Ok((None, true));
        }
        if let Some(tx) = self.store.read_transaction(tx_hash)? {
            return Ok((Some(tx), false));
        }
        Ok((self.store.cache_get_transaction(tx_hash)?, false))
    }

    /// Kernel-level snapshot checks: the referenced body hashes to the
    /// snapshot's transaction and passes the validation seam.
    pub(crate) fn validate_kernel_snapshot(
        &self,
        snapshot: &Snapshot,
        tx: &VersionedTransaction,
    ) -> bool {
        if tx.hash() != snapshot.transaction {
            return false;
        }
        if let Err(e) = self.tx_validator.validate(tx) {
            tracing::debug!(error = %e, "transaction rejected by validator");
            return false;
        }
        true
    }

    /// Re-read membership from storage; acceptance snapshots take effect
    /// here. A store with no members yet leaves the table untouched.
    pub(crate) fn reload_committee(&self) -> Result<(), StorageError> {
        let members = self.store.read_committee()?;
        if !members.is_empty() {
            *self.committee.write() = Committee::new(members);
        }
        Ok(())
    }

    pub(crate) fn enqueue(&self, action: CosiAction) {
        if self.actions.send(action).is_err() {
            panic!("consensus action queue closed");
        }
    }

    /// Re-queue a snapshot for a later pass through its path.
    pub(crate) fn requeue_snapshot(&self, peer_id: PeerId, snapshot: Snapshot, finalization: bool) {
        let snapshot = Box::new(snapshot);
        let action = if finalization {
            CosiAction::Finalization { peer_id, snapshot }
        } else if snapshot.node_id == self.node_id {
            CosiAction::SelfEmpty { peer_id, snapshot }
        } else {
            CosiAction::ExternalAnnouncement { peer_id, snapshot }
        };
        self.enqueue(action);
    }

    /// Drop any aggregation state for the snapshot and re-queue it unstamped
    /// through the proposer path.
    pub(crate) fn clear_and_requeue(&self, mut snapshot: Snapshot) {
        self.aggregators.remove(&snapshot.transaction);
        if snapshot.hash != [0u8; 32] {
            self.aggregators.remove(&snapshot.hash);
        }
        snapshot.timestamp = 0;
        snapshot.round_number = 0;
        snapshot.signature = None;
        snapshot.hash = [0u8; 32];
        self.enqueue(CosiAction::SelfEmpty {
            peer_id: self.node_id,
            snapshot: Box::new(snapshot),
        });
    }

    /// Broadcast an announcement to every other committee member.
    pub(crate) async fn broadcast_announcement(&self, snapshot: &Snapshot) {
        let members = self.committee_view(snapshot.timestamp).members().to_vec();
        for member in members {
            if member.node_id == self.node_id {
                continue;
            }
            if let Err(e) = self.peer.send_announcement(member.node_id, snapshot).await {
                tracing::debug!(peer = %hex::encode(&member.node_id[..8]), error = %e, "announcement send failed");
            }
        }
        self.broadcasted.store(true, Ordering::SeqCst);
    }

    /// Broadcast a finalization to every other committee member.
    pub(crate) async fn broadcast_finalization(&self, snapshot: &Snapshot) {
        let members = self.committee_view(snapshot.timestamp).members().to_vec();
        for member in members {
            if member.node_id == self.node_id {
                continue;
            }
            if let Err(e) = self.peer.send_finalization(member.node_id, snapshot).await {
                tracing::debug!(peer = %hex::encode(&member.node_id[..8]), error = %e, "finalization send failed");
            }
        }
    }

    // ── Sync status ──

    /// Whether the transport believes we have caught up with our peers.
    pub fn is_caught_up(&self) -> bool {
        self.caught_up.load(Ordering::SeqCst)
    }

    /// Set by the transport as graph sync progresses.
    pub fn set_caught_up(&self, caught_up: bool) {
        self.caught_up.store(caught_up, Ordering::SeqCst);
    }

    pub(crate) fn has_broadcasted(&self) -> bool {
        self.broadcasted.load(Ordering::SeqCst)
    }

    /// Set by the transport once our graph summary has reached peers; also
    /// set implicitly by the first announcement broadcast.
    pub fn set_broadcasted(&self, broadcasted: bool) {
        self.broadcasted.store(broadcasted, Ordering::SeqCst);
    }

    /// The in-flight proposer aggregations.
    pub fn aggregators(&self) -> &AggregatorRegistry {
        &self.aggregators
    }

    /// The latest final-cache summary, advertised to peers for graph sync.
    pub fn sync_points(&self) -> Vec<SyncPoint> {
        self.sync_points.read().clone()
    }

    /// Pick the topological offset a lagging neighbor must be fed from,
    /// given its advertised summary.
    pub fn sync_offset(&self, remote: &[SyncPoint]) -> Result<u64, StorageError> {
        let local = self.sync_points();
        let mut read_error = None;
        let offset = graph::topological_offset(&local, remote, |point| {
            match self
                .store
                .read_snapshots_for_round(&point.node_id, point.number)
            {
                Ok(snapshots) => snapshots.last().map(|s| s.topological_order),
                Err(e) => {
                    read_error = Some(e);
                    None
                }
            }
        });
        match read_error {
            Some(e) => Err(e),
            None => Ok(offset),
        }
    }

    /// Snapshots to feed a neighbor from `offset`, in topological order.
    pub fn sync_batch(
        &self,
        offset: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StorageError> {
        self.store
            .read_snapshots_since_topology(offset, crate::constants::SYNC_BATCH_SIZE)
    }
}

/// The owned half of the node: the single consumer of the action queue.
pub struct Dispatcher {
    pub(crate) node: Arc<Node>,
    actions: mpsc::UnboundedReceiver<CosiAction>,
    pub(crate) graph: RoundGraph,
    pub(crate) verifiers: HashMap<Hash, CosiVerifier>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Token to stop the run loop with.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Read access to the round graph, for inspection and tests.
    pub fn graph(&self) -> &RoundGraph {
        &self.graph
    }

    /// Drain the action queue until shutdown. Handlers run to completion,
    /// one at a time.
    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            let action = tokio::select! {
                _ = shutdown.cancelled() => break,
                action = self.actions.recv() => action,
            };
            match action {
                Some(action) => self.process(action).await,
                None => break,
            }
        }
        tracing::info!(node = %hex::encode(&self.node.node_id[..8]), "dispatcher stopped");
    }

    /// Process one queued action if any is pending. Returns whether an
    /// action was handled. Lets tests drive the dispatcher deterministically.
    pub async fn step(&mut self) -> bool {
        match self.actions.try_recv() {
            Ok(action) => {
                self.process(action).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn process(&mut self, action: CosiAction) {
        if let Err(e) = self.handle_action(action).await {
            tracing::warn!(error = %e, "consensus handler failed");
        }
        let points = self.graph.refresh_final_cache().to_vec();
        *self.node.sync_points.write() = points;
    }

    async fn handle_action(&mut self, action: CosiAction) -> Result<(), StorageError> {
        match action {
            CosiAction::SelfEmpty { peer_id, snapshot } => {
                self.send_announcement(peer_id, *snapshot).await
            }
            CosiAction::SelfCommitment {
                peer_id,
                snapshot_hash,
                commitment,
                want_tx,
            } => {
                self.handle_commitment(peer_id, snapshot_hash, commitment, want_tx)
                    .await
            }
            CosiAction::SelfResponse {
                peer_id,
                snapshot_hash,
                response,
            } => self.handle_response(peer_id, snapshot_hash, response).await,
            CosiAction::ExternalAnnouncement { peer_id, snapshot } => {
                self.handle_announcement(peer_id, *snapshot).await
            }
            CosiAction::ExternalChallenge {
                peer_id,
                snapshot_hash,
                signature,
                transaction,
            } => {
                self.handle_challenge(peer_id, snapshot_hash, signature, transaction)
                    .await
            }
            CosiAction::Finalization { peer_id, snapshot } => {
                self.handle_finalization(peer_id, *snapshot).await
            }
        }
    }

    /// A bootstrap acceptance snapshot: round 0 of a chain the graph does
    /// not know yet. Bypasses the round-gap machinery.
    pub(crate) fn is_initial_accept(&self, snapshot: &Snapshot) -> bool {
        snapshot.round_number == 0 && self.graph.chain(&snapshot.node_id).is_none()
    }

    /// Admit a new chain: persist its acceptance snapshot as round 0 and
    /// open round 1 referencing an existing chain.
    pub(crate) fn finalize_initial_accept(&mut self, snapshot: &Snapshot) {
        let round_gap = self.node.consensus.round_gap;
        let mut round_zero = CacheRound::new(snapshot.node_id, 0, snapshot.references);
        if let Err(e) = round_zero.validate_snapshot(snapshot, true, round_gap) {
            panic!("acceptance snapshot failed round 0 validation: {e}");
        }
        let sealed = match round_zero.as_final() {
            Some(sealed) => sealed,
            None => panic!("acceptance round sealed empty"),
        };

        let entry = SnapshotWithTopologicalOrder {
            snapshot: snapshot.clone(),
            topological_order: self.node.topology.next(),
        };
        if let Err(e) = self.node.store.write_snapshot(&entry) {
            panic!("acceptance snapshot write failed: {e}");
        }
        if let Err(e) = self.node.store.write_round(&sealed) {
            panic!("acceptance round write failed: {e}");
        }

        let external = self
            .graph
            .chains()
            .filter(|(id, _)| **id != snapshot.node_id)
            .map(|(_, chain)| chain.final_round)
            .min_by(|a, b| a.node_id.cmp(&b.node_id));
        let references = RoundLink {
            self_hash: sealed.hash,
            external: match external {
                Some(round) => round.hash,
                None => {
                    tracing::debug!("accepting first chain with no external reference");
                    [0u8; 32]
                }
            },
        };
        let cache = CacheRound::new(snapshot.node_id, 1, references);
        if let Err(e) =
            self.node
                .store
                .start_new_round(&snapshot.node_id, 1, &references, sealed.start)
        {
            panic!("acceptance round head write failed: {e}");
        }
        self.graph.assign_round(sealed, cache);
    }
}
