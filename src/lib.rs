//! # Vela
//!
//! The collective-signing consensus core of the Vela DAG ledger. A fixed
//! committee of nodes agrees on an append-only graph of *snapshots*, each
//! carrying one transaction. Agreement is reached with a two-round Schnorr
//! collective signature (CoSi): every participant contributes a commitment
//! and a response, and a threshold-weight aggregate signature marks the
//! snapshot final.
//!
//! The core is a single-writer event machine:
//! - peer tasks validate and *enqueue* actions,
//! - one dispatcher task drains the queue and runs the proposer and
//!   participant paths against the local round graph,
//! - the finalization acceptor is the only component that writes committed
//!   snapshots, in globally monotonic topological order.
//!
//! Peer transport, transaction semantics, and the node-acceptance state
//! machine are external collaborators reached through the traits in
//! [`network`], [`transaction`], and [`node::storage`].

pub mod clock;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod network;
pub mod node;
pub mod transaction;

/// Protocol constants.
pub mod constants {
    /// Current snapshot wire version.
    pub const SNAPSHOT_VERSION: u8 = 2;

    /// Timestamp window covered by one round, in nanoseconds (3 s).
    pub const SNAPSHOT_ROUND_GAP: u64 = 3_000_000_000;

    /// Staleness multiplier for cross-chain references.
    pub const SNAPSHOT_REFERENCE_THRESHOLD: u64 = 10;

    /// Extra staleness factor before a participant rewrites the external
    /// reference of an empty head round.
    pub const PARTICIPANT_REFRESH_FACTOR: u64 = 32;

    /// Extra staleness factor before a proposer refreshes the external
    /// reference of its own empty head round.
    pub const PROPOSER_REFRESH_FACTOR: u64 = 36;

    /// Backoff while waiting to catch up with peers.
    pub const CATCH_UP_RETRY_MS: u64 = 100;

    /// Backoff while waiting for the wall clock to pass the cache timestamp.
    pub const TIMESTAMP_WAIT_MS: u64 = 300;

    /// Largest committee a signer mask can describe.
    pub const MAX_COMMITTEE_SIZE: usize = 64;

    /// Snapshots served per graph-sync batch.
    pub const SYNC_BATCH_SIZE: usize = 1_000;

    /// Consensus threshold for a committee of `n` members: 2n/3 + 1.
    pub fn threshold(n: usize) -> usize {
        (n * 2) / 3 + 1
    }
}

/// 32-byte hash used throughout the protocol.
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all Vela domains use ASCII). Panics at
/// runtime if it is not; that is a programming error, not input error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}
