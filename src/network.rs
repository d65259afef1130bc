//! Consensus wire messages and the outbound peer contract.
//!
//! The transport itself (connection pool, framing, retries) is an external
//! collaborator. This module pins down what travels: the message shapes, a
//! size-limited codec, and the [`Peer`] trait the consensus core sends
//! through. Inbound messages reach the core via the entry points on
//! [`crate::node::Node`].

use async_trait::async_trait;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::consensus::graph::SyncPoint;
use crate::consensus::snapshot::Snapshot;
use crate::crypto::cosi::{Commitment, CosiSignature};
use crate::transaction::VersionedTransaction;
use crate::Hash;

/// A peer identifier: the fingerprint of the peer's spend key, which is also
/// its chain id.
pub type PeerId = Hash;

/// Maximum encoded message size (16 MiB).
pub const MAX_MESSAGE_BYTES: u64 = 16 * 1024 * 1024;

/// Consensus protocol messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// A proposer announces an unsigned snapshot.
    Announcement(Box<Snapshot>),
    /// A participant returns its commitment; `want_tx` asks the proposer to
    /// attach the transaction body to the challenge.
    Commitment {
        snapshot_hash: Hash,
        commitment: Commitment,
        want_tx: bool,
    },
    /// The proposer distributes the aggregate commitment, with the
    /// transaction body for peers that asked for it.
    Challenge {
        snapshot_hash: Hash,
        signature: CosiSignature,
        transaction: Option<VersionedTransaction>,
    },
    /// A participant returns its response scalar.
    Response {
        snapshot_hash: Hash,
        response: [u8; 32],
    },
    /// A signed snapshot reached threshold and is final.
    Finalization(Box<Snapshot>),
    /// Acknowledges receipt of a finalization.
    Confirm(Hash),
    /// The sender's sealed round heads, for graph sync.
    GraphSummary(Vec<SyncPoint>),
}

/// Network errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE_BYTES)
        .with_little_endian()
        .with_fixint_encoding()
}

/// Encode a message for the wire.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, NetworkError> {
    codec()
        .serialize(message)
        .map_err(|e| NetworkError::Encode(e.to_string()))
}

/// Decode a message, rejecting oversized or trailing input.
pub fn decode_message(bytes: &[u8]) -> Result<Message, NetworkError> {
    codec()
        .deserialize(bytes)
        .map_err(|e| NetworkError::Decode(e.to_string()))
}

/// Outbound sends the consensus core performs.
///
/// Implementations deliver best-effort; the protocol absorbs loss through
/// retransmission and timestamp advance, so errors here are logged and
/// retried upstream rather than unwinding a handler.
#[async_trait]
pub trait Peer: Send + Sync {
    async fn send_announcement(&self, to: PeerId, snapshot: &Snapshot) -> Result<(), NetworkError>;

    async fn send_commitment(
        &self,
        to: PeerId,
        snapshot_hash: Hash,
        commitment: Commitment,
        want_tx: bool,
    ) -> Result<(), NetworkError>;

    async fn send_challenge(
        &self,
        to: PeerId,
        snapshot_hash: Hash,
        signature: CosiSignature,
        transaction: Option<VersionedTransaction>,
    ) -> Result<(), NetworkError>;

    async fn send_response(
        &self,
        to: PeerId,
        snapshot_hash: Hash,
        response: [u8; 32],
    ) -> Result<(), NetworkError>;

    async fn send_finalization(&self, to: PeerId, snapshot: &Snapshot) -> Result<(), NetworkError>;

    async fn send_confirm(&self, to: PeerId, snapshot_hash: Hash) -> Result<(), NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trip() {
        let message = Message::Response {
            snapshot_hash: [5u8; 32],
            response: [6u8; 32],
        };
        let bytes = encode_message(&message).unwrap();
        match decode_message(&bytes).unwrap() {
            Message::Response {
                snapshot_hash,
                response,
            } => {
                assert_eq!(snapshot_hash, [5u8; 32]);
                assert_eq!(response, [6u8; 32]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_message(&[0xff; 7]).is_err());
    }

    #[test]
    fn announcement_survives_codec() {
        let mut snapshot = Snapshot::new([1u8; 32], [2u8; 32]);
        snapshot.timestamp = 42;
        let bytes = encode_message(&Message::Announcement(Box::new(snapshot.clone()))).unwrap();
        match decode_message(&bytes).unwrap() {
            Message::Announcement(s) => {
                assert_eq!(s.node_id, snapshot.node_id);
                assert_eq!(s.timestamp, 42);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
