//! Committee membership, versioned by timestamp.
//!
//! Membership drifts slowly as acceptance snapshots finalize. Handlers never
//! read ambient membership state: they take a [`CommitteeView`] pinned to a
//! snapshot timestamp, so a message is always judged against the members
//! that were active when it was stamped.

use serde::{Deserialize, Serialize};

use crate::crypto::keys::PublicKey;
use crate::Hash;

/// One committee member: a chain and the spend key that signs for it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub node_id: Hash,
    pub signer: PublicKey,
    /// Timestamp from which this member participates in consensus.
    pub accepted_at: u64,
}

/// The process-wide membership table, reloaded after finalizations.
#[derive(Clone, Debug, Default)]
pub struct Committee {
    members: Vec<CommitteeMember>,
}

impl Committee {
    pub fn new(mut members: Vec<CommitteeMember>) -> Self {
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        members.dedup_by_key(|m| m.node_id);
        Committee { members }
    }

    /// The members active at `timestamp`, in sorted node-id order.
    pub fn view(&self, timestamp: u64) -> CommitteeView {
        CommitteeView {
            members: self
                .members
                .iter()
                .filter(|m| m.accepted_at <= timestamp)
                .copied()
                .collect(),
            at: timestamp,
        }
    }

    pub fn contains(&self, node_id: &Hash) -> bool {
        self.members.iter().any(|m| m.node_id == *node_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A value snapshot of membership at one timestamp.
#[derive(Clone, Debug)]
pub struct CommitteeView {
    members: Vec<CommitteeMember>,
    at: u64,
}

impl CommitteeView {
    /// The timestamp this view was taken at.
    pub fn at(&self) -> u64 {
        self.at
    }

    pub fn members(&self) -> &[CommitteeMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Signing keys in sorted committee order, for mask-indexed aggregation.
    pub fn keys(&self) -> Vec<PublicKey> {
        self.members.iter().map(|m| m.signer).collect()
    }

    /// A member's position in sorted committee order.
    pub fn index_of(&self, node_id: &Hash) -> Option<usize> {
        self.members.iter().position(|m| m.node_id == *node_id)
    }

    pub fn contains(&self, node_id: &Hash) -> bool {
        self.index_of(node_id).is_some()
    }

    /// Minimum contributions for a valid aggregate at this timestamp.
    pub fn threshold(&self) -> usize {
        crate::constants::threshold(self.members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    fn member(id: u8, accepted_at: u64) -> CommitteeMember {
        CommitteeMember {
            node_id: [id; 32],
            signer: Keypair::generate().public,
            accepted_at,
        }
    }

    #[test]
    fn view_filters_by_acceptance_time() {
        let committee = Committee::new(vec![member(1, 0), member(2, 0), member(3, 500)]);
        assert_eq!(committee.view(100).len(), 2);
        assert_eq!(committee.view(500).len(), 3);
    }

    #[test]
    fn members_sorted_by_node_id() {
        let committee = Committee::new(vec![member(9, 0), member(1, 0), member(5, 0)]);
        let view = committee.view(0);
        assert_eq!(view.index_of(&[1u8; 32]), Some(0));
        assert_eq!(view.index_of(&[5u8; 32]), Some(1));
        assert_eq!(view.index_of(&[9u8; 32]), Some(2));
        assert_eq!(view.index_of(&[7u8; 32]), None);
    }

    #[test]
    fn duplicate_members_collapse() {
        let committee = Committee::new(vec![member(1, 0), member(1, 0)]);
        assert_eq!(committee.len(), 1);
    }

    #[test]
    fn threshold_tracks_view_size() {
        let committee = Committee::new(vec![
            member(1, 0),
            member(2, 0),
            member(3, 0),
            member(4, 0),
            member(5, 900),
        ]);
        assert_eq!(committee.view(100).threshold(), 3);
        assert_eq!(committee.view(1_000).threshold(), 4);
    }
}
