//! Snapshot consensus: the round graph and its collective-signing state.
//!
//! Each committee member owns one *chain*: a sequence of timestamp-bounded
//! rounds, each holding the snapshots that member proposed. A snapshot
//! references the prior final round of its own chain and one final round of
//! another chain, weaving the per-member chains into a single DAG. Rounds
//! progress `CacheRound` (open, accepting snapshots) → `FinalRound` (sealed,
//! referenced across chains).
//!
//! The types here are pure state; the handlers that drive them live in
//! [`crate::node`].

pub mod committee;
pub mod graph;
pub mod round;
pub mod snapshot;
