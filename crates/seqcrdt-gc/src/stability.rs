//! Stable vector tracking.
//!
//! A tombstone may be reclaimed once every replica has seen its removal. The
//! tracker keeps the last vector reported by each replica and exposes their
//! component-wise minimum, which is the vector to sweep with.

use seqcrdt_core::{ActorId, Lattice, TimeTicket, VersionVector};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct StabilityTracker {
    frontiers: BTreeMap<ActorId, VersionVector>,
    stable: VersionVector,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what `replica` has seen. Reports only move forward.
    pub fn update(&mut self, replica: ActorId, vector: &VersionVector) {
        let frontier = self.frontiers.entry(replica).or_default();
        frontier.join_assign(vector);
        self.recompute();
    }

    /// Stop waiting on a replica that left.
    pub fn remove(&mut self, replica: &ActorId) {
        self.frontiers.remove(replica);
        self.recompute();
    }

    pub fn replica_count(&self) -> usize {
        self.frontiers.len()
    }

    pub fn frontier(&self, replica: &ActorId) -> Option<&VersionVector> {
        self.frontiers.get(replica)
    }

    /// Minimum over all tracked replicas. Empty when nothing is tracked.
    pub fn stable_vector(&self) -> &VersionVector {
        &self.stable
    }

    pub fn is_stable(&self, ticket: &TimeTicket) -> bool {
        self.stable.contains(ticket)
    }

    fn recompute(&mut self) {
        self.stable = VersionVector::meet_all(self.frontiers.values());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(entries: &[(&str, u64)]) -> VersionVector {
        VersionVector::from_entries(entries.iter().map(|(a, l)| (ActorId::new(*a), *l)))
    }

    #[test]
    fn test_stable_vector_is_minimum() {
        let mut tracker = StabilityTracker::new();
        tracker.update(ActorId::new("a"), &vv(&[("a", 5), ("b", 2)]));
        tracker.update(ActorId::new("b"), &vv(&[("a", 3), ("b", 4)]));

        assert_eq!(tracker.stable_vector(), &vv(&[("a", 3), ("b", 2)]));
        assert!(tracker.is_stable(&TimeTicket::new(3, 0, ActorId::new("a"))));
        assert!(!tracker.is_stable(&TimeTicket::new(4, 0, ActorId::new("a"))));
    }

    #[test]
    fn test_reports_never_regress() {
        let mut tracker = StabilityTracker::new();
        tracker.update(ActorId::new("a"), &vv(&[("a", 5)]));
        tracker.update(ActorId::new("a"), &vv(&[("a", 2)]));
        assert_eq!(tracker.frontier(&ActorId::new("a")), Some(&vv(&[("a", 5)])));
    }

    #[test]
    fn test_removing_replica_releases_stability() {
        let mut tracker = StabilityTracker::new();
        tracker.update(ActorId::new("a"), &vv(&[("a", 5)]));
        tracker.update(ActorId::new("b"), &vv(&[("a", 1)]));
        assert_eq!(tracker.stable_vector().lamport_of(&ActorId::new("a")), 1);

        tracker.remove(&ActorId::new("b"));
        assert_eq!(tracker.stable_vector().lamport_of(&ActorId::new("a")), 5);
        assert_eq!(tracker.replica_count(), 1);
    }
}
