//! Clock lattice: how replicas combine what they know.
//!
//! Receiving changes joins a replica's vector with the sender's. Deciding
//! which tombstones every replica has seen takes the meet of all reported
//! vectors. Both are pointwise on lamports, so delivery order never matters.

/// Knowledge that merges by join and intersects by meet.
pub trait Lattice: Clone {
    /// Knowing nothing.
    fn bottom() -> Self;

    /// Everything either side has seen.
    fn join(&self, other: &Self) -> Self;

    /// Only what both sides have seen.
    fn meet(&self, other: &Self) -> Self;

    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// Meet over every report, or bottom when there are none.
    fn meet_all<'a>(mut reports: impl Iterator<Item = &'a Self>) -> Self
    where
        Self: 'a,
    {
        match reports.next() {
            Some(first) => reports.fold(first.clone(), |acc, next| acc.meet(next)),
            None => Self::bottom(),
        }
    }
}
