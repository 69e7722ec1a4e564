//! Version vector for causal knowledge across replicas.
//!
//! A version vector records, per actor, the highest lamport timestamp whose
//! change has been observed. The sequence engine uses it twice: to decide
//! whether a remote editor could have seen a node when it issued a delete or
//! style, and to decide when a tombstone is stable enough to be collected.

use crate::lattice::Lattice;
use crate::time::{ActorId, TimeTicket};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A version vector tracking the frontier of observed changes per actor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    /// Map from actor to highest observed lamport.
    entries: BTreeMap<ActorId, u64>,
}

impl VersionVector {
    /// Create an empty version vector.
    pub fn new() -> Self {
        VersionVector {
            entries: BTreeMap::new(),
        }
    }

    /// Create a version vector from entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (ActorId, u64)>) -> Self {
        VersionVector {
            entries: entries.into_iter().collect(),
        }
    }

    /// Get the lamport recorded for an actor, if any.
    pub fn get(&self, actor: &ActorId) -> Option<u64> {
        self.entries.get(actor).copied()
    }

    /// Get the lamport recorded for an actor, defaulting to zero.
    pub fn lamport_of(&self, actor: &ActorId) -> u64 {
        self.get(actor).unwrap_or(0)
    }

    /// Set the lamport for an actor.
    pub fn set(&mut self, actor: ActorId, lamport: u64) {
        self.entries.insert(actor, lamport);
    }

    /// Drop an actor from the vector.
    pub fn unset(&mut self, actor: &ActorId) {
        self.entries.remove(actor);
    }

    /// Whether the change that issued `ticket` has been observed.
    pub fn contains(&self, ticket: &TimeTicket) -> bool {
        self.lamport_of(ticket.actor_id()) >= ticket.lamport()
    }

    /// Returns true if for all actors, self[a] >= other[a].
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other
            .entries
            .iter()
            .all(|(actor, &lamport)| self.lamport_of(actor) >= lamport)
    }

    /// Check if two vectors are concurrent (neither dominates the other).
    pub fn is_concurrent_with(&self, other: &VersionVector) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// Merge with another version vector (component-wise max).
    pub fn merge(&mut self, other: &VersionVector) {
        for (actor, &lamport) in &other.entries {
            let current = self.entries.entry(actor.clone()).or_insert(0);
            *current = (*current).max(lamport);
        }
    }

    /// Create a merged version vector without modifying self.
    pub fn merged_with(&self, other: &VersionVector) -> VersionVector {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Component-wise minimum. An actor missing from either side is treated as
    /// zero and therefore dropped: nothing from it is known to both.
    pub fn min_with(&self, other: &VersionVector) -> VersionVector {
        let actors: BTreeSet<_> = self
            .entries
            .keys()
            .chain(other.entries.keys())
            .cloned()
            .collect();

        let mut result = VersionVector::new();
        for actor in actors {
            let min = self.lamport_of(&actor).min(other.lamport_of(&actor));
            if min > 0 {
                result.set(actor, min);
            }
        }
        result
    }

    /// The greatest lamport recorded for any actor.
    pub fn max_lamport(&self) -> u64 {
        self.entries.values().copied().max().unwrap_or(0)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &u64)> {
        self.entries.iter()
    }

    /// Get the number of actors tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the version vector is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Lattice for VersionVector {
    fn bottom() -> Self {
        VersionVector::new()
    }

    fn join(&self, other: &Self) -> Self {
        self.merged_with(other)
    }

    fn meet(&self, other: &Self) -> Self {
        self.min_with(other)
    }
}

/// Whether an editor holding `version_vector` had seen the change that issued
/// `ticket`. Local edits pass `None` and have seen everything.
pub fn knows(version_vector: Option<&VersionVector>, ticket: &TimeTicket) -> bool {
    version_vector.map_or(true, |vv| vv.contains(ticket))
}
