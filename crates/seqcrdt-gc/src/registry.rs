//! GC pair registry and sweep.

use seqcrdt_core::{DataSize, TimeTicket, VersionVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A tombstoned `child` held by the element created at `parent`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GcPair<C> {
    pub parent: TimeTicket,
    pub child: C,
}

impl<C> GcPair<C> {
    pub fn new(parent: TimeTicket, child: C) -> Self {
        Self { parent, child }
    }
}

/// What the registry needs from the structure that owns the tombstones.
pub trait GcStore<C> {
    /// Removal stamp of the child, or `None` when it no longer exists.
    fn removed_at(&self, pair: &GcPair<C>) -> Option<TimeTicket>;

    /// Whether a live node still depends on the child.
    fn is_anchored(&self, pair: &GcPair<C>) -> bool;

    /// Physically remove the child from every index.
    fn purge(&mut self, pair: &GcPair<C>) -> Result<DataSize, String>;
}

/// Policy for sweeps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GcPolicy {
    /// Maximum pairs evicted by one sweep. Zero means no limit.
    pub max_evictions_per_sweep: usize,
}

/// Result of one sweep.
#[derive(Clone, Debug)]
pub struct SweepResult<C> {
    /// Pairs whose child was physically removed.
    pub evicted: Vec<GcPair<C>>,

    /// Size reclaimed by the evictions.
    pub freed: DataSize,

    /// Pairs dropped because their child was already gone.
    pub stale: usize,

    /// Pairs that were safe but failed to purge, and why.
    pub skipped: Vec<(GcPair<C>, String)>,

    /// Whether the eviction limit was not reached.
    pub completed: bool,
}

impl<C> SweepResult<C> {
    pub fn empty() -> Self {
        SweepResult {
            evicted: Vec::new(),
            freed: DataSize::default(),
            stale: 0,
            skipped: Vec::new(),
            completed: true,
        }
    }
}

/// Totals across sweeps.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    pub sweeps: u64,
    pub evicted: u64,
    pub freed: DataSize,
}

/// Registered pairs waiting to become safe.
#[derive(Clone, Debug)]
pub struct GcRegistry<C: Ord> {
    pairs: BTreeSet<GcPair<C>>,
    policy: GcPolicy,
    stats: GcStats,
}

impl<C: Ord + Clone> Default for GcRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Ord + Clone> GcRegistry<C> {
    pub fn new() -> Self {
        Self::with_policy(GcPolicy::default())
    }

    pub fn with_policy(policy: GcPolicy) -> Self {
        GcRegistry {
            pairs: BTreeSet::new(),
            policy,
            stats: GcStats::default(),
        }
    }

    pub fn policy(&self) -> &GcPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Register a pair. Returns false if it was already registered.
    pub fn register(&mut self, pair: GcPair<C>) -> bool {
        self.pairs.insert(pair)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, pair: &GcPair<C>) -> bool {
        self.pairs.contains(pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GcPair<C>> {
        self.pairs.iter()
    }

    /// Safe iff `vector` has seen the removal and nothing live depends on
    /// the child.
    pub fn is_safe_to_evict<S: GcStore<C>>(
        &self,
        store: &S,
        pair: &GcPair<C>,
        vector: &VersionVector,
    ) -> bool {
        match store.removed_at(pair) {
            Some(removed_at) => vector.contains(&removed_at) && !store.is_anchored(pair),
            None => false,
        }
    }

    /// Evict every safe pair. Unsafe pairs and failed purges stay registered
    /// for the next sweep.
    pub fn sweep<S: GcStore<C>>(&mut self, store: &mut S, vector: &VersionVector) -> SweepResult<C> {
        let mut result = SweepResult::empty();
        let limit = match self.policy.max_evictions_per_sweep {
            0 => usize::MAX,
            n => n,
        };

        let pairs: Vec<GcPair<C>> = self.pairs.iter().cloned().collect();
        for pair in pairs {
            if result.evicted.len() >= limit {
                result.completed = false;
                break;
            }
            let Some(removed_at) = store.removed_at(&pair) else {
                self.pairs.remove(&pair);
                result.stale += 1;
                continue;
            };
            if !vector.contains(&removed_at) || store.is_anchored(&pair) {
                continue;
            }
            match store.purge(&pair) {
                Ok(freed) => {
                    self.pairs.remove(&pair);
                    result.freed += freed;
                    result.evicted.push(pair);
                }
                Err(reason) => {
                    warn!(removed_at = %removed_at, reason = %reason, "GC purge failed; retained");
                    result.skipped.push((pair, reason));
                }
            }
        }

        self.stats.sweeps += 1;
        self.stats.evicted += result.evicted.len() as u64;
        self.stats.freed += result.freed;
        debug!(
            evicted = result.evicted.len(),
            stale = result.stale,
            skipped = result.skipped.len(),
            retained = self.pairs.len(),
            "GC sweep"
        );
        result
    }
}
