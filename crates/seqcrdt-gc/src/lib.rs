//! # seqcrdt-gc
//!
//! Deferred reclamation of tombstones.
//!
//! Edits never free memory. They hand back `(parent, child)` pairs naming a
//! tombstone and the element that holds it; the registry keeps them until a
//! version vector proves every replica has seen the removal and the store
//! reports that nothing live still hangs off the tombstone.
//!
//! - `registry`: `GcRegistry`, the pair set and its sweep
//! - `stability`: `StabilityTracker`, the minimum vector over known replicas

mod registry;
mod stability;

pub use registry::{GcPair, GcPolicy, GcRegistry, GcStats, GcStore, SweepResult};
pub use stability::StabilityTracker;
