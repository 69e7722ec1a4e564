//! # seqcrdt-core
//!
//! Shared primitives for the seqcrdt positional-identity sequence engine.
//!
//! This crate provides:
//! - Logical timestamps (`TimeTicket`) with a total order across replicas
//! - Version vectors for causal knowledge and GC safety decisions
//! - The join-semilattice trait used by mergeable metadata
//! - A slot arena shared by the text and tree node graphs
//! - A last-writer-wins attribute map for style metadata
//! - Data size accounting and the engine error taxonomy

pub mod arena;
pub mod attrs;
pub mod data_size;
pub mod error;
pub mod lattice;
pub mod time;
pub mod version_vector;

pub use arena::{Arena, NodeIdx};
pub use attrs::{AttrEntry, AttrMap};
pub use data_size::{DataSize, DocSize, TIME_TICKET_SIZE};
pub use error::{CrdtError, Result};
pub use lattice::Lattice;
pub use time::{ActorId, TimeTicket, INITIAL_ACTOR_ID, MAX_ACTOR_ID};
pub use version_vector::{knows, VersionVector};
