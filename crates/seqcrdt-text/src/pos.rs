//! Identities and positions in a split sequence.
//!
//! A node is identified by the ticket that created its content plus the
//! character offset at which it starts inside that original insert. Splitting
//! a node keeps `created_at` and moves `offset`, so a remote replica that
//! addresses a character by `(created_at, offset)` finds it however the local
//! copy has been split since.

use seqcrdt_core::{ActorId, TimeTicket};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable identity of a run of characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplitNodeId {
    created_at: TimeTicket,
    offset: usize,
}

impl SplitNodeId {
    pub fn new(created_at: TimeTicket, offset: usize) -> Self {
        Self { created_at, offset }
    }

    pub fn created_at(&self) -> &TimeTicket {
        &self.created_at
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn has_same_created_at(&self, other: &SplitNodeId) -> bool {
        self.created_at == other.created_at
    }

    /// Identity of the piece starting `offset` characters into this one.
    pub fn split(&self, offset: usize) -> SplitNodeId {
        SplitNodeId::new(self.created_at.clone(), self.offset + offset)
    }

    pub fn to_test_string(&self) -> String {
        format!("{}:{}", self.created_at.to_test_string(), self.offset)
    }
}

impl fmt::Display for SplitNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_test_string())
    }
}

/// A caret: "right after `relative_offset` characters of node `id`".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitPos {
    id: SplitNodeId,
    relative_offset: usize,
}

impl SplitPos {
    pub fn new(id: SplitNodeId, relative_offset: usize) -> Self {
        Self { id, relative_offset }
    }

    pub fn id(&self) -> &SplitNodeId {
        &self.id
    }

    pub fn relative_offset(&self) -> usize {
        self.relative_offset
    }

    /// The same caret expressed against the unsplit original insert.
    pub fn absolute_id(&self) -> SplitNodeId {
        self.id.split(self.relative_offset)
    }

    pub fn to_struct(&self) -> PosStruct {
        let created_at = self.id.created_at();
        PosStruct {
            actor_id: created_at.actor_id().clone(),
            lamport: created_at.lamport(),
            delimiter: created_at.delimiter(),
            offset: self.id.offset(),
            relative_offset: self.relative_offset,
        }
    }

    pub fn from_struct(s: &PosStruct) -> Self {
        SplitPos::new(
            SplitNodeId::new(
                TimeTicket::new(s.lamport, s.delimiter, s.actor_id.clone()),
                s.offset,
            ),
            s.relative_offset,
        )
    }

    pub fn to_test_string(&self) -> String {
        format!("{}:{}", self.id.to_test_string(), self.relative_offset)
    }
}

/// A `[from, to]` pair of carets.
pub type SplitPosRange = (SplitPos, SplitPos);

/// Flat, transport-friendly form of a `SplitPos`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosStruct {
    #[serde(rename = "actorID")]
    pub actor_id: ActorId,
    pub lamport: u64,
    pub delimiter: u32,
    pub offset: usize,
    pub relative_offset: usize,
}
