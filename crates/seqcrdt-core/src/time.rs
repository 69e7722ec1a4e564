//! Logical timestamps.
//!
//! A `TimeTicket` is issued once per created or mutated unit of content. Tickets
//! are totally ordered by `(lamport, actor_id, delimiter)`, which gives every
//! replica the same answer when two causally unrelated edits must be ordered.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use ulid::Ulid;

/// Actor id used by the initial (sentinel) ticket.
pub const INITIAL_ACTOR_ID: &str = "000000000000000000000000";

/// Actor id used by the maximum ticket.
pub const MAX_ACTOR_ID: &str = "ffffffffffffffffffffffff";

/// Identifier of a replica that issues tickets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, globally unique actor id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn initial() -> Self {
        Self(INITIAL_ACTOR_ID.to_string())
    }

    pub fn max() -> Self {
        Self(MAX_ACTOR_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A logical timestamp: the lamport clock of the change that issued it, the
/// issuing actor, and a delimiter distinguishing tickets within one change.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTicket {
    lamport: u64,
    delimiter: u32,
    actor_id: ActorId,
}

impl TimeTicket {
    pub fn new(lamport: u64, delimiter: u32, actor_id: ActorId) -> Self {
        Self {
            lamport,
            delimiter,
            actor_id,
        }
    }

    /// The sentinel ticket every replica agrees on; head nodes are created at it.
    pub fn initial() -> Self {
        Self::new(0, 0, ActorId::initial())
    }

    /// The greatest ticket. Local edits behave as if stamped with full knowledge.
    pub fn max() -> Self {
        Self::new(u64::MAX, u32::MAX, ActorId::max())
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn delimiter(&self) -> u32 {
        self.delimiter
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Whether this ticket is strictly later in the total order.
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }

    /// Compact form used in debug output: `lamport:actor-suffix:delimiter`.
    pub fn to_test_string(&self) -> String {
        let actor = self.actor_id.as_str();
        let suffix: String = actor
            .chars()
            .skip(actor.chars().count().saturating_sub(2))
            .collect();
        format!("{}:{}:{}", self.lamport, suffix, self.delimiter)
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor_id.cmp(&other.actor_id))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_test_string())
    }
}
