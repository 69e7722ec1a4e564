//! Changes and the context that builds them.

use crate::element::{CrdtElement, GcChild};
use crate::handle::{Text, Tree};
use crate::operation::{ElementSpec, OpSource, Operation, SetOperation};
use crate::root::CrdtRoot;
use seqcrdt_core::{ActorId, CrdtError, DataSize, Result, TimeTicket, VersionVector};
use seqcrdt_gc::GcPair;
use serde::{Deserialize, Serialize};

/// Identity and causal context of a change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeId {
    pub lamport: u64,
    pub actor: ActorId,
    pub version_vector: VersionVector,
}

impl ChangeId {
    pub fn new(lamport: u64, actor: ActorId, version_vector: VersionVector) -> Self {
        ChangeId {
            lamport,
            actor,
            version_vector,
        }
    }

    /// The ticket for the `delimiter`-th event of this change.
    pub fn ticket(&self, delimiter: u32) -> TimeTicket {
        TimeTicket::new(self.lamport, delimiter, self.actor.clone())
    }

    /// Clock after observing `other`: lamport moves past both, and the vector
    /// takes the pointwise maximum with our own entry at the new lamport.
    pub fn sync_clocks(&self, other: &ChangeId) -> ChangeId {
        let lamport = self.lamport.max(other.lamport) + 1;
        let mut version_vector = self.version_vector.merged_with(&other.version_vector);
        version_vector.set(self.actor.clone(), lamport);
        ChangeId::new(lamport, self.actor.clone(), version_vector)
    }

    /// Clock for the next local change.
    pub fn next(&self) -> ChangeId {
        let lamport = self.lamport + 1;
        let mut version_vector = self.version_vector.clone();
        version_vector.set(self.actor.clone(), lamport);
        ChangeId::new(lamport, self.actor.clone(), version_vector)
    }
}

/// A batch of operations made by one `Document::update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub operations: Vec<Operation>,
    pub message: Option<String>,
}

/// Working state of one update: a copy of the root, the change id, and the
/// operations recorded so far.
#[derive(Debug)]
pub struct ChangeContext {
    id: ChangeId,
    delimiter: u32,
    root: CrdtRoot,
    operations: Vec<Operation>,
    message: Option<String>,
}

impl ChangeContext {
    pub fn new(id: ChangeId, root: CrdtRoot) -> Self {
        ChangeContext {
            id,
            delimiter: 0,
            root,
            operations: Vec::new(),
            message: None,
        }
    }

    pub fn id(&self) -> &ChangeId {
        &self.id
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Issue the next ticket of this change.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.delimiter += 1;
        self.id.ticket(self.delimiter)
    }

    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut CrdtRoot {
        &mut self.root
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn register_gc_pair(&mut self, pair: GcPair<GcChild>) {
        self.root.register_gc_pair(pair);
    }

    pub fn acc(&mut self, diff: DataSize) {
        self.root.acc(diff);
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Create an empty text under `key` and return a handle to it.
    pub fn create_text(&mut self, key: &str) -> Result<Text<'_>> {
        let created_at = self.issue_time_ticket();
        self.set_element(key, ElementSpec::Text { created_at: created_at.clone() })?;
        Ok(Text::attached(self, created_at))
    }

    /// Create a tree with an empty `<root_tag>` under `key`.
    pub fn create_tree(&mut self, key: &str, root_tag: &str) -> Result<Tree<'_>> {
        let created_at = self.issue_time_ticket();
        self.set_element(
            key,
            ElementSpec::Tree {
                created_at: created_at.clone(),
                root_tag: root_tag.to_string(),
            },
        )?;
        Ok(Tree::attached(self, created_at))
    }

    fn set_element(&mut self, key: &str, value: ElementSpec) -> Result<()> {
        let op = SetOperation {
            parent_created_at: self.root.created_at().clone(),
            key: key.to_string(),
            executed_at: value.created_at().clone(),
            value,
        };
        let op = Operation::Set(op);
        op.execute(&mut self.root, OpSource::Local, None)?;
        self.push(op);
        Ok(())
    }

    /// Handle to the text under `key`.
    pub fn get_text(&mut self, key: &str) -> Result<Text<'_>> {
        let created_at = self.keyed(key)?;
        if !matches!(self.root.find_by_created_at(&created_at), Some(CrdtElement::Text(_))) {
            return Err(CrdtError::InvalidArgument(format!("{} is not a Text", key)));
        }
        Ok(Text::attached(self, created_at))
    }

    /// Handle to the tree under `key`.
    pub fn get_tree(&mut self, key: &str) -> Result<Tree<'_>> {
        let created_at = self.keyed(key)?;
        if !matches!(self.root.find_by_created_at(&created_at), Some(CrdtElement::Tree(_))) {
            return Err(CrdtError::InvalidArgument(format!("{} is not a Tree", key)));
        }
        Ok(Tree::attached(self, created_at))
    }

    fn keyed(&self, key: &str) -> Result<TimeTicket> {
        self.root
            .key_created_at(key)
            .cloned()
            .ok_or_else(|| CrdtError::InvalidArgument(format!("no element under {}", key)))
    }

    /// Finish the update: the root to commit and, if anything was recorded,
    /// the change to ship.
    pub fn into_parts(self) -> (CrdtRoot, Option<Change>) {
        let change = (!self.operations.is_empty()).then(|| Change {
            id: self.id,
            operations: self.operations,
            message: self.message,
        });
        (self.root, change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_share_lamport() {
        let id = ChangeId::new(3, ActorId::new("a"), VersionVector::new());
        let mut ctx = ChangeContext::new(id, CrdtRoot::default());
        let first = ctx.issue_time_ticket();
        let second = ctx.issue_time_ticket();
        assert_eq!(first.lamport(), 3);
        assert!(second.after(&first));
    }

    #[test]
    fn test_sync_clocks() {
        let vv = |entries: &[(&str, u64)]| {
            VersionVector::from_entries(entries.iter().map(|(a, l)| (ActorId::new(*a), *l)))
        };
        let ours = ChangeId::new(2, ActorId::new("a"), vv(&[("a", 2)]));
        let theirs = ChangeId::new(7, ActorId::new("b"), vv(&[("a", 1), ("b", 7)]));

        let synced = ours.sync_clocks(&theirs);
        assert_eq!(synced.lamport, 8);
        assert_eq!(synced.version_vector, vv(&[("a", 8), ("b", 7)]));
    }

    #[test]
    fn test_empty_context_yields_no_change() {
        let id = ChangeId::new(1, ActorId::new("a"), VersionVector::new());
        let ctx = ChangeContext::new(id, CrdtRoot::default());
        let (_, change) = ctx.into_parts();
        assert!(change.is_none());
    }

    #[test]
    fn test_get_missing_or_mismatched_element() {
        let id = ChangeId::new(1, ActorId::new("a"), VersionVector::new());
        let mut ctx = ChangeContext::new(id, CrdtRoot::default());
        assert!(ctx.get_text("missing").is_err());
        ctx.create_tree("doc", "root").unwrap();
        assert!(matches!(ctx.get_text("doc"), Err(CrdtError::InvalidArgument(_))));
        assert!(ctx.get_tree("doc").is_ok());
    }
}
