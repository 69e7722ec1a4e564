//! RGA with split-on-insert nodes.
//!
//! Content is stored as runs ("split nodes"). A run is created whole by one
//! insert and later split wherever an edit boundary falls inside it; pieces
//! keep the creating ticket and differ by offset, and are never merged back.
//!
//! Every node lives in one arena and is indexed twice:
//! - `by_id` orders nodes by identity and answers floor lookups for remote
//!   positions;
//! - `index` is a weighted splay tree over document order for index lookups,
//!   where tombstones weigh zero.
//!
//! Document order is also threaded through `prev`/`next`, and pieces of one
//! original insert are chained through `ins_prev`/`ins_next`.

use crate::pos::{SplitNodeId, SplitPos, SplitPosRange};
use crate::splay::SplayTree;
use seqcrdt_core::{
    knows, ActorId, Arena, CrdtError, DataSize, DocSize, NodeIdx, Result, TimeTicket,
    VersionVector, TIME_TICKET_SIZE,
};
use std::collections::BTreeMap;
use std::fmt;

/// Content that can be cut into pieces.
pub trait SplitValue: Clone + Default + fmt::Debug + fmt::Display {
    /// Length in document units.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep `[0, offset)` and return `[offset, len)`.
    fn split_off(&mut self, offset: usize) -> Self;

    fn data_size(&self) -> DataSize;

    /// Size of a live value split by what a tombstone inside it holds.
    fn doc_size(&self) -> DocSize {
        DocSize::live(self.data_size())
    }
}

/// A run of content together with its links.
#[derive(Clone, Debug)]
pub struct SplitNode<V> {
    id: SplitNodeId,
    value: V,
    removed_at: Option<TimeTicket>,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
    ins_prev: Option<NodeIdx>,
    ins_next: Option<NodeIdx>,
}

impl<V: SplitValue> SplitNode<V> {
    fn new(id: SplitNodeId, value: V) -> Self {
        Self {
            id,
            value,
            removed_at: None,
            prev: None,
            next: None,
            ins_prev: None,
            ins_next: None,
        }
    }

    pub fn id(&self) -> &SplitNodeId {
        &self.id
    }

    pub fn created_at(&self) -> &TimeTicket {
        self.id.created_at()
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn removed_at(&self) -> Option<&TimeTicket> {
        self.removed_at.as_ref()
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Length of the content, tombstoned or not.
    pub fn content_len(&self) -> usize {
        self.value.len()
    }

    /// Length visible in the document.
    pub fn len(&self) -> usize {
        if self.is_removed() {
            0
        } else {
            self.value.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prev(&self) -> Option<NodeIdx> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeIdx> {
        self.next
    }

    pub fn ins_prev(&self) -> Option<NodeIdx> {
        self.ins_prev
    }

    pub fn ins_next(&self) -> Option<NodeIdx> {
        self.ins_next
    }

    /// Caret range covering this node's content.
    pub fn pos_range(&self) -> SplitPosRange {
        (
            SplitPos::new(self.id.clone(), 0),
            SplitPos::new(self.id.clone(), self.content_len()),
        )
    }

    pub fn data_size(&self) -> DataSize {
        let mut size = self.value.data_size();
        size.meta += TIME_TICKET_SIZE;
        if self.is_removed() {
            size.meta += TIME_TICKET_SIZE;
        }
        size
    }

    /// A tombstone is garbage as a whole; a live node only for what its
    /// value holds removed.
    pub fn doc_size(&self) -> DocSize {
        if self.is_removed() {
            return DocSize::garbage(self.data_size());
        }
        self.value.doc_size() + DocSize::live(DataSize::new(0, TIME_TICKET_SIZE))
    }

    fn to_test_string(&self) -> String {
        if self.is_removed() {
            format!("{{{}}}", self.value)
        } else {
            format!("[{}]", self.value)
        }
    }
}

/// A change to the visible content, in document indexes.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange<V> {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub value: Option<V>,
}

/// Outcome of `RgaTreeSplit::edit`.
#[derive(Clone, Debug)]
pub struct EditResult<V> {
    /// Caret right after the inserted content, or where the deleted content was.
    pub caret: SplitPos,
    /// Nodes tombstoned by this edit; each one becomes a GC target.
    pub removed: Vec<SplitNodeId>,
    /// Tombstones whose stamp this edit moved earlier. Purging the pair that
    /// first removed them no longer reaches them, so they need a pair too.
    pub restamped: Vec<SplitNodeId>,
    /// Pieces cut off existing nodes at the range ends. Each starts out with
    /// the tombstones of the node it came from and is reclaimed on its own.
    pub split: Vec<SplitNodeId>,
    pub changes: Vec<ValueChange<V>>,
}

/// Split-on-insert RGA over values of type `V`.
#[derive(Clone, Debug)]
pub struct RgaTreeSplit<V> {
    head: NodeIdx,
    nodes: Arena<SplitNode<V>>,
    index: SplayTree,
    by_id: BTreeMap<SplitNodeId, NodeIdx>,
}

impl<V: SplitValue> Default for RgaTreeSplit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SplitValue> RgaTreeSplit<V> {
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let head_id = SplitNodeId::new(TimeTicket::initial(), 0);
        let head = nodes.alloc(SplitNode::new(head_id.clone(), V::default()));

        let mut index = SplayTree::new();
        index.insert_first(head, 0);

        let mut by_id = BTreeMap::new();
        by_id.insert(head_id, head);

        Self {
            head,
            nodes,
            index,
            by_id,
        }
    }

    pub fn head(&self) -> NodeIdx {
        self.head
    }

    /// Visible length.
    pub fn len(&self) -> usize {
        self.index.weight()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes held, tombstones included, head excluded.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn node(&self, idx: NodeIdx) -> Option<&SplitNode<V>> {
        self.nodes.get(idx)
    }

    pub(crate) fn node_mut(&mut self, idx: NodeIdx) -> Option<&mut SplitNode<V>> {
        self.nodes.get_mut(idx)
    }

    /// Node with exactly this identity.
    pub fn find_node(&self, id: &SplitNodeId) -> Option<NodeIdx> {
        self.by_id.get(id).copied()
    }

    /// Greatest node with the same creating ticket whose offset is `<= id.offset`.
    pub fn find_floor(&self, id: &SplitNodeId) -> Option<NodeIdx> {
        self.by_id
            .range(..=id)
            .next_back()
            .filter(|(key, _)| key.has_same_created_at(id))
            .map(|(_, idx)| *idx)
    }

    /// Like `find_floor`, but an identity sitting exactly on a split boundary
    /// resolves to the end of the piece before it.
    pub fn find_floor_prefer_left(&self, id: &SplitNodeId) -> Result<NodeIdx> {
        let idx = self
            .find_floor(id)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("unknown position {}", id)))?;
        let node = &self.nodes[idx];
        if id.offset() > 0 && node.id.offset() == id.offset() {
            if let Some(prev) = node.ins_prev {
                let p = &self.nodes[prev];
                if p.id.has_same_created_at(id) && p.id.offset() + p.content_len() == id.offset() {
                    return Ok(prev);
                }
            }
        }
        Ok(idx)
    }

    /// Resolve a caret to a node and the offset inside it without mutating.
    fn resolve(&self, pos: &SplitPos, prefer_left: bool) -> Result<(NodeIdx, usize)> {
        let abs = pos.absolute_id();
        let idx = if prefer_left {
            self.find_floor_prefer_left(&abs)?
        } else {
            self.find_floor(&abs)
                .ok_or_else(|| CrdtError::InvalidArgument(format!("unknown position {}", abs)))?
        };
        let node = &self.nodes[idx];
        let offset = abs.offset() - node.id.offset();
        if offset > node.content_len() {
            return Err(CrdtError::InvalidArgument(format!(
                "offset {} is out of node {} of length {}",
                offset,
                node.id,
                node.content_len()
            )));
        }
        Ok((idx, offset))
    }

    /// Caret for a document index. Never lands on a tombstone.
    pub fn index_to_pos(&self, index: usize) -> Result<SplitPos> {
        let (idx, offset) = self.index.find(index).ok_or_else(|| {
            CrdtError::InvalidArgument(format!("index {} is out of range 0..={}", index, self.len()))
        })?;
        Ok(SplitPos::new(self.nodes[idx].id.clone(), offset))
    }

    pub fn pos_to_index(&self, pos: &SplitPos, prefer_left: bool) -> Result<usize> {
        let (idx, offset) = self.resolve(pos, prefer_left)?;
        let offset = if self.nodes[idx].is_removed() { 0 } else { offset };
        Ok(self.index.index_of(idx) + offset)
    }

    pub fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<SplitPosRange> {
        let from_pos = self.index_to_pos(from)?;
        if from == to {
            return Ok((from_pos.clone(), from_pos));
        }
        Ok((from_pos, self.index_to_pos(to)?))
    }

    pub fn find_indexes_from_range(&self, range: &SplitPosRange) -> Result<(usize, usize)> {
        Ok((
            self.pos_to_index(&range.0, false)?,
            self.pos_to_index(&range.1, true)?,
        ))
    }

    /// Check that both ends resolve and are in document order.
    pub fn validate_range(&self, range: &SplitPosRange) -> Result<()> {
        let from = self.pos_to_index(&range.0, true)?;
        let to = self.pos_to_index(&range.1, true)?;
        if from > to {
            return Err(CrdtError::InvalidRange(format!(
                "from {} is after to {}",
                range.0.to_test_string(),
                range.1.to_test_string()
            )));
        }
        Ok(())
    }

    /// Tombstone `range` and insert `value` in its place.
    ///
    /// `version_vector` is the editor's causal knowledge for remote edits;
    /// nodes whose creation the editor had not seen survive. `None` means a
    /// local edit that has seen everything.
    pub fn edit(
        &mut self,
        range: &SplitPosRange,
        edited_at: &TimeTicket,
        value: Option<V>,
        version_vector: Option<&VersionVector>,
    ) -> Result<EditResult<V>> {
        self.validate_range(range)?;

        let mut split = Vec::new();
        let (_, to_right) = self.find_node_with_split(&range.1, edited_at, &mut split)?;
        let (from_left, from_right) = self.find_node_with_split(&range.0, edited_at, &mut split)?;

        let candidates = self.find_between(from_right, to_right);
        let mut boundaries = vec![Some(from_left)];
        let mut to_delete = Vec::new();
        let mut to_lower = Vec::new();
        for idx in candidates {
            let node = &self.nodes[idx];
            let known = knows(version_vector, node.created_at());
            match (&node.removed_at, known) {
                (None, true) => to_delete.push(idx),
                (Some(removed_at), true) if removed_at.after(edited_at) => {
                    to_lower.push(idx);
                    boundaries.push(Some(idx));
                }
                _ => boundaries.push(Some(idx)),
            }
        }
        boundaries.push(to_right);

        let mut changes = if to_delete.is_empty() {
            Vec::new()
        } else {
            self.make_changes(&boundaries, edited_at)
        };

        let mut removed = Vec::with_capacity(to_delete.len());
        for idx in to_delete {
            let node = &mut self.nodes[idx];
            node.removed_at = Some(edited_at.clone());
            removed.push(node.id.clone());
            self.index.set_len(idx, 0);
        }
        let mut restamped = Vec::with_capacity(to_lower.len());
        for idx in to_lower {
            let node = &mut self.nodes[idx];
            node.removed_at = Some(edited_at.clone());
            restamped.push(node.id.clone());
        }

        let left = &self.nodes[from_left];
        let mut caret = SplitPos::new(left.id.clone(), left.content_len());

        if let Some(value) = value.filter(|v| !v.is_empty()) {
            let at = self.index.index_of(from_left) + self.nodes[from_left].len();
            let id = SplitNodeId::new(edited_at.clone(), 0);
            let node = SplitNode::new(id.clone(), value.clone());
            let len = node.content_len();

            let inserted = self.nodes.alloc(node);
            self.link_after(from_left, inserted);

            match changes.last_mut() {
                Some(last) if last.from == at => last.value = Some(value),
                _ => changes.push(ValueChange {
                    actor: edited_at.actor_id().clone(),
                    from: at,
                    to: at,
                    value: Some(value),
                }),
            }
            caret = SplitPos::new(id, len);
        }

        Ok(EditResult {
            caret,
            removed,
            restamped,
            split,
            changes,
        })
    }

    /// Split both ends of `range`. Returns the nodes between them and the
    /// pieces the splits cut off.
    pub(crate) fn split_range(
        &mut self,
        range: &SplitPosRange,
        edited_at: &TimeTicket,
    ) -> Result<(Vec<NodeIdx>, Vec<SplitNodeId>)> {
        self.validate_range(range)?;
        let mut split = Vec::new();
        let (_, to_right) = self.find_node_with_split(&range.1, edited_at, &mut split)?;
        let (_, from_right) = self.find_node_with_split(&range.0, edited_at, &mut split)?;
        Ok((self.find_between(from_right, to_right), split))
    }

    /// Document index range `[from, to)` occupied by a node.
    pub fn node_indexes(&self, idx: NodeIdx) -> (usize, usize) {
        let from = self.index.index_of(idx);
        (from, from + self.nodes[idx].len())
    }

    /// Split at `pos` and find where an insert stamped `edited_at` belongs:
    /// past every node created after it, which are concurrent inserts at the
    /// same anchor that must stay to the left.
    fn find_node_with_split(
        &mut self,
        pos: &SplitPos,
        edited_at: &TimeTicket,
        split: &mut Vec<SplitNodeId>,
    ) -> Result<(NodeIdx, Option<NodeIdx>)> {
        let (mut idx, offset) = self.resolve(pos, true)?;
        if let Some(right) = self.split_node(idx, offset)? {
            split.push(self.nodes[right].id.clone());
        }

        while let Some(next) = self.nodes[idx].next {
            if !self.nodes[next].created_at().after(edited_at) {
                break;
            }
            idx = next;
        }
        Ok((idx, self.nodes[idx].next))
    }

    /// Cut a node at `offset`, returning the new right piece if one was made.
    fn split_node(&mut self, idx: NodeIdx, offset: usize) -> Result<Option<NodeIdx>> {
        let content_len = self.nodes[idx].content_len();
        if offset > content_len {
            return Err(CrdtError::InvalidArgument(format!(
                "split offset {} exceeds length {}",
                offset, content_len
            )));
        }
        if offset == 0 || offset == content_len {
            return Ok(None);
        }

        let node = &mut self.nodes[idx];
        let right_value = node.value.split_off(offset);
        let mut right = SplitNode::new(node.id.split(offset), right_value);
        right.removed_at = node.removed_at.clone();
        right.ins_prev = Some(idx);
        right.ins_next = node.ins_next;
        let left_len = node.len();

        let right_idx = self.nodes.alloc(right);
        if let Some(ins_next) = self.nodes[idx].ins_next {
            self.nodes[ins_next].ins_prev = Some(right_idx);
        }
        self.nodes[idx].ins_next = Some(right_idx);

        self.index.set_len(idx, left_len);
        self.link_after(idx, right_idx);
        Ok(Some(right_idx))
    }

    fn link_after(&mut self, prev: NodeIdx, idx: NodeIdx) {
        let next = self.nodes[prev].next;
        {
            let node = &mut self.nodes[idx];
            node.prev = Some(prev);
            node.next = next;
        }
        self.nodes[prev].next = Some(idx);
        if let Some(next) = next {
            self.nodes[next].prev = Some(idx);
        }

        let len = self.nodes[idx].len();
        self.index.insert_after(prev, idx, len);
        self.by_id.insert(self.nodes[idx].id.clone(), idx);
    }

    fn find_between(&self, from: Option<NodeIdx>, to: Option<NodeIdx>) -> Vec<NodeIdx> {
        let mut nodes = Vec::new();
        let mut cur = from;
        while let Some(idx) = cur {
            if Some(idx) == to {
                break;
            }
            nodes.push(idx);
            cur = self.nodes[idx].next;
        }
        nodes
    }

    /// Index ranges removed between consecutive surviving boundaries, computed
    /// before tombstoning. Reversed so that applying them in order never
    /// shifts a later range.
    fn make_changes(&self, boundaries: &[Option<NodeIdx>], edited_at: &TimeTicket) -> Vec<ValueChange<V>> {
        let mut changes = Vec::new();
        for pair in boundaries.windows(2) {
            let (Some(left), right) = (pair[0], pair[1]) else {
                continue;
            };
            if self.nodes[left].next == right {
                continue;
            }
            let (_, from) = self.node_indexes(left);
            let to = match right {
                Some(right) => self.index.index_of(right),
                None => self.len(),
            };
            if from < to {
                changes.push(ValueChange {
                    actor: edited_at.actor_id().clone(),
                    from,
                    to,
                    value: None,
                });
            }
        }
        changes.reverse();
        changes
    }

    pub fn removed_at(&self, id: &SplitNodeId) -> Option<&TimeTicket> {
        self.find_node(id)
            .and_then(|idx| self.nodes[idx].removed_at.as_ref())
    }

    /// Whether a live piece of the same insert still chains back to `id`.
    pub fn is_split_anchor(&self, id: &SplitNodeId) -> bool {
        self.find_node(id).map_or(false, |idx| self.anchors_live(idx))
    }

    /// Physically remove one tombstoned piece from both indexes and free its
    /// slot. Other pieces of the same insert are left alone.
    pub fn purge(&mut self, id: &SplitNodeId) -> Option<DataSize> {
        let idx = self.find_node(id)?;
        if idx == self.head || !self.nodes[idx].is_removed() {
            return None;
        }
        self.unlink(idx)
    }

    fn anchors_live(&self, idx: NodeIdx) -> bool {
        self.nodes[idx]
            .ins_next
            .map_or(false, |next| !self.nodes[next].is_removed())
    }

    fn unlink(&mut self, idx: NodeIdx) -> Option<DataSize> {
        self.index.delete(idx);
        self.by_id.remove(&self.nodes[idx].id);

        let (prev, next, ins_prev, ins_next) = {
            let node = &self.nodes[idx];
            (node.prev, node.next, node.ins_prev, node.ins_next)
        };
        if let Some(prev) = prev {
            self.nodes[prev].next = next;
        }
        if let Some(next) = next {
            self.nodes[next].prev = prev;
        }
        if let Some(ins_prev) = ins_prev {
            self.nodes[ins_prev].ins_next = None;
        }
        if let Some(ins_next) = ins_next {
            self.nodes[ins_next].ins_prev = None;
        }

        self.nodes.free(idx).map(|node| node.data_size())
    }

    /// Nodes in document order, tombstones included, head excluded.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &SplitNode<V>)> + '_ {
        std::iter::successors(self.nodes[self.head].next, move |idx| self.nodes[*idx].next)
            .map(move |idx| (idx, &self.nodes[idx]))
    }

    /// Both indexes agree with the node list and every weight is consistent.
    pub fn check_weights(&self) -> bool {
        let order = self.index.in_order();
        let linked: Vec<NodeIdx> = std::iter::once(self.head)
            .chain(self.iter().map(|(idx, _)| idx))
            .collect();
        order == linked
            && self.index.check_weights()
            && linked.iter().all(|idx| self.index.len_of(*idx) == self.nodes[*idx].len())
            && linked.len() == self.by_id.len()
    }

    /// Debug rendering: `[content]` for live runs, `{content}` for tombstones.
    pub fn to_test_string(&self) -> String {
        self.iter().map(|(_, node)| node.to_test_string()).collect()
    }
}
