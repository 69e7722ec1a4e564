//! Replicated tree of elements and text leaves.
//!
//! Positions are `(parent, left sibling)` identity pairs, so they stay valid
//! while other replicas insert around them. Text leaves split the way runs of
//! `seqcrdt-text` do. Document indexes count one unit per character and one
//! per open or close tag of every element below the root:
//!
//! ```text
//!   <root> <p> a b </p> </root>
//!         0   1 2 3    4
//! ```
//!
//! Every node lives in one arena. `by_id` is the identity index; the
//! position index is the children lists with cached subtree sizes, where a
//! tombstone contributes nothing to its parent.

use crate::node::{
    attrs_to_xml, TreeContent, TreeNode, TreeNodeId, TreeNodeKind, TreePos, TreePosRange,
};
use seqcrdt_core::{
    knows, ActorId, Arena, AttrMap, CrdtError, DataSize, DocSize, NodeIdx, Result, TimeTicket,
    VersionVector, TIME_TICKET_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// One step of a depth-first walk over the tree, tombstones included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Start(NodeIdx),
    End(NodeIdx),
    Text(NodeIdx),
}

/// A position resolved against local state, before any split. `left` is
/// `None` for the leftmost slot of `parent`; for a text `left`, `offset`
/// counts characters into it.
#[derive(Clone, Copy, Debug)]
struct Resolved {
    parent: NodeIdx,
    left: Option<NodeIdx>,
    offset: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeChangeKind {
    Content,
    Style,
    RemoveStyle,
}

/// A visible change, in document indexes and paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    pub kind: TreeChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub from_path: Vec<usize>,
    pub to_path: Vec<usize>,
    pub contents: Vec<TreeContent>,
    pub attributes: BTreeMap<String, String>,
    pub attributes_to_remove: Vec<String>,
}

/// Something a tree can reclaim once its removal is stable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TreeGcTarget {
    Node(TreeNodeId),
    Attr { node: TreeNodeId, key: String },
}

/// What removing a node did to its stamp.
enum Tombstone {
    New,
    Restamped,
    Unchanged,
}

#[derive(Clone, Debug, Default)]
pub struct TreeEditResult {
    pub changes: Vec<TreeChange>,
    pub gc_targets: Vec<TreeGcTarget>,
    /// Bytes this call added: new nodes and attributes, plus one ticket per
    /// removal.
    pub diff: DataSize,
}

#[derive(Clone, Debug)]
pub struct CrdtTree {
    created_at: TimeTicket,
    root: NodeIdx,
    nodes: Arena<TreeNode>,
    by_id: BTreeMap<TreeNodeId, NodeIdx>,
}

impl CrdtTree {
    /// An empty tree whose root element is `<root_tag>`.
    pub fn new(created_at: TimeTicket, root_tag: &str) -> Self {
        let id = TreeNodeId::new(created_at.clone(), 0);
        let mut nodes = Arena::new();
        let root = nodes.alloc(TreeNode::new(
            id.clone(),
            TreeNodeKind::Element {
                tag: root_tag.to_string(),
                attrs: AttrMap::new(),
            },
        ));
        let mut by_id = BTreeMap::new();
        by_id.insert(id, root);
        Self {
            created_at,
            root,
            nodes,
            by_id,
        }
    }

    pub fn created_at(&self) -> &TimeTicket {
        &self.created_at
    }

    pub fn root_id(&self) -> &TreeNodeId {
        &self.nodes[self.root].id
    }

    /// Size of the content below the root.
    pub fn len(&self) -> usize {
        self.nodes[self.root].size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes held, tombstones and root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find_node(&self, id: &TreeNodeId) -> Option<NodeIdx> {
        self.by_id.get(id).copied()
    }

    pub fn node(&self, idx: NodeIdx) -> Option<&TreeNode> {
        self.nodes.get(idx)
    }

    fn find_floor(&self, id: &TreeNodeId) -> Option<NodeIdx> {
        self.by_id
            .range(..=id)
            .next_back()
            .filter(|(key, _)| key.has_same_created_at(id))
            .map(|(_, idx)| *idx)
    }

    // ------------------------------------------------------------------
    // Position resolution
    // ------------------------------------------------------------------

    fn resolve(&self, pos: &TreePos) -> Result<Resolved> {
        let parent = self.find_node(&pos.parent_id).ok_or_else(|| {
            CrdtError::InvalidArgument(format!("unknown parent {}", pos.parent_id))
        })?;
        if self.nodes[parent].is_text() {
            return Err(CrdtError::InvalidArgument(format!(
                "parent {} is a text node",
                pos.parent_id
            )));
        }
        if pos.is_leftmost() {
            return Ok(Resolved {
                parent,
                left: None,
                offset: 0,
            });
        }

        let id = &pos.left_sibling_id;
        let mut left = self.find_floor(id).ok_or_else(|| {
            CrdtError::InvalidArgument(format!("unknown left sibling {}", id))
        })?;
        let node = &self.nodes[left];
        if id.offset() > 0 && node.id.offset() == id.offset() {
            if let Some(prev) = node.ins_prev {
                let p = &self.nodes[prev];
                if p.id.offset() + p.size == id.offset() {
                    left = prev;
                }
            }
        }

        let node = &self.nodes[left];
        let offset = id.offset() - node.id.offset();
        let parent = node.parent.ok_or_else(|| {
            CrdtError::InvalidArgument(format!("left sibling {} is the root", id))
        })?;
        match &node.kind {
            TreeNodeKind::Element { .. } if offset > 0 => Err(CrdtError::InvalidArgument(
                format!("element {} has no offset {}", node.id, offset),
            )),
            TreeNodeKind::Element { .. } => Ok(Resolved {
                parent,
                left: Some(left),
                offset: 0,
            }),
            TreeNodeKind::Text { len, .. } if offset > *len => Err(CrdtError::InvalidArgument(
                format!("offset {} is out of text {} of length {}", offset, node.id, len),
            )),
            TreeNodeKind::Text { .. } if offset == 0 => {
                // The piece before it is gone: the slot right before this one.
                let siblings = &self.nodes[parent].children;
                let at = siblings.iter().position(|c| *c == left).unwrap_or(0);
                match at.checked_sub(1).map(|i| siblings[i]) {
                    Some(prev) => Ok(Resolved {
                        parent,
                        left: Some(prev),
                        offset: self.end_offset(prev),
                    }),
                    None => Ok(Resolved {
                        parent,
                        left: None,
                        offset: 0,
                    }),
                }
            }
            TreeNodeKind::Text { .. } => Ok(Resolved {
                parent,
                left: Some(left),
                offset,
            }),
        }
    }

    fn end_offset(&self, idx: NodeIdx) -> usize {
        let node = &self.nodes[idx];
        if node.is_text() {
            node.size
        } else {
            0
        }
    }

    /// Split the text left of `pos` and step past siblings inserted
    /// concurrently after `edited_at`, which stay to the left. A piece cut
    /// off by the split is pushed onto `cut`.
    fn split_and_skip(
        &mut self,
        pos: &TreePos,
        edited_at: &TimeTicket,
        cut: &mut Vec<NodeIdx>,
    ) -> Result<(NodeIdx, Option<NodeIdx>)> {
        let Resolved {
            parent,
            mut left,
            offset,
        } = self.resolve(pos)?;
        if let Some(l) = left {
            cut.extend(self.split_text(l, offset));
        }

        let children = &self.nodes[parent].children;
        let start = match left {
            None => 0,
            Some(l) => children.iter().position(|c| *c == l).map_or(0, |i| i + 1),
        };
        for &child in &children[start..] {
            if !self.nodes[child].created_at().after(edited_at) {
                break;
            }
            left = Some(child);
        }
        Ok((parent, left))
    }

    fn split_text(&mut self, idx: NodeIdx, offset: usize) -> Option<NodeIdx> {
        let node = &mut self.nodes[idx];
        let TreeNodeKind::Text { value, len } = &mut node.kind else {
            return None;
        };
        if offset == 0 || offset >= *len {
            return None;
        }

        let at = value
            .char_indices()
            .nth(offset)
            .map_or(value.len(), |(i, _)| i);
        let rest = value.split_off(at);
        let right_len = *len - offset;
        *len = offset;
        node.size = offset;

        let mut right = TreeNode::new(
            node.id.split(offset),
            TreeNodeKind::Text {
                value: rest,
                len: right_len,
            },
        );
        right.parent = node.parent;
        right.removed_at = node.removed_at.clone();
        right.ins_prev = Some(idx);
        right.ins_next = node.ins_next;
        let parent = node.parent;
        let right_id = right.id.clone();

        let right_idx = self.nodes.alloc(right);
        if let Some(next) = self.nodes[idx].ins_next {
            self.nodes[next].ins_prev = Some(right_idx);
        }
        self.nodes[idx].ins_next = Some(right_idx);
        self.by_id.insert(right_id, right_idx);

        if let Some(p) = parent {
            let children = &mut self.nodes[p].children;
            let at = children
                .iter()
                .position(|c| *c == idx)
                .map_or(children.len(), |i| i + 1);
            children.insert(at, right_idx);
        }
        Some(right_idx)
    }

    // ------------------------------------------------------------------
    // Token walk
    // ------------------------------------------------------------------

    fn first_token(&self, idx: NodeIdx) -> Token {
        if self.nodes[idx].is_text() {
            Token::Text(idx)
        } else {
            Token::Start(idx)
        }
    }

    fn last_token(&self, idx: NodeIdx) -> Token {
        if self.nodes[idx].is_text() {
            Token::Text(idx)
        } else {
            Token::End(idx)
        }
    }

    /// The token right before a position.
    fn boundary(&self, parent: NodeIdx, left: Option<NodeIdx>) -> Token {
        match left {
            None => Token::Start(parent),
            Some(l) => self.last_token(l),
        }
    }

    fn next_token(&self, token: Token) -> Option<Token> {
        match token {
            Token::Start(e) => Some(match self.nodes[e].children.first() {
                Some(&child) => self.first_token(child),
                None => Token::End(e),
            }),
            Token::End(n) | Token::Text(n) => {
                let parent = self.nodes[n].parent?;
                let siblings = &self.nodes[parent].children;
                let at = siblings.iter().position(|c| *c == n)?;
                Some(match siblings.get(at + 1) {
                    Some(&sibling) => self.first_token(sibling),
                    None => Token::End(parent),
                })
            }
        }
    }

    /// Tokens after `from` up to and including `to`, or `None` when `to`
    /// does not follow `from`.
    fn tokens_between(&self, from: Token, to: Token) -> Option<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut cur = from;
        while cur != to {
            cur = self.next_token(cur)?;
            tokens.push(cur);
        }
        Some(tokens)
    }

    fn check_order(&self, from: &Resolved, to: &Resolved) -> Result<()> {
        let bf = self.boundary(from.parent, from.left);
        let bt = self.boundary(to.parent, to.left);
        let ordered = if bf == bt {
            from.offset <= to.offset
        } else {
            self.tokens_between(bf, bt).is_some()
        };
        if ordered {
            Ok(())
        } else {
            Err(CrdtError::InvalidRange(
                "from is after to in document order".to_string(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Document index at which `idx` starts. Inside a removed element every
    /// position collapses onto the element's own position.
    pub fn index_of(&self, idx: NodeIdx) -> usize {
        let mut index = 0;
        let mut cur = idx;
        while let Some(p) = self.nodes[cur].parent {
            let parent = &self.nodes[p];
            if parent.is_removed() {
                index = 0;
            } else {
                index += parent
                    .children
                    .iter()
                    .take_while(|c| **c != cur)
                    .map(|c| self.nodes[*c].visible_padded_size())
                    .sum::<usize>();
                if parent.parent.is_some() {
                    index += 1;
                }
            }
            cur = p;
        }
        index
    }

    fn resolved_to_index(&self, r: &Resolved) -> usize {
        match r.left {
            None => {
                let parent = &self.nodes[r.parent];
                let open = !parent.is_removed() && parent.parent.is_some();
                self.index_of(r.parent) + usize::from(open)
            }
            Some(l) => {
                let node = &self.nodes[l];
                let base = self.index_of(l);
                if node.is_removed() {
                    base
                } else if node.is_text() {
                    base + r.offset
                } else {
                    base + node.padded_size()
                }
            }
        }
    }

    pub fn pos_to_index(&self, pos: &TreePos) -> Result<usize> {
        let resolved = self.resolve(pos)?;
        Ok(self.resolved_to_index(&resolved))
    }

    /// Find the node holding `index`: a text leaf with a character offset,
    /// or an element with an offset among its visible children. Text is
    /// preferred on both of its edges.
    fn find_tree_pos(&self, mut node: NodeIdx, mut index: usize) -> (NodeIdx, usize) {
        'descend: loop {
            let n = &self.nodes[node];
            if n.is_text() {
                return (node, index);
            }
            let mut pos = 0;
            let mut offset = 0;
            for &child in &n.children {
                let c = &self.nodes[child];
                if c.is_removed() {
                    continue;
                }
                if c.is_text() && c.size >= index - pos {
                    node = child;
                    index -= pos;
                    continue 'descend;
                }
                if index == pos {
                    return (node, offset);
                }
                if c.padded_size() > index - pos {
                    node = child;
                    index = index - pos - 1;
                    continue 'descend;
                }
                pos += c.padded_size();
                offset += 1;
            }
            return (node, offset);
        }
    }

    fn visible_children(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        self.nodes[idx]
            .children
            .iter()
            .copied()
            .filter(move |c| !self.nodes[*c].is_removed())
    }

    pub fn index_to_pos(&self, index: usize) -> Result<TreePos> {
        if index > self.len() {
            return Err(CrdtError::InvalidArgument(format!(
                "index {} is out of range 0..={}",
                index,
                self.len()
            )));
        }
        let (node, offset) = self.find_tree_pos(self.root, index);
        let n = &self.nodes[node];

        if n.is_text() {
            let parent = n.parent.unwrap_or(self.root);
            let parent_id = self.nodes[parent].id.clone();
            if offset > 0 {
                return Ok(TreePos::new(parent_id, n.id.split(offset)));
            }
            let prev = self
                .visible_children(parent)
                .take_while(|c| *c != node)
                .last();
            return Ok(match prev {
                Some(prev) => TreePos::new(parent_id, self.nodes[prev].end_id()),
                None => TreePos::new(parent_id.clone(), parent_id),
            });
        }

        let left = offset
            .checked_sub(1)
            .and_then(|i| self.visible_children(node).nth(i));
        Ok(match left {
            Some(left) => TreePos::new(n.id.clone(), self.nodes[left].end_id()),
            None => TreePos::new(n.id.clone(), n.id.clone()),
        })
    }

    pub fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<TreePosRange> {
        let from_pos = self.index_to_pos(from)?;
        if from == to {
            return Ok((from_pos.clone(), from_pos));
        }
        Ok((from_pos, self.index_to_pos(to)?))
    }

    /// Path of child offsets from the root down to `index`. The last step
    /// inside an element counts the sizes of its visible children before it.
    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>> {
        if index > self.len() {
            return Err(CrdtError::InvalidArgument(format!(
                "index {} is out of range 0..={}",
                index,
                self.len()
            )));
        }
        let (node, offset) = self.find_tree_pos(self.root, index);
        let mut path = Vec::new();
        let mut cur = node;
        if self.nodes[node].is_text() {
            let parent = self.nodes[node].parent.unwrap_or(self.root);
            let before: usize = self
                .visible_children(parent)
                .take_while(|c| *c != node)
                .map(|c| self.nodes[c].padded_size())
                .sum();
            path.push(before + offset);
            cur = parent;
        } else {
            path.push(offset);
        }
        while let Some(p) = self.nodes[cur].parent {
            let at = self
                .visible_children(p)
                .position(|c| c == cur)
                .unwrap_or(0);
            path.push(at);
            cur = p;
        }
        path.reverse();
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Remove what `range` covers and insert `contents` at its start.
    ///
    /// Text leaves in range and elements whose open and close tags both fall
    /// in range are removed when the editor had seen them; removing an
    /// element takes its whole subtree. Partially covered elements stay.
    ///
    /// Content must be stamped by the same operation as `edited_at`: same
    /// lamport and actor, as `ChangeContext` issues them, because concurrent
    /// inserts are ordered against `edited_at`. Other content is rejected
    /// with `InvalidArgument`.
    pub fn edit(
        &mut self,
        range: &TreePosRange,
        contents: &[TreeContent],
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
    ) -> Result<TreeEditResult> {
        if let Some(content) = contents.iter().find(|c| !c.stamped_with(edited_at)) {
            return Err(CrdtError::InvalidArgument(format!(
                "content {} is not stamped by the edit at {}",
                content.created_at(),
                edited_at
            )));
        }
        let from = self.resolve(&range.0)?;
        let to = self.resolve(&range.1)?;
        self.check_order(&from, &to)?;

        let from_index = self.resolved_to_index(&from);
        let to_index = self.resolved_to_index(&to);
        let from_path = self.index_to_path(from_index)?;
        let to_path = self.index_to_path(to_index)?;

        let mut cut = Vec::new();
        let (from_parent, from_left) = self.split_and_skip(&range.0, edited_at, &mut cut)?;
        let (to_parent, to_left) = self.split_and_skip(&range.1, edited_at, &mut cut)?;
        let tokens = self
            .tokens_between(
                self.boundary(from_parent, from_left),
                self.boundary(to_parent, to_left),
            )
            .unwrap_or_default();

        let mut started = BTreeSet::new();
        let mut covered = Vec::new();
        for token in tokens {
            match token {
                Token::Start(e) => {
                    started.insert(e);
                }
                Token::Text(t) => covered.push(t),
                Token::End(e) if started.contains(&e) => covered.push(e),
                Token::End(_) => {}
            }
        }

        let mut removed = Vec::new();
        let mut restamped = Vec::new();
        for idx in covered {
            if knows(version_vector, self.nodes[idx].created_at()) {
                self.remove_subtree(idx, edited_at, &mut removed, &mut restamped);
            }
        }

        let parent_removed_at = self.nodes[from_parent].removed_at.clone();
        let mut left = from_left;
        let mut diff = DataSize::default();
        for content in contents {
            let idx = self.build(content, from_parent);
            diff += self.subtree_data_size(idx);
            let children = &mut self.nodes[from_parent].children;
            let at = match left {
                None => 0,
                Some(l) => children
                    .iter()
                    .position(|c| *c == l)
                    .map_or(children.len(), |i| i + 1),
            };
            children.insert(at, idx);
            let size = self.nodes[idx].padded_size();
            self.propagate_size(Some(from_parent), size as isize);
            if let Some(removed_at) = &parent_removed_at {
                self.remove_subtree(idx, removed_at, &mut removed, &mut restamped);
            }
            left = Some(idx);
        }

        debug!(
            from = from_index,
            to = to_index,
            at = %edited_at,
            removed = removed.len(),
            inserted = contents.len(),
            "TREE EDIT"
        );

        let mut changes = Vec::new();
        if from_index != to_index || !contents.is_empty() {
            changes.push(TreeChange {
                kind: TreeChangeKind::Content,
                actor: edited_at.actor_id().clone(),
                from: from_index,
                to: to_index,
                from_path,
                to_path,
                contents: contents.to_vec(),
                attributes: BTreeMap::new(),
                attributes_to_remove: Vec::new(),
            });
        }

        diff += DataSize::new(0, TIME_TICKET_SIZE * removed.len());
        let mut gc_targets: Vec<_> = removed
            .into_iter()
            .chain(restamped)
            .map(TreeGcTarget::Node)
            .collect();
        self.cut_piece_targets(&cut, &mut gc_targets);
        Ok(TreeEditResult {
            changes,
            gc_targets,
            diff,
        })
    }

    /// Set attributes on every live element whose open tag falls in `range`.
    pub fn style(
        &mut self,
        range: &TreePosRange,
        attributes: &BTreeMap<String, String>,
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
    ) -> Result<TreeEditResult> {
        let mut result = TreeEditResult::default();
        let mut cut = Vec::new();
        for idx in self.styled_elements(range, edited_at, version_vector, &mut cut)? {
            let mut change = self.style_change(idx, TreeChangeKind::Style, edited_at)?;
            if let TreeNodeKind::Element { attrs, .. } = &mut self.nodes[idx].kind {
                for (key, value) in attributes {
                    if attrs.set(key, value, edited_at) {
                        change.attributes.insert(key.clone(), value.clone());
                        if let Some(entry) = attrs.entry(key) {
                            result.diff += entry.data_size(key);
                        }
                    }
                }
            }
            if !change.attributes.is_empty() {
                result.changes.push(change);
            }
        }
        self.cut_piece_targets(&cut, &mut result.gc_targets);
        debug!(at = %edited_at, elements = result.changes.len(), "TREE STYL");
        Ok(result)
    }

    /// Remove attribute keys from every live element whose open tag falls in
    /// `range`. Each removal leaves a tombstone that becomes a GC target.
    pub fn remove_style(
        &mut self,
        range: &TreePosRange,
        keys: &[String],
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
    ) -> Result<TreeEditResult> {
        let mut result = TreeEditResult::default();
        let mut cut = Vec::new();
        for idx in self.styled_elements(range, edited_at, version_vector, &mut cut)? {
            let mut change = self.style_change(idx, TreeChangeKind::RemoveStyle, edited_at)?;
            let id = self.nodes[idx].id.clone();
            if let TreeNodeKind::Element { attrs, .. } = &mut self.nodes[idx].kind {
                for key in keys {
                    if attrs.remove(key, edited_at) {
                        change.attributes_to_remove.push(key.clone());
                        if let Some(entry) = attrs.entry(key) {
                            result.diff += entry.data_size(key);
                        }
                        result.gc_targets.push(TreeGcTarget::Attr {
                            node: id.clone(),
                            key: key.clone(),
                        });
                    }
                }
            }
            if !change.attributes_to_remove.is_empty() {
                result.changes.push(change);
            }
        }
        self.cut_piece_targets(&cut, &mut result.gc_targets);
        debug!(at = %edited_at, elements = result.changes.len(), "TREE STYL remove");
        Ok(result)
    }

    fn styled_elements(
        &mut self,
        range: &TreePosRange,
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
        cut: &mut Vec<NodeIdx>,
    ) -> Result<Vec<NodeIdx>> {
        let from = self.resolve(&range.0)?;
        let to = self.resolve(&range.1)?;
        self.check_order(&from, &to)?;

        let (from_parent, from_left) = self.split_and_skip(&range.0, edited_at, cut)?;
        let (to_parent, to_left) = self.split_and_skip(&range.1, edited_at, cut)?;
        let tokens = self
            .tokens_between(
                self.boundary(from_parent, from_left),
                self.boundary(to_parent, to_left),
            )
            .unwrap_or_default();

        Ok(tokens
            .into_iter()
            .filter_map(|token| match token {
                Token::Start(e) => Some(e),
                _ => None,
            })
            .filter(|e| {
                let node = &self.nodes[*e];
                !node.is_removed() && knows(version_vector, node.created_at())
            })
            .collect())
    }

    /// Text pieces cut off a tombstone need a pair of their own.
    fn cut_piece_targets(&self, cut: &[NodeIdx], targets: &mut Vec<TreeGcTarget>) {
        for &idx in cut {
            let node = &self.nodes[idx];
            if !node.is_removed() {
                continue;
            }
            let target = TreeGcTarget::Node(node.id.clone());
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    fn style_change(
        &self,
        idx: NodeIdx,
        kind: TreeChangeKind,
        edited_at: &TimeTicket,
    ) -> Result<TreeChange> {
        let from = self.index_of(idx);
        let to = from + self.nodes[idx].padded_size();
        Ok(TreeChange {
            kind,
            actor: edited_at.actor_id().clone(),
            from,
            to,
            from_path: self.index_to_path(from)?,
            to_path: self.index_to_path(to)?,
            contents: Vec::new(),
            attributes: BTreeMap::new(),
            attributes_to_remove: Vec::new(),
        })
    }

    /// Allocate `content` and its descendants under `parent`.
    fn build(&mut self, content: &TreeContent, parent: NodeIdx) -> NodeIdx {
        let id = TreeNodeId::new(content.created_at().clone(), 0);
        let kind = match content {
            TreeContent::Text { value, .. } => TreeNodeKind::Text {
                value: value.clone(),
                len: value.chars().count(),
            },
            TreeContent::Element {
                tag,
                attributes,
                created_at,
                ..
            } => {
                let mut attrs = AttrMap::new();
                for (key, value) in attributes {
                    attrs.set(key, value, created_at);
                }
                TreeNodeKind::Element {
                    tag: tag.clone(),
                    attrs,
                }
            }
        };
        let mut node = TreeNode::new(id.clone(), kind);
        node.parent = Some(parent);
        let idx = self.nodes.alloc(node);
        self.by_id.insert(id, idx);

        if let TreeContent::Element { children, .. } = content {
            for child in children {
                let child_idx = self.build(child, idx);
                let size = self.nodes[child_idx].padded_size();
                let node = &mut self.nodes[idx];
                node.children.push(child_idx);
                node.size += size;
            }
        }
        idx
    }

    fn subtree_data_size(&self, idx: NodeIdx) -> DataSize {
        let mut size = DataSize::default();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            size += self.nodes[i].data_size();
            stack.extend(self.nodes[i].children.iter().copied());
        }
        size
    }

    /// Tombstone `idx` and everything below it, collecting newly removed ids.
    /// A node already removed later than `at` takes the earlier stamp and is
    /// collected into `restamped`.
    fn remove_subtree(
        &mut self,
        idx: NodeIdx,
        at: &TimeTicket,
        removed: &mut Vec<TreeNodeId>,
        restamped: &mut Vec<TreeNodeId>,
    ) {
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            match self.tombstone(i, at) {
                Tombstone::New => removed.push(self.nodes[i].id.clone()),
                Tombstone::Restamped => restamped.push(self.nodes[i].id.clone()),
                Tombstone::Unchanged => {}
            }
            stack.extend(self.nodes[i].children.iter().copied());
        }
    }

    fn tombstone(&mut self, idx: NodeIdx, at: &TimeTicket) -> Tombstone {
        match self.nodes[idx].removed_at.clone() {
            None => {
                let size = self.nodes[idx].padded_size();
                self.nodes[idx].removed_at = Some(at.clone());
                let parent = self.nodes[idx].parent;
                self.propagate_size(parent, -(size as isize));
                Tombstone::New
            }
            Some(prev) if prev.after(at) => {
                self.nodes[idx].removed_at = Some(at.clone());
                Tombstone::Restamped
            }
            Some(_) => Tombstone::Unchanged,
        }
    }

    /// Apply a size change from `start` upward. A removed element absorbs it:
    /// its own size changes, but it contributes nothing to its parent.
    fn propagate_size(&mut self, start: Option<NodeIdx>, delta: isize) {
        let mut cur = start;
        while let Some(idx) = cur {
            let node = &mut self.nodes[idx];
            node.size = node.size.saturating_add_signed(delta);
            if node.is_removed() {
                break;
            }
            cur = node.parent;
        }
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    pub fn gc_removed_at(&self, target: &TreeGcTarget) -> Option<TimeTicket> {
        match target {
            TreeGcTarget::Node(id) => self.nodes[self.find_node(id)?].removed_at.clone(),
            TreeGcTarget::Attr { node, key } => self.nodes[self.find_node(node)?]
                .attrs()?
                .removed_at(key)
                .cloned(),
        }
    }

    /// A text piece anchors while a live piece of the same insert chains
    /// back to it; an element anchors while anything below it is live.
    pub fn gc_is_anchored(&self, target: &TreeGcTarget) -> bool {
        match target {
            TreeGcTarget::Node(id) => self
                .find_node(id)
                .map_or(false, |idx| self.anchors_live(idx)),
            TreeGcTarget::Attr { .. } => false,
        }
    }

    fn anchors_live(&self, idx: NodeIdx) -> bool {
        let node = &self.nodes[idx];
        if node.is_text() {
            return node
                .ins_next
                .map_or(false, |next| !self.nodes[next].is_removed());
        }
        let mut stack: Vec<NodeIdx> = node.children.clone();
        while let Some(i) = stack.pop() {
            if !self.nodes[i].is_removed() {
                return true;
            }
            stack.extend(self.nodes[i].children.iter().copied());
        }
        false
    }

    /// Reclaim a GC target. An element goes with its whole subtree; a text
    /// piece goes alone.
    pub fn gc_purge(&mut self, target: &TreeGcTarget) -> Option<DataSize> {
        match target {
            TreeGcTarget::Node(id) => {
                let idx = self.find_node(id)?;
                if idx == self.root || !self.nodes[idx].is_removed() {
                    return None;
                }
                let freed = self.purge_subtree(idx);
                trace!(node = %id, "purged tree node");
                Some(freed)
            }
            TreeGcTarget::Attr { node, key } => {
                let idx = self.find_node(node)?;
                match &mut self.nodes[idx].kind {
                    TreeNodeKind::Element { attrs, .. } => attrs.purge(key),
                    TreeNodeKind::Text { .. } => None,
                }
            }
        }
    }

    fn purge_subtree(&mut self, idx: NodeIdx) -> DataSize {
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|c| *c != idx);
        }
        if let Some(prev) = self.nodes[idx].ins_prev {
            self.nodes[prev].ins_next = None;
        }
        if let Some(next) = self.nodes[idx].ins_next {
            self.nodes[next].ins_prev = None;
        }

        let mut freed = DataSize::default();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            if let Some(node) = self.nodes.free(i) {
                self.by_id.remove(&node.id);
                freed += node.data_size();
                stack.extend(node.children);
            }
        }
        freed
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(self.root, &mut out);
        out
    }

    fn write_xml(&self, idx: NodeIdx, out: &mut String) {
        let node = &self.nodes[idx];
        match &node.kind {
            TreeNodeKind::Text { value, .. } => out.push_str(value),
            TreeNodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                out.push_str(&attrs_to_xml(&attrs.to_map()));
                out.push('>');
                for child in self.visible_children(idx) {
                    self.write_xml(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    /// Live content as JSON: `{"type":"p","attributes":{..},"children":[..]}`
    /// for elements and `{"type":"text","value":".."}` for text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.json_value(self.root))?)
    }

    fn json_value(&self, idx: NodeIdx) -> serde_json::Value {
        match &self.nodes[idx].kind {
            TreeNodeKind::Text { value, .. } => serde_json::json!({
                "type": "text",
                "value": value,
            }),
            TreeNodeKind::Element { tag, attrs } => {
                let children: Vec<_> = self
                    .visible_children(idx)
                    .map(|c| self.json_value(c))
                    .collect();
                let mut value = serde_json::json!({ "type": tag, "children": children });
                if !attrs.is_empty() {
                    value["attributes"] = serde_json::json!(attrs.to_map());
                }
                value
            }
        }
    }

    /// Recompute every cached size and compare with the stored one.
    pub fn check_sizes(&self) -> bool {
        self.nodes.iter().all(|(_, node)| match node.kind {
            TreeNodeKind::Text { len, .. } => node.size == len,
            TreeNodeKind::Element { .. } => {
                let expected: usize = node
                    .children
                    .iter()
                    .map(|c| self.nodes[*c].visible_padded_size())
                    .sum();
                node.size == expected
            }
        })
    }

    /// Data size of everything held, tombstones included.
    pub fn data_size(&self) -> DataSize {
        self.nodes
            .iter()
            .fold(DataSize::default(), |acc, (_, node)| acc + node.data_size())
    }

    /// Live nodes and attributes apart from what awaits GC.
    pub fn doc_size(&self) -> DocSize {
        self.nodes
            .iter()
            .fold(DocSize::default(), |acc, (_, node)| acc + node.doc_size())
    }
}
