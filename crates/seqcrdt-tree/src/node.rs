//! Tree node identities, positions, and node storage.

use seqcrdt_core::{AttrMap, DataSize, DocSize, NodeIdx, TimeTicket, TIME_TICKET_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a tree node: the creating ticket and, for text pieces split off
/// an original insert, the character offset they start at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeNodeId {
    created_at: TimeTicket,
    offset: usize,
}

impl TreeNodeId {
    pub fn new(created_at: TimeTicket, offset: usize) -> Self {
        Self { created_at, offset }
    }

    pub fn created_at(&self) -> &TimeTicket {
        &self.created_at
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn has_same_created_at(&self, other: &TreeNodeId) -> bool {
        self.created_at == other.created_at
    }

    pub fn split(&self, offset: usize) -> TreeNodeId {
        TreeNodeId::new(self.created_at.clone(), self.offset + offset)
    }

    pub fn to_test_string(&self) -> String {
        format!("{}/{}", self.created_at.to_test_string(), self.offset)
    }
}

impl fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_test_string())
    }
}

/// A position between nodes: inside `parent_id`, right after
/// `left_sibling_id`. A left sibling equal to the parent means the leftmost
/// slot. For text, the left sibling id `(created_at, offset + k)` means
/// "after the k-th character of that piece".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreePos {
    pub parent_id: TreeNodeId,
    pub left_sibling_id: TreeNodeId,
}

impl TreePos {
    pub fn new(parent_id: TreeNodeId, left_sibling_id: TreeNodeId) -> Self {
        Self {
            parent_id,
            left_sibling_id,
        }
    }

    pub fn is_leftmost(&self) -> bool {
        self.parent_id == self.left_sibling_id
    }

    pub fn to_test_string(&self) -> String {
        format!(
            "{}:{}",
            self.parent_id.to_test_string(),
            self.left_sibling_id.to_test_string()
        )
    }
}

pub type TreePosRange = (TreePos, TreePos);

/// Payload of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNodeKind {
    Element { tag: String, attrs: AttrMap },
    Text { value: String, len: usize },
}

/// A node of the tree. Children include tombstones, in document order.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub(crate) id: TreeNodeId,
    pub(crate) kind: TreeNodeKind,
    pub(crate) parent: Option<NodeIdx>,
    pub(crate) children: Vec<NodeIdx>,
    pub(crate) removed_at: Option<TimeTicket>,
    pub(crate) ins_prev: Option<NodeIdx>,
    pub(crate) ins_next: Option<NodeIdx>,
    /// Text: character length. Element: sum of the visible padded sizes of
    /// its children.
    pub(crate) size: usize,
}

impl TreeNode {
    pub(crate) fn new(id: TreeNodeId, kind: TreeNodeKind) -> Self {
        let size = match &kind {
            TreeNodeKind::Text { len, .. } => *len,
            TreeNodeKind::Element { .. } => 0,
        };
        Self {
            id,
            kind,
            parent: None,
            children: Vec::new(),
            removed_at: None,
            ins_prev: None,
            ins_next: None,
            size,
        }
    }

    pub fn id(&self) -> &TreeNodeId {
        &self.id
    }

    pub fn created_at(&self) -> &TimeTicket {
        self.id.created_at()
    }

    pub fn kind(&self) -> &TreeNodeKind {
        &self.kind
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, TreeNodeKind::Text { .. })
    }

    pub fn removed_at(&self) -> Option<&TimeTicket> {
        self.removed_at.as_ref()
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Size including the open and close tags of an element.
    pub fn padded_size(&self) -> usize {
        if self.is_text() {
            self.size
        } else {
            self.size + 2
        }
    }

    /// What this node contributes to its parent's size.
    pub fn visible_padded_size(&self) -> usize {
        if self.is_removed() {
            0
        } else {
            self.padded_size()
        }
    }

    /// Identity a position uses to say "right after this node".
    pub fn end_id(&self) -> TreeNodeId {
        match &self.kind {
            TreeNodeKind::Text { len, .. } => self.id.split(*len),
            TreeNodeKind::Element { .. } => self.id.clone(),
        }
    }

    pub fn attrs(&self) -> Option<&AttrMap> {
        match &self.kind {
            TreeNodeKind::Element { attrs, .. } => Some(attrs),
            TreeNodeKind::Text { .. } => None,
        }
    }

    pub fn data_size(&self) -> DataSize {
        let mut size = match &self.kind {
            TreeNodeKind::Text { value, .. } => DataSize::new(value.len(), 0),
            TreeNodeKind::Element { attrs, .. } => attrs.data_size(),
        };
        size.meta += TIME_TICKET_SIZE;
        if self.is_removed() {
            size.meta += TIME_TICKET_SIZE;
        }
        size
    }

    /// A tombstone is garbage as a whole; a live element only for its
    /// removed attributes.
    pub fn doc_size(&self) -> DocSize {
        if self.is_removed() {
            return DocSize::garbage(self.data_size());
        }
        let own = DocSize::live(DataSize::new(0, TIME_TICKET_SIZE));
        match &self.kind {
            TreeNodeKind::Text { value, .. } => own + DocSize::live(DataSize::new(value.len(), 0)),
            TreeNodeKind::Element { attrs, .. } => own + attrs.doc_size(),
        }
    }
}

/// Content to insert, already stamped with creation tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeContent {
    Element {
        created_at: TimeTicket,
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<TreeContent>,
    },
    Text {
        created_at: TimeTicket,
        value: String,
    },
}

impl TreeContent {
    pub fn created_at(&self) -> &TimeTicket {
        match self {
            TreeContent::Element { created_at, .. } | TreeContent::Text { created_at, .. } => {
                created_at
            }
        }
    }

    /// Whether this node and every descendant were stamped within the
    /// operation that issued `edited_at`: same lamport, same actor.
    pub fn stamped_with(&self, edited_at: &TimeTicket) -> bool {
        let created_at = self.created_at();
        let same_op = created_at.lamport() == edited_at.lamport()
            && created_at.actor_id() == edited_at.actor_id();
        match self {
            TreeContent::Text { .. } => same_op,
            TreeContent::Element { children, .. } => {
                same_op && children.iter().all(|child| child.stamped_with(edited_at))
            }
        }
    }

    pub fn to_xml(&self) -> String {
        match self {
            TreeContent::Text { value, .. } => value.clone(),
            TreeContent::Element {
                tag,
                attributes,
                children,
                ..
            } => {
                let inner: String = children.iter().map(|c| c.to_xml()).collect();
                format!("<{}{}>{}</{}>", tag, attrs_to_xml(attributes), inner, tag)
            }
        }
    }
}

/// Content as the editing API describes it, before tickets are issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeNodeSpec {
    Element {
        tag: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<TreeNodeSpec>,
    },
    Text {
        value: String,
    },
}

impl TreeNodeSpec {
    pub fn element(tag: &str, children: Vec<TreeNodeSpec>) -> Self {
        TreeNodeSpec::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            children,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        TreeNodeSpec::Text {
            value: value.into(),
        }
    }

    /// Stamp this node and its descendants, parents before children.
    pub fn stamp(self, issue: &mut impl FnMut() -> TimeTicket) -> TreeContent {
        match self {
            TreeNodeSpec::Text { value } => TreeContent::Text {
                created_at: issue(),
                value,
            },
            TreeNodeSpec::Element {
                tag,
                attributes,
                children,
            } => {
                let created_at = issue();
                TreeContent::Element {
                    created_at,
                    tag,
                    attributes,
                    children: children.into_iter().map(|c| c.stamp(issue)).collect(),
                }
            }
        }
    }
}

pub(crate) fn attrs_to_xml(attrs: &BTreeMap<String, String>) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!(" {}=\"{}\"", k, v))
        .collect()
}
