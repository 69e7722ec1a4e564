//! Elements a document root can hold, and their GC dispatch.

use seqcrdt_core::{DataSize, DocSize, TimeTicket, TIME_TICKET_SIZE};
use seqcrdt_gc::{GcPair, GcStore};
use seqcrdt_text::{CrdtText, TextGcTarget};
use seqcrdt_tree::{CrdtTree, TreeGcTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A replicated element.
#[derive(Clone, Debug)]
pub enum CrdtElement {
    Text(CrdtText),
    Tree(CrdtTree),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Text,
    Tree,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Text => write!(f, "Text"),
            ElementKind::Tree => write!(f, "Tree"),
        }
    }
}

/// The child half of a GC pair: what to reclaim inside the parent element.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GcChild {
    Text(TextGcTarget),
    Tree(TreeGcTarget),
}

impl CrdtElement {
    pub fn created_at(&self) -> &TimeTicket {
        match self {
            CrdtElement::Text(text) => text.created_at(),
            CrdtElement::Tree(tree) => tree.created_at(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            CrdtElement::Text(_) => ElementKind::Text,
            CrdtElement::Tree(_) => ElementKind::Tree,
        }
    }

    pub fn as_text(&self) -> Option<&CrdtText> {
        match self {
            CrdtElement::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut CrdtText> {
        match self {
            CrdtElement::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&CrdtTree> {
        match self {
            CrdtElement::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut CrdtTree> {
        match self {
            CrdtElement::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn doc_size(&self) -> DocSize {
        let own = DocSize::live(DataSize::new(0, TIME_TICKET_SIZE));
        match self {
            CrdtElement::Text(text) => own + text.doc_size(),
            CrdtElement::Tree(tree) => own + tree.doc_size(),
        }
    }

    pub fn to_json_value(&self) -> seqcrdt_core::Result<serde_json::Value> {
        let json = match self {
            CrdtElement::Text(text) => text.to_json()?,
            CrdtElement::Tree(tree) => tree.to_json()?,
        };
        Ok(serde_json::from_str(&json)?)
    }

    pub fn gc_removed_at(&self, child: &GcChild) -> Option<TimeTicket> {
        match (self, child) {
            (CrdtElement::Text(text), GcChild::Text(target)) => text.gc_removed_at(target),
            (CrdtElement::Tree(tree), GcChild::Tree(target)) => tree.gc_removed_at(target),
            _ => None,
        }
    }

    pub fn gc_is_anchored(&self, child: &GcChild) -> bool {
        match (self, child) {
            (CrdtElement::Text(text), GcChild::Text(target)) => text.gc_is_anchored(target),
            (CrdtElement::Tree(tree), GcChild::Tree(target)) => tree.gc_is_anchored(target),
            _ => false,
        }
    }

    pub fn gc_purge(&mut self, child: &GcChild) -> Option<DataSize> {
        match (self, child) {
            (CrdtElement::Text(text), GcChild::Text(target)) => text.gc_purge(target),
            (CrdtElement::Tree(tree), GcChild::Tree(target)) => tree.gc_purge(target),
            _ => None,
        }
    }
}

/// Elements by creation ticket. This is the store the GC registry sweeps.
#[derive(Clone, Debug, Default)]
pub struct ElementMap(BTreeMap<TimeTicket, CrdtElement>);

impl ElementMap {
    pub fn get(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.0.get(created_at)
    }

    pub fn get_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.0.get_mut(created_at)
    }

    pub fn insert(&mut self, element: CrdtElement) {
        self.0.insert(element.created_at().clone(), element);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &CrdtElement> {
        self.0.values()
    }
}

impl GcStore<GcChild> for ElementMap {
    fn removed_at(&self, pair: &GcPair<GcChild>) -> Option<TimeTicket> {
        self.get(&pair.parent)?.gc_removed_at(&pair.child)
    }

    fn is_anchored(&self, pair: &GcPair<GcChild>) -> bool {
        self.get(&pair.parent)
            .map_or(false, |element| element.gc_is_anchored(&pair.child))
    }

    fn purge(&mut self, pair: &GcPair<GcChild>) -> Result<DataSize, String> {
        let element = self
            .get_mut(&pair.parent)
            .ok_or_else(|| format!("no element {}", pair.parent))?;
        let kind = element.kind();
        element
            .gc_purge(&pair.child)
            .ok_or_else(|| format!("{} has nothing to purge for {:?}", kind, pair.child))
    }
}
