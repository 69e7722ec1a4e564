//! Document root: element registry, GC pair sink, and size accounting.

use crate::element::{CrdtElement, ElementMap, GcChild};
use seqcrdt_core::{CrdtError, DataSize, DocSize, Result, TimeTicket, VersionVector};
use seqcrdt_gc::{GcPair, GcPolicy, GcRegistry, SweepResult};
use seqcrdt_text::CrdtText;
use seqcrdt_tree::CrdtTree;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CrdtRoot {
    created_at: TimeTicket,
    elements: ElementMap,
    /// Root key to the element currently set under it.
    keys: BTreeMap<String, TimeTicket>,
    gc: GcRegistry<GcChild>,
    /// Running total of per-operation size diffs, for storage quotas.
    accumulated: DataSize,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        Self::new(GcPolicy::default())
    }
}

impl CrdtRoot {
    pub fn new(policy: GcPolicy) -> Self {
        CrdtRoot {
            created_at: TimeTicket::initial(),
            elements: ElementMap::default(),
            keys: BTreeMap::new(),
            gc: GcRegistry::with_policy(policy),
            accumulated: DataSize::default(),
        }
    }

    /// Ticket of the root object itself, the parent of every keyed element.
    pub fn created_at(&self) -> &TimeTicket {
        &self.created_at
    }

    pub fn find_by_created_at(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.elements.get(created_at)
    }

    pub fn find_by_created_at_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.elements.get_mut(created_at)
    }

    pub fn find_text(&self, created_at: &TimeTicket) -> Result<&CrdtText> {
        self.find_by_created_at(created_at)
            .ok_or_else(|| not_found(created_at))?
            .as_text()
            .ok_or_else(|| wrong_kind(created_at, "Text"))
    }

    pub fn find_text_mut(&mut self, created_at: &TimeTicket) -> Result<&mut CrdtText> {
        self.find_by_created_at_mut(created_at)
            .ok_or_else(|| not_found(created_at))?
            .as_text_mut()
            .ok_or_else(|| wrong_kind(created_at, "Text"))
    }

    pub fn find_tree(&self, created_at: &TimeTicket) -> Result<&CrdtTree> {
        self.find_by_created_at(created_at)
            .ok_or_else(|| not_found(created_at))?
            .as_tree()
            .ok_or_else(|| wrong_kind(created_at, "Tree"))
    }

    pub fn find_tree_mut(&mut self, created_at: &TimeTicket) -> Result<&mut CrdtTree> {
        self.find_by_created_at_mut(created_at)
            .ok_or_else(|| not_found(created_at))?
            .as_tree_mut()
            .ok_or_else(|| wrong_kind(created_at, "Tree"))
    }

    /// Set `element` under `key`. The element created last wins the key;
    /// a losing element stays registered so operations on it still apply.
    /// Returns whether the key now points at `element`.
    pub fn set(&mut self, key: &str, element: CrdtElement) -> bool {
        let created_at = element.created_at().clone();
        let wins = self
            .keys
            .get(key)
            .map_or(true, |current| created_at.after(current));
        self.elements.insert(element);
        if wins {
            self.keys.insert(key.to_string(), created_at);
        }
        wins
    }

    /// Element currently set under `key`.
    pub fn get(&self, key: &str) -> Option<&CrdtElement> {
        self.elements.get(self.keys.get(key)?)
    }

    pub fn key_created_at(&self, key: &str) -> Option<&TimeTicket> {
        self.keys.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.keys()
    }

    /// JSON path of an element: `$.key` for a keyed element, `$` otherwise.
    pub fn create_path(&self, created_at: &TimeTicket) -> String {
        self.keys
            .iter()
            .find(|(_, t)| *t == created_at)
            .map_or_else(|| "$".to_string(), |(key, _)| format!("$.{}", key))
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Register a tombstone for later reclamation.
    pub fn register_gc_pair(&mut self, pair: GcPair<GcChild>) {
        self.gc.register(pair);
    }

    /// Add the size an operation wrote. Purely additive: GC never gives
    /// anything back here.
    pub fn acc(&mut self, diff: DataSize) {
        self.accumulated += diff;
    }

    pub fn accumulated(&self) -> DataSize {
        self.accumulated
    }

    pub fn garbage_len(&self) -> usize {
        self.gc.len()
    }

    /// Size of every element, including those that lost their key. It
    /// depends only on element state, so converged replicas agree on it.
    pub fn doc_size(&self) -> DocSize {
        self.elements
            .values()
            .fold(DocSize::default(), |acc, element| acc + element.doc_size())
    }

    pub fn gc_registry(&self) -> &GcRegistry<GcChild> {
        &self.gc
    }

    /// Reclaim every registered tombstone `vector` has seen. Returns the
    /// number of pairs evicted.
    pub fn garbage_collect(&mut self, vector: &VersionVector) -> usize {
        let SweepResult { evicted, freed, .. } = self.gc.sweep(&mut self.elements, vector);
        debug!(
            evicted = evicted.len(),
            freed = freed.total(),
            remaining = self.gc.len(),
            "root GC"
        );
        evicted.len()
    }

    /// Keyed elements rendered as one JSON object.
    pub fn to_json(&self) -> Result<String> {
        let mut object = serde_json::Map::new();
        for (key, created_at) in &self.keys {
            if let Some(element) = self.elements.get(created_at) {
                object.insert(key.clone(), element.to_json_value()?);
            }
        }
        Ok(serde_json::to_string(&object)?)
    }
}

fn not_found(created_at: &TimeTicket) -> CrdtError {
    CrdtError::InvalidArgument(format!("fail to find {}", created_at))
}

fn wrong_kind(created_at: &TimeTicket, expected: &str) -> CrdtError {
    CrdtError::InvalidArgument(format!("element {} is not a {}", created_at, expected))
}
