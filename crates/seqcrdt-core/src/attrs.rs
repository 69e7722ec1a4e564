//! Last-writer-wins attribute map.
//!
//! Style metadata on text runs and tree elements. Each key converges
//! independently: the write with the greatest `TimeTicket` wins. Removals are
//! kept as tombstones so that an older concurrent `set` arriving later cannot
//! resurrect the key; those tombstones are collected through the GC registry.

use crate::data_size::{DataSize, DocSize, TIME_TICKET_SIZE};
use crate::time::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single attribute value with its write timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrEntry {
    pub value: String,
    pub updated_at: TimeTicket,
    pub removed: bool,
}

impl AttrEntry {
    pub fn data_size(&self, key: &str) -> DataSize {
        DataSize {
            data: key.len() + self.value.len(),
            meta: TIME_TICKET_SIZE,
        }
    }
}

/// Per-key LWW map of attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrMap {
    entries: BTreeMap<String, AttrEntry>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` unless a later write already exists. Returns whether the
    /// write took effect.
    pub fn set(&mut self, key: &str, value: &str, executed_at: &TimeTicket) -> bool {
        if let Some(prev) = self.entries.get(key) {
            if !executed_at.after(&prev.updated_at) {
                return false;
            }
        }
        self.entries.insert(
            key.to_string(),
            AttrEntry {
                value: value.to_string(),
                updated_at: executed_at.clone(),
                removed: false,
            },
        );
        true
    }

    /// Remove `key` unless a later write already exists. A tombstone is written
    /// even when the key was never set. Returns whether a tombstone was written.
    pub fn remove(&mut self, key: &str, executed_at: &TimeTicket) -> bool {
        if let Some(prev) = self.entries.get(key) {
            if !executed_at.after(&prev.updated_at) {
                return false;
            }
        }
        self.entries.insert(
            key.to_string(),
            AttrEntry {
                value: String::new(),
                updated_at: executed_at.clone(),
                removed: true,
            },
        );
        true
    }

    /// Live value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|e| !e.removed)
            .map(|e| e.value.as_str())
    }

    pub fn entry(&self, key: &str) -> Option<&AttrEntry> {
        self.entries.get(key)
    }

    /// When `key` is a tombstone, the ticket that removed it.
    pub fn removed_at(&self, key: &str) -> Option<&TimeTicket> {
        self.entries
            .get(key)
            .filter(|e| e.removed)
            .map(|e| &e.updated_at)
    }

    /// Physically drop a tombstoned key. Live keys are left untouched.
    pub fn purge(&mut self, key: &str) -> Option<DataSize> {
        if !self.entries.get(key)?.removed {
            return None;
        }
        self.entries.remove(key).map(|e| e.data_size(key))
    }

    /// Live attributes as plain key/value pairs.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.removed)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrEntry)> {
        self.entries.iter()
    }

    /// Whether there are no live attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|e| e.removed)
    }

    /// Size of every entry, tombstones included.
    pub fn data_size(&self) -> DataSize {
        self.entries
            .iter()
            .fold(DataSize::default(), |acc, (k, e)| acc + e.data_size(k))
    }

    /// Live entries on one side, tombstones on the other.
    pub fn doc_size(&self) -> DocSize {
        self.entries.iter().fold(DocSize::default(), |acc, (k, e)| {
            let size = e.data_size(k);
            acc + if e.removed { DocSize::garbage(size) } else { DocSize::live(size) }
        })
    }
}
