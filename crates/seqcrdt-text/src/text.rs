//! Rich text on top of the split RGA.
//!
//! `CrdtText` stores character runs with per-run LWW attributes. Attribute
//! values are kept as JSON-encoded strings so that any JSON value survives
//! the round trip through the engine.

use crate::pos::{SplitNodeId, SplitPos, SplitPosRange};
use crate::split::{RgaTreeSplit, SplitValue};
use seqcrdt_core::{
    knows, ActorId, AttrMap, DataSize, DocSize, Result, TimeTicket, VersionVector, TIME_TICKET_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// A run of characters and its attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextValue {
    content: String,
    len: usize,
    attrs: AttrMap,
}

impl TextValue {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            len: content.chars().count(),
            attrs: AttrMap::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttrMap {
        &mut self.attrs
    }
}

impl fmt::Display for TextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

impl SplitValue for TextValue {
    fn len(&self) -> usize {
        self.len
    }

    fn split_off(&mut self, offset: usize) -> Self {
        let at = self
            .content
            .char_indices()
            .nth(offset)
            .map_or(self.content.len(), |(i, _)| i);
        let rest = self.content.split_off(at);
        let right_len = self.len - offset;
        self.len = offset;
        TextValue {
            content: rest,
            len: right_len,
            attrs: self.attrs.clone(),
        }
    }

    fn data_size(&self) -> DataSize {
        DataSize::new(self.content.len(), 0) + self.attrs.data_size()
    }

    fn doc_size(&self) -> DocSize {
        DocSize::live(DataSize::new(self.content.len(), 0)) + self.attrs.doc_size()
    }
}

/// What a `TextChange` describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextChangeKind {
    Content,
    Style,
}

/// A visible change in document indexes, for change-event notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub kind: TextChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub content: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub attributes_to_remove: Vec<String>,
}

/// Something a text element can reclaim once its removal is stable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TextGcTarget {
    /// A tombstoned run.
    Node(SplitNodeId),
    /// A removed attribute key on a run.
    Attr { node: SplitNodeId, key: String },
}

/// Outcome of a text edit or style call.
#[derive(Clone, Debug, Default)]
pub struct TextEditResult {
    pub changes: Vec<TextChange>,
    pub gc_targets: Vec<TextGcTarget>,
    /// Bytes this call added: new runs and attributes, plus one ticket per
    /// removal.
    pub diff: DataSize,
    /// Range to place the caret at after the edit.
    pub range_after: Option<SplitPosRange>,
}

/// A maximal run of live text sharing one attribute set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub content: String,
    pub attributes: BTreeMap<String, String>,
}

/// Replicated rich text.
#[derive(Clone, Debug)]
pub struct CrdtText {
    created_at: TimeTicket,
    rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            rga: RgaTreeSplit::new(),
        }
    }

    pub fn created_at(&self) -> &TimeTicket {
        &self.created_at
    }

    pub fn rga(&self) -> &RgaTreeSplit<TextValue> {
        &self.rga
    }

    /// Replace `range` with `content`. Attributes land on the inserted run only.
    pub fn edit(
        &mut self,
        range: &SplitPosRange,
        content: &str,
        edited_at: &TimeTicket,
        attributes: Option<&BTreeMap<String, String>>,
        version_vector: Option<&VersionVector>,
    ) -> Result<TextEditResult> {
        let value = (!content.is_empty()).then(|| {
            let mut value = TextValue::new(content);
            for (key, v) in attributes.into_iter().flatten() {
                value.attrs.set(key, v, edited_at);
            }
            value
        });
        let inserted = value.as_ref().map_or(DataSize::default(), |v| {
            v.data_size() + DataSize::new(0, TIME_TICKET_SIZE)
        });

        let result = self.rga.edit(range, edited_at, value, version_vector)?;
        debug!(
            from = %range.0.to_test_string(),
            to = %range.1.to_test_string(),
            at = %edited_at,
            removed = result.removed.len(),
            "EDIT"
        );

        let changes = result
            .changes
            .into_iter()
            .map(|change| TextChange {
                kind: TextChangeKind::Content,
                actor: change.actor,
                from: change.from,
                to: change.to,
                attributes: change
                    .value
                    .as_ref()
                    .map(|v| v.attrs.to_map())
                    .unwrap_or_default(),
                content: change.value.map(|v| v.content),
                attributes_to_remove: Vec::new(),
            })
            .collect();

        let removals = result.removed.len();
        let mut gc_targets: Vec<_> = result
            .removed
            .into_iter()
            .chain(result.restamped)
            .map(TextGcTarget::Node)
            .collect();
        self.cut_piece_targets(&result.split, &mut gc_targets);

        Ok(TextEditResult {
            changes,
            gc_targets,
            diff: inserted + DataSize::new(0, TIME_TICKET_SIZE * removals),
            range_after: Some((result.caret.clone(), result.caret)),
        })
    }

    /// Set `attributes` on every live run in `range` whose creation the
    /// editor had observed.
    pub fn set_style(
        &mut self,
        range: &SplitPosRange,
        attributes: &BTreeMap<String, String>,
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
    ) -> Result<TextEditResult> {
        let (nodes, split) = self.rga.split_range(range, edited_at)?;
        debug!(
            from = %range.0.to_test_string(),
            to = %range.1.to_test_string(),
            at = %edited_at,
            keys = attributes.len(),
            "STYL"
        );

        let mut result = TextEditResult::default();
        self.cut_piece_targets(&split, &mut result.gc_targets);
        for idx in nodes {
            let Some(node) = self.rga.node(idx) else { continue };
            if node.is_removed() || !knows(version_vector, node.created_at()) {
                continue;
            }
            let (from, to) = self.rga.node_indexes(idx);
            let Some(node) = self.rga.node_mut(idx) else { continue };
            let attrs = node.value_mut().attrs_mut();
            let mut applied = BTreeMap::new();
            for (key, value) in attributes {
                if attrs.set(key, value, edited_at) {
                    applied.insert(key.clone(), value.clone());
                    if let Some(entry) = attrs.entry(key) {
                        result.diff += entry.data_size(key);
                    }
                }
            }
            if applied.is_empty() {
                continue;
            }
            result.changes.push(TextChange {
                kind: TextChangeKind::Style,
                actor: edited_at.actor_id().clone(),
                from,
                to,
                content: None,
                attributes: applied,
                attributes_to_remove: Vec::new(),
            });
        }
        Ok(result)
    }

    /// Remove `keys` from every live run in `range`. Each removal leaves an
    /// attribute tombstone that becomes a GC target.
    pub fn remove_style(
        &mut self,
        range: &SplitPosRange,
        keys: &[String],
        edited_at: &TimeTicket,
        version_vector: Option<&VersionVector>,
    ) -> Result<TextEditResult> {
        let (nodes, split) = self.rga.split_range(range, edited_at)?;
        debug!(
            from = %range.0.to_test_string(),
            to = %range.1.to_test_string(),
            at = %edited_at,
            ?keys,
            "STYL remove"
        );

        let mut result = TextEditResult::default();
        self.cut_piece_targets(&split, &mut result.gc_targets);
        for idx in nodes {
            let Some(node) = self.rga.node(idx) else { continue };
            if node.is_removed() || !knows(version_vector, node.created_at()) {
                continue;
            }
            let id = node.id().clone();
            let (from, to) = self.rga.node_indexes(idx);
            let Some(node) = self.rga.node_mut(idx) else { continue };
            let attrs = node.value_mut().attrs_mut();
            let mut removed = Vec::new();
            for key in keys {
                if attrs.remove(key, edited_at) {
                    removed.push(key.clone());
                    if let Some(entry) = attrs.entry(key) {
                        result.diff += entry.data_size(key);
                    }
                    let target = TextGcTarget::Attr {
                        node: id.clone(),
                        key: key.clone(),
                    };
                    if !result.gc_targets.contains(&target) {
                        result.gc_targets.push(target);
                    }
                }
            }
            if removed.is_empty() {
                continue;
            }
            result.changes.push(TextChange {
                kind: TextChangeKind::Style,
                actor: edited_at.actor_id().clone(),
                from,
                to,
                content: None,
                attributes: BTreeMap::new(),
                attributes_to_remove: removed,
            });
        }
        Ok(result)
    }

    /// Add the GC targets inherited by pieces cut off existing runs: the piece
    /// itself when it is a tombstone, else each attribute tombstone it carries.
    fn cut_piece_targets(&self, pieces: &[SplitNodeId], targets: &mut Vec<TextGcTarget>) {
        for id in pieces {
            let Some(node) = self.rga.find_node(id).and_then(|idx| self.rga.node(idx)) else {
                continue;
            };
            if node.is_removed() {
                let target = TextGcTarget::Node(id.clone());
                if !targets.contains(&target) {
                    targets.push(target);
                }
                continue;
            }
            for (key, entry) in node.value().attrs.iter() {
                if entry.removed {
                    targets.push(TextGcTarget::Attr {
                        node: id.clone(),
                        key: key.clone(),
                    });
                }
            }
        }
    }

    pub fn index_to_pos(&self, index: usize) -> Result<SplitPos> {
        self.rga.index_to_pos(index)
    }

    pub fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<SplitPosRange> {
        self.rga.index_range_to_pos_range(from, to)
    }

    pub fn find_indexes_from_range(&self, range: &SplitPosRange) -> Result<(usize, usize)> {
        self.rga.find_indexes_from_range(range)
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    /// Live text as maximal spans of equal attributes.
    pub fn values(&self) -> Vec<TextSpan> {
        let mut spans: Vec<TextSpan> = Vec::new();
        for (_, node) in self.rga.iter() {
            if node.is_removed() {
                continue;
            }
            let attributes = node.value().attrs.to_map();
            match spans.last_mut() {
                Some(last) if last.attributes == attributes => {
                    last.content.push_str(&node.value().content)
                }
                _ => spans.push(TextSpan {
                    content: node.value().content.clone(),
                    attributes,
                }),
            }
        }
        spans
    }

    /// JSON rendering: `[{"val":"..","attrs":{..}}, ..]`. Attribute values
    /// are decoded back from their JSON encoding.
    pub fn to_json(&self) -> Result<String> {
        let spans: Vec<serde_json::Value> = self
            .values()
            .into_iter()
            .map(|span| {
                let mut obj = serde_json::Map::new();
                if !span.attributes.is_empty() {
                    let attrs = span
                        .attributes
                        .into_iter()
                        .map(|(k, v)| {
                            let value = serde_json::from_str(&v)
                                .unwrap_or(serde_json::Value::String(v));
                            (k, value)
                        })
                        .collect();
                    obj.insert("attrs".to_string(), serde_json::Value::Object(attrs));
                }
                obj.insert("val".to_string(), serde_json::Value::String(span.content));
                serde_json::Value::Object(obj)
            })
            .collect();
        Ok(serde_json::to_string(&spans)?)
    }

    pub fn to_test_string(&self) -> String {
        self.rga.to_test_string()
    }

    /// Data size of everything held, tombstones included.
    pub fn data_size(&self) -> DataSize {
        self.rga
            .iter()
            .fold(DataSize::default(), |acc, (_, node)| acc + node.data_size())
    }

    /// Live content and attributes apart from what awaits GC.
    pub fn doc_size(&self) -> DocSize {
        self.rga
            .iter()
            .fold(DocSize::default(), |acc, (_, node)| acc + node.doc_size())
    }

    /// Removal stamp of a GC target, or `None` when it is gone or live again.
    pub fn gc_removed_at(&self, target: &TextGcTarget) -> Option<TimeTicket> {
        match target {
            TextGcTarget::Node(id) => self.rga.removed_at(id).cloned(),
            TextGcTarget::Attr { node, key } => {
                let idx = self.rga.find_node(node)?;
                self.rga.node(idx)?.value().attrs.removed_at(key).cloned()
            }
        }
    }

    pub fn gc_is_anchored(&self, target: &TextGcTarget) -> bool {
        match target {
            TextGcTarget::Node(id) => self.rga.is_split_anchor(id),
            TextGcTarget::Attr { .. } => false,
        }
    }

    /// Reclaim a GC target: one tombstoned run, or one attribute tombstone on
    /// one run.
    pub fn gc_purge(&mut self, target: &TextGcTarget) -> Option<DataSize> {
        match target {
            TextGcTarget::Node(id) => {
                let freed = self.rga.purge(id)?;
                trace!(node = %id, "purged text node");
                Some(freed)
            }
            TextGcTarget::Attr { node, key } => {
                let idx = self.rga.find_node(node)?;
                self.rga.node_mut(idx)?.value_mut().attrs_mut().purge(key)
            }
        }
    }
}

impl fmt::Display for CrdtText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, node) in self.rga.iter() {
            if !node.is_removed() {
                f.write_str(&node.value().content)?;
            }
        }
        Ok(())
    }
}
