//! Document: one replica's copy of a root and its clocks.

use crate::change::{Change, ChangeContext, ChangeId};
use crate::operation::{OpSource, OperationInfo};
use crate::root::CrdtRoot;
use seqcrdt_core::{ActorId, DocSize, Result, VersionVector};
use seqcrdt_gc::GcPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Document configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Policy for GC sweeps.
    pub gc: GcPolicy,

    /// Skip GC entirely; tombstones are kept forever.
    pub disable_gc: bool,
}

#[derive(Debug)]
pub struct Document {
    id: ChangeId,
    root: CrdtRoot,
    local_changes: Vec<Change>,
    config: DocumentConfig,
}

impl Document {
    pub fn new(actor: ActorId) -> Self {
        Self::with_config(actor, DocumentConfig::default())
    }

    pub fn with_config(actor: ActorId, config: DocumentConfig) -> Self {
        Document {
            id: ChangeId::new(0, actor, VersionVector::new()),
            root: CrdtRoot::new(config.gc.clone()),
            local_changes: Vec::new(),
            config,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.id.actor
    }

    pub fn lamport(&self) -> u64 {
        self.id.lamport
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.id.version_vector
    }

    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    /// Run `updater` against a copy of the root. The copy replaces the root
    /// only if the updater succeeds and recorded at least one operation.
    pub fn update<F>(&mut self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut ChangeContext) -> Result<()>,
    {
        let mut context = ChangeContext::new(self.id.next(), self.root.clone());
        updater(&mut context)?;

        let (root, change) = context.into_parts();
        if let Some(change) = change {
            debug!(
                actor = %change.id.actor.as_str(),
                lamport = change.id.lamport,
                ops = change.operations.len(),
                "local change"
            );
            self.root = root;
            self.id = change.id.clone();
            self.local_changes.push(change);
        }
        Ok(())
    }

    /// Changes made locally since the last call.
    pub fn take_local_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.local_changes)
    }

    pub fn has_local_changes(&self) -> bool {
        !self.local_changes.is_empty()
    }

    /// Apply changes from other replicas, in causal order. Changes this
    /// replica has already seen are skipped. A change either applies whole or
    /// not at all.
    pub fn apply_changes(&mut self, changes: &[Change]) -> Result<Vec<OperationInfo>> {
        let mut infos = Vec::new();
        for change in changes {
            if self.id.version_vector.contains(&change.id.ticket(0)) {
                continue;
            }

            let mut root = self.root.clone();
            for op in &change.operations {
                let result = op.execute(&mut root, OpSource::Remote, Some(&change.id.version_vector))?;
                infos.extend(result.op_infos);
            }
            self.root = root;
            self.id = self.id.sync_clocks(&change.id);
        }
        if !changes.is_empty() {
            debug!(
                received = changes.len(),
                lamport = self.id.lamport,
                "applied remote changes"
            );
        }
        Ok(infos)
    }

    /// Reclaim tombstones every replica in `vector` has seen. Returns the
    /// number of evicted GC pairs.
    pub fn garbage_collect(&mut self, vector: &VersionVector) -> usize {
        if self.config.disable_gc {
            return 0;
        }
        let evicted = self.root.garbage_collect(vector);
        info!(evicted, remaining = self.root.garbage_len(), "garbage collected");
        evicted
    }

    pub fn garbage_len(&self) -> usize {
        self.root.garbage_len()
    }

    pub fn doc_size(&self) -> DocSize {
        self.root.doc_size()
    }

    pub fn to_json(&self) -> Result<String> {
        self.root.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqcrdt_core::CrdtError;

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let mut doc = Document::new(ActorId::new("a"));
        doc.update(|ctx| {
            ctx.create_text("t")?.edit(0, 0, "abc", None)?;
            Ok(())
        })
        .unwrap();

        let err = doc.update(|ctx| {
            let mut text = ctx.get_text("t")?;
            text.edit(0, 3, "", None)?;
            text.edit(5, 1, "x", None)?;
            Ok(())
        });
        assert!(matches!(err, Err(CrdtError::InvalidArgument(_))));
        assert_eq!(doc.to_json().unwrap(), r#"{"t":[{"val":"abc"}]}"#);
        assert_eq!(doc.lamport(), 1);
        assert_eq!(doc.take_local_changes().len(), 1);
    }

    #[test]
    fn test_read_only_update_records_nothing() {
        let mut doc = Document::new(ActorId::new("a"));
        doc.update(|ctx| {
            ctx.create_text("t")?;
            Ok(())
        })
        .unwrap();
        doc.take_local_changes();

        doc.update(|ctx| {
            assert_eq!(ctx.get_text("t")?.len()?, 0);
            Ok(())
        })
        .unwrap();
        assert!(!doc.has_local_changes());
        assert_eq!(doc.lamport(), 1);
    }

    #[test]
    fn test_own_changes_are_skipped() {
        let mut doc = Document::new(ActorId::new("a"));
        doc.update(|ctx| {
            ctx.create_text("t")?.edit(0, 0, "x", None)?;
            Ok(())
        })
        .unwrap();
        let changes = doc.take_local_changes();
        assert!(doc.apply_changes(&changes).unwrap().is_empty());
        assert_eq!(doc.to_json().unwrap(), r#"{"t":[{"val":"x"}]}"#);
    }

    #[test]
    fn test_disabled_gc_keeps_tombstones() {
        let mut doc = Document::with_config(
            ActorId::new("a"),
            DocumentConfig {
                disable_gc: true,
                ..DocumentConfig::default()
            },
        );
        doc.update(|ctx| {
            let mut text = ctx.create_text("t")?;
            text.edit(0, 0, "abc", None)?;
            text.delete(0, 3)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(doc.garbage_len(), 1);
        let vv = doc.version_vector().clone();
        assert_eq!(doc.garbage_collect(&vv), 0);
        assert_eq!(doc.garbage_len(), 1);
    }
}
