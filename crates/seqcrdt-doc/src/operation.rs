//! Operations: the replayable form of every edit.
//!
//! A handle edits its local element directly and records an operation; remote
//! replicas replay that operation with `execute`, passing the version vector
//! of the change it came in so edits skip content the author had not seen.

use crate::element::{CrdtElement, GcChild};
use crate::root::CrdtRoot;
use seqcrdt_core::{CrdtError, Result, TimeTicket, VersionVector};
use seqcrdt_gc::GcPair;
use seqcrdt_text::{CrdtText, SplitPos, TextChangeKind};
use seqcrdt_tree::{CrdtTree, TreeContent, TreeNodeId, TreePos};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Where an operation is executed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpSource {
    Local,
    Remote,
}

/// A human-readable change record for change-event listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationInfo {
    Set {
        path: String,
        key: String,
    },
    Edit {
        path: String,
        from: usize,
        to: usize,
        content: Option<String>,
        attributes: BTreeMap<String, String>,
    },
    Style {
        path: String,
        from: usize,
        to: usize,
        attributes: BTreeMap<String, String>,
        attributes_to_remove: Vec<String>,
    },
    TreeEdit {
        path: String,
        from: usize,
        to: usize,
        from_path: Vec<usize>,
        to_path: Vec<usize>,
        contents: Vec<TreeContent>,
    },
    TreeStyle {
        path: String,
        from: usize,
        to: usize,
        from_path: Vec<usize>,
        to_path: Vec<usize>,
        value: TreeStyleValue,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeStyleValue {
    Attributes(BTreeMap<String, String>),
    AttributesToRemove(Vec<String>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub op_infos: Vec<OperationInfo>,
}

/// The element a `SetOperation` creates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ElementSpec {
    Text { created_at: TimeTicket },
    Tree { created_at: TimeTicket, root_tag: String },
}

impl ElementSpec {
    pub fn created_at(&self) -> &TimeTicket {
        match self {
            ElementSpec::Text { created_at } | ElementSpec::Tree { created_at, .. } => created_at,
        }
    }

    fn build(&self) -> CrdtElement {
        match self {
            ElementSpec::Text { created_at } => CrdtElement::Text(CrdtText::new(created_at.clone())),
            ElementSpec::Tree {
                created_at,
                root_tag,
            } => CrdtElement::Tree(CrdtTree::new(created_at.clone(), root_tag)),
        }
    }
}

/// Creates an element under a root key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOperation {
    pub parent_created_at: TimeTicket,
    pub key: String,
    pub value: ElementSpec,
    pub executed_at: TimeTicket,
}

/// Replaces a text range with content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOperation {
    pub parent_created_at: TimeTicket,
    pub from_pos: SplitPos,
    pub to_pos: SplitPos,
    pub content: String,
    pub attributes: BTreeMap<String, String>,
    pub executed_at: TimeTicket,
}

/// Sets or removes attributes over a text range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOperation {
    pub parent_created_at: TimeTicket,
    pub from_pos: SplitPos,
    pub to_pos: SplitPos,
    pub attributes: BTreeMap<String, String>,
    pub attributes_to_remove: Vec<String>,
    pub executed_at: TimeTicket,
}

/// Replaces a tree range with content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEditOperation {
    pub parent_created_at: TimeTicket,
    pub from_pos: TreePos,
    pub to_pos: TreePos,
    pub contents: Vec<TreeContent>,
    pub executed_at: TimeTicket,
}

/// Sets or removes attributes on the elements of a tree range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStyleOperation {
    pub parent_created_at: TimeTicket,
    pub from_pos: TreePos,
    pub to_pos: TreePos,
    pub attributes: BTreeMap<String, String>,
    pub attributes_to_remove: Vec<String>,
    pub executed_at: TimeTicket,
}

impl StyleOperation {
    pub fn create(
        parent_created_at: TimeTicket,
        from_pos: SplitPos,
        to_pos: SplitPos,
        attributes: BTreeMap<String, String>,
        executed_at: TimeTicket,
    ) -> Self {
        StyleOperation {
            parent_created_at,
            from_pos,
            to_pos,
            attributes,
            attributes_to_remove: Vec::new(),
            executed_at,
        }
    }

    pub fn create_remove_style(
        parent_created_at: TimeTicket,
        from_pos: SplitPos,
        to_pos: SplitPos,
        attributes_to_remove: Vec<String>,
        executed_at: TimeTicket,
    ) -> Self {
        StyleOperation {
            parent_created_at,
            from_pos,
            to_pos,
            attributes: BTreeMap::new(),
            attributes_to_remove,
            executed_at,
        }
    }
}

impl TreeStyleOperation {
    pub fn create(
        parent_created_at: TimeTicket,
        from_pos: TreePos,
        to_pos: TreePos,
        attributes: BTreeMap<String, String>,
        executed_at: TimeTicket,
    ) -> Self {
        TreeStyleOperation {
            parent_created_at,
            from_pos,
            to_pos,
            attributes,
            attributes_to_remove: Vec::new(),
            executed_at,
        }
    }

    pub fn create_remove_style(
        parent_created_at: TimeTicket,
        from_pos: TreePos,
        to_pos: TreePos,
        attributes_to_remove: Vec<String>,
        executed_at: TimeTicket,
    ) -> Self {
        TreeStyleOperation {
            parent_created_at,
            from_pos,
            to_pos,
            attributes: BTreeMap::new(),
            attributes_to_remove,
            executed_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    Set(SetOperation),
    Edit(EditOperation),
    Style(StyleOperation),
    TreeEdit(TreeEditOperation),
    TreeStyle(TreeStyleOperation),
}

impl Operation {
    pub fn parent_created_at(&self) -> &TimeTicket {
        match self {
            Operation::Set(op) => &op.parent_created_at,
            Operation::Edit(op) => &op.parent_created_at,
            Operation::Style(op) => &op.parent_created_at,
            Operation::TreeEdit(op) => &op.parent_created_at,
            Operation::TreeStyle(op) => &op.parent_created_at,
        }
    }

    pub fn executed_at(&self) -> &TimeTicket {
        match self {
            Operation::Set(op) => &op.executed_at,
            Operation::Edit(op) => &op.executed_at,
            Operation::Style(op) => &op.executed_at,
            Operation::TreeEdit(op) => &op.executed_at,
            Operation::TreeStyle(op) => &op.executed_at,
        }
    }

    /// Creation ticket of the element this operation changes.
    pub fn effected_created_at(&self) -> &TimeTicket {
        match self {
            Operation::Set(op) => op.value.created_at(),
            _ => self.parent_created_at(),
        }
    }

    /// Apply this operation to `root`.
    ///
    /// Fails with `InvalidArgument` when the parent element is missing or of
    /// the wrong kind, or when a position cannot be resolved yet.
    pub fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult> {
        trace!(op = %self.to_test_string(), ?source, "execute");
        match self {
            Operation::Set(op) => op.execute(root),
            Operation::Edit(op) => op.execute(root, version_vector),
            Operation::Style(op) => op.execute(root, version_vector),
            Operation::TreeEdit(op) => op.execute(root, version_vector),
            Operation::TreeStyle(op) => op.execute(root, version_vector),
        }
    }

    pub fn to_test_string(&self) -> String {
        match self {
            Operation::Set(op) => format!(
                "{}.SET.{}={}",
                op.parent_created_at.to_test_string(),
                op.key,
                op.value.created_at().to_test_string()
            ),
            Operation::Edit(op) => format!(
                "{}.EDIT({},{},{})",
                op.parent_created_at.to_test_string(),
                op.from_pos.to_test_string(),
                op.to_pos.to_test_string(),
                op.content
            ),
            Operation::Style(op) => format!(
                "{}.STYL({},{},{})",
                op.parent_created_at.to_test_string(),
                op.from_pos.to_test_string(),
                op.to_pos.to_test_string(),
                attrs_to_test_string(&op.attributes)
            ),
            Operation::TreeEdit(op) => format!(
                "{}.EDIT({},{},{})",
                op.parent_created_at.to_test_string(),
                tree_pos_to_test_string(&op.from_pos),
                tree_pos_to_test_string(&op.to_pos),
                op.contents
                    .iter()
                    .map(|c| c.to_xml())
                    .collect::<Vec<_>>()
                    .join("")
            ),
            Operation::TreeStyle(op) => format!(
                "{}.STYLE({},{},{})",
                op.parent_created_at.to_test_string(),
                tree_pos_to_test_string(&op.from_pos),
                tree_pos_to_test_string(&op.to_pos),
                attrs_to_test_string(&op.attributes)
            ),
        }
    }
}

fn attrs_to_test_string(attrs: &BTreeMap<String, String>) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{}:\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tree_pos_to_test_string(pos: &TreePos) -> String {
    let id: &TreeNodeId = &pos.left_sibling_id;
    format!("{}:{}", id.created_at().to_test_string(), id.offset())
}

impl SetOperation {
    fn execute(&self, root: &mut CrdtRoot) -> Result<ExecutionResult> {
        if &self.parent_created_at != root.created_at() {
            return Err(CrdtError::InvalidArgument(format!(
                "fail to find {}",
                self.parent_created_at
            )));
        }
        root.set(&self.key, self.value.build());
        Ok(ExecutionResult {
            op_infos: vec![OperationInfo::Set {
                path: "$".to_string(),
                key: self.key.clone(),
            }],
        })
    }
}

impl EditOperation {
    fn execute(
        &self,
        root: &mut CrdtRoot,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult> {
        let text = root.find_text_mut(&self.parent_created_at)?;
        let attributes = (!self.attributes.is_empty()).then_some(&self.attributes);
        let result = text.edit(
            &(self.from_pos.clone(), self.to_pos.clone()),
            &self.content,
            &self.executed_at,
            attributes,
            version_vector,
        )?;

        root.acc(result.diff);
        for target in result.gc_targets {
            root.register_gc_pair(GcPair::new(
                self.parent_created_at.clone(),
                GcChild::Text(target),
            ));
        }

        let path = root.create_path(&self.parent_created_at);
        Ok(ExecutionResult {
            op_infos: result
                .changes
                .into_iter()
                .filter(|change| change.kind == TextChangeKind::Content)
                .map(|change| OperationInfo::Edit {
                    path: path.clone(),
                    from: change.from,
                    to: change.to,
                    content: change.content,
                    attributes: change.attributes,
                })
                .collect(),
        })
    }
}

impl StyleOperation {
    fn execute(
        &self,
        root: &mut CrdtRoot,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult> {
        let text = root.find_text_mut(&self.parent_created_at)?;
        let range = (self.from_pos.clone(), self.to_pos.clone());
        let result = if self.attributes.is_empty() {
            text.remove_style(
                &range,
                &self.attributes_to_remove,
                &self.executed_at,
                version_vector,
            )?
        } else {
            text.set_style(&range, &self.attributes, &self.executed_at, version_vector)?
        };

        root.acc(result.diff);
        for target in result.gc_targets {
            root.register_gc_pair(GcPair::new(
                self.parent_created_at.clone(),
                GcChild::Text(target),
            ));
        }

        let path = root.create_path(&self.parent_created_at);
        Ok(ExecutionResult {
            op_infos: result
                .changes
                .into_iter()
                .map(|change| OperationInfo::Style {
                    path: path.clone(),
                    from: change.from,
                    to: change.to,
                    attributes: change.attributes,
                    attributes_to_remove: change.attributes_to_remove,
                })
                .collect(),
        })
    }
}

impl TreeEditOperation {
    fn execute(
        &self,
        root: &mut CrdtRoot,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult> {
        let tree = find_tree(root, &self.parent_created_at)?;
        let result = tree.edit(
            &(self.from_pos.clone(), self.to_pos.clone()),
            &self.contents,
            &self.executed_at,
            version_vector,
        )?;

        root.acc(result.diff);
        for target in result.gc_targets {
            root.register_gc_pair(GcPair::new(
                self.parent_created_at.clone(),
                GcChild::Tree(target),
            ));
        }

        let path = root.create_path(&self.parent_created_at);
        Ok(ExecutionResult {
            op_infos: result
                .changes
                .into_iter()
                .map(|change| OperationInfo::TreeEdit {
                    path: path.clone(),
                    from: change.from,
                    to: change.to,
                    from_path: change.from_path,
                    to_path: change.to_path,
                    contents: change.contents,
                })
                .collect(),
        })
    }
}

impl TreeStyleOperation {
    /// Sets attributes when there are any, otherwise removes
    /// `attributes_to_remove`.
    fn execute(
        &self,
        root: &mut CrdtRoot,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult> {
        let tree = find_tree(root, &self.parent_created_at)?;
        let range = (self.from_pos.clone(), self.to_pos.clone());
        let result = if self.attributes.is_empty() {
            tree.remove_style(
                &range,
                &self.attributes_to_remove,
                &self.executed_at,
                version_vector,
            )?
        } else {
            tree.style(&range, &self.attributes, &self.executed_at, version_vector)?
        };

        root.acc(result.diff);
        for target in result.gc_targets {
            root.register_gc_pair(GcPair::new(
                self.parent_created_at.clone(),
                GcChild::Tree(target),
            ));
        }

        let path = root.create_path(&self.parent_created_at);
        let op_infos = result
            .changes
            .into_iter()
            .map(|change| OperationInfo::TreeStyle {
                path: path.clone(),
                from: change.from,
                to: change.to,
                from_path: change.from_path,
                to_path: change.to_path,
                value: if self.attributes.is_empty() {
                    TreeStyleValue::AttributesToRemove(change.attributes_to_remove)
                } else {
                    TreeStyleValue::Attributes(change.attributes)
                },
            })
            .collect();
        Ok(ExecutionResult { op_infos })
    }
}

fn find_tree<'a>(root: &'a mut CrdtRoot, created_at: &TimeTicket) -> Result<&'a mut CrdtTree> {
    match root.find_by_created_at_mut(created_at) {
        None => Err(CrdtError::InvalidArgument(format!(
            "fail to find {}",
            created_at
        ))),
        Some(CrdtElement::Tree(tree)) => Ok(tree),
        Some(_) => Err(CrdtError::InvalidArgument(
            "fail to execute, only Tree can execute edit".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqcrdt_core::ActorId;
    use seqcrdt_tree::TreeNodeSpec;

    fn ticket(lamport: u64, delimiter: u32) -> TimeTicket {
        TimeTicket::new(lamport, delimiter, ActorId::new("a"))
    }

    fn root_with(key: &str, spec: ElementSpec) -> CrdtRoot {
        let mut root = CrdtRoot::default();
        Operation::Set(SetOperation {
            parent_created_at: root.created_at().clone(),
            key: key.to_string(),
            executed_at: spec.created_at().clone(),
            value: spec,
        })
        .execute(&mut root, OpSource::Local, None)
        .unwrap();
        root
    }

    // ========================================================================
    // Text Operation Tests
    // ========================================================================

    #[test]
    fn test_edit_operation_reports_path() {
        let mut root = root_with("t", ElementSpec::Text { created_at: ticket(1, 0) });
        let text = root.find_text(&ticket(1, 0)).unwrap();
        let (from_pos, to_pos) = text.index_range_to_pos_range(0, 0).unwrap();

        let op = Operation::Edit(EditOperation {
            parent_created_at: ticket(1, 0),
            from_pos,
            to_pos,
            content: "hi".to_string(),
            attributes: BTreeMap::new(),
            executed_at: ticket(2, 0),
        });
        let result = op.execute(&mut root, OpSource::Remote, None).unwrap();
        assert_eq!(
            result.op_infos,
            vec![OperationInfo::Edit {
                path: "$.t".to_string(),
                from: 0,
                to: 0,
                content: Some("hi".to_string()),
                attributes: BTreeMap::new(),
            }]
        );
        assert_eq!(root.find_text(&ticket(1, 0)).unwrap().to_string(), "hi");
    }

    #[test]
    fn test_edit_on_tree_is_invalid_argument() {
        let mut root = root_with(
            "d",
            ElementSpec::Tree {
                created_at: ticket(1, 0),
                root_tag: "doc".to_string(),
            },
        );
        let text = CrdtText::new(TimeTicket::initial());
        let (from_pos, to_pos) = text.index_range_to_pos_range(0, 0).unwrap();
        let op = Operation::Edit(EditOperation {
            parent_created_at: ticket(1, 0),
            from_pos,
            to_pos,
            content: "x".to_string(),
            attributes: BTreeMap::new(),
            executed_at: ticket(2, 0),
        });
        assert!(matches!(
            op.execute(&mut root, OpSource::Remote, None),
            Err(CrdtError::InvalidArgument(_))
        ));
    }

    // ========================================================================
    // Tree Operation Tests
    // ========================================================================

    #[test]
    fn test_tree_style_picks_set_or_remove() {
        let mut root = root_with(
            "d",
            ElementSpec::Tree {
                created_at: ticket(1, 0),
                root_tag: "doc".to_string(),
            },
        );
        let tree = root.find_tree(&ticket(1, 0)).unwrap();
        let (from_pos, to_pos) = tree.index_range_to_pos_range(0, 0).unwrap();
        let mut delimiter = 0;
        let content = TreeNodeSpec::element("p", vec![TreeNodeSpec::text("ab")]).stamp(&mut || {
            delimiter += 1;
            ticket(2, delimiter)
        });
        Operation::TreeEdit(TreeEditOperation {
            parent_created_at: ticket(1, 0),
            from_pos,
            to_pos,
            contents: vec![content],
            executed_at: ticket(2, 9),
        })
        .execute(&mut root, OpSource::Remote, None)
        .unwrap();

        let tree = root.find_tree(&ticket(1, 0)).unwrap();
        let (from_pos, to_pos) = tree.index_range_to_pos_range(0, 4).unwrap();
        let attrs: BTreeMap<_, _> = [("align".to_string(), "left".to_string())].into();
        let style = Operation::TreeStyle(TreeStyleOperation::create(
            ticket(1, 0),
            from_pos.clone(),
            to_pos.clone(),
            attrs.clone(),
            ticket(3, 0),
        ));
        assert!(style.to_test_string().contains("STYLE("));
        let result = style.execute(&mut root, OpSource::Remote, None).unwrap();
        assert_eq!(
            result.op_infos,
            vec![OperationInfo::TreeStyle {
                path: "$.d".to_string(),
                from: 0,
                to: 4,
                from_path: vec![0],
                to_path: vec![1],
                value: TreeStyleValue::Attributes(attrs),
            }]
        );

        let remove = Operation::TreeStyle(TreeStyleOperation::create_remove_style(
            ticket(1, 0),
            from_pos,
            to_pos,
            vec!["align".to_string()],
            ticket(4, 0),
        ));
        remove.execute(&mut root, OpSource::Remote, None).unwrap();
        assert_eq!(root.garbage_len(), 1);
        assert_eq!(
            root.find_tree(&ticket(1, 0)).unwrap().to_xml(),
            "<doc><p>ab</p></doc>"
        );
    }

    #[test]
    fn test_tree_edit_on_text_is_invalid_argument() {
        let mut root = root_with("t", ElementSpec::Text { created_at: ticket(1, 0) });
        let id = TreeNodeId::new(ticket(1, 0), 0);
        let pos = TreePos::new(id.clone(), id);
        let op = Operation::TreeEdit(TreeEditOperation {
            parent_created_at: ticket(1, 0),
            from_pos: pos.clone(),
            to_pos: pos,
            contents: vec![],
            executed_at: ticket(2, 0),
        });
        let err = op.execute(&mut root, OpSource::Remote, None).unwrap_err();
        assert_eq!(
            err,
            CrdtError::InvalidArgument("fail to execute, only Tree can execute edit".to_string())
        );
    }
}
