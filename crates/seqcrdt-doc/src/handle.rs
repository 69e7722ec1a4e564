//! Index-based editing handles.
//!
//! A handle is bound to a change context and to one element in it. Each
//! edit converts indexes to positions, issues a ticket, runs the engine,
//! feeds the size delta and GC pairs to the root, and records the operation
//! for replay on other replicas. A handle built with `new` is detached and
//! every call on it fails with `NotInitialized`.

use crate::change::ChangeContext;
use crate::element::GcChild;
use crate::operation::{
    EditOperation, Operation, StyleOperation, TreeEditOperation, TreeStyleOperation,
};
use seqcrdt_core::{CrdtError, Result, TimeTicket};
use seqcrdt_gc::GcPair;
use seqcrdt_text::{CrdtText, PosStruct, SplitPos, TextSpan};
use seqcrdt_tree::{CrdtTree, TreeNodeSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Attribute values are stored JSON-encoded.
fn stringify_values(attributes: &BTreeMap<String, serde_json::Value>) -> Result<BTreeMap<String, String>> {
    attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), serde_json::to_string(value)?)))
        .collect()
}

fn check_range(from: usize, to: usize) -> Result<()> {
    if from > to {
        return Err(CrdtError::InvalidArgument(
            "from should be less than or equal to to".to_string(),
        ));
    }
    Ok(())
}

/// Handle to a replicated text.
#[derive(Debug, Default)]
pub struct Text<'a> {
    context: Option<&'a mut ChangeContext>,
    created_at: Option<TimeTicket>,
}

impl<'a> Text<'a> {
    /// A detached handle.
    pub fn new() -> Self {
        Text::default()
    }

    pub(crate) fn attached(context: &'a mut ChangeContext, created_at: TimeTicket) -> Self {
        Text {
            context: Some(context),
            created_at: Some(created_at),
        }
    }

    pub fn id(&self) -> Option<&TimeTicket> {
        self.created_at.as_ref()
    }

    fn parts(&mut self) -> Result<(&mut ChangeContext, TimeTicket)> {
        match (self.context.as_deref_mut(), &self.created_at) {
            (Some(context), Some(created_at)) => Ok((context, created_at.clone())),
            _ => Err(CrdtError::NotInitialized(
                "Text is not initialized yet".to_string(),
            )),
        }
    }

    fn text(&self) -> Result<&CrdtText> {
        match (self.context.as_deref(), &self.created_at) {
            (Some(context), Some(created_at)) => context.root().find_text(created_at),
            _ => Err(CrdtError::NotInitialized(
                "Text is not initialized yet".to_string(),
            )),
        }
    }

    /// Replace `[from, to)` with `content`, returning the caret range after
    /// the edit.
    pub fn edit(
        &mut self,
        from: usize,
        to: usize,
        content: &str,
        attributes: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> Result<(usize, usize)> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_text(&created_at)?.index_range_to_pos_range(from, to)?;
        debug!(
            from = %format!("{}->{}", from, range.0.to_test_string()),
            to = %format!("{}->{}", to, range.1.to_test_string()),
            content,
            "EDIT"
        );
        let attrs = attributes.map(stringify_values).transpose()?;
        let ticket = context.issue_time_ticket();

        let text = context.root_mut().find_text_mut(&created_at)?;
        let result = text.edit(&range, content, &ticket, attrs.as_ref(), None)?;
        let after = match &result.range_after {
            Some(range_after) => text.find_indexes_from_range(range_after)?,
            None => (from, from),
        };

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Text(target)));
        }
        context.push(Operation::Edit(EditOperation {
            parent_created_at: created_at,
            from_pos: range.0,
            to_pos: range.1,
            content: content.to_string(),
            attributes: attrs.unwrap_or_default(),
            executed_at: ticket,
        }));
        Ok(after)
    }

    pub fn delete(&mut self, from: usize, to: usize) -> Result<(usize, usize)> {
        self.edit(from, to, "", None)
    }

    /// Remove all content.
    pub fn empty(&mut self) -> Result<(usize, usize)> {
        let len = self.len()?;
        self.edit(0, len, "", None)
    }

    pub fn set_style(
        &mut self,
        from: usize,
        to: usize,
        attributes: &BTreeMap<String, serde_json::Value>,
    ) -> Result<bool> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_text(&created_at)?.index_range_to_pos_range(from, to)?;
        let attrs = stringify_values(attributes)?;
        debug!(
            from = %format!("{}->{}", from, range.0.to_test_string()),
            to = %format!("{}->{}", to, range.1.to_test_string()),
            attributes = ?attrs,
            "STYL"
        );
        let ticket = context.issue_time_ticket();

        let text = context.root_mut().find_text_mut(&created_at)?;
        let result = text.set_style(&range, &attrs, &ticket, None)?;

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Text(target)));
        }
        context.push(Operation::Style(StyleOperation::create(
            created_at, range.0, range.1, attrs, ticket,
        )));
        Ok(true)
    }

    pub fn remove_style(&mut self, from: usize, to: usize, keys: &[String]) -> Result<bool> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_text(&created_at)?.index_range_to_pos_range(from, to)?;
        debug!(from, to, ?keys, "STYL remove");
        let ticket = context.issue_time_ticket();

        let text = context.root_mut().find_text_mut(&created_at)?;
        let result = text.remove_style(&range, keys, &ticket, None)?;

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Text(target)));
        }
        context.push(Operation::Style(StyleOperation::create_remove_style(
            created_at,
            range.0,
            range.1,
            keys.to_vec(),
            ticket,
        )));
        Ok(true)
    }

    /// Positions of an index range, in their wire form.
    pub fn index_range_to_pos_range(&self, from: usize, to: usize) -> Result<(PosStruct, PosStruct)> {
        let (start, end) = self.text()?.index_range_to_pos_range(from, to)?;
        Ok((start.to_struct(), end.to_struct()))
    }

    pub fn pos_range_to_index_range(&self, range: &(PosStruct, PosStruct)) -> Result<(usize, usize)> {
        let range = (SplitPos::from_struct(&range.0), SplitPos::from_struct(&range.1));
        self.text()?.find_indexes_from_range(&range)
    }

    pub fn values(&self) -> Result<Vec<TextSpan>> {
        Ok(self.text()?.values())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.text()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.text()?.is_empty())
    }

    pub fn to_string(&self) -> Result<String> {
        Ok(self.text()?.to_string())
    }

    pub fn to_json(&self) -> Result<String> {
        self.text()?.to_json()
    }

    pub fn to_test_string(&self) -> Result<String> {
        Ok(self.text()?.to_test_string())
    }
}

/// Handle to a replicated tree.
#[derive(Debug, Default)]
pub struct Tree<'a> {
    context: Option<&'a mut ChangeContext>,
    created_at: Option<TimeTicket>,
}

impl<'a> Tree<'a> {
    /// A detached handle.
    pub fn new() -> Self {
        Tree::default()
    }

    pub(crate) fn attached(context: &'a mut ChangeContext, created_at: TimeTicket) -> Self {
        Tree {
            context: Some(context),
            created_at: Some(created_at),
        }
    }

    pub fn id(&self) -> Option<&TimeTicket> {
        self.created_at.as_ref()
    }

    fn parts(&mut self) -> Result<(&mut ChangeContext, TimeTicket)> {
        match (self.context.as_deref_mut(), &self.created_at) {
            (Some(context), Some(created_at)) => Ok((context, created_at.clone())),
            _ => Err(CrdtError::NotInitialized(
                "Tree is not initialized yet".to_string(),
            )),
        }
    }

    fn tree(&self) -> Result<&CrdtTree> {
        match (self.context.as_deref(), &self.created_at) {
            (Some(context), Some(created_at)) => context.root().find_tree(created_at),
            _ => Err(CrdtError::NotInitialized(
                "Tree is not initialized yet".to_string(),
            )),
        }
    }

    /// Replace `[from, to)` with `contents`. Content nodes are stamped before
    /// the operation's own ticket.
    pub fn edit(&mut self, from: usize, to: usize, contents: Vec<TreeNodeSpec>) -> Result<()> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_tree(&created_at)?.index_range_to_pos_range(from, to)?;
        debug!(
            from = %format!("{}->{}", from, range.0.to_test_string()),
            to = %format!("{}->{}", to, range.1.to_test_string()),
            contents = contents.len(),
            "TREE EDIT"
        );
        let contents: Vec<_> = contents
            .into_iter()
            .map(|spec| spec.stamp(&mut || context.issue_time_ticket()))
            .collect();
        let ticket = context.issue_time_ticket();

        let tree = context.root_mut().find_tree_mut(&created_at)?;
        let result = tree.edit(&range, &contents, &ticket, None)?;

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Tree(target)));
        }
        context.push(Operation::TreeEdit(TreeEditOperation {
            parent_created_at: created_at,
            from_pos: range.0,
            to_pos: range.1,
            contents,
            executed_at: ticket,
        }));
        Ok(())
    }

    pub fn style(
        &mut self,
        from: usize,
        to: usize,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_tree(&created_at)?.index_range_to_pos_range(from, to)?;
        debug!(from, to, ?attributes, "TREE STYL");
        let ticket = context.issue_time_ticket();

        let tree = context.root_mut().find_tree_mut(&created_at)?;
        let result = tree.style(&range, attributes, &ticket, None)?;

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Tree(target)));
        }
        context.push(Operation::TreeStyle(TreeStyleOperation::create(
            created_at,
            range.0,
            range.1,
            attributes.clone(),
            ticket,
        )));
        Ok(())
    }

    pub fn remove_style(&mut self, from: usize, to: usize, keys: &[String]) -> Result<()> {
        let (context, created_at) = self.parts()?;
        check_range(from, to)?;

        let range = context.root().find_tree(&created_at)?.index_range_to_pos_range(from, to)?;
        debug!(from, to, ?keys, "TREE STYL remove");
        let ticket = context.issue_time_ticket();

        let tree = context.root_mut().find_tree_mut(&created_at)?;
        let result = tree.remove_style(&range, keys, &ticket, None)?;

        context.acc(result.diff);
        for target in result.gc_targets {
            context.register_gc_pair(GcPair::new(created_at.clone(), GcChild::Tree(target)));
        }
        context.push(Operation::TreeStyle(TreeStyleOperation::create_remove_style(
            created_at,
            range.0,
            range.1,
            keys.to_vec(),
            ticket,
        )));
        Ok(())
    }

    pub fn to_xml(&self) -> Result<String> {
        Ok(self.tree()?.to_xml())
    }

    pub fn to_json(&self) -> Result<String> {
        self.tree()?.to_json()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.tree()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tree()?.is_empty())
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>> {
        self.tree()?.index_to_path(index)
    }
}
