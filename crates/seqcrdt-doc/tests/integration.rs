//! Multi-replica scenarios through the document API.

use proptest::prelude::*;
use seqcrdt_core::{ActorId, Lattice, VersionVector};
use seqcrdt_doc::{Change, Document, OperationInfo};
use seqcrdt_tree::TreeNodeSpec;
use serde_json::json;
use std::collections::BTreeMap;

fn replica(name: &str) -> Document {
    Document::new(ActorId::new(name))
}

/// Deliver every pending local change of `from` to `to`.
fn sync(from: &mut Document, to: &mut Document) -> Vec<OperationInfo> {
    let changes = from.take_local_changes();
    to.apply_changes(&changes).unwrap()
}

/// Two replicas sharing a text under "content".
fn text_pair(initial: &str) -> (Document, Document) {
    let mut a = replica("A");
    let mut b = replica("B");
    a.update(|ctx| {
        let mut text = ctx.create_text("content")?;
        if !initial.is_empty() {
            text.edit(0, 0, initial, None)?;
        }
        Ok(())
    })
    .unwrap();
    sync(&mut a, &mut b);
    (a, b)
}

fn text_of(doc: &mut Document) -> String {
    let mut out = String::new();
    doc.update(|ctx| {
        out = ctx.get_text("content")?.to_string()?;
        Ok(())
    })
    .unwrap();
    out
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn concurrent_inserts_order_by_ticket() {
    let (mut a, mut b) = text_pair("");

    // Push B's clock ahead so its insert carries the greater ticket.
    b.update(|ctx| {
        ctx.create_text("scratch")?;
        Ok(())
    })
    .unwrap();
    let scratch = b.take_local_changes();

    a.update(|ctx| {
        ctx.get_text("content")?.edit(0, 0, "Hello", None)?;
        Ok(())
    })
    .unwrap();
    b.update(|ctx| {
        ctx.get_text("content")?.edit(0, 0, "World", None)?;
        Ok(())
    })
    .unwrap();
    assert!(b.lamport() > a.lamport());

    a.apply_changes(&scratch).unwrap();
    let from_a = a.take_local_changes();
    let from_b = b.take_local_changes();
    a.apply_changes(&from_b).unwrap();
    b.apply_changes(&from_a).unwrap();

    assert_eq!(text_of(&mut a), "WorldHello");
    assert_eq!(text_of(&mut b), "WorldHello");
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn style_survives_concurrent_delete() {
    let (mut a, mut b) = text_pair("Hello World");

    let bold: BTreeMap<_, _> = [("bold".to_string(), json!("true"))].into();
    a.update(|ctx| {
        ctx.get_text("content")?.set_style(0, 5, &bold)?;
        Ok(())
    })
    .unwrap();
    b.update(|ctx| {
        ctx.get_text("content")?.delete(2, 3)?;
        Ok(())
    })
    .unwrap();

    let infos = sync(&mut a, &mut b);
    assert!(matches!(infos[0], OperationInfo::Style { .. }));
    sync(&mut b, &mut a);

    let expected = r#"{"content":[{"attrs":{"bold":"true"},"val":"Helo"},{"val":" World"}]}"#;
    assert_eq!(a.to_json().unwrap(), expected);
    assert_eq!(b.to_json().unwrap(), expected);
}

#[test]
fn tombstone_waits_for_vector() {
    let mut a = replica("A");
    a.update(|ctx| {
        ctx.create_text("content")?.edit(0, 0, "abc", None)?;
        Ok(())
    })
    .unwrap();
    for ch in ["d", "e", "f"] {
        a.update(|ctx| {
            let mut text = ctx.get_text("content")?;
            let len = text.len()?;
            text.edit(len, len, ch, None)?;
            Ok(())
        })
        .unwrap();
    }
    // Lamport 5 removes "f".
    a.update(|ctx| {
        ctx.get_text("content")?.delete(5, 6)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(a.lamport(), 5);
    assert_eq!(a.garbage_len(), 1);

    let behind = VersionVector::from_entries([(ActorId::new("A"), 4)]);
    assert_eq!(a.garbage_collect(&behind), 0);
    assert_eq!(a.garbage_len(), 1);

    let caught_up = VersionVector::from_entries([(ActorId::new("A"), 5)]);
    assert_eq!(a.garbage_collect(&caught_up), 1);
    assert_eq!(a.garbage_len(), 0);
    assert_eq!(a.garbage_collect(&caught_up), 0);
    assert_eq!(text_of(&mut a), "abcde");
}

#[test]
fn split_anchor_is_not_evicted() {
    let (mut a, _) = text_pair("abc");
    a.update(|ctx| {
        ctx.get_text("content")?.delete(1, 2)?;
        Ok(())
    })
    .unwrap();
    let vv = a.version_vector().clone();
    // "b" still chains to the live "c" split off the same insert.
    assert_eq!(a.garbage_collect(&vv), 0);
    assert_eq!(a.garbage_len(), 1);
    assert_eq!(text_of(&mut a), "ac");
}

#[test]
fn overlapping_deletes_leave_the_same_garbage() {
    let (mut a, mut b) = text_pair("abcdefgh");

    // Push A's clock ahead so its delete carries the later ticket.
    for _ in 0..2 {
        a.update(|ctx| {
            ctx.create_text("scratch")?;
            Ok(())
        })
        .unwrap();
    }
    a.update(|ctx| {
        ctx.get_text("content")?.delete(2, 5)?;
        Ok(())
    })
    .unwrap();
    b.update(|ctx| {
        ctx.get_text("content")?.delete(3, 6)?;
        Ok(())
    })
    .unwrap();
    assert!(a.lamport() > b.lamport());

    let from_a = a.take_local_changes();
    let from_b = b.take_local_changes();
    a.apply_changes(&from_b).unwrap();
    b.apply_changes(&from_a).unwrap();

    assert_eq!(text_of(&mut a), "abgh");
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    assert_eq!(a.doc_size(), b.doc_size());
    // One pair per tombstoned piece: "c", "de" and "f".
    assert_eq!(a.garbage_len(), 3);
    assert_eq!(b.garbage_len(), 3);

    let vv = a.version_vector().meet(b.version_vector());
    assert_eq!(a.garbage_collect(&vv), 2);
    assert_eq!(b.garbage_collect(&vv), 2);
    // "f" still chains to the live "gh" split off the same insert.
    assert_eq!(a.garbage_len(), 1);
    assert_eq!(b.garbage_len(), 1);
    assert_eq!(a.doc_size(), b.doc_size());
    assert_eq!(a.doc_size().gc.data, 1);
}

#[test]
fn doc_size_moves_to_garbage_and_back() {
    let (mut a, _) = text_pair("abc");
    let before = a.doc_size();
    assert_eq!(a.root().accumulated().data, 3);
    a.update(|ctx| {
        ctx.get_text("content")?.delete(0, 3)?;
        Ok(())
    })
    .unwrap();
    let removed = a.doc_size();
    assert!(removed.gc.data >= 3);
    assert!(removed.live.data < before.live.data);

    let vv = a.version_vector().clone();
    a.garbage_collect(&vv);
    assert_eq!(a.doc_size().gc.data, 0);
}

#[test]
fn tree_edits_converge() {
    let mut a = replica("A");
    let mut b = replica("B");
    a.update(|ctx| {
        ctx.create_tree("doc", "root")?.edit(
            0,
            0,
            vec![TreeNodeSpec::element("p", vec![TreeNodeSpec::text("ab")])],
        )?;
        Ok(())
    })
    .unwrap();
    sync(&mut a, &mut b);

    a.update(|ctx| {
        ctx.get_tree("doc")?.edit(2, 2, vec![TreeNodeSpec::text("X")])?;
        Ok(())
    })
    .unwrap();
    b.update(|ctx| {
        let mut tree = ctx.get_tree("doc")?;
        tree.edit(4, 4, vec![TreeNodeSpec::element("p", vec![TreeNodeSpec::text("c")])])?;
        let attrs: BTreeMap<_, _> = [("k".to_string(), "v".to_string())].into();
        tree.style(0, 4, &attrs)?;
        Ok(())
    })
    .unwrap();

    sync(&mut a, &mut b);
    sync(&mut b, &mut a);

    let expected = r#"<root><p k="v">aXb</p><p>c</p></root>"#;
    for doc in [&mut a, &mut b] {
        doc.update(|ctx| {
            assert_eq!(ctx.get_tree("doc")?.to_xml()?, expected);
            Ok(())
        })
        .unwrap();
    }
}

#[test]
fn tree_delete_of_edited_paragraph_converges() {
    let mut a = replica("A");
    let mut b = replica("B");
    a.update(|ctx| {
        ctx.create_tree("doc", "root")?.edit(
            0,
            0,
            vec![
                TreeNodeSpec::element("p", vec![TreeNodeSpec::text("ab")]),
                TreeNodeSpec::element("p", vec![TreeNodeSpec::text("cd")]),
            ],
        )?;
        Ok(())
    })
    .unwrap();
    sync(&mut a, &mut b);

    a.update(|ctx| {
        ctx.get_tree("doc")?.edit(0, 4, vec![])?;
        Ok(())
    })
    .unwrap();
    b.update(|ctx| {
        ctx.get_tree("doc")?.edit(2, 2, vec![TreeNodeSpec::text("Z")])?;
        Ok(())
    })
    .unwrap();

    sync(&mut a, &mut b);
    sync(&mut b, &mut a);
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());

    let vv = a.version_vector().min_with(b.version_vector());
    a.garbage_collect(&vv);
    b.garbage_collect(&vv);
    assert_eq!(a.garbage_len(), 0);
    assert_eq!(b.garbage_len(), 0);
    assert_eq!(a.to_json().unwrap(), r#"{"doc":{"children":[{"children":[{"type":"text","value":"cd"}],"type":"p"}],"type":"root"}}"#);
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

// ============================================================================
// Convergence properties
// ============================================================================

#[derive(Clone, Debug)]
enum TextOp {
    Insert { at: usize, content: String },
    Delete { from: usize, len: usize },
    Style { from: usize, len: usize, bold: bool },
    Unstyle { from: usize, len: usize },
}

fn text_op() -> impl Strategy<Value = TextOp> {
    prop_oneof![
        (0usize..32, "[a-z]{1,3}").prop_map(|(at, content)| TextOp::Insert { at, content }),
        (0usize..32, 1usize..4).prop_map(|(from, len)| TextOp::Delete { from, len }),
        (0usize..32, 1usize..4, any::<bool>())
            .prop_map(|(from, len, bold)| TextOp::Style { from, len, bold }),
        (0usize..32, 1usize..4).prop_map(|(from, len)| TextOp::Unstyle { from, len }),
    ]
}

fn apply_text_op(doc: &mut Document, op: &TextOp) {
    doc.update(|ctx| {
        let mut text = ctx.get_text("content")?;
        let len = text.len()?;
        match op {
            TextOp::Insert { at, content } => {
                let at = at % (len + 1);
                text.edit(at, at, content, None)?;
            }
            TextOp::Delete { from, len: n } => {
                let from = from % (len + 1);
                text.delete(from, (from + n).min(len))?;
            }
            TextOp::Style { from, len: n, bold } => {
                let from = from % (len + 1);
                let attrs: BTreeMap<_, _> = [("bold".to_string(), json!(bold))].into();
                text.set_style(from, (from + n).min(len), &attrs)?;
            }
            TextOp::Unstyle { from, len: n } => {
                let from = from % (len + 1);
                text.remove_style(from, (from + n).min(len), &["bold".to_string()])?;
            }
        }
        Ok(())
    })
    .unwrap();
}

proptest! {
    #[test]
    fn text_replicas_converge(
        left in prop::collection::vec(text_op(), 1..12),
        right in prop::collection::vec(text_op(), 1..12),
    ) {
        let (mut a, mut b) = text_pair("seed");
        for op in &left {
            apply_text_op(&mut a, op);
        }
        for op in &right {
            apply_text_op(&mut b, op);
        }
        sync(&mut a, &mut b);
        sync(&mut b, &mut a);
        prop_assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());

        let vv = a.version_vector().min_with(b.version_vector());
        a.garbage_collect(&vv);
        b.garbage_collect(&vv);
        prop_assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }
}

// ============================================================================
// Replica cluster
// ============================================================================

/// Replicas exchanging changes through one shared log, the way a relay
/// server would. A replica publishes its pending changes before it reads,
/// so the log is always in causal order.
struct Cluster {
    replicas: Vec<Member>,
    log: Vec<Change>,
}

struct Member {
    doc: Document,
    cursor: usize,
    /// Vector as of the last sync, when nothing was left unpublished.
    synced: VersionVector,
}

impl Cluster {
    fn new(names: &[&str]) -> Self {
        let mut cluster = Cluster {
            replicas: names
                .iter()
                .map(|name| Member {
                    doc: replica(name),
                    cursor: 0,
                    synced: VersionVector::new(),
                })
                .collect(),
            log: Vec::new(),
        };
        cluster.replicas[0]
            .doc
            .update(|ctx| {
                ctx.create_text("content")?.edit(0, 0, "seed", None)?;
                ctx.create_tree("doc", "root")?.edit(
                    0,
                    0,
                    vec![TreeNodeSpec::element("p", vec![TreeNodeSpec::text("ab")])],
                )?;
                Ok(())
            })
            .unwrap();
        cluster.sync_all();
        cluster
    }

    fn sync(&mut self, i: usize) {
        let member = &mut self.replicas[i];
        self.log.extend(member.doc.take_local_changes());
        member.doc.apply_changes(&self.log[member.cursor..]).unwrap();
        member.cursor = self.log.len();
        member.synced = member.doc.version_vector().clone();
    }

    /// Two rounds, so the first replica also sees what the last published.
    fn sync_all(&mut self) {
        for _ in 0..2 {
            for i in 0..self.replicas.len() {
                self.sync(i);
            }
        }
    }

    /// Collect on one replica up to what every replica had seen when it
    /// last synced.
    fn gc(&mut self, i: usize) -> usize {
        self.sync(i);
        let stable = VersionVector::meet_all(self.replicas.iter().map(|m| &m.synced));
        self.replicas[i].doc.garbage_collect(&stable)
    }

    fn assert_converged(&self) {
        let first = &self.replicas[0].doc;
        for member in &self.replicas[1..] {
            assert_eq!(member.doc.to_json().unwrap(), first.to_json().unwrap());
            assert_eq!(member.doc.doc_size().live, first.doc_size().live);
        }
    }

    fn assert_well_formed(&self) {
        for member in &self.replicas {
            let root = member.doc.root();
            let text = root.get("content").and_then(|e| e.as_text()).unwrap();
            assert!(text.rga().check_weights());
            let tree = root.get("doc").and_then(|e| e.as_tree()).unwrap();
            assert!(tree.check_sizes());
        }
    }
}

#[derive(Clone, Debug)]
enum Step {
    Text(usize, TextOp),
    TreeText { replica: usize, at: usize, content: String },
    TreeParagraph { replica: usize, at: usize },
    TreeDelete { replica: usize, from: usize, len: usize },
    Sync(usize),
    SyncAll,
    Gc(usize),
}

fn step(replicas: usize) -> impl Strategy<Value = Step> {
    let r = 0..replicas;
    prop_oneof![
        4 => (r.clone(), text_op()).prop_map(|(i, op)| Step::Text(i, op)),
        2 => (r.clone(), 0usize..16, "[a-z]{1,2}")
            .prop_map(|(replica, at, content)| Step::TreeText { replica, at, content }),
        1 => (r.clone(), 0usize..16).prop_map(|(replica, at)| Step::TreeParagraph { replica, at }),
        1 => (r.clone(), 0usize..16, 1usize..4)
            .prop_map(|(replica, from, len)| Step::TreeDelete { replica, from, len }),
        2 => r.clone().prop_map(Step::Sync),
        1 => Just(Step::SyncAll),
        1 => r.prop_map(Step::Gc),
    ]
}

fn apply_tree_step(doc: &mut Document, step: &Step) {
    doc.update(|ctx| {
        let mut tree = ctx.get_tree("doc")?;
        let len = tree.len()?;
        match step {
            Step::TreeText { at, content, .. } => {
                let at = at % (len + 1);
                tree.edit(at, at, vec![TreeNodeSpec::text(content.as_str())])?;
            }
            Step::TreeParagraph { at, .. } => {
                let at = at % (len + 1);
                tree.edit(at, at, vec![TreeNodeSpec::element("p", vec![])])?;
            }
            Step::TreeDelete { from, len: n, .. } => {
                let from = from % (len + 1);
                tree.edit(from, (from + n).min(len), vec![])?;
            }
            _ => {}
        }
        Ok(())
    })
    .unwrap();
}

proptest! {
    #[test]
    fn cluster_converges_through_partial_syncs_and_gc(
        steps in prop::collection::vec(step(3), 1..40),
    ) {
        let mut cluster = Cluster::new(&["A", "B", "C"]);
        for s in &steps {
            match s {
                Step::Text(i, op) => apply_text_op(&mut cluster.replicas[*i].doc, op),
                Step::TreeText { replica, .. }
                | Step::TreeParagraph { replica, .. }
                | Step::TreeDelete { replica, .. } => {
                    apply_tree_step(&mut cluster.replicas[*replica].doc, s)
                }
                Step::Sync(i) => cluster.sync(*i),
                Step::SyncAll => {
                    cluster.sync_all();
                    cluster.assert_converged();
                }
                Step::Gc(i) => {
                    cluster.gc(*i);
                }
            }
            cluster.assert_well_formed();
        }

        cluster.sync_all();
        cluster.assert_converged();

        // Once every replica has seen everything, the leftover garbage is
        // the same everywhere.
        for i in 0..cluster.replicas.len() {
            cluster.gc(i);
        }
        cluster.assert_well_formed();
        let first = &cluster.replicas[0].doc;
        for member in &cluster.replicas[1..] {
            prop_assert_eq!(member.doc.to_json().unwrap(), first.to_json().unwrap());
            prop_assert_eq!(member.doc.doc_size(), first.doc_size());
            prop_assert_eq!(member.doc.garbage_len(), first.garbage_len());
        }
    }
}
