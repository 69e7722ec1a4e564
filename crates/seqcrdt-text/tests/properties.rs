//! Property-based tests for the text sequence engine.
//!
//! These tests verify:
//!  - The splay index weights stay consistent after any edit sequence
//!  - `pos_to_index(index_to_pos(i)) == i` for every valid index
//!  - Visible content matches a plain `String` model under local edits
//!  - Tombstones never come back

use proptest::prelude::*;
use seqcrdt_core::{ActorId, TimeTicket};
use seqcrdt_text::CrdtText;

#[derive(Clone, Debug)]
enum Op {
    Insert { at: usize, content: String },
    Delete { from: usize, len: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..64, "[a-zé]{1,4}").prop_map(|(at, content)| Op::Insert { at, content }),
        (0usize..64, 0usize..5).prop_map(|(from, len)| Op::Delete { from, len }),
    ]
}

/// Apply `ops` locally, clamping indexes to the current length, and mirror
/// them on a `Vec<char>` model.
fn apply(ops: &[Op]) -> (CrdtText, Vec<char>) {
    let actor = ActorId::new("a");
    let mut text = CrdtText::new(TimeTicket::initial());
    let mut model: Vec<char> = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        let ticket = TimeTicket::new(i as u64 + 1, 0, actor.clone());
        let len = model.len();
        let (from, to, content) = match op {
            Op::Insert { at, content } => (at % (len + 1), at % (len + 1), content.as_str()),
            Op::Delete { from, len: n } => {
                let from = from % (len + 1);
                (from, (from + n).min(len), "")
            }
        };
        let range = text.index_range_to_pos_range(from, to).unwrap();
        text.edit(&range, content, &ticket, None, None).unwrap();
        model.splice(from..to, content.chars());
    }
    (text, model)
}

proptest! {
    #[test]
    fn weights_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (text, _) = apply(&ops);
        prop_assert!(text.rga().check_weights());
    }

    #[test]
    fn content_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (text, model) = apply(&ops);
        prop_assert_eq!(text.to_string(), model.iter().collect::<String>());
        prop_assert_eq!(text.len(), model.len());
    }

    #[test]
    fn index_round_trip(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (text, _) = apply(&ops);
        for i in 0..=text.len() {
            let pos = text.index_to_pos(i).unwrap();
            prop_assert_eq!(text.rga().pos_to_index(&pos, true).unwrap(), i);
        }
    }

    #[test]
    fn tombstones_are_monotone(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut text, _) = apply(&ops);
        let removed: Vec<_> = text
            .rga()
            .iter()
            .filter(|(_, n)| n.is_removed())
            .map(|(_, n)| n.id().clone())
            .collect();

        let at = TimeTicket::new(1000, 0, ActorId::new("a"));
        let range = text.index_range_to_pos_range(0, 0).unwrap();
        text.edit(&range, "zz", &at, None, None).unwrap();

        for id in removed {
            prop_assert!(text.rga().removed_at(&id).is_some());
        }
    }
}
