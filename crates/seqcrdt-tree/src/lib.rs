//! # seqcrdt-tree
//!
//! Replicated tree of labeled elements and text leaves.
//!
//! - `node`: node identities, positions, and insertable content
//! - `tree`: `CrdtTree`, with range edits, styling, and tombstone reclamation

pub mod node;
pub mod tree;

pub use node::{TreeContent, TreeNode, TreeNodeId, TreeNodeKind, TreeNodeSpec, TreePos, TreePosRange};
pub use tree::{CrdtTree, TreeChange, TreeChangeKind, TreeEditResult, TreeGcTarget};
