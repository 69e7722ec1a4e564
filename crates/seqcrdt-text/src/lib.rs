//! # seqcrdt-text
//!
//! Replicated text built on a split-on-insert RGA.
//!
//! - `pos`: node identities and carets that survive splits
//! - `splay`: the position-ordered index (weighted splay tree)
//! - `split`: `RgaTreeSplit`, the sequence engine tying both indexes together
//! - `text`: `CrdtText`, rich text with per-run LWW attributes

pub mod pos;
pub mod splay;
pub mod split;
pub mod text;

pub use pos::{PosStruct, SplitNodeId, SplitPos, SplitPosRange};
pub use splay::SplayTree;
pub use split::{EditResult, RgaTreeSplit, SplitNode, SplitValue, ValueChange};
pub use text::{
    CrdtText, TextChange, TextChangeKind, TextEditResult, TextGcTarget, TextSpan,
    TextValue,
};
