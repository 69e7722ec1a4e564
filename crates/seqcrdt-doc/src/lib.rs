//! # seqcrdt-doc
//!
//! Document layer for the seqcrdt engine.
//!
//! This crate provides:
//! - `CrdtRoot`: the element registry, GC pair sink and size accounting
//! - Operations that replay edits on any replica (`Operation::execute`)
//! - Changes and the change context that issues tickets within one update
//! - `Text` and `Tree` handles for index-based editing
//! - `Document`: local updates, remote change application, and GC
//!
//! ## Example
//!
//! ```rust,ignore
//! use seqcrdt_doc::Document;
//! use seqcrdt_core::ActorId;
//!
//! let mut doc = Document::new(ActorId::new("alice"));
//! doc.update(|ctx| {
//!     let mut text = ctx.create_text("content")?;
//!     text.edit(0, 0, "Hello", None)?;
//!     Ok(())
//! })?;
//!
//! // Ship the change to a peer.
//! let changes = doc.take_local_changes();
//! peer.apply_changes(&changes)?;
//! ```

pub mod change;
pub mod document;
pub mod element;
pub mod handle;
pub mod operation;
pub mod root;

pub use change::{Change, ChangeContext, ChangeId};
pub use document::{Document, DocumentConfig};
pub use element::{CrdtElement, ElementKind, GcChild};
pub use handle::{Text, Tree};
pub use operation::{
    EditOperation, ElementSpec, ExecutionResult, OpSource, Operation, OperationInfo,
    SetOperation, StyleOperation, TreeEditOperation, TreeStyleOperation, TreeStyleValue,
};
pub use root::CrdtRoot;

pub use seqcrdt_core::{CrdtError, DocSize, Result};
