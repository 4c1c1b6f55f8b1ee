//! Structured refinement of generated HTML
//!
//! A document is parsed into a [`dom::Document`], a list of
//! [`PatchOperation`]s is applied to the tree, and the tree is serialized
//! back. [`apply_patch`] is all-or-nothing: the caller gets either the new
//! document or a [`PatchError`] and the input string is never touched.

pub mod dom;
pub mod patch;
pub mod selector;

pub use dom::{Document, Element, Node};
pub use patch::{apply_patch, ClassChange, PatchError, PatchOperation, Position, StyleAttributes};
pub use selector::{Selector, SelectorError};
