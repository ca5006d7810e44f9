//! The nested mutable document and its conflict-resolution rules.

pub mod document;

pub use document::DocumentStore;
