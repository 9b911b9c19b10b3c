//! Resolution passes over the parsed AST.
//!
//! Run in order:
//! 1. [`nested::resolve_nested`] — fully-qualified names and reference
//!    qualification (lowers modifier lists as a side effect)
//! 2. [`markers::prep_marker_decls`] — marker declaration shape checks
//! 3. [`markers::resolve_markers`] — marker invocation resolution against
//!    imported marker sets

pub mod markers;
pub mod mods;
pub mod nested;

pub use markers::{prep_marker_decls, resolve_markers};
pub use nested::resolve_nested;
