//! # kdlc — the KDL compiler front end
//!
//! KDL is an interface definition language for Kubernetes-style API
//! types; CKDL is its compiled, serialized intermediate form. This crate
//! is the whole front end: everything from bytes of `.kdl` source to a
//! type-checked [`ckdl_ir::Partial`] with a source map. Artifact
//! generation (CRDs, language types, protos) belongs to back ends that
//! consume CKDL through [`ckdl_ir`].
//!
//! ## Pipeline
//!
//! ```text
//! lexer -> parser -> resolve (names, modifiers, markers) -> toir
//!                                                             |
//!        typegraph (merge partials, chase aliases, check) <---+
//! ```
//!
//! Everything is synchronous and single-threaded; the only I/O sits
//! behind the [`compile::Loader`] trait. Diagnostics flow through the
//! [`trace::Context`] threaded into every pass — no stage aborts, and the
//! caller inspects the sink at the end.
//!
//! ## Usage
//!
//! ```rust
//! use kdlc::compile::{compile, MemoryLoader};
//!
//! let mut loader = MemoryLoader::new();
//! loader.add_source(
//!     "pod.kdl",
//!     r#"group-version(group: "core", version: "v1") {
//!         kind Pod { spec: string, }
//!     }"#,
//! );
//! let outcome = compile(&["pod.kdl"], &mut loader);
//! assert!(!outcome.had_errors());
//! ```

pub mod ast;
pub mod compile;
pub mod foundation;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod toir;
pub mod trace;
pub mod typegraph;

pub use compile::{compile, Loader, MemoryLoader, Outcome};
pub use foundation::{SourceMap, Span};
pub use trace::{Context, Diagnostic, DiagnosticFormatter, Diagnostics};

/// Compiler version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
