//! Diagnostic trace context.
//!
//! Every pass threads a [`Context`] explicitly: an immutable, persistent
//! stack of frames (span / description / key-value note) plus a shared
//! diagnostic sink. Deriving a context (`describe`, `note`, `in_span`) is
//! a single `Rc` bump and never mutates the parent, so sibling descents
//! cannot observe each other's frames.
//!
//! Recording an error captures the frame stack into a [`Diagnostic`] and
//! flips two had-error counters: one scoped (usually per file, so one bad
//! file does not poison the rest of the run) and one global (the process
//! exit code). Rendering happens later, when a [`SourceMap`] is at hand.
//!
//! # Design
//!
//! - `Context` — derivable frame stack + sink handle
//! - `Diagnostics` — shared sink of recorded diagnostics
//! - `Diagnostic` — one error with its captured trace
//! - `DiagnosticFormatter` — renders diagnostics with source snippets

use crate::foundation::{SourceMap, Span};
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;

/// A value attached to a trace note.
#[derive(Debug, Clone)]
pub enum NoteValue {
    /// Rendered quoted (`name="Pod"`).
    Str(String),
    /// Rendered bare (`count=3`).
    Raw(String),
    /// Rendered as an alternation (`expected=[<key> | <type>]`).
    List(Vec<String>),
}

impl From<&str> for NoteValue {
    fn from(s: &str) -> Self {
        NoteValue::Str(s.to_string())
    }
}

impl From<String> for NoteValue {
    fn from(s: String) -> Self {
        NoteValue::Str(s)
    }
}

impl From<Vec<String>> for NoteValue {
    fn from(items: Vec<String>) -> Self {
        NoteValue::List(items)
    }
}

#[derive(Debug)]
enum FrameData {
    Describe(&'static str),
    Note(&'static str, NoteValue),
    Span(Span),
}

#[derive(Debug)]
struct Frame {
    parent: Option<Rc<Frame>>,
    data: FrameData,
}

/// Shared sink of diagnostics for one compilation run.
#[derive(Clone, Default)]
pub struct Diagnostics {
    inner: Rc<RefCell<Vec<Diagnostic>>>,
    errors: Rc<Cell<u32>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any error has been recorded anywhere in the run.
    pub fn had_error(&self) -> bool {
        self.errors.get() > 0
    }

    pub fn error_count(&self) -> u32 {
        self.errors.get()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Drain all recorded diagnostics.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    /// Clone of the recorded diagnostics, in recording order.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.inner.borrow().clone()
    }
}

/// The ambient trace context threaded through every pass.
#[derive(Clone)]
pub struct Context {
    frames: Option<Rc<Frame>>,
    scope_errors: Rc<Cell<u32>>,
    sink: Diagnostics,
}

impl Context {
    pub fn new(sink: &Diagnostics) -> Self {
        Self {
            frames: None,
            scope_errors: Rc::new(Cell::new(0)),
            sink: sink.clone(),
        }
    }

    fn push(&self, data: FrameData) -> Self {
        Self {
            frames: Some(Rc::new(Frame {
                parent: self.frames.clone(),
                data,
            })),
            scope_errors: self.scope_errors.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Label the current operation (`"kind"`, `"modifier parameters"`).
    pub fn describe(&self, msg: &'static str) -> Self {
        self.push(FrameData::Describe(msg))
    }

    /// Attach a structured key/value to the current operation.
    pub fn note(&self, key: &'static str, value: impl Into<NoteValue>) -> Self {
        self.push(FrameData::Note(key, value.into()))
    }

    /// Associate the current operation with a source range.
    pub fn in_span(&self, span: Span) -> Self {
        self.push(FrameData::Span(span))
    }

    /// Derive a context with a fresh had-error scope (same sink).
    ///
    /// Used at file boundaries so per-file gating does not leak between
    /// files; the global count still accumulates.
    pub fn file_scope(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            scope_errors: Rc::new(Cell::new(0)),
            sink: self.sink.clone(),
        }
    }

    /// Record an error at the current trace position.
    pub fn error_at(&self, msg: impl Into<String>) {
        self.scope_errors.set(self.scope_errors.get() + 1);
        self.sink.errors.set(self.sink.errors.get() + 1);
        self.sink.inner.borrow_mut().push(Diagnostic {
            message: msg.into(),
            frames: self.frames.clone(),
        });
    }

    /// Record an error at an explicit span.
    pub fn error_at_span(&self, span: Span, msg: impl Into<String>) {
        self.in_span(span).error_at(msg);
    }

    /// Whether an error has been recorded in this context's scope.
    pub fn had_error(&self) -> bool {
        self.scope_errors.get() > 0
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.sink
    }
}

/// One recorded error with its captured trace stack.
#[derive(Clone)]
pub struct Diagnostic {
    pub message: String,
    frames: Option<Rc<Frame>>,
}

struct Chunk<'a> {
    desc: &'a str,
    notes: Vec<(&'a str, &'a NoteValue)>,
    span: Option<Span>,
}

impl Diagnostic {
    /// The innermost span on the trace, if any.
    pub fn primary_span(&self) -> Option<Span> {
        let mut current = self.frames.as_deref();
        while let Some(frame) = current {
            if let FrameData::Span(span) = &frame.data {
                return Some(*span);
            }
            current = frame.parent.as_deref();
        }
        None
    }

    /// Group the frame stack into renderable chunks: notes attach to the
    /// nearest enclosing span/description.
    fn chunks(&self) -> Vec<Chunk<'_>> {
        let mut chunks = Vec::new();
        let mut notes: Vec<(&str, &NoteValue)> = Vec::new();
        let mut span: Option<Span> = None;

        let mut current = self.frames.as_deref();
        while let Some(frame) = current {
            match &frame.data {
                FrameData::Note(key, value) => notes.push((*key, value)),
                FrameData::Span(s) => {
                    // one span per description; a second span before any
                    // description renders as an anonymous chunk
                    if span.is_some() {
                        chunks.push(Chunk {
                            desc: "",
                            notes: std::mem::take(&mut notes),
                            span,
                        });
                    }
                    span = Some(*s);
                }
                FrameData::Describe(desc) => {
                    chunks.push(Chunk {
                        desc: *desc,
                        notes: std::mem::take(&mut notes),
                        span: span.take(),
                    });
                }
            }
            current = frame.parent.as_deref();
        }
        if span.is_some() || !notes.is_empty() {
            chunks.push(Chunk {
                desc: "",
                notes,
                span,
            });
        }
        chunks
    }
}

/// Formats diagnostics with source context.
///
/// Output shape:
///
/// ```text
/// Error: <message>
///   ...in <desc>, k=v @ [line:col, line:col]
///       <snippet with 「highlight」>
/// ```
///
/// Chunks are printed oldest frame first, so the outermost context (the
/// group-version) comes before the innermost (the modifier).
pub struct DiagnosticFormatter<'a> {
    sources: &'a SourceMap,
}

impl<'a> DiagnosticFormatter<'a> {
    pub fn new(sources: &'a SourceMap) -> Self {
        Self { sources }
    }

    pub fn format(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Error: {}", diag.message);

        for chunk in diag.chunks().iter().rev() {
            let _ = write!(out, "  ...in {}", chunk.desc);
            for (key, value) in chunk.notes.iter().rev() {
                let _ = write!(out, ", {}=", key);
                match value {
                    NoteValue::Str(s) => {
                        let _ = write!(out, "{:?}", s);
                    }
                    NoteValue::Raw(s) => {
                        let _ = write!(out, "{}", s);
                    }
                    NoteValue::List(items) => {
                        let _ = write!(out, "[{}]", items.join(" | "));
                    }
                }
            }
            if let Some(span) = chunk.span {
                let (sl, sc) = self.sources.line_col(&span);
                let (el, ec) = self.sources.end_line_col(&span);
                let _ = writeln!(out, " @ [{}:{}, {}:{}]", sl, sc, el, ec);
                let _ = writeln!(out, "\t{}", self.snippet(span));
            } else {
                let _ = writeln!(out);
            }
        }

        out
    }

    pub fn format_all(&self, diags: &[Diagnostic]) -> String {
        diags
            .iter()
            .map(|d| self.format(d))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The highlighted source line(s) for a span: the full first line with
    /// the span bracketed; multi-line spans are truncated after the first.
    fn snippet(&self, span: Span) -> String {
        let file = self.sources.file(&span);
        let (start_line, _) = file.line_col(span.start);
        let (end_line, _) = file.line_col(span.end);

        let (line_start, _) = file
            .line_range(start_line)
            .unwrap_or((span.start, span.start));
        let prefix = &file.source[line_start as usize..span.start as usize];

        if start_line == end_line {
            let (_, line_end) = file.line_range(end_line).unwrap_or((span.end, span.end));
            let snip = &file.source[span.start as usize..span.end as usize];
            let suffix = file.source[span.end as usize..line_end as usize].trim_end_matches('\n');
            format!("{}\u{300C}{}\u{300D}{}", prefix, snip, suffix)
        } else {
            let (_, first_line_end) = file
                .line_range(start_line)
                .unwrap_or((span.start, span.start));
            let snip = file.source[span.start as usize..first_line_end as usize]
                .trim_end_matches('\n');
            format!("{}\u{300C}{}...\u{22EF}", prefix, snip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sources() -> SourceMap {
        let mut sources = SourceMap::new();
        sources.add_file("test.kdl", "kind Pod {\n  spec: Spec,\n}\n");
        sources
    }

    #[test]
    fn test_error_flips_flags() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        assert!(!ctx.had_error());

        ctx.describe("kind").error_at("boom");
        assert!(ctx.had_error());
        assert!(sink.had_error());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_file_scope_isolates_had_error() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);

        let file_a = ctx.file_scope();
        file_a.error_at("bad file");
        assert!(file_a.had_error());

        let file_b = ctx.file_scope();
        assert!(!file_b.had_error());
        // the run as a whole still failed
        assert!(sink.had_error());
    }

    #[test]
    fn test_derivation_does_not_mutate_parent() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let child = ctx.describe("kind").note("name", "Pod");
        child.error_at("from child");

        // parent context records without the child's frames
        ctx.error_at("from parent");

        let diags = sink.take();
        assert_eq!(diags.len(), 2);
        let formatter_src = test_sources();
        let fmt = DiagnosticFormatter::new(&formatter_src);
        assert!(fmt.format(&diags[0]).contains("...in kind, name=\"Pod\""));
        assert!(!fmt.format(&diags[1]).contains("...in kind"));
    }

    #[test]
    fn test_render_with_span_and_snippet() {
        let sources = test_sources();
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);

        // "Pod" is at bytes 5..8 on line 1
        let span = Span::new(0, 5, 8);
        ctx.describe("kind")
            .note("name", "Pod")
            .in_span(span)
            .error_at("unresolvable identifier");

        let diags = sink.take();
        let rendered = DiagnosticFormatter::new(&sources).format(&diags[0]);
        assert!(rendered.starts_with("Error: unresolvable identifier\n"));
        assert!(rendered.contains("...in kind, name=\"Pod\" @ [1:6, 1:9]"));
        assert!(rendered.contains("kind \u{300C}Pod\u{300D} {"));
    }

    #[test]
    fn test_chunks_oldest_first() {
        let sources = test_sources();
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);

        ctx.describe("group-version")
            .describe("kind")
            .describe("field")
            .error_at("boom");

        let rendered = DiagnosticFormatter::new(&sources).format(&sink.take()[0]);
        let gv = rendered.find("...in group-version").unwrap();
        let kind = rendered.find("...in kind").unwrap();
        let field = rendered.find("...in field").unwrap();
        assert!(gv < kind && kind < field);
    }

    #[test]
    fn test_primary_span_is_innermost() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        ctx.in_span(Span::new(0, 0, 2))
            .in_span(Span::new(0, 5, 8))
            .error_at("boom");
        assert_eq!(sink.take()[0].primary_span(), Some(Span::new(0, 5, 8)));
    }
}
