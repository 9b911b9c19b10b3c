//! Source location tracking for diagnostics and the CKDL source map.
//!
//! # Design
//!
//! - `Span` — compact byte-range reference into one source file
//! - `SourceMap` — registry of all source files in a compilation
//! - `SourceFile` — single file with a line-start index
//!
//! Every AST node, modifier, and doc section carries a `Span`; line/column
//! information is computed on demand from the `SourceMap` rather than
//! cached on the span itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact source location reference.
///
/// Points to a byte range in a source file registered with a [`SourceMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Index into `SourceMap` files.
    pub file_id: u16,
    /// Byte offset of the start position.
    pub start: u32,
    /// Byte offset of the end position (exclusive).
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u16, start: u32, end: u32) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    /// A zero-length span at the start of a file.
    pub fn zero(file_id: u16) -> Self {
        Self::new(file_id, 0, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Span covering both `self` and `other`.
    ///
    /// # Panics
    /// Panics if the spans are from different files.
    pub fn merge(&self, other: &Span) -> Span {
        assert_eq!(
            self.file_id, other.file_id,
            "cannot merge spans from different files"
        );
        Span {
            file_id: self.file_id,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Extend this span forward to the end of `other`.
    pub fn to(&self, other: &Span) -> Span {
        self.merge(other)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Collection of all source files in a compilation.
///
/// Converts [`Span`]s into human-readable locations and snippets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

/// A single source file with line indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Virtual path this file was loaded as.
    pub path: String,
    /// Original source text.
    pub source: String,
    /// Byte offsets of each line start; `line_starts[0]` is always 0, the
    /// last entry is an EOF sentinel.
    line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its ID.
    pub fn add_file(&mut self, path: impl Into<String>, source: impl Into<String>) -> u16 {
        let file_id = self.files.len();
        assert!(file_id < u16::MAX as usize, "too many source files");

        self.files.push(SourceFile::new(path.into(), source.into()));
        file_id as u16
    }

    pub fn file(&self, span: &Span) -> &SourceFile {
        &self.files[span.file_id as usize]
    }

    pub fn file_path(&self, span: &Span) -> &str {
        &self.files[span.file_id as usize].path
    }

    /// The exact source text a span covers.
    pub fn snippet(&self, span: &Span) -> &str {
        let file = &self.files[span.file_id as usize];
        &file.source[span.start as usize..span.end as usize]
    }

    /// The full text of a file by id.
    pub fn source_of(&self, file_id: u16) -> &str {
        &self.files[file_id as usize].source
    }

    /// 1-based (line, column) of the span's start.
    pub fn line_col(&self, span: &Span) -> (u32, u32) {
        self.files[span.file_id as usize].line_col(span.start)
    }

    /// 1-based (line, column) of the span's end.
    pub fn end_line_col(&self, span: &Span) -> (u32, u32) {
        self.files[span.file_id as usize].line_col(span.end)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl SourceFile {
    pub fn new(path: String, source: String) -> Self {
        let line_starts = compute_line_starts(&source);
        Self {
            path,
            source,
            line_starts,
        }
    }

    /// 1-based (line, column) for a byte offset.
    ///
    /// # Panics
    /// Panics if `offset` is beyond EOF.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        assert!(
            offset <= self.source.len() as u32,
            "offset {} is beyond EOF (len = {})",
            offset,
            self.source.len()
        );

        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };

        let line = (line_idx + 1) as u32;
        let col = (offset - self.line_starts[line_idx]) + 1;
        (line, col)
    }

    /// Byte range of a 1-based line, or `None` if out of bounds.
    pub fn line_range(&self, line: u32) -> Option<(u32, u32)> {
        if line == 0 || line as usize >= self.line_starts.len() {
            return None;
        }
        let line_idx = (line - 1) as usize;
        Some((self.line_starts[line_idx], self.line_starts[line_idx + 1]))
    }

    /// Text of a 1-based line, including its newline if present.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let (start, end) = self.line_range(line)?;
        Some(&self.source[start as usize..end as usize])
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut line_starts = vec![0];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push((idx + 1) as u32);
        }
    }
    if line_starts.last() != Some(&(source.len() as u32)) {
        line_starts.push(source.len() as u32);
    }
    line_starts
}
