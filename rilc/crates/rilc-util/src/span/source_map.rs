//! Source map for managing source files and computing source locations.
//!
//! This module provides the [`SourceMap`] type for managing multiple source
//! files and computing line/column information from byte offsets.

use std::sync::Arc;

use super::{FileId, Span};

/// A source file with its content and metadata
#[derive(Clone)]
pub struct SourceFile {
    /// Unique file identifier
    id: FileId,
    /// File name (path or display name)
    name: String,
    /// File content
    content: Arc<str>,
    /// Precomputed line start offsets
    line_starts: Arc<[usize]>,
}

impl SourceFile {
    /// Create a new source file
    pub fn new(id: usize, name: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        let content = content.into();
        let line_starts = Self::compute_line_starts(&content);
        Self {
            id: FileId(id),
            name: name.into(),
            content,
            line_starts,
        }
    }

    /// Compute line start offsets from content
    fn compute_line_starts(content: &str) -> Arc<[usize]> {
        let mut line_starts = vec![0];
        for (i, ch) in content.char_indices() {
            if ch == '\n' {
                line_starts.push(i + 1);
            }
        }
        line_starts.into()
    }

    /// Get the file identifier
    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Get the file name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the file content
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Get the total number of lines
    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Convert a byte offset to 1-based (line, column) coordinates.
    ///
    /// Offsets past the end of the file clamp to the last line.
    pub fn lookup(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }

    /// Get the text of a 1-based line number, without its newline.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let idx = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(idx)?;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&e| e.saturating_sub(1))
            .unwrap_or(self.content.len());
        self.content.get(start..end)
    }
}

/// Manages all source files in a compilation session.
///
/// Files are registered once and addressed by [`FileId`] thereafter. The
/// diagnostic printer uses the map to render `file:line:column` prefixes
/// and source snippets.
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    /// Create an empty source map
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a file, returning its id
    pub fn add_file(&mut self, name: impl Into<String>, content: impl Into<Arc<str>>) -> FileId {
        let id = self.files.len();
        self.files.push(SourceFile::new(id, name, content));
        FileId(id)
    }

    /// Look up a file by id
    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0)
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files are registered
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Render a span as `name:line:column` for diagnostics.
    pub fn format_span(&self, span: Span) -> String {
        match self.file(span.file_id) {
            Some(f) => format!("{}:{}:{}", f.name(), span.line, span.column),
            None => format!("<unknown>:{}:{}", span.line, span.column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_line_col() {
        let file = SourceFile::new(0, "t.ril", "ab\ncde\nf");
        assert_eq!(file.lookup(0), (1, 1));
        assert_eq!(file.lookup(3), (2, 1));
        assert_eq!(file.lookup(5), (2, 3));
        assert_eq!(file.lookup(7), (3, 1));
    }

    #[test]
    fn test_line_text() {
        let file = SourceFile::new(0, "t.ril", "ab\ncde\nf");
        assert_eq!(file.line_text(1), Some("ab"));
        assert_eq!(file.line_text(2), Some("cde"));
        assert_eq!(file.line_text(3), Some("f"));
        assert_eq!(file.line_text(4), None);
    }

    #[test]
    fn test_source_map_format() {
        let mut map = SourceMap::new();
        let id = map.add_file("main.ril", "x = 1\n");
        let span = Span::with_file(0, 1, id, 1, 1);
        assert_eq!(map.format_span(span), "main.ril:1:1");
    }
}
