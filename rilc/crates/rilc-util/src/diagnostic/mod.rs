//! Diagnostic module - Error and warning reporting infrastructure.
//!
//! Phases report problems through a [`Handler`]; the driver renders the
//! collected [`Diagnostic`]s against the [`SourceMap`](crate::SourceMap)
//! once the phase finishes. A phase never prints directly.
//!
//! # Examples
//!
//! ```
//! use rilc_util::diagnostic::{Handler, codes};
//! use rilc_util::Span;
//!
//! let handler = Handler::new();
//! handler.error(codes::E_PAR_UNEXPECTED_TOKEN, "unexpected token", Span::DUMMY);
//! assert!(handler.has_errors());
//! ```

pub mod codes;

pub use codes::DiagnosticCode;

use std::cell::RefCell;
use std::fmt;

use crate::span::{SourceMap, Span};

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that prevents compilation
    Error,
    /// A warning that doesn't prevent compilation
    Warning,
    /// Additional information about a diagnostic
    Note,
    /// A suggestion for fixing an issue
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
        }
    }
}

/// A diagnostic message with severity and location
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Diagnostic severity level
    pub level: Level,
    /// Main diagnostic message
    pub message: String,
    /// Source location
    pub span: Span,
    /// Diagnostic code
    pub code: Option<DiagnosticCode>,
    /// Additional notes for context
    pub notes: Vec<String>,
    /// Help suggestions for fixing the issue
    pub helps: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            code: None,
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    /// Create a warning diagnostic
    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Warning, message, span)
    }

    /// Attach a diagnostic code
    pub fn with_code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attach a help suggestion
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.helps.push(help.into());
        self
    }
}

/// Collects diagnostics emitted during a compilation phase.
///
/// Interior mutability lets phases holding `&Handler` report errors without
/// threading `&mut` through every recursive call.
#[derive(Default)]
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Handler {
    /// Create an empty handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fully-built diagnostic
    pub fn emit(&self, diag: Diagnostic) {
        self.diagnostics.borrow_mut().push(diag);
    }

    /// Record an error with a code
    pub fn error(&self, code: DiagnosticCode, message: impl Into<String>, span: Span) {
        self.emit(Diagnostic::error(message, span).with_code(code));
    }

    /// Record a warning with a code
    pub fn warning(&self, code: DiagnosticCode, message: impl Into<String>, span: Span) {
        self.emit(Diagnostic::warning(message, span).with_code(code));
    }

    /// True if any error-level diagnostic was recorded
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == Level::Error)
    }

    /// Number of error-level diagnostics
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Error)
            .count()
    }

    /// Drain all collected diagnostics
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }

    /// The first error-level diagnostic, if any.
    ///
    /// The driver prints this one's position when aborting.
    pub fn first_error(&self) -> Option<Diagnostic> {
        self.diagnostics
            .borrow()
            .iter()
            .find(|d| d.level == Level::Error)
            .cloned()
    }

    /// Render every collected diagnostic to stderr against the source map.
    pub fn print_all(&self, map: &SourceMap) {
        for diag in self.diagnostics.borrow().iter() {
            eprintln!("{}", render(diag, map));
        }
    }
}

/// Format one diagnostic as the canonical `file:line:col: level[code]: msg`
/// line plus a source snippet with a caret when the span resolves.
/// Positionless diagnostics (post-pass and container failures carry the
/// dummy span) drop the location prefix instead of pointing at line 0.
pub fn render(diag: &Diagnostic, map: &SourceMap) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let positionless = diag.span.line == 0;
    if !positionless {
        let _ = write!(out, "{}: ", map.format_span(diag.span));
    }
    match diag.code {
        Some(code) => {
            let _ = write!(out, "{}[{}]: {}", diag.level, code, diag.message);
        }
        None => {
            let _ = write!(out, "{}: {}", diag.level, diag.message);
        }
    }

    if !positionless {
        if let Some(file) = map.file(diag.span.file_id) {
            if let Some(text) = file.line_text(diag.span.line) {
                let _ = write!(out, "\n  {}\n  ", text);
                for _ in 1..diag.span.column {
                    out.push(' ');
                }
                out.push('^');
            }
        }
    }

    for note in &diag.notes {
        let _ = write!(out, "\nnote: {}", note);
    }
    for help in &diag.helps {
        let _ = write!(out, "\nhelp: {}", help);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_counts_errors() {
        let handler = Handler::new();
        assert!(!handler.has_errors());
        handler.error(codes::E_LEX_UNKNOWN_CHAR, "bad char", Span::DUMMY);
        handler.warning(codes::W_LOOP_DEFAULT_BOUND, "bounded", Span::DUMMY);
        assert!(handler.has_errors());
        assert_eq!(handler.error_count(), 1);
    }

    #[test]
    fn test_first_error_skips_warnings() {
        let handler = Handler::new();
        handler.warning(codes::W_LOOP_DEFAULT_BOUND, "w", Span::DUMMY);
        handler.error(codes::E_SEM_UNDEFINED_NAME, "undefined", Span::DUMMY);
        let first = handler.first_error().unwrap();
        assert_eq!(first.message, "undefined");
    }

    #[test]
    fn test_render_includes_caret() {
        let mut map = SourceMap::new();
        let id = map.add_file("t.ril", "x = )\n");
        let span = Span::with_file(4, 5, id, 1, 5);
        let diag = Diagnostic::error("unexpected token", span)
            .with_code(codes::E_PAR_UNEXPECTED_TOKEN);
        let text = render(&diag, &map);
        assert!(text.contains("t.ril:1:5"));
        assert!(text.contains("    ^"));
    }

    #[test]
    fn test_render_positionless_drops_location() {
        let map = SourceMap::new();
        let diag = Diagnostic::error("unresolved symbol 'printf'", Span::DUMMY)
            .with_code(codes::E_OBJ_UNRESOLVED_SYMBOL);
        let text = render(&diag, &map);
        assert!(text.starts_with("error[E5003]"));
        assert!(!text.contains("0:0"));
    }
}
