//! rilc-util - Core Utilities and Foundation Types
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! This crate provides the foundation types shared by every phase of the rilc
//! compiler: source positions, the source map, string interning, and the
//! diagnostic infrastructure.
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. ZERO-COST ABSTRACTIONS
//!    Spans are small Copy structs; symbols are 4-byte handles. Nothing here
//!    should cost more than the hand-written equivalent.
//!
//! 2. SINGLE SOURCE OF TRUTH FOR POSITIONS
//!    Every token, AST node, and diagnostic carries a [`Span`]. The
//!    [`SourceMap`] owns file contents and resolves spans back to
//!    file/line/column for display.
//!
//! 3. ERRORS ARE DATA
//!    Phases report through the [`Handler`]; the driver decides how and when
//!    to print. A phase never writes to stderr itself.
//!
//! ============================================================================
//! STRING INTERNING
//! ============================================================================
//!
//! Identifiers repeat constantly in source code (`x`, `i`, `println`, ...).
//! The interner stores each distinct string once and hands out a [`Symbol`],
//! a `u32` index. Symbol comparison is integer comparison, and the label
//! tables in the code generator key off symbols rather than strings.
//!
//! The emitted-code side never sees symbols: label names crossing into the
//! object writer are resolved to `&str` at that boundary.

pub mod diagnostic;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, DiagnosticCode, Handler, Level};
pub use span::{FileId, SourceFile, SourceMap, Span};
pub use symbol::Symbol;
