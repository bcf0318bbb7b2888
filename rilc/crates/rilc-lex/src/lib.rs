//! rilc-lex - Lexical Analyzer
//!
//! ============================================================================
//! LEXING OVERVIEW
//! ============================================================================
//!
//! The lexer converts Ril source bytes into a finite stream of tagged tokens:
//! identifiers, integer and float literals, strings, operators, keywords,
//! delimiters, and statement-separating newlines.
//!
//! TOKEN CATEGORIES:
//! -----------------
//! - Literals: `42`, `0xFF`, `0b1010`, `3.14`, `1e-3`, `"text"`
//! - Identifiers: `[A-Za-z_][A-Za-z0-9_]*`
//! - Keywords: `and or not in shadow defer arena unsafe import pure max
//!   break continue return as`
//! - Operators, longest match first: `:= <- <= >= == != ..< .. ** => ~> <>
//!   || @@ << >>` plus the b-suffixed bitwise family `<<b >>b &b |b ^b ~b`
//! - Delimiters: `( ) { } [ ] , : ;` and newline
//!
//! GREEDY OPERATOR LEXING:
//! -----------------------
//! Each operator handler peeks before committing, so `..<` never splits
//! into `..` `<`, and `|b` (bitwise-or) never collides with `|` (pipe)
//! followed by an identifier starting with `b`.
//!
//! ERRORS:
//! -------
//! Lexical failures (unterminated string, invalid escape, unknown
//! character, malformed number) are reported through the diagnostic
//! [`Handler`](rilc_util::Handler) with E1xxx codes; the lexer emits an
//! `Invalid` token and continues so the parser can report more than one
//! problem per run.

pub mod cursor;
pub mod lexer;
pub mod token;

mod edge_cases;

pub use lexer::{Lexer, TokenWithSpan};
pub use token::{keyword_from_ident, Token};
