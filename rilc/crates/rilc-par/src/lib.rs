//! rilc-par - Parser (Syntactic Analyzer)
//!
//! ============================================================================
//! PARSING OVERVIEW
//! ============================================================================
//!
//! Recursive descent with one token of lookahead, plus a Pratt expression
//! core (see `expr.rs`) for the sixteen-level operator ladder. The output
//! is the AST defined in `ast.rs`: a `Program` is an ordered list of
//! top-level expressions and declarations.
//!
//! STATEMENT STRUCTURE:
//! --------------------
//! Newlines (and `;`) separate statements inside blocks. The lexer emits
//! newline tokens; the parser skips them between declarations and treats
//! them as terminators inside blocks. The last statement of a block is the
//! block's value.
//!
//! BRACE DISAMBIGUATION:
//! ---------------------
//! `{` opens one of three constructs: a map literal, a match expression,
//! or a statement block. The classifier in `brace.rs` scans the balanced
//! interior and decides at the first unambiguous token; see that module
//! for the exact rules. This is the only place the grammar needs more
//! than one token of lookahead.
//!
//! ERROR RECOVERY:
//! ---------------
//! Errors are reported through the diagnostic handler (E2xxx). At top
//! level the parser synchronizes at the next statement boundary and keeps
//! going, so one run can report several syntax errors. Inside an
//! expression the current statement is abandoned.

pub mod ast;
pub mod brace;
pub mod expr;

mod edge_cases;

pub use ast::{
    AsmVariant, BinOp, Expr, ExprKind, MatchArm, Program, TypeName, UnOp,
};

use rilc_lex::{Lexer, Token, TokenWithSpan};
use rilc_util::diagnostic::codes;
use rilc_util::{Handler, Span};

use crate::brace::BraceKind;

/// The Ril parser.
///
/// Owns the token buffer; keeps a reference to the source text so the
/// unsafe-asm raw bodies can be sliced out verbatim.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<TokenWithSpan>,
    pos: usize,
    handler: &'a Handler,
}

impl<'a> Parser<'a> {
    /// Create a parser over pre-lexed tokens.
    pub fn new(source: &'a str, tokens: Vec<TokenWithSpan>, handler: &'a Handler) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            handler,
        }
    }

    /// Lex and parse a whole source file.
    pub fn parse_source(source: &'a str, handler: &'a Handler) -> Program {
        let tokens = Lexer::tokenize(source, handler);
        Parser::new(source, tokens, handler).parse_program()
    }

    /// Parse the token stream into a program.
    ///
    /// Never panics; on error it reports, synchronizes at the next
    /// statement boundary, and continues.
    pub fn parse_program(&mut self) -> Program {
        let mut program = Vec::new();
        loop {
            self.skip_statement_separators();
            if self.check(&Token::Eof) {
                break;
            }
            match self.parse_statement() {
                Some(stmt) => program.push(stmt),
                None => self.synchronize(),
            }
        }
        program
    }

    // =========================================================================
    // TOKEN PLUMBING
    // =========================================================================

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    pub(crate) fn peek_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    pub(crate) fn advance(&mut self) -> TokenWithSpan {
        let tws = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tws
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    /// Consume the token iff it matches.
    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a required token or report an E2001.
    pub(crate) fn expect(&mut self, token: &Token, context: &str) -> Option<TokenWithSpan> {
        if self.check(token) {
            Some(self.advance())
        } else {
            self.error_here(format!(
                "expected {:?} {}, found {:?}",
                token,
                context,
                self.peek()
            ));
            None
        }
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    fn skip_statement_separators(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    /// True when the current token is the first on its line (preceded by a
    /// newline or an opening brace). Decides whether `|` introduces a
    /// guard arm or is the pipe operator.
    pub(crate) fn at_line_start(&self) -> bool {
        if self.pos == 0 {
            return true;
        }
        matches!(
            self.tokens[self.pos - 1].token,
            Token::Newline | Token::LBrace | Token::Semicolon
        )
    }

    pub(crate) fn error_here(&self, message: String) {
        self.handler
            .error(codes::E_PAR_UNEXPECTED_TOKEN, message, self.peek_span());
    }

    /// Skip tokens until a statement boundary, balancing brackets so a
    /// malformed nested construct does not desynchronize the whole file.
    fn synchronize(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::LBrace | Token::LParen | Token::LBracket => depth += 1,
                Token::RBrace | Token::RParen | Token::RBracket => {
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                    depth -= 1;
                }
                Token::Newline | Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // =========================================================================
    // STATEMENTS AND DECLARATIONS
    // =========================================================================

    pub(crate) fn parse_statement(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        match self.peek() {
            Token::Import => self.parse_import(),
            Token::Defer => {
                self.advance();
                let action = self.parse_expr()?;
                let full = span.to(action.span);
                Some(Expr::new(ExprKind::Defer(Box::new(action)), full))
            }
            Token::Break => {
                self.advance();
                let depth = self.parse_loop_depth();
                Some(Expr::new(ExprKind::Break { depth }, span))
            }
            Token::Continue => {
                self.advance();
                let depth = self.parse_loop_depth();
                Some(Expr::new(ExprKind::Continue { depth }, span))
            }
            Token::Return => {
                self.advance();
                let value = if self.peek().is_statement_end() || self.check(&Token::RBrace) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                Some(Expr::new(ExprKind::Return(value), span))
            }
            Token::Shadow => self.parse_assignment(true, false),
            Token::Pure => self.parse_assignment(false, true),
            Token::Ident(_)
                if matches!(self.peek_at(1), Token::Assign | Token::Walrus) =>
            {
                self.parse_assignment(false, false)
            }
            _ => self.parse_expr(),
        }
    }

    fn parse_loop_depth(&mut self) -> u32 {
        if let Token::Int(n) = *self.peek() {
            if n >= 1 {
                self.advance();
                return n as u32;
            }
        }
        1
    }

    fn parse_import(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        self.advance();
        match self.peek().clone() {
            Token::Str(path) => {
                let end = self.peek_span();
                self.advance();
                Some(Expr::new(ExprKind::Import { path }, span.to(end)))
            }
            other => {
                self.error_here(format!("expected string path after 'import', found {:?}", other));
                None
            }
        }
    }

    /// `name = expr`, `name := expr`, `shadow name = expr`, `pure name = fn`.
    ///
    /// A bare brace block on the right-hand side is an implicit
    /// zero-argument lambda.
    fn parse_assignment(&mut self, shadow: bool, pure: bool) -> Option<Expr> {
        let span = self.peek_span();
        if shadow || pure {
            self.advance(); // the marker keyword
        }

        let name = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                name
            }
            other => {
                self.error_here(format!("expected a name to bind, found {:?}", other));
                return None;
            }
        };

        let mutable = match self.advance().token {
            Token::Assign => false,
            Token::Walrus => true,
            other => {
                self.error_here(format!("expected '=' or ':=' after name, found {:?}", other));
                return None;
            }
        };

        let mut value = self.parse_expr()?;

        // Implicit zero-argument lambda: `work = { ... }`
        if matches!(value.kind, ExprKind::Block(_)) {
            let vspan = value.span;
            value = Expr::new(
                ExprKind::Lambda {
                    params: Vec::new(),
                    body: Box::new(value),
                    pure,
                },
                vspan,
            );
        } else if pure {
            match value.kind {
                ExprKind::Lambda { params, body, .. } => {
                    let vspan = value.span;
                    value = Expr::new(
                        ExprKind::Lambda {
                            params,
                            body,
                            pure: true,
                        },
                        vspan,
                    );
                }
                _ => {
                    self.handler.error(
                        codes::E_PAR_MALFORMED_CONSTRUCT,
                        "'pure' marks a function binding; the value is not a function",
                        span,
                    );
                }
            }
        }

        let full = span.to(value.span);
        Some(Expr::new(
            ExprKind::Assign {
                name,
                value: Box::new(value),
                mutable,
                shadow,
            },
            full,
        ))
    }

    // =========================================================================
    // BRACED CONSTRUCTS (map / match / block)
    // =========================================================================

    /// Parse a braced construct starting at the current `{`.
    ///
    /// `scrutinee` carries the already-parsed expression when the brace
    /// follows a value in match position.
    pub(crate) fn parse_braced(&mut self, scrutinee: Option<Expr>) -> Option<Expr> {
        let open_span = self.peek_span();
        let kind = brace::classify(&self.tokens, self.pos);
        self.expect(&Token::LBrace, "to open construct")?;

        match kind {
            BraceKind::Map => self.parse_map_literal(open_span),
            BraceKind::Match => self.parse_match(scrutinee, open_span),
            BraceKind::Block => {
                if let Some(scrut) = scrutinee {
                    // A block cannot follow a value; the caller only asks
                    // for a scrutinee position when the classifier saw a
                    // match, so this is unreachable in practice.
                    self.handler.error(
                        codes::E_PAR_MALFORMED_CONSTRUCT,
                        "expected match arms after scrutinee",
                        scrut.span,
                    );
                    return None;
                }
                self.parse_block_body(open_span)
            }
        }
    }

    fn parse_map_literal(&mut self, open_span: Span) -> Option<Expr> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBrace) {
                break;
            }
            let key = self.parse_expr()?;
            self.expect(&Token::Colon, "between map key and value")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.skip_newlines();
        let close = self.expect(&Token::RBrace, "to close map literal")?;
        Some(Expr::new(ExprKind::Map(entries), open_span.to(close.span)))
    }

    fn parse_match(&mut self, scrutinee: Option<Expr>, open_span: Span) -> Option<Expr> {
        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBrace) {
                break;
            }
            let arm_span = self.peek_span();

            // `~>` introduces the fallthrough (default) arm.
            if self.eat(&Token::SquigArrow) {
                let body = self.parse_expr()?;
                arms.push(MatchArm {
                    pattern: None,
                    body,
                    span: arm_span,
                });
                continue;
            }

            // A `|` at line start introduces a guard arm.
            if self.check(&Token::Pipe) && self.at_line_start() {
                self.advance();
            }

            let pattern = self.parse_expr()?;
            self.expect(&Token::FatArrow, "after match pattern")?;
            let body = self.parse_expr()?;
            arms.push(MatchArm {
                pattern: Some(pattern),
                body,
                span: arm_span,
            });
        }
        let close = self.expect(&Token::RBrace, "to close match")?;

        if arms.is_empty() {
            self.handler.error(
                codes::E_PAR_MALFORMED_CONSTRUCT,
                "match expression has no arms",
                open_span,
            );
            return None;
        }

        Some(Expr::new(
            ExprKind::Match {
                scrutinee: scrutinee.map(Box::new),
                arms,
            },
            open_span.to(close.span),
        ))
    }

    fn parse_block_body(&mut self, open_span: Span) -> Option<Expr> {
        let mut stmts = Vec::new();
        loop {
            self.skip_statement_separators_in_block();
            if self.check(&Token::RBrace) || self.check(&Token::Eof) {
                break;
            }
            match self.parse_statement() {
                Some(stmt) => stmts.push(stmt),
                None => return None,
            }
            if !self.check(&Token::RBrace) && !self.peek().is_statement_end() {
                self.error_here(format!(
                    "expected newline or ';' between statements, found {:?}",
                    self.peek()
                ));
                return None;
            }
        }
        let close = self.expect(&Token::RBrace, "to close block")?;
        Some(Expr::new(ExprKind::Block(stmts), open_span.to(close.span)))
    }

    fn skip_statement_separators_in_block(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    // =========================================================================
    // LOOPS
    // =========================================================================

    /// `@ i in iterable [max bound] { body }` — `@@` for the parallel form.
    pub(crate) fn parse_loop(&mut self, parallel: bool) -> Option<Expr> {
        let span = self.peek_span();
        self.advance(); // `@` or `@@`

        let binding = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };

        if binding.is_some() {
            self.expect(&Token::In, "after loop variable")?;
        }

        // The iterable must stop before the body brace, so value-match
        // postfix is disabled here.
        let iter = self.parse_expr_no_brace()?;

        let bound = if self.eat(&Token::Max) {
            Some(Box::new(self.parse_expr_no_brace()?))
        } else {
            None
        };

        if !self.check(&Token::LBrace) {
            self.error_here(format!("expected '{{' to open loop body, found {:?}", self.peek()));
            return None;
        }
        let open = self.peek_span();
        self.expect(&Token::LBrace, "to open loop body")?;
        let body = self.parse_block_body(open)?;

        let full = span.to(body.span);
        Some(Expr::new(
            ExprKind::Loop {
                binding,
                iter: Box::new(iter),
                body: Box::new(body),
                parallel,
                bound,
            },
            full,
        ))
    }

    // =========================================================================
    // UNSAFE ASSEMBLY BLOCKS
    // =========================================================================

    /// `unsafe { x86_64 { ... } arm64 { ... } riscv64 { ... } }`
    ///
    /// Variant bodies are captured as raw source lines; each backend's
    /// sub-assembler owns its own grammar.
    pub(crate) fn parse_unsafe(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        self.advance(); // `unsafe`
        self.expect(&Token::LBrace, "to open unsafe block")?;

        let mut variants = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBrace) {
                break;
            }
            let isa_span = self.peek_span();
            let isa = match self.peek().clone() {
                Token::Ident(name) => {
                    self.advance();
                    name
                }
                other => {
                    self.error_here(format!(
                        "expected ISA name (x86_64, arm64, riscv64) in unsafe block, found {:?}",
                        other
                    ));
                    return None;
                }
            };

            let body_open = self.peek_span();
            self.expect(&Token::LBrace, "to open ISA variant")?;
            let raw = self.capture_raw_until_close(body_open)?;
            let lines = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            variants.push(AsmVariant {
                isa,
                lines,
                span: isa_span,
            });
        }

        let close = self.expect(&Token::RBrace, "to close unsafe block")?;
        if variants.is_empty() {
            self.handler.error(
                codes::E_PAR_MALFORMED_CONSTRUCT,
                "unsafe block has no ISA variants",
                span,
            );
            return None;
        }
        Some(Expr::new(
            ExprKind::UnsafeAsm(variants),
            span.to(close.span),
        ))
    }

    /// Consume tokens up to the matching `}` and return the raw source
    /// text in between. The opening brace has already been consumed.
    fn capture_raw_until_close(&mut self, open_span: Span) -> Option<String> {
        let start = open_span.end;
        let mut depth = 0u32;
        loop {
            match self.peek() {
                Token::Eof => {
                    self.handler.error(
                        codes::E_PAR_UNBALANCED_BRACKETS,
                        "unterminated unsafe variant body",
                        open_span,
                    );
                    return None;
                }
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    if depth == 0 {
                        let end = self.peek_span().start;
                        self.advance();
                        return Some(self.source[start..end].to_string());
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.advance();
        }
    }
}

pub use brace::classify;
