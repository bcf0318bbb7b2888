//! Expression parsing using Pratt parsing (top-down operator precedence).
//!
//! # Operator precedence (tighter binds higher)
//!
//! | Level | Operators | Associativity |
//! |-------|-----------|---------------|
//! | 1 | postfix call, index, field, value-match | left |
//! | 2 | unary `+ - not ~b #` and receive `>>` | right |
//! | 3 | `**` | right |
//! | 4 | `* / % %%` | left |
//! | 5 | `+ -` | left |
//! | 6 | `<<b >>b` and channel send `<<` | left |
//! | 7 | `&b` | left |
//! | 8 | `^b` | left |
//! | 9 | `|b` | left |
//! | 10 | `== != < <= > >= in` | non-assoc |
//! | 11 | `and` | left |
//! | 12 | `or` `or!` | left |
//! | 13 | `|` `||` | left |
//! | 14 | `..` `..<` | non-assoc |
//! | 15 | `<>` | right |
//! | 16 | `<-` | right |
//!
//! `=` and `:=` bind names and are parsed at statement level (a binding
//! target is always a bare name); `<-` updates storage and participates in
//! the ladder. `as` casts sit above multiplication like every other
//! postfix-ish operator.

use rilc_lex::Token;
use rilc_util::diagnostic::codes;
use rilc_util::Symbol;

use crate::brace::{self, BraceKind};
use crate::{BinOp, Expr, ExprKind, Parser, TypeName, UnOp};

/// Binding power levels for Pratt parsing.
/// Higher numbers = tighter binding (higher precedence).
#[doc(hidden)]
pub mod bp {
    /// Minimum binding power (start of expression)
    pub const MIN: u8 = 0;

    /// Mutable update: `<-` (right-associative)
    pub const UPDATE: u8 = 2;

    /// Composition: `<>` (right-associative)
    pub const COMPOSE: u8 = 4;

    /// Ranges: `..`, `..<` (non-associative)
    pub const RANGE: u8 = 6;

    /// Pipes: `|`, `||`
    pub const PIPE: u8 = 8;

    /// Logical OR and error unwrap: `or`, `or!`
    pub const OR: u8 = 10;

    /// Logical AND: `and`
    pub const AND: u8 = 12;

    /// Comparison: `== != < <= > >= in` (non-associative)
    pub const COMPARISON: u8 = 14;

    /// Bitwise OR: `|b`
    pub const BITWISE_OR: u8 = 16;

    /// Bitwise XOR: `^b`
    pub const BITWISE_XOR: u8 = 18;

    /// Bitwise AND: `&b`
    pub const BITWISE_AND: u8 = 20;

    /// Shifts and channel send: `<<b >>b <<`
    pub const SHIFT: u8 = 22;

    /// Additive: `+ -`
    pub const ADDITIVE: u8 = 24;

    /// Multiplicative: `* / % %%`
    pub const MULTIPLICATIVE: u8 = 26;

    /// Power: `**` (right-associative)
    pub const POWER: u8 = 28;

    /// Cast: `as`
    pub const CAST: u8 = 30;

    /// Maximum binding power (for prefix operators)
    pub const UNARY: u8 = 32;
}

/// What an infix token means, with its binding powers.
enum Infix {
    Bin(BinOp, u8, u8),
    Range { inclusive: bool },
    Update,
    Cast,
}

fn infix_for(token: &Token) -> Option<Infix> {
    use bp::*;
    let infix = match token {
        Token::LeftArrow => Infix::Update,
        Token::Diamond => Infix::Bin(BinOp::Compose, COMPOSE, COMPOSE),
        Token::DotDot => Infix::Range { inclusive: true },
        Token::DotDotLt => Infix::Range { inclusive: false },
        Token::Pipe => Infix::Bin(BinOp::Pipe, PIPE, PIPE + 1),
        Token::PipePipe => Infix::Bin(BinOp::ParPipe, PIPE, PIPE + 1),
        Token::Or => Infix::Bin(BinOp::Or, OR, OR + 1),
        Token::OrBang => Infix::Bin(BinOp::OrUnwrap, OR, OR + 1),
        Token::And => Infix::Bin(BinOp::And, AND, AND + 1),
        Token::EqEq => Infix::Bin(BinOp::Eq, COMPARISON, COMPARISON + 1),
        Token::Ne => Infix::Bin(BinOp::Ne, COMPARISON, COMPARISON + 1),
        Token::Lt => Infix::Bin(BinOp::Lt, COMPARISON, COMPARISON + 1),
        Token::Le => Infix::Bin(BinOp::Le, COMPARISON, COMPARISON + 1),
        Token::Gt => Infix::Bin(BinOp::Gt, COMPARISON, COMPARISON + 1),
        Token::Ge => Infix::Bin(BinOp::Ge, COMPARISON, COMPARISON + 1),
        Token::In => Infix::Bin(BinOp::In, COMPARISON, COMPARISON + 1),
        Token::PipeB => Infix::Bin(BinOp::OrB, BITWISE_OR, BITWISE_OR + 1),
        Token::CaretB => Infix::Bin(BinOp::XorB, BITWISE_XOR, BITWISE_XOR + 1),
        Token::AmpB => Infix::Bin(BinOp::AndB, BITWISE_AND, BITWISE_AND + 1),
        Token::ShlB => Infix::Bin(BinOp::ShlB, SHIFT, SHIFT + 1),
        Token::ShrB => Infix::Bin(BinOp::ShrB, SHIFT, SHIFT + 1),
        Token::Shl => Infix::Bin(BinOp::Send, SHIFT, SHIFT + 1),
        Token::Plus => Infix::Bin(BinOp::Add, ADDITIVE, ADDITIVE + 1),
        Token::Minus => Infix::Bin(BinOp::Sub, ADDITIVE, ADDITIVE + 1),
        Token::Star => Infix::Bin(BinOp::Mul, MULTIPLICATIVE, MULTIPLICATIVE + 1),
        Token::Slash => Infix::Bin(BinOp::Div, MULTIPLICATIVE, MULTIPLICATIVE + 1),
        Token::Percent => Infix::Bin(BinOp::Rem, MULTIPLICATIVE, MULTIPLICATIVE + 1),
        Token::PercentPercent => {
            Infix::Bin(BinOp::FloorRem, MULTIPLICATIVE, MULTIPLICATIVE + 1)
        }
        Token::StarStar => Infix::Bin(BinOp::Pow, POWER, POWER),
        Token::As => Infix::Cast,
        _ => return None,
    };
    Some(infix)
}

fn left_bp(infix: &Infix) -> u8 {
    match infix {
        Infix::Bin(_, l, _) => *l,
        Infix::Range { .. } => bp::RANGE,
        Infix::Update => bp::UPDATE,
        Infix::Cast => bp::CAST,
    }
}

impl<'a> Parser<'a> {
    // =========================================================================
    // MAIN EXPRESSION ENTRY POINTS
    // =========================================================================

    /// Parse a complete expression.
    pub fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_expr_bp(bp::MIN, true)
    }

    /// Parse an expression that must stop before a `{`.
    ///
    /// Used for loop iterables, where the following brace is the loop
    /// body rather than a value match or map.
    pub fn parse_expr_no_brace(&mut self) -> Option<Expr> {
        self.parse_expr_bp(bp::MIN, false)
    }

    /// The Pratt core: parse an expression whose operators all bind at
    /// least as tightly as `min_bp`.
    fn parse_expr_bp(&mut self, min_bp: u8, allow_brace: bool) -> Option<Expr> {
        let mut lhs = self.parse_prefix(allow_brace)?;

        loop {
            let infix = match infix_for(self.peek()) {
                Some(infix) if left_bp(&infix) >= min_bp => infix,
                _ => break,
            };

            match infix {
                Infix::Bin(op, _, rbp) => {
                    if op.is_comparison() && Self::is_comparison_node(&lhs) {
                        self.handler_error_nonassoc("comparison");
                        return None;
                    }
                    self.advance();
                    let rhs = self.parse_expr_bp(rbp, allow_brace)?;
                    let span = lhs.span.to(rhs.span);
                    lhs = Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        span,
                    );
                }
                Infix::Range { inclusive } => {
                    if matches!(lhs.kind, ExprKind::Range { .. }) {
                        self.handler_error_nonassoc("range");
                        return None;
                    }
                    self.advance();
                    let rhs = self.parse_expr_bp(bp::RANGE + 1, allow_brace)?;
                    let span = lhs.span.to(rhs.span);
                    lhs = Expr::new(
                        ExprKind::Range {
                            start: Box::new(lhs),
                            end: Box::new(rhs),
                            inclusive,
                        },
                        span,
                    );
                }
                Infix::Update => {
                    self.advance();
                    let rhs = self.parse_expr_bp(bp::UPDATE, allow_brace)?;
                    let span = lhs.span.to(rhs.span);
                    lhs = Expr::new(
                        ExprKind::Update {
                            target: Box::new(lhs),
                            value: Box::new(rhs),
                        },
                        span,
                    );
                }
                Infix::Cast => {
                    self.advance();
                    let ty = self.parse_type_name()?;
                    let span = lhs.span;
                    lhs = Expr::new(
                        ExprKind::Cast {
                            value: Box::new(lhs),
                            ty,
                        },
                        span,
                    );
                }
            }
        }

        Some(lhs)
    }

    fn is_comparison_node(expr: &Expr) -> bool {
        matches!(
            &expr.kind,
            ExprKind::Binary { op, .. } if op.is_comparison()
        )
    }

    fn handler_error_nonassoc(&self, family: &str) {
        self.handler.error(
            codes::E_PAR_MALFORMED_CONSTRUCT,
            format!("{} operators are non-associative and cannot be chained", family),
            self.peek_span(),
        );
    }

    // =========================================================================
    // PREFIX / PRIMARY
    // =========================================================================

    fn parse_prefix(&mut self, allow_brace: bool) -> Option<Expr> {
        let span = self.peek_span();
        let unop = match self.peek() {
            Token::Plus => Some(UnOp::Plus),
            Token::Minus => Some(UnOp::Neg),
            Token::Not => Some(UnOp::Not),
            Token::TildeB => Some(UnOp::BitNot),
            Token::Hash => Some(UnOp::Len),
            Token::Shr => Some(UnOp::Recv),
            _ => None,
        };

        if let Some(op) = unop {
            self.advance();
            let operand = self.parse_expr_bp(bp::UNARY, allow_brace)?;
            let full = span.to(operand.span);
            return Some(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                full,
            ));
        }

        let primary = self.parse_primary(allow_brace)?;
        self.parse_postfix(primary, allow_brace)
    }

    fn parse_primary(&mut self, allow_brace: bool) -> Option<Expr> {
        let span = self.peek_span();
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Some(Expr::new(ExprKind::Number(n as f64), span))
            }
            Token::Float(v) => {
                self.advance();
                Some(Expr::new(ExprKind::Number(v), span))
            }
            Token::Str(s) => {
                self.advance();
                Some(Expr::new(ExprKind::Str(s), span))
            }
            Token::Ident(name) => {
                // `x => body` is a single-parameter lambda.
                if matches!(self.peek_at(1), Token::FatArrow | Token::Arrow) {
                    self.advance();
                    self.advance();
                    return self.parse_lambda_body(vec![name], span);
                }
                self.advance();
                Some(Expr::new(ExprKind::Ident(name), span))
            }
            Token::LParen => self.parse_paren_or_lambda(),
            Token::LBracket => self.parse_list_literal(),
            Token::LBrace if allow_brace => self.parse_braced(None),
            Token::At => self.parse_loop(false),
            Token::AtAt => self.parse_loop(true),
            Token::Arena => {
                self.advance();
                if !self.check(&Token::LBrace) {
                    self.error_here(format!(
                        "expected '{{' after 'arena', found {:?}",
                        self.peek()
                    ));
                    return None;
                }
                let body = self.parse_braced(None)?;
                let full = span.to(body.span);
                Some(Expr::new(ExprKind::ArenaBlock(Box::new(body)), full))
            }
            Token::Unsafe => self.parse_unsafe(),
            other => {
                self.error_here(format!("expected an expression, found {:?}", other));
                None
            }
        }
    }

    /// Either a parenthesized expression or a parenthesized lambda
    /// parameter list. Decided by scanning to the matching `)`.
    fn parse_paren_or_lambda(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        if self.paren_starts_lambda() {
            self.advance(); // `(`
            let mut params = Vec::new();
            loop {
                match self.peek().clone() {
                    Token::RParen => {
                        self.advance();
                        break;
                    }
                    Token::Ident(name) => {
                        self.advance();
                        params.push(name);
                        if !self.eat(&Token::Comma) && !self.check(&Token::RParen) {
                            self.error_here(format!(
                                "expected ',' or ')' in parameter list, found {:?}",
                                self.peek()
                            ));
                            return None;
                        }
                    }
                    other => {
                        self.error_here(format!(
                            "expected parameter name, found {:?}",
                            other
                        ));
                        return None;
                    }
                }
            }
            if !matches!(self.peek(), Token::FatArrow | Token::Arrow) {
                self.error_here(format!(
                    "expected '=>' after parameter list, found {:?}",
                    self.peek()
                ));
                return None;
            }
            self.advance();
            return self.parse_lambda_body(params, span);
        }

        self.advance(); // `(`
        self.skip_newlines();
        let inner = self.parse_expr_bp(bp::MIN, true)?;
        self.skip_newlines();
        self.expect(&Token::RParen, "to close parenthesized expression")?;
        Some(inner)
    }

    /// Look ahead from a `(`: is the matching `)` followed by `=>`/`->`?
    fn paren_starts_lambda(&self) -> bool {
        let mut depth = 0u32;
        let mut offset = 0usize;
        loop {
            match self.peek_at(offset) {
                Token::Eof => return false,
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return matches!(
                            self.peek_at(offset + 1),
                            Token::FatArrow | Token::Arrow
                        );
                    }
                }
                _ => {}
            }
            offset += 1;
        }
    }

    fn parse_lambda_body(&mut self, params: Vec<Symbol>, span: rilc_util::Span) -> Option<Expr> {
        let body = if self.check(&Token::LBrace) {
            self.parse_braced(None)?
        } else {
            self.parse_expr_bp(bp::COMPOSE, true)?
        };
        let full = span.to(body.span);
        Some(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
                pure: false,
            },
            full,
        ))
    }

    fn parse_list_literal(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        self.advance(); // `[`
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expr_bp(bp::MIN, true)?);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.skip_newlines();
        let close = self.expect(&Token::RBracket, "to close list literal")?;
        Some(Expr::new(ExprKind::List(items), span.to(close.span)))
    }

    fn parse_type_name(&mut self) -> Option<TypeName> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let ty = match name.as_str() {
                    "number" => TypeName::Number,
                    "str" => TypeName::Str,
                    "list" => TypeName::List,
                    "map" => TypeName::Map,
                    other => {
                        self.error_here(format!("unknown type name '{}'", other));
                        return None;
                    }
                };
                self.advance();
                Some(ty)
            }
            other => {
                self.error_here(format!("expected type name after 'as', found {:?}", other));
                None
            }
        }
    }

    // =========================================================================
    // POSTFIX: calls, indexing, fields, value match
    // =========================================================================

    fn parse_postfix(&mut self, mut expr: Expr, allow_brace: bool) -> Option<Expr> {
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    loop {
                        self.skip_newlines();
                        if self.check(&Token::RParen) {
                            break;
                        }
                        args.push(self.parse_expr_bp(bp::MIN, true)?);
                        self.skip_newlines();
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.skip_newlines();
                    let close = self.expect(&Token::RParen, "to close argument list")?;
                    let span = expr.span.to(close.span);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr_bp(bp::MIN, true)?;
                    let close = self.expect(&Token::RBracket, "to close index")?;
                    let span = expr.span.to(close.span);
                    expr = Expr::new(
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Token::Dot => {
                    self.advance();
                    match self.peek().clone() {
                        Token::Ident(name) => {
                            let nspan = self.peek_span();
                            self.advance();
                            let span = expr.span.to(nspan);
                            expr = Expr::new(
                                ExprKind::Field {
                                    base: Box::new(expr),
                                    name,
                                },
                                span,
                            );
                        }
                        other => {
                            self.error_here(format!(
                                "expected field name after '.', found {:?}",
                                other
                            ));
                            return None;
                        }
                    }
                }
                Token::LBrace if allow_brace => {
                    // A brace after a value is a match iff the classifier
                    // says so; a block here would be two statements.
                    if brace::classify(&self.tokens, self.pos) == BraceKind::Match {
                        expr = self.parse_braced(Some(expr))?;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        Some(expr)
    }
}
