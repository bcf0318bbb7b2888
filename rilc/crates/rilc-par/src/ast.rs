//! rilc-par - AST Node Definitions
//!
//! This module contains all AST node definitions used by the parser. The
//! tree is owned (no sharing, no cycles) and lives for the whole
//! compilation; every node carries its source span.

use rilc_util::{Span, Symbol};

/// AST root - a source file is an ordered list of top-level expressions
/// and declarations.
pub type Program = Vec<Expr>;

/// An expression (or statement; Ril blocks treat the last statement as the
/// block's value, so the distinction is positional, not structural).
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Expression variants
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Numeric literal. All Ril numbers are f64 at runtime; integer
    /// literals are stored exactly for values within f64's integer range.
    Number(f64),

    /// String literal (cooked)
    Str(Symbol),

    /// List literal `[a, b, c]`
    List(Vec<Expr>),

    /// Map literal `{k: v, ...}`
    Map(Vec<(Expr, Expr)>),

    /// Identifier reference
    Ident(Symbol),

    /// Binary operation
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Unary operation
    Unary { op: UnOp, operand: Box<Expr> },

    /// Function call
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    /// Indexing `base[index]`
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },

    /// Field access `base.name`
    Field { base: Box<Expr>, name: Symbol },

    /// Lambda. `pure` marks memoizable functions.
    Lambda {
        params: Vec<Symbol>,
        body: Box<Expr>,
        pure: bool,
    },

    /// Match expression. `scrutinee` is `None` for a guard match, where
    /// every arm's pattern is a boolean guard.
    Match {
        scrutinee: Option<Box<Expr>>,
        arms: Vec<MatchArm>,
    },

    /// Range `start..end` / `start..<end`
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },

    /// Loop `@ i in iter { body }` (`parallel` for `@@`). `bound` is the
    /// explicit `max` clause when present.
    Loop {
        binding: Option<Symbol>,
        iter: Box<Expr>,
        body: Box<Expr>,
        parallel: bool,
        bound: Option<Box<Expr>>,
    },

    /// Statement block; the last statement is the block's value
    Block(Vec<Expr>),

    /// Binding. `=` (immutable), `:=` (mutable), optionally `shadow`-marked.
    Assign {
        name: Symbol,
        value: Box<Expr>,
        mutable: bool,
        shadow: bool,
    },

    /// Mutable update `target <- value`
    Update {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// Deferred action, attached to the enclosing lexical scope
    Defer(Box<Expr>),

    /// `arena { body }`
    ArenaBlock(Box<Expr>),

    /// `unsafe { isa { ... } ... }` with one variant per supported ISA
    UnsafeAsm(Vec<AsmVariant>),

    /// `import "path"`
    Import { path: Symbol },

    /// `value as type`
    Cast {
        value: Box<Expr>,
        ty: TypeName,
    },

    /// `break` with loop depth (1 = innermost)
    Break { depth: u32 },

    /// `continue` with loop depth (1 = innermost)
    Continue { depth: u32 },

    /// `return [value]`
    Return(Option<Box<Expr>>),
}

/// One arm of a match expression. `pattern` is `None` for the `~>`
/// fallthrough arm.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Option<Expr>,
    pub body: Expr,
    pub span: Span,
}

/// One per-ISA variant of an unsafe block. The body is kept as raw source
/// lines; the backend's sub-assembler parses its own grammar.
#[derive(Debug, Clone)]
pub struct AsmVariant {
    pub isa: Symbol,
    pub lines: Vec<String>,
    pub span: Span,
}

/// Type annotation names accepted by `as`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Number,
    Str,
    List,
    Map,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `%%` floored modulo
    FloorRem,
    /// `**` power (right-associative)
    Pow,

    // Bitwise (b-suffixed)
    ShlB,
    ShrB,
    AndB,
    OrB,
    XorB,

    // Comparison (non-associative)
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `in` membership
    In,

    // Logical
    And,
    Or,
    /// `or!` error unwrap with fallback
    OrUnwrap,

    // Data flow
    /// `|` pipe
    Pipe,
    /// `||` parallel pipe
    ParPipe,
    /// `<>` composition (right-associative)
    Compose,
    /// `<<` channel send
    Send,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Neg,
    Not,
    /// `~b` bitwise not
    BitNot,
    /// `#` length
    Len,
    /// `>>` channel receive
    Recv,
}

impl BinOp {
    /// True for the six comparison operators plus `in`; these are
    /// non-associative and may not chain.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::In
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_classification() {
        assert!(BinOp::Le.is_comparison());
        assert!(BinOp::In.is_comparison());
        assert!(!BinOp::Add.is_comparison());
        assert!(!BinOp::Pipe.is_comparison());
    }
}
