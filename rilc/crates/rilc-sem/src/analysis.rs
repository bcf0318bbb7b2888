//! Feature analysis pre-walk.
//!
//! Walks the AST before any code is emitted, propagating value types
//! through assignments so ambiguous operators can be classified (`+`
//! between two string-typed names is concatenation, not addition), and
//! recording which runtime features the program needs.
//!
//! The walk is conservative: an unknown type never suppresses a feature
//! that a known type would require, it only fails to add one. The code
//! generator re-checks operand types during emission and falls back to the
//! generic path for unknowns.

use rilc_par::{BinOp, Expr, ExprKind, Program, UnOp};
use rilc_util::Symbol;
use rustc_hash::FxHashMap;

use crate::features::{Feature, FeatureSet};

/// Statically propagated value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Number,
    Str,
    List,
    Map,
    Func,
    Unknown,
}

/// The feature analyzer.
///
/// Holds a flat symbol-type map: Ril bindings are function-local and the
/// analyzer only needs types for operator classification, so scope-precise
/// tracking is left to the code generator.
pub struct Analyzer {
    types: FxHashMap<Symbol, ValueType>,
    features: FeatureSet,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            types: FxHashMap::default(),
            features: FeatureSet::new(),
        }
    }

    /// Analyze a program and return its closed feature set.
    pub fn analyze(mut self, program: &Program) -> FeatureSet {
        for (i, expr) in program.iter().enumerate() {
            self.walk(expr);

            // A trailing bare expression becomes the process exit status
            // and needs the status formatting helper.
            let last = i == program.len() - 1;
            if last && self.produces_value(expr) {
                self.features.insert(Feature::ExitFormat);
            }
        }
        self.features.close();
        self.features
    }

    /// The static type of an expression, after propagation.
    pub fn type_of(&self, expr: &Expr) -> ValueType {
        match &expr.kind {
            ExprKind::Number(_) => ValueType::Number,
            ExprKind::Str(_) => ValueType::Str,
            ExprKind::List(_) => ValueType::List,
            ExprKind::Map(_) => ValueType::Map,
            ExprKind::Lambda { .. } => ValueType::Func,
            ExprKind::Ident(name) => {
                self.types.get(name).copied().unwrap_or(ValueType::Unknown)
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinOp::Add => {
                    let l = self.type_of(lhs);
                    let r = self.type_of(rhs);
                    if l == ValueType::Str && r == ValueType::Str {
                        ValueType::Str
                    } else if l == ValueType::List && r == ValueType::List {
                        ValueType::List
                    } else if l == ValueType::Number && r == ValueType::Number {
                        ValueType::Number
                    } else {
                        ValueType::Unknown
                    }
                }
                BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Rem
                | BinOp::FloorRem
                | BinOp::Pow
                | BinOp::ShlB
                | BinOp::ShrB
                | BinOp::AndB
                | BinOp::OrB
                | BinOp::XorB => ValueType::Number,
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::In
                | BinOp::And
                | BinOp::Or => ValueType::Number,
                _ => ValueType::Unknown,
            },
            ExprKind::Unary { op, .. } => match op {
                UnOp::Len | UnOp::Neg | UnOp::Plus | UnOp::Not | UnOp::BitNot => {
                    ValueType::Number
                }
                UnOp::Recv => ValueType::Unknown,
            },
            ExprKind::Range { .. } => ValueType::List,
            ExprKind::Cast { ty, .. } => match ty {
                rilc_par::TypeName::Number => ValueType::Number,
                rilc_par::TypeName::Str => ValueType::Str,
                rilc_par::TypeName::List => ValueType::List,
                rilc_par::TypeName::Map => ValueType::Map,
            },
            ExprKind::Block(stmts) => stmts
                .last()
                .map(|e| self.type_of(e))
                .unwrap_or(ValueType::Unknown),
            _ => ValueType::Unknown,
        }
    }

    fn walk(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::Ident(_) | ExprKind::Import { .. } => {}

            ExprKind::Str(_) => {}

            ExprKind::List(items) => {
                self.features.insert(Feature::Arenas);
                for item in items {
                    self.walk(item);
                }
            }

            ExprKind::Map(entries) => {
                self.features.insert(Feature::Arenas);
                for (k, v) in entries {
                    self.walk(k);
                    self.walk(v);
                }
            }

            ExprKind::Binary { op, lhs, rhs } => {
                self.walk(lhs);
                self.walk(rhs);
                match op {
                    BinOp::Add => {
                        let l = self.type_of(lhs);
                        let r = self.type_of(rhs);
                        if l == ValueType::Str || r == ValueType::Str {
                            self.features.insert(Feature::StringConcat);
                        }
                        if l == ValueType::List || r == ValueType::List {
                            self.features.insert(Feature::ListConcat);
                        }
                    }
                    BinOp::In => {
                        self.features.insert(Feature::Arenas);
                    }
                    BinOp::ParPipe => {
                        self.features.insert(Feature::Simd);
                        self.features.insert(Feature::Fork);
                    }
                    BinOp::Send => {
                        self.features.insert(Feature::Channels);
                    }
                    _ => {}
                }
            }

            ExprKind::Unary { op, operand } => {
                self.walk(operand);
                if *op == UnOp::Recv {
                    self.features.insert(Feature::Channels);
                }
            }

            ExprKind::Call { callee, args } => {
                self.walk(callee);
                for arg in args {
                    self.walk(arg);
                }
                if let ExprKind::Ident(name) = &callee.kind {
                    self.note_builtin_call(name.as_str(), args);
                }
            }

            ExprKind::Index { base, index } => {
                self.walk(base);
                self.walk(index);
            }

            ExprKind::Field { base, .. } => self.walk(base),

            ExprKind::Lambda { body, .. } => self.walk(body),

            ExprKind::Match { scrutinee, arms } => {
                if let Some(s) = scrutinee {
                    self.walk(s);
                }
                for arm in arms {
                    if let Some(p) = &arm.pattern {
                        self.walk(p);
                    }
                    self.walk(&arm.body);
                }
            }

            ExprKind::Range { start, end, .. } => {
                self.walk(start);
                self.walk(end);
            }

            ExprKind::Loop {
                iter,
                body,
                parallel,
                bound,
                ..
            } => {
                self.walk(iter);
                self.walk(body);
                if let Some(b) = bound {
                    self.walk(b);
                }
                if *parallel {
                    self.features.insert(Feature::Fork);
                }
            }

            ExprKind::Block(stmts) => {
                for stmt in stmts {
                    self.walk(stmt);
                }
            }

            ExprKind::Assign { name, value, .. } => {
                self.walk(value);
                let ty = self.type_of(value);
                self.types.insert(*name, ty);
            }

            ExprKind::Update { target, value } => {
                self.walk(target);
                self.walk(value);
                if let ExprKind::Ident(name) = &target.kind {
                    let ty = self.type_of(value);
                    self.types.insert(*name, ty);
                }
            }

            ExprKind::Defer(action) => self.walk(action),

            ExprKind::ArenaBlock(body) => {
                self.features.insert(Feature::Arenas);
                self.walk(body);
            }

            ExprKind::UnsafeAsm(_) => {}

            ExprKind::Cast { value, .. } => self.walk(value),

            ExprKind::Break { .. } | ExprKind::Continue { .. } => {}

            ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.walk(v);
                }
            }
        }
    }

    fn note_builtin_call(&mut self, name: &str, args: &[Expr]) {
        match name {
            "println" | "printf" | "print" => {
                self.features.insert(Feature::Printf);
                for arg in args {
                    if self.type_of(arg) == ValueType::Str {
                        self.features.insert(Feature::StringToCstr);
                    }
                }
            }
            "chan" | "send" | "recv" | "close" => {
                self.features.insert(Feature::Channels);
            }
            "fma" => {
                self.features.insert(Feature::Fma);
            }
            "simd_add" | "simd_mul" | "simd_sum" | "simd_broadcast" => {
                self.features.insert(Feature::Simd);
            }
            _ => {}
        }
    }

    /// True when a top-level statement leaves a value behind (rather than
    /// binding or importing).
    fn produces_value(&self, expr: &Expr) -> bool {
        !matches!(
            expr.kind,
            ExprKind::Assign { .. }
                | ExprKind::Import { .. }
                | ExprKind::Defer(_)
                | ExprKind::Update { .. }
        ) && self.type_of(expr) == ValueType::Number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_par::Parser;
    use rilc_util::Handler;

    fn features_of(source: &str) -> FeatureSet {
        let handler = Handler::new();
        let program = Parser::parse_source(source, &handler);
        assert!(!handler.has_errors(), "parse failed for {:?}", source);
        Analyzer::new().analyze(&program)
    }

    #[test]
    fn test_println_sets_printf() {
        let f = features_of("println(\"hi\")");
        assert!(f.contains(Feature::Printf));
        assert!(f.contains(Feature::StringToCstr));
    }

    #[test]
    fn test_plain_program_needs_nothing() {
        let f = features_of("x = 1 + 2");
        assert!(!f.contains(Feature::Printf));
        assert!(!f.contains(Feature::Arenas));
    }

    #[test]
    fn test_string_plus_string_is_concat() {
        let f = features_of("a = \"x\"\nc = \"y\"\nd = a + c");
        assert!(f.contains(Feature::StringConcat));
        assert!(f.contains(Feature::Arenas));
    }

    #[test]
    fn test_number_plus_number_is_not_concat() {
        let f = features_of("a = 1\nc = 2\nd = a + c");
        assert!(!f.contains(Feature::StringConcat));
    }

    #[test]
    fn test_list_literal_needs_arenas() {
        let f = features_of("xs = [1, 2, 3]");
        assert!(f.contains(Feature::Arenas));
    }

    #[test]
    fn test_list_concat() {
        let f = features_of("a = [1]\nc = [2]\nd = a + c");
        assert!(f.contains(Feature::ListConcat));
        assert!(f.contains(Feature::Arenas));
    }

    #[test]
    fn test_parallel_loop_features() {
        let f = features_of("@@ i in 0..<4 { f(i) }");
        assert!(f.contains(Feature::Fork));
    }

    #[test]
    fn test_channels() {
        let f = features_of("c = chan(8)\nc << 5\nx = >> c");
        assert!(f.contains(Feature::Channels));
    }

    #[test]
    fn test_fma_implies_cpuid() {
        let f = features_of("x = fma(a, c, d)");
        assert!(f.contains(Feature::Fma));
        assert!(f.contains(Feature::Cpuid));
    }

    #[test]
    fn test_exit_format_for_trailing_value() {
        let f = features_of("42");
        assert!(f.contains(Feature::ExitFormat));
    }

    #[test]
    fn test_type_propagation_through_chain() {
        // s2 inherits Str from s1 through the binding chain
        let f = features_of("s1 = \"a\"\ns2 = s1\nd = s2 + s2");
        assert!(f.contains(Feature::StringConcat));
    }
}
