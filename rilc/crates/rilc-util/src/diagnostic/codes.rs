//! Diagnostic codes.
//!
//! The failure taxonomy is a small closed set: E1xxx lexical, E2xxx
//! syntactic, E3xxx semantic, E4xxx emission, E5xxx container, Wxxxx
//! warnings. E9xxx marks internal compiler errors, outside the
//! user-facing taxonomy. Codes are stable across releases; messages are
//! not. Every phase error reaches the handler with its code attached:
//! lexer/parser report directly, and the driver maps `CodeGenError` /
//! `ObjError` variants through their `code()` accessors.

use std::fmt;

/// A stable diagnostic code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticCode {
    /// Numeric code
    pub number: u16,
    /// Short machine-readable name
    pub name: &'static str,
    /// True for warnings
    pub warning: bool,
}

impl DiagnosticCode {
    const fn error(number: u16, name: &'static str) -> Self {
        Self {
            number,
            name,
            warning: false,
        }
    }

    const fn warn(number: u16, name: &'static str) -> Self {
        Self {
            number,
            name,
            warning: true,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.warning {
            write!(f, "W{:04}", self.number)
        } else {
            write!(f, "E{:04}", self.number)
        }
    }
}

// Lexical
pub const E_LEX_UNTERMINATED_STRING: DiagnosticCode =
    DiagnosticCode::error(1001, "unterminated-string");
pub const E_LEX_INVALID_ESCAPE: DiagnosticCode = DiagnosticCode::error(1002, "invalid-escape");
pub const E_LEX_UNKNOWN_CHAR: DiagnosticCode = DiagnosticCode::error(1003, "unknown-character");
pub const E_LEX_MALFORMED_NUMBER: DiagnosticCode =
    DiagnosticCode::error(1004, "malformed-number");

// Syntactic
pub const E_PAR_UNEXPECTED_TOKEN: DiagnosticCode =
    DiagnosticCode::error(2001, "unexpected-token");
pub const E_PAR_UNBALANCED_BRACKETS: DiagnosticCode =
    DiagnosticCode::error(2002, "unbalanced-brackets");
pub const E_PAR_MALFORMED_CONSTRUCT: DiagnosticCode =
    DiagnosticCode::error(2003, "malformed-construct");

// Semantic
pub const E_SEM_UNDEFINED_NAME: DiagnosticCode = DiagnosticCode::error(3001, "undefined-name");
pub const E_SEM_IMMUTABLE_WRITE: DiagnosticCode =
    DiagnosticCode::error(3002, "immutable-write");
pub const E_SEM_SHADOW_WITHOUT_MARKER: DiagnosticCode =
    DiagnosticCode::error(3003, "shadow-without-marker");
pub const E_SEM_TYPE_MISMATCH: DiagnosticCode = DiagnosticCode::error(3004, "type-mismatch");
pub const E_SEM_CIRCULAR_IMPORT: DiagnosticCode =
    DiagnosticCode::error(3005, "circular-import");
pub const E_SEM_IMPORT_NOT_FOUND: DiagnosticCode =
    DiagnosticCode::error(3006, "import-not-found");

// Emission
pub const E_GEN_UNSUPPORTED_ON_TARGET: DiagnosticCode =
    DiagnosticCode::error(4001, "unsupported-feature-for-target");
pub const E_GEN_BRANCH_OUT_OF_RANGE: DiagnosticCode =
    DiagnosticCode::error(4002, "branch-out-of-range");
pub const E_GEN_UNRESOLVED_CALL: DiagnosticCode =
    DiagnosticCode::error(4003, "unresolved-call");
pub const E_GEN_LABEL_REDEFINITION: DiagnosticCode =
    DiagnosticCode::error(4004, "label-redefinition");
pub const E_GEN_BAD_ASSEMBLY: DiagnosticCode = DiagnosticCode::error(4005, "bad-assembly");

// Container
pub const E_OBJ_OVERSIZED_SEGMENT: DiagnosticCode =
    DiagnosticCode::error(5001, "oversized-segment");
pub const E_OBJ_MISSING_LIBRARY: DiagnosticCode =
    DiagnosticCode::error(5002, "missing-library");
pub const E_OBJ_UNRESOLVED_SYMBOL: DiagnosticCode =
    DiagnosticCode::error(5003, "unresolved-symbol");
pub const E_OBJ_RELOC_OUT_OF_RANGE: DiagnosticCode =
    DiagnosticCode::error(5004, "reloc-out-of-range");
pub const E_OBJ_UNSUPPORTED: DiagnosticCode =
    DiagnosticCode::error(5005, "unsupported-combination");

// Compiler bugs surface with a code outside the user-facing taxonomy
pub const E_INTERNAL: DiagnosticCode = DiagnosticCode::error(9001, "internal-error");

// Warnings
pub const W_LOOP_DEFAULT_BOUND: DiagnosticCode =
    DiagnosticCode::warn(4001, "loop-default-bound");
pub const W_COMPOSED_VALUE: DiagnosticCode = DiagnosticCode::warn(3002, "composed-value");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_display() {
        assert_eq!(format!("{}", E_SEM_IMMUTABLE_WRITE), "E3002");
        assert_eq!(format!("{}", W_LOOP_DEFAULT_BOUND), "W4001");
    }
}
