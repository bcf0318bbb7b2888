//! Error types for code generation
//!
//! This module defines error types for the rilc-gen crate, providing
//! proper error handling instead of panics. Every variant maps onto the
//! stable diagnostic taxonomy: [`CodeGenError::code`] yields the E3xxx/
//! E4xxx code and [`CodeGenError::span`] the source position (DUMMY for
//! the post-pass failures that have no single site), so the driver can
//! surface these with the same `file:line:col` header and code tag the
//! lexer and parser use.

use rilc_util::diagnostic::codes;
use rilc_util::{DiagnosticCode, Span};
use thiserror::Error;

/// Error type for code generation
#[derive(Debug, Error)]
pub enum CodeGenError {
    /// Reference to a name with no binding in any enclosing scope
    #[error("undefined name '{name}'")]
    UndefinedName { name: String, span: Span },

    /// Operand types reject the operation
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String, span: Span },

    /// Assignment to an immutable (`=`) binding
    #[error("cannot assign to immutable binding '{name}'")]
    ImmutableWrite { name: String, span: Span },

    /// Rebinding a visible name without the `shadow` marker
    #[error("binding '{name}' hides an outer binding; add 'shadow'")]
    ShadowWithoutMarker { name: String, span: Span },

    /// A call patch whose target label was never defined
    #[error("unresolved call to '{target}'")]
    UnresolvedCall { target: String },

    /// A label defined twice
    #[error("label '{label}' defined twice")]
    LabelRedefinition { label: String },

    /// Branch displacement exceeds the instruction's range
    #[error("branch to '{target}' out of range for {isa} ({displacement:#x})")]
    BranchOutOfRange {
        target: String,
        isa: &'static str,
        displacement: i64,
    },

    /// Construct not expressible on the compile target
    #[error("unsupported on {target}: {message}")]
    UnsupportedForTarget { message: String, target: String },

    /// Malformed unsafe-block assembly
    #[error("bad assembly: {message}")]
    BadAssembly { message: String, span: Span },

    /// Internal error - indicates a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl CodeGenError {
    /// Source position of the failure. Post-pass failures (patch
    /// resolution, target capability) have no single site and report the
    /// dummy span.
    pub fn span(&self) -> Span {
        match self {
            CodeGenError::UndefinedName { span, .. }
            | CodeGenError::TypeMismatch { span, .. }
            | CodeGenError::ImmutableWrite { span, .. }
            | CodeGenError::ShadowWithoutMarker { span, .. }
            | CodeGenError::BadAssembly { span, .. } => *span,
            _ => Span::DUMMY,
        }
    }

    /// The stable diagnostic code for this failure kind.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            CodeGenError::UndefinedName { .. } => codes::E_SEM_UNDEFINED_NAME,
            CodeGenError::TypeMismatch { .. } => codes::E_SEM_TYPE_MISMATCH,
            CodeGenError::ImmutableWrite { .. } => codes::E_SEM_IMMUTABLE_WRITE,
            CodeGenError::ShadowWithoutMarker { .. } => codes::E_SEM_SHADOW_WITHOUT_MARKER,
            CodeGenError::UnresolvedCall { .. } => codes::E_GEN_UNRESOLVED_CALL,
            CodeGenError::LabelRedefinition { .. } => codes::E_GEN_LABEL_REDEFINITION,
            CodeGenError::BranchOutOfRange { .. } => codes::E_GEN_BRANCH_OUT_OF_RANGE,
            CodeGenError::UnsupportedForTarget { .. } => codes::E_GEN_UNSUPPORTED_ON_TARGET,
            CodeGenError::BadAssembly { .. } => codes::E_GEN_BAD_ASSEMBLY,
            CodeGenError::Internal(_) => codes::E_INTERNAL,
        }
    }
}

/// Result type alias for code generation operations
pub type Result<T> = std::result::Result<T, CodeGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spanned_variants_keep_their_site() {
        let span = Span::new(4, 5, 2, 1);
        let err = CodeGenError::ImmutableWrite {
            name: "x".to_string(),
            span,
        };
        assert_eq!(err.span(), span);
        assert_eq!(err.code(), codes::E_SEM_IMMUTABLE_WRITE);
    }

    #[test]
    fn test_post_pass_variants_have_dummy_span() {
        let err = CodeGenError::UnresolvedCall {
            target: "f".to_string(),
        };
        assert_eq!(err.span(), Span::DUMMY);
        assert_eq!(err.code(), codes::E_GEN_UNRESOLVED_CALL);
    }

    #[test]
    fn test_code_covers_every_kind() {
        let span = Span::DUMMY;
        let cases: Vec<(CodeGenError, DiagnosticCode)> = vec![
            (
                CodeGenError::UndefinedName {
                    name: "g".into(),
                    span,
                },
                codes::E_SEM_UNDEFINED_NAME,
            ),
            (
                CodeGenError::TypeMismatch {
                    message: "m".into(),
                    span,
                },
                codes::E_SEM_TYPE_MISMATCH,
            ),
            (
                CodeGenError::ShadowWithoutMarker {
                    name: "n".into(),
                    span,
                },
                codes::E_SEM_SHADOW_WITHOUT_MARKER,
            ),
            (
                CodeGenError::LabelRedefinition { label: "l".into() },
                codes::E_GEN_LABEL_REDEFINITION,
            ),
            (
                CodeGenError::BranchOutOfRange {
                    target: "t".into(),
                    isa: "x86_64",
                    displacement: 1 << 40,
                },
                codes::E_GEN_BRANCH_OUT_OF_RANGE,
            ),
            (
                CodeGenError::UnsupportedForTarget {
                    message: "m".into(),
                    target: "riscv64-linux".into(),
                },
                codes::E_GEN_UNSUPPORTED_ON_TARGET,
            ),
            (
                CodeGenError::BadAssembly {
                    message: "m".into(),
                    span,
                },
                codes::E_GEN_BAD_ASSEMBLY,
            ),
            (
                CodeGenError::Internal("bug".into()),
                codes::E_INTERNAL,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{}", err);
        }
    }
}
