//! Container writer errors.
//!
//! Container failures have no source position (they happen after all
//! code is emitted), but they keep stable diagnostic codes so the driver
//! reports them with the same `[E5xxx]` tags as every other phase.

use rilc_util::diagnostic::codes;
use rilc_util::{DiagnosticCode, Span};
use thiserror::Error;

/// Error type for container serialization
#[derive(Debug, Error)]
pub enum ObjError {
    /// A relocation references a symbol with no import slot
    #[error("unresolved symbol '{0}'")]
    UnresolvedSymbol(String),

    /// A segment exceeds what the container can express
    #[error("oversized segment: {name} is {size} bytes")]
    OversizedSegment { name: &'static str, size: usize },

    /// A relocation's displacement does not fit its field
    #[error("relocation out of range for '{0}'")]
    RelocOutOfRange(String),

    /// Target/container combination the writer cannot produce
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ObjError {
    /// Containers are serialized after emission ends; there is no source
    /// site to point at.
    pub fn span(&self) -> Span {
        Span::DUMMY
    }

    /// The stable diagnostic code for this failure kind.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            ObjError::UnresolvedSymbol(_) => codes::E_OBJ_UNRESOLVED_SYMBOL,
            ObjError::OversizedSegment { .. } => codes::E_OBJ_OVERSIZED_SEGMENT,
            ObjError::RelocOutOfRange(_) => codes::E_OBJ_RELOC_OUT_OF_RANGE,
            ObjError::Unsupported(_) => codes::E_OBJ_UNSUPPORTED,
        }
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ObjError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_per_kind() {
        assert_eq!(
            ObjError::UnresolvedSymbol("printf".into()).code(),
            codes::E_OBJ_UNRESOLVED_SYMBOL
        );
        assert_eq!(
            ObjError::OversizedSegment {
                name: "text",
                size: 1 << 40
            }
            .code(),
            codes::E_OBJ_OVERSIZED_SEGMENT
        );
        assert_eq!(
            ObjError::RelocOutOfRange("adrp".into()).code(),
            codes::E_OBJ_RELOC_OUT_OF_RANGE
        );
        assert_eq!(
            ObjError::Unsupported("no libSystem".into()).code(),
            codes::E_OBJ_UNSUPPORTED
        );
    }

    #[test]
    fn test_container_errors_are_positionless() {
        assert_eq!(
            ObjError::Unsupported("x".into()).span(),
            Span::DUMMY
        );
    }
}
