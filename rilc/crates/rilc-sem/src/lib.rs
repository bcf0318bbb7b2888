//! rilc-sem - Feature Analysis & Import Resolution
//!
//! ============================================================================
//! SEMANTIC PRE-PASS OVERVIEW
//! ============================================================================
//!
//! Ril is dynamically typed at runtime, so this phase is not a type checker
//! in the usual sense. It answers two questions before emission starts:
//!
//! 1. WHICH RUNTIME FEATURES does the program need?
//!    The code generator embeds helper routines (print formatting, arena
//!    allocation, channel machinery, CPU probes) directly as machine code.
//!    Embedding all of them in every binary would defeat the minimal-binary
//!    goal, so a pre-walk records exactly what is used and closes the
//!    implication graph (string concat => arenas => meta-arena init, ...).
//!
//! 2. WHAT DO AMBIGUOUS OPERATORS MEAN?
//!    `+` on two strings is concatenation; on numbers it is addition.
//!    The analyzer propagates literal types through assignment chains so
//!    the classification is known before the first byte is emitted.
//!
//! Import resolution also lives here: the dependency graph over source
//! files is built depth-first, cycles are compile errors (the cycle is
//! printed), and modules come back in dependency order for splicing.
//!
//! NAME/MUTABILITY CHECKS:
//! -----------------------
//! Undefined-name, immutable-write, and shadow-marker enforcement happen
//! in the code generator, which owns the scoped symbol environment; doing
//! them here would duplicate that structure. This split mirrors the
//! runtime's own rule: analysis decides *what to embed*, the generator
//! decides *whether the program is well-formed*.

pub mod analysis;
pub mod features;
pub mod imports;

pub use analysis::{Analyzer, ValueType};
pub use features::{Feature, FeatureSet};
pub use imports::{resolve_imports, ModuleSource};
