//! Scoped symbol environment.
//!
//! A stack of scopes, innermost last. Name resolution walks outward;
//! binding enforces the mutable-by-exception discipline:
//!
//! - `=` creates an immutable binding; any later write is an error.
//! - `:=` creates a mutable stack slot; `<-` updates it.
//! - Re-binding a name visible in an enclosing scope requires the
//!   `shadow` marker. The collision check compares names
//!   case-insensitively, so `Total` cannot silently hide `total`.

use rilc_par::Expr;
use rilc_util::{Span, Symbol};
use rustc_hash::FxHashMap;

use crate::error::{CodeGenError, Result};

/// Where a binding's value lives.
#[derive(Clone, Debug)]
pub enum Storage {
    /// Stack slot index in the current frame
    Slot(u32),
    /// Offset into the data segment (top-level bindings)
    Global(u64),
    /// Directly callable function label (capture-free lambda)
    Function {
        label: String,
        n_params: usize,
        pure: bool,
    },
    /// Index into the enclosing closure's environment array
    Captured(u32),
}

/// One name binding.
#[derive(Clone, Debug)]
pub struct Binding {
    pub storage: Storage,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Default)]
struct Scope {
    names: FxHashMap<Symbol, Binding>,
}

/// The scope stack.
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the root scope");
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Resolve a name, innermost scope outward.
    pub fn lookup(&self, name: Symbol) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(&name))
    }

    /// True when the name (case-insensitively) is bound in any scope
    /// *outside* the innermost.
    fn hides_outer(&self, name: Symbol) -> bool {
        let needle = name.as_str();
        self.scopes[..self.scopes.len() - 1].iter().any(|scope| {
            scope
                .names
                .keys()
                .any(|k| k.as_str().eq_ignore_ascii_case(needle))
        })
    }

    /// Bind a name in the innermost scope.
    ///
    /// Enforces the shadow-marker rule and rejects same-scope re-binding
    /// of an immutable name (that is a write in disguise). A mutable
    /// re-bind in the same scope is an update and keeps the old slot.
    pub fn bind(
        &mut self,
        name: Symbol,
        binding: Binding,
        shadow_marked: bool,
        span: Span,
    ) -> Result<Option<Binding>> {
        let innermost = self.scopes.last().expect("scope stack never empty");
        if let Some(existing) = innermost.names.get(&name) {
            if !existing.mutable {
                return Err(CodeGenError::ImmutableWrite {
                    name: name.as_str().to_string(),
                    span,
                });
            }
            let old = existing.clone();
            return Ok(Some(old));
        }

        if !shadow_marked && self.hides_outer(name) {
            return Err(CodeGenError::ShadowWithoutMarker {
                name: name.as_str().to_string(),
                span,
            });
        }

        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .names
            .insert(name, binding);
        Ok(None)
    }

    /// Resolve the target of a `<-` update. The binding must exist and
    /// be mutable.
    pub fn update_target(&self, name: Symbol, span: Span) -> Result<&Binding> {
        let binding = self.lookup(name).ok_or_else(|| CodeGenError::UndefinedName {
            name: name.as_str().to_string(),
            span,
        })?;
        if !binding.mutable {
            return Err(CodeGenError::ImmutableWrite {
                name: name.as_str().to_string(),
                span,
            });
        }
        Ok(binding)
    }
}

/// A deferred action registered in a lexical scope.
///
/// The guard slot is set to 1 when control passes the `defer` statement;
/// exit paths run the action only when the guard is set, so a defer
/// inside a conditional arm fires only if it was reached.
#[derive(Clone)]
pub struct DeferEntry {
    pub action: Expr,
    pub guard_slot: u32,
}

/// Per-loop bookkeeping for break/continue and defer flushing.
pub struct LoopFrame {
    pub continue_label: String,
    pub break_label: String,
    /// Scope depth at loop entry, for unwinding defers on break
    pub scope_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: u32, mutable: bool) -> Binding {
        Binding {
            storage: Storage::Slot(i),
            mutable,
            span: Span::DUMMY,
        }
    }

    #[test]
    fn test_lookup_walks_outward() {
        let mut env = ScopeStack::new();
        let x = Symbol::intern("x");
        env.bind(x, slot(0, false), false, Span::DUMMY).unwrap();
        env.push();
        assert!(matches!(
            env.lookup(x).unwrap().storage,
            Storage::Slot(0)
        ));
    }

    #[test]
    fn test_shadow_requires_marker() {
        let mut env = ScopeStack::new();
        let x = Symbol::intern("x");
        env.bind(x, slot(0, false), false, Span::DUMMY).unwrap();
        env.push();
        let err = env.bind(x, slot(1, false), false, Span::DUMMY);
        assert!(matches!(
            err,
            Err(CodeGenError::ShadowWithoutMarker { .. })
        ));
        env.bind(x, slot(1, false), true, Span::DUMMY).unwrap();
        assert!(matches!(env.lookup(x).unwrap().storage, Storage::Slot(1)));
    }

    #[test]
    fn test_shadow_check_is_case_insensitive() {
        let mut env = ScopeStack::new();
        env.bind(Symbol::intern("total"), slot(0, false), false, Span::DUMMY)
            .unwrap();
        env.push();
        let err = env.bind(
            Symbol::intern("Total"),
            slot(1, false),
            false,
            Span::DUMMY,
        );
        assert!(matches!(
            err,
            Err(CodeGenError::ShadowWithoutMarker { .. })
        ));
    }

    #[test]
    fn test_immutable_rebind_rejected() {
        let mut env = ScopeStack::new();
        let x = Symbol::intern("x");
        env.bind(x, slot(0, false), false, Span::DUMMY).unwrap();
        let err = env.bind(x, slot(1, false), false, Span::DUMMY);
        assert!(matches!(err, Err(CodeGenError::ImmutableWrite { .. })));
    }

    #[test]
    fn test_mutable_rebind_keeps_slot() {
        let mut env = ScopeStack::new();
        let x = Symbol::intern("x");
        env.bind(x, slot(3, true), false, Span::DUMMY).unwrap();
        let old = env.bind(x, slot(9, true), false, Span::DUMMY).unwrap();
        assert!(old.is_some());
        assert!(matches!(env.lookup(x).unwrap().storage, Storage::Slot(3)));
    }

    #[test]
    fn test_update_immutable_rejected() {
        let mut env = ScopeStack::new();
        let x = Symbol::intern("x");
        env.bind(x, slot(0, false), false, Span::DUMMY).unwrap();
        assert!(matches!(
            env.update_target(x, Span::DUMMY),
            Err(CodeGenError::ImmutableWrite { .. })
        ));
    }

    #[test]
    fn test_update_undefined_rejected() {
        let env = ScopeStack::new();
        assert!(matches!(
            env.update_target(Symbol::intern("ghost"), Span::DUMMY),
            Err(CodeGenError::UndefinedName { .. })
        ));
    }
}
