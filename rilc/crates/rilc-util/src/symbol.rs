//! Symbol module - String interning for efficient identifier handling.
//!
//! Identifiers and label names repeat constantly during compilation. The
//! interner stores each distinct string once; a [`Symbol`] is a 4-byte
//! handle into the table. Comparison and hashing of symbols are O(1).
//!
//! Interned strings live for the program's lifetime (they are leaked). This
//! is the usual compiler trade: total interned bytes are bounded by source
//! size, and `&'static str` access avoids lifetime plumbing through every
//! phase.
//!
//! # Examples
//!
//! ```
//! use rilc_util::symbol::Symbol;
//!
//! let a = Symbol::intern("println");
//! let b = Symbol::intern("println");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "println");
//! ```

use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

/// A compact handle to an interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    map: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.map.get(s) {
            return idx;
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let idx = self.strings.len() as u32;
        self.strings.push(leaked);
        self.map.insert(leaked, idx);
        idx
    }
}

fn interner() -> &'static Mutex<Interner> {
    static TABLE: OnceLock<Mutex<Interner>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Mutex::new(Interner {
            map: FxHashMap::default(),
            strings: Vec::new(),
        })
    })
}

impl Symbol {
    /// Intern a string, returning its stable handle.
    pub fn intern(s: &str) -> Symbol {
        let mut table = interner().lock().unwrap_or_else(|e| e.into_inner());
        Symbol(table.intern(s))
    }

    /// Resolve the symbol back to its string.
    pub fn as_str(&self) -> &'static str {
        let table = interner().lock().unwrap_or_else(|e| e.into_inner());
        table.strings[self.0 as usize]
    }

    /// Raw table index
    #[inline]
    pub fn index(&self) -> u32 {
        self.0
    }

    /// Case-insensitive comparison against another symbol.
    ///
    /// The shadow check compares names case-insensitively, so `Total` and
    /// `total` collide without an explicit `shadow` marker.
    pub fn eq_ignore_case(&self, other: Symbol) -> bool {
        self == &other || self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let a = Symbol::intern("alpha");
        let b = Symbol::intern("alpha");
        let c = Symbol::intern("beta");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_as_str_round_trip() {
        let s = Symbol::intern("round_trip");
        assert_eq!(s.as_str(), "round_trip");
    }

    #[test]
    fn test_case_insensitive_eq() {
        let a = Symbol::intern("Total");
        let b = Symbol::intern("total");
        assert_ne!(a, b);
        assert!(a.eq_ignore_case(b));
    }
}
