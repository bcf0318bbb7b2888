//! Runtime feature tracking.
//!
//! The code generator embeds runtime helpers (print routines, arena
//! allocator, channel machinery, ...) directly into the text buffer. The
//! feature set decides which helpers and init sequences are required, so
//! a trivial program carries none of them.
//!
//! Features imply each other along a fixed dependency graph; after the
//! analyzer's walk, [`FeatureSet::close`] propagates implications to a
//! fixpoint (string concatenation needs arenas, arenas need the
//! meta-arena initializer, SIMD needs the cpuid probe, ...).

use indexmap::IndexSet;

/// One runtime capability the emitted program may need.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Meta-arena array + bump allocator
    Arenas,
    /// String concatenation helper
    StringConcat,
    /// print/println formatting routines
    Printf,
    /// String to NUL-terminated C string conversion
    StringToCstr,
    /// SIMD vector paths
    Simd,
    /// Fused multiply-add paths
    Fma,
    /// CPU feature probe at startup
    Cpuid,
    /// Exit-status formatting of a trailing bare expression
    ExitFormat,
    /// List concatenation helper
    ListConcat,
    /// Channel create/send/receive machinery
    Channels,
    /// fork-based parallel loop workers
    Fork,
}

impl Feature {
    /// Features directly implied by this one.
    fn implies(&self) -> &'static [Feature] {
        match self {
            Feature::StringConcat => &[Feature::Arenas],
            Feature::ListConcat => &[Feature::Arenas],
            Feature::Printf => &[Feature::StringToCstr],
            Feature::Simd => &[Feature::Cpuid],
            Feature::Fma => &[Feature::Cpuid],
            Feature::Channels => &[Feature::Arenas],
            _ => &[],
        }
    }
}

/// The set of features a program requires.
///
/// Insertion order is preserved so helper emission and diagnostics are
/// deterministic across runs.
#[derive(Default, Debug, Clone)]
pub struct FeatureSet {
    set: IndexSet<Feature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a feature as required.
    pub fn insert(&mut self, feature: Feature) {
        self.set.insert(feature);
    }

    /// Is the feature required?
    pub fn contains(&self, feature: Feature) -> bool {
        self.set.contains(&feature)
    }

    /// Propagate implications until nothing changes.
    pub fn close(&mut self) {
        loop {
            let mut added = Vec::new();
            for feature in &self.set {
                for implied in feature.implies() {
                    if !self.set.contains(implied) {
                        added.push(*implied);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            for feature in added {
                self.set.insert(feature);
            }
        }
    }

    /// Iterate required features in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.set.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_string_concat() {
        let mut f = FeatureSet::new();
        f.insert(Feature::StringConcat);
        f.close();
        assert!(f.contains(Feature::Arenas));
    }

    #[test]
    fn test_closure_simd_needs_cpuid() {
        let mut f = FeatureSet::new();
        f.insert(Feature::Simd);
        f.insert(Feature::Fma);
        f.close();
        assert!(f.contains(Feature::Cpuid));
    }

    #[test]
    fn test_closure_is_fixpoint() {
        let mut f = FeatureSet::new();
        f.insert(Feature::Printf);
        f.close();
        let before: Vec<_> = f.iter().collect();
        f.close();
        let after: Vec<_> = f.iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_program_needs_nothing() {
        let mut f = FeatureSet::new();
        f.close();
        assert!(f.is_empty());
    }
}
