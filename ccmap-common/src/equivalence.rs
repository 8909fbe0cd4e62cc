//! # Equivalence
//!
//! Purpose: decouple "how two keys/values compare" and "how a key hashes"
//! from `Eq`/`Hash`, so weak/soft strengths can force identity comparison
//! without requiring callers' types to implement it themselves.
//!
//! Weak/soft strengths force identity equivalence for the side they apply
//! to; strong strengths use caller-provided or semantic-equality
//! equivalence.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A comparison + hashing strategy for one side (key or value) of the map.
///
/// `equivalent` must be consistent with `hash`: equivalent values must hash
/// identically, exactly as `Eq`/`Hash` requires.
pub trait Equivalence<T: ?Sized>: Send + Sync {
    fn equivalent(&self, a: &T, b: &T) -> bool;
    fn hash_of(&self, value: &T) -> u64;
}

/// Semantic equality via `Eq`/`Hash`. The default for `Strong` keys/values.
pub struct SemanticEquivalence;

impl<T: Eq + Hash + ?Sized> Equivalence<T> for SemanticEquivalence {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a == b
    }

    fn hash_of(&self, value: &T) -> u64 {
        let mut hasher = ahash::AHasher::default();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

/// Identity equality over a pointer address. Forced for `Weak`/`Soft`
/// strengths.
pub struct IdentityEquivalence;

impl<T> Equivalence<Arc<T>> for IdentityEquivalence {
    fn equivalent(&self, a: &Arc<T>, b: &Arc<T>) -> bool {
        Arc::ptr_eq(a, b)
    }

    fn hash_of(&self, value: &Arc<T>) -> u64 {
        let mut hasher = ahash::AHasher::default();
        (Arc::as_ptr(value) as usize).hash(&mut hasher);
        hasher.finish()
    }
}

/// A caller-supplied `(eq, hash)` pair, for types that need neither
/// `Eq`/`Hash` nor identity semantics.
pub struct FnEquivalence<T: ?Sized> {
    eq: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    hash: Box<dyn Fn(&T) -> u64 + Send + Sync>,
}

impl<T: ?Sized> FnEquivalence<T> {
    pub fn new(
        eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
        hash: impl Fn(&T) -> u64 + Send + Sync + 'static,
    ) -> Self {
        FnEquivalence {
            eq: Box::new(eq),
            hash: Box::new(hash),
        }
    }
}

impl<T: ?Sized> Equivalence<T> for FnEquivalence<T> {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        (self.eq)(a, b)
    }

    fn hash_of(&self, value: &T) -> u64 {
        (self.hash)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_equivalence_matches_eq() {
        let eq = SemanticEquivalence;
        assert!(eq.equivalent(&"a".to_string(), &"a".to_string()));
        assert!(!eq.equivalent(&"a".to_string(), &"b".to_string()));
        assert_eq!(eq.hash_of(&"a".to_string()), eq.hash_of(&"a".to_string()));
    }

    #[test]
    fn identity_equivalence_distinguishes_equal_but_distinct_arcs() {
        let eq = IdentityEquivalence;
        let a = Arc::new(42);
        let b = Arc::new(42);
        let c = Arc::clone(&a);
        assert!(!eq.equivalent(&a, &b));
        assert!(eq.equivalent(&a, &c));
    }

    #[test]
    fn fn_equivalence_uses_caller_closures() {
        // Case-insensitive string comparison, the kind of caller-supplied
        // equivalence `key_equivalence`/`value_equivalence` exist for.
        let eq = FnEquivalence::new(
            |a: &String, b: &String| a.to_lowercase() == b.to_lowercase(),
            |v: &String| v.to_lowercase().len() as u64,
        );
        assert!(eq.equivalent(&"Hello".to_string(), &"hello".to_string()));
        assert!(!eq.equivalent(&"Hello".to_string(), &"world".to_string()));
    }
}
