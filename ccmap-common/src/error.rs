//! # Error Types
//!
//! Purpose: Surface contract violations and computation failures to callers
//! without ever corrupting map state.
//!
//! ## Design Principles
//!
//! 1. **Fail Fast**: Contract violations (null keys/values, conflicting
//!    config) are reported at the offending call, not deferred.
//! 2. **No Silent Caching of Failure**: A loader failure is never stored in
//!    the map; it is delivered and then forgotten.
//! 3. **Opaque Causes**: Loader errors are boxed so this crate stays
//!    generic over whatever error type a caller's loader produces.

use std::fmt;
use std::sync::Arc;

/// Result alias used throughout the ccmap crates.
pub type CcmapResult<T> = Result<T, CcmapError>;

/// Errors surfaced across the public map/builder surface.
///
/// A reclaimed referent is deliberately absent here: it is observed
/// internally and treated as "not present," never propagated to a caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CcmapError {
    /// A caller passed a null/absent key where one is required.
    #[error("null key is not a valid map key")]
    NullKey,

    /// A caller passed a null/absent value where one is required.
    #[error("null value is not a valid map value")]
    NullValue,

    /// A builder option combination or value is invalid.
    ///
    /// Used for: soft keys requested (unsupported), a weak/soft strength
    /// paired with a custom equivalence that conflicts with the forced
    /// identity equivalence, a zero `concurrency_level`, etc.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// A loader invoked by `get_or_load` raised an error.
    ///
    /// Delivered synchronously to the initiating caller and to every
    /// concurrent waiter; never cached.
    #[error("computation failed: {0}")]
    ComputationFailed(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A loader returned a null/absent value.
    ///
    /// A specialization of `ComputationFailed` that callers may want to
    /// match on distinctly; never cached either.
    #[error("loader returned no value for the requested key")]
    LoaderReturnedNull,

    /// A pending `get_or_load` computation was superseded by a direct
    /// `put`/`remove` on the same key before the loader returned.
    ///
    /// Delivered to every waiter blocked on that computation's rendezvous
    /// so none of them block forever; the winning `put`/`remove` itself
    /// completes normally.
    #[error("pending computation was superseded by a concurrent write")]
    Superseded,
}

impl CcmapError {
    /// Wraps an arbitrary loader error as a `ComputationFailed`.
    pub fn computation_failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CcmapError::ComputationFailed(Arc::new(err))
    }

    /// Wraps a boxed/dyn loader error without double-boxing.
    pub fn from_boxed(err: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        CcmapError::ComputationFailed(err)
    }

    /// True for the two computation-failure variants.
    pub fn is_computation_failure(&self) -> bool {
        matches!(
            self,
            CcmapError::ComputationFailed(_) | CcmapError::LoaderReturnedNull
        )
    }
}

/// Marker used where a debug assertion would fire for an internal
/// invariant violation (linkage violations, `remove_entry` not finding its
/// argument). Production behavior never panics outside `debug_assertions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalInconsistency(pub &'static str);

impl fmt::Display for InternalInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal inconsistency: {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct BoomError;

    impl fmt::Display for BoomError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for BoomError {}

    #[test]
    fn computation_failed_is_a_computation_failure() {
        let err = CcmapError::computation_failed(BoomError);
        assert!(err.is_computation_failure());
        assert!(!matches!(err, CcmapError::LoaderReturnedNull));
    }

    #[test]
    fn loader_returned_null_is_also_a_computation_failure() {
        assert!(CcmapError::LoaderReturnedNull.is_computation_failure());
    }

    #[test]
    fn config_and_superseded_are_not_computation_failures() {
        assert!(!CcmapError::InvalidConfig("bad".into()).is_computation_failure());
        assert!(!CcmapError::Superseded.is_computation_failure());
        assert!(!CcmapError::NullKey.is_computation_failure());
        assert!(!CcmapError::NullValue.is_computation_failure());
    }

    #[test]
    fn error_is_cloneable_for_multi_waiter_delivery() {
        let err = CcmapError::computation_failed(BoomError);
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
