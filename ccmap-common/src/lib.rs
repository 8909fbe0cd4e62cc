//! ccmap-common - shared types for the ccmap concurrent cache map
//!
//! This crate defines the collaborators that sit at the edge of the core
//! segmented map: error types, the removal-cause tag, the injectable clock,
//! and the key/value equivalence strategy. None of it touches the table,
//! the segments, or the eviction queues - that is `ccmap-core`.

pub mod cause;
pub mod clock;
pub mod equivalence;
pub mod error;
pub mod strength;

pub use cause::RemovalCause;
pub use clock::{Clock, FakeClock, SystemClock};
pub use equivalence::{Equivalence, FnEquivalence, IdentityEquivalence, SemanticEquivalence};
pub use error::{CcmapError, CcmapResult, InternalInconsistency};
pub use strength::{KeyStrength, ValueStrength};
