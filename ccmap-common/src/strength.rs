//! # Reference Strength
//!
//! Purpose: the config-level knobs that select which `KeyRef`/`ValueRef`
//! variant a segment's entries use (spec §6, §4.2).

/// Strength of the reference the map holds to a key.
///
/// Soft keys are rejected at `CacheBuilder::build` time (spec §3: "Soft
/// keys are unsupported").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyStrength {
    #[default]
    Strong,
    Weak,
}

/// Strength of the reference the map holds to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueStrength {
    #[default]
    Strong,
    Weak,
    Soft,
}
