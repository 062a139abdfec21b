//! Bracket construction, round resolution and cache invalidation.

/// Seeds entries into a complete elimination tree.
pub mod builder;
/// Cache keys and the invalidation hook.
pub mod invalidate;
/// Per-round voting state machine and winner propagation.
pub mod round;
