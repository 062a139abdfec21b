//! Async single-writer engine. Votes and resolutions are serialized through
//! one command loop and announced on a broadcast channel.

/// Bracket lifecycle, resolution and durability events.
pub mod events;
/// Engine handle, command loop and persistence worker.
pub mod handle;
