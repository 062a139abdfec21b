//! In-memory round arena and the repository contract.

/// Reverse-link index aliases.
pub mod indices;
/// Storage contract consumed by the bracket engine.
pub mod repository;
/// Authoritative in-memory store that journals every mutation.
pub mod store;
