//! Shared primitive IDs and the round side enum.

use serde::{Deserialize, Serialize};

/// Monotonic entry identifier.
pub type EntryId = u64;
/// Monotonic round identifier, unique across all brackets.
pub type RoundId = u64;
/// Monotonic bracket identifier.
pub type BracketId = u64;
/// Registered voter identifier.
pub type UserId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;

/// One of the two slots of a round, `0` for [`Side::Left`] and `1` for
/// [`Side::Right`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    /// Slot 0.
    Left,
    /// Slot 1.
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Returns the slot index, `0` or `1`.
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}
