//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    model::{Bracket, Entry, Round, User},
    types::{BracketId, EntryId, OpSeq, RoundId, Side, UserId},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Register a new entry.
    CreateEntry {
        /// Created entry.
        entry: Entry,
    },
    /// Remove an entry that is not referenced by any round.
    DeleteEntry {
        /// Removed entry id.
        id: EntryId,
    },
    /// Register a new voter.
    CreateUser {
        /// Created user.
        user: User,
    },
    /// Create an empty bracket shell; its rounds follow as [`Op::CreateRound`].
    CreateBracket {
        /// Created bracket, without rounds.
        bracket: Bracket,
    },
    /// Create a round and point its parents at it.
    CreateRound {
        /// Created round.
        round: Round,
        /// Round feeding slot 0.
        left_parent: Option<RoundId>,
        /// Round feeding slot 1.
        right_parent: Option<RoundId>,
    },
    /// Record the height of a finished bracket tree.
    SetDepth {
        /// Bracket id.
        bracket: BracketId,
        /// Finale shallowness.
        depth: u32,
    },
    /// Upsert one user's vote.
    CastVote {
        /// Round voted on.
        round: RoundId,
        /// Voter.
        user: UserId,
        /// Chosen side.
        side: Side,
    },
    /// Mark a round as decided.
    Resolve {
        /// Resolved round.
        round: RoundId,
    },
    /// Propagate a winner into a TBD slot.
    FillSlot {
        /// Target round.
        round: RoundId,
        /// Target slot.
        side: Side,
        /// Advancing entry.
        entry: EntryId,
    },
    /// Crown the bracket champion.
    SetWinner {
        /// Bracket id.
        bracket: BracketId,
        /// Champion.
        entry: EntryId,
    },
    /// Remove a bracket together with its rounds and votes.
    DeleteBracket {
        /// Removed bracket id.
        id: BracketId,
    },
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
