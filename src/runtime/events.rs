//! Runtime event stream payloads.

use crate::{
    engine::invalidate::CacheKey,
    types::{BracketId, EntryId, OpSeq, RoundId, Side, UserId},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BracketEvent {
    /// A new entry was registered.
    EntryCreated {
        /// Created entry id.
        id: EntryId,
    },
    /// An entry was removed.
    EntryDeleted {
        /// Removed entry id.
        id: EntryId,
    },
    /// A new voter was registered.
    UserCreated {
        /// Created user id.
        id: UserId,
    },
    /// A bracket and its full round tree were created.
    BracketCreated {
        /// Created bracket id.
        id: BracketId,
    },
    /// A bracket was removed together with its rounds.
    BracketDeleted {
        /// Removed bracket id.
        id: BracketId,
    },
    /// A vote was stored or changed.
    VoteRecorded {
        /// Round voted on.
        round: RoundId,
        /// Voter.
        user: UserId,
        /// Chosen side.
        side: Side,
    },
    /// A round was decided.
    RoundResolved {
        /// Owning bracket.
        bracket: BracketId,
        /// Resolved round.
        round: RoundId,
        /// Advancing entry.
        winner: EntryId,
    },
    /// A cached fragment went stale.
    Invalidate {
        /// Stale cache key.
        key: CacheKey,
    },
    /// The finale was decided.
    BracketWon {
        /// Finished bracket.
        bracket: BracketId,
        /// Champion.
        winner: EntryId,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
