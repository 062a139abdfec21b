use crate::{
    model::{Bracket, Entry, Round, RoundDraft, User},
    types::{BracketId, EntryId, RoundId, Side, UserId},
};

use super::store::StoreError;

/// Durable storage for brackets, rounds, entries, users and votes.
///
/// Every method is a single atomic step. In particular
/// [`Repository::claim_resolution`] is the per-round compare-and-set the
/// resolution flow relies on: at most one caller ever observes `true` for a
/// given round.
pub trait Repository {
    /// Registers a new entry.
    fn create_entry(&mut self) -> Result<Entry, StoreError>;

    /// Removes an entry that no round or bracket refers to.
    fn delete_entry(&mut self, id: EntryId) -> Result<(), StoreError>;

    fn lookup_entry(&self, id: EntryId) -> Option<Entry>;

    /// Registers a voter. Names are unique.
    fn create_user(&mut self, name: &str) -> Result<User, StoreError>;

    fn lookup_user(&self, id: UserId) -> Option<User>;

    /// Creates an empty bracket. Its rounds are added with [`Repository::create_round`].
    fn create_bracket(&mut self, name: &str, threshold: u32) -> Result<BracketId, StoreError>;

    /// Records the finale shallowness of a bracket.
    fn set_depth(&mut self, bracket: BracketId, depth: u32) -> Result<(), StoreError>;

    /// Creates a round and links the given parents to it.
    ///
    /// The left parent (if any) gets `child_entry = Left`, the right parent
    /// `child_entry = Right`.
    fn create_round(&mut self, draft: RoundDraft) -> Result<RoundId, StoreError>;

    fn lookup_round(&self, id: RoundId) -> Option<Round>;

    fn lookup_bracket(&self, id: BracketId) -> Option<Bracket>;

    /// Removes a bracket together with all of its rounds and votes.
    fn delete_bracket(&mut self, id: BracketId) -> Result<(), StoreError>;

    /// Inserts or overwrites the vote of `user` in `round`.
    ///
    /// Returns the previous side, if the user had voted before.
    fn upsert_vote(
        &mut self,
        round: RoundId,
        user: UserId,
        side: Side,
    ) -> Result<Option<Side>, StoreError>;

    /// Marks `round` resolved iff it is open for voting and holds exactly
    /// `threshold` votes. Returns whether this call performed the transition.
    fn claim_resolution(&mut self, round: RoundId) -> Result<bool, StoreError>;

    /// Writes `entry` into an empty slot. Filled slots are never overwritten.
    fn fill_slot(&mut self, round: RoundId, side: Side, entry: EntryId) -> Result<(), StoreError>;

    /// Sets the bracket champion once.
    fn set_winner(&mut self, bracket: BracketId, entry: EntryId) -> Result<(), StoreError>;
}
