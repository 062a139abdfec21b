//! Entry, user, round and bracket records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BracketId, EntryId, RoundId, Side, UserId};

/// Opaque contestant reference. The id resolves a display asset elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Stable entry identifier.
    pub id: EntryId,
}

/// A registered participant allowed to vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier.
    pub id: UserId,
    /// Unique display name.
    pub name: String,
}

/// Observable state of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundState {
    /// At least one slot is still TBD.
    Locked,
    /// Both entrants known, not yet decided.
    Voting,
    /// Decided. Terminal.
    Resolved,
}

/// One match of a bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Stable round identifier.
    pub id: RoundId,
    /// Owning bracket.
    pub bracket: BracketId,
    /// Construction-order sequence, unique within the bracket.
    pub number: u32,
    /// Tree level, `0` for the earliest rounds.
    pub shallowness: u32,
    /// True once the round has been decided.
    pub resolved: bool,
    /// Slot 0 entrant, `None` while TBD.
    pub left: Option<EntryId>,
    /// Slot 1 entrant, `None` while TBD.
    pub right: Option<EntryId>,
    /// Round the winner advances to. `None` only for the finale.
    pub child: Option<RoundId>,
    /// Slot of `child` the winner occupies.
    pub child_entry: Option<Side>,
    /// Latest vote per user.
    pub votes: BTreeMap<UserId, Side>,
}

impl Round {
    /// Returns the entrant in `side`, if known.
    pub fn slot(&self, side: Side) -> Option<EntryId> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub(crate) fn slot_mut(&mut self, side: Side) -> &mut Option<EntryId> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// True when both slots are filled.
    pub fn has_entrants(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// True for the unique round without a child.
    pub fn is_finale(&self) -> bool {
        self.child.is_none()
    }

    pub fn state(&self) -> RoundState {
        if self.resolved {
            RoundState::Resolved
        } else if self.has_entrants() {
            RoundState::Voting
        } else {
            RoundState::Locked
        }
    }

    /// Number of distinct users who voted in this round.
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Users who voted for `side`, in ascending id order.
    pub fn votes_for(&self, side: Side) -> Vec<UserId> {
        self.votes
            .iter()
            .filter(|(_, s)| **s == side)
            .map(|(user, _)| *user)
            .collect()
    }

    /// Returns `(left_votes, right_votes)`.
    pub fn tally(&self) -> (usize, usize) {
        self.votes.values().fold((0, 0), |(l, r), side| match side {
            Side::Left => (l + 1, r),
            Side::Right => (l, r + 1),
        })
    }

    /// The side that wins the current tally. Ties go to [`Side::Right`].
    pub fn leading_side(&self) -> Side {
        let (left, right) = self.tally();
        if left > right { Side::Left } else { Side::Right }
    }

    /// The decided winner, available once resolved.
    pub fn winner(&self) -> Option<EntryId> {
        if !self.resolved {
            return None;
        }
        self.slot(self.leading_side())
    }
}

/// A single-elimination tournament instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    /// Stable bracket identifier.
    pub id: BracketId,
    /// Display name.
    pub name: String,
    /// Exact number of votes that resolves a round.
    pub threshold: u32,
    /// Shallowness of the finale.
    pub depth: u32,
    /// Champion, set when the finale resolves.
    pub winner: Option<EntryId>,
    /// Rounds in `number` order.
    pub rounds: Vec<RoundId>,
}

impl Bracket {
    /// Display tier for rounds at `shallowness`, counted back from the finale.
    ///
    /// ```
    /// use votebracket::model::Bracket;
    ///
    /// let bracket = Bracket {
    ///     id: 1,
    ///     name: "cats".to_string(),
    ///     threshold: 3,
    ///     depth: 4,
    ///     winner: None,
    ///     rounds: vec![],
    /// };
    /// assert_eq!(bracket.tier_label(4), "Finals");
    /// assert_eq!(bracket.tier_label(2), "Quarterfinals");
    /// assert_eq!(bracket.tier_label(0), "Round of 32");
    /// ```
    pub fn tier_label(&self, shallowness: u32) -> String {
        match self.depth.saturating_sub(shallowness) {
            0 => "Finals".to_string(),
            1 => "Semifinals".to_string(),
            2 => "Quarterfinals".to_string(),
            n => format!("Round of {}", 1u64 << n.saturating_add(1).min(63)),
        }
    }
}

/// Which earlier rounds feed a newly created round.
///
/// The right parent is always present; the left one is absent when the left
/// slot is pre-seeded with a leftover entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Round whose winner lands in slot 0.
    pub left: Option<RoundId>,
    /// Round whose winner lands in slot 1.
    pub right: RoundId,
}

/// Insert payload for [`crate::core::repository::Repository::create_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundDraft {
    pub bracket: BracketId,
    pub number: u32,
    pub shallowness: u32,
    pub left: Option<EntryId>,
    pub right: Option<EntryId>,
    pub parents: Option<ParentLink>,
}
