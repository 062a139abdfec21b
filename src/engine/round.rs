use thiserror::Error;

use crate::{
    core::{repository::Repository, store::StoreError},
    model::{Round, RoundState},
    types::{BracketId, EntryId, RoundId, Side, UserId},
};

use super::invalidate::{CacheInvalidator, Invalidation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("round {0} has a child but no child slot")]
    DanglingChild(RoundId),
    #[error("slot {side:?} of round {round} is empty")]
    EmptySlot { round: RoundId, side: Side },
}

/// What a call to [`RoundMachine::set_vote`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The round was not open for voting; nothing was stored.
    Ignored(RoundState),
    /// First vote of this user in this round.
    Recorded,
    /// The user switched sides.
    Changed { from: Side },
    /// The user repeated their vote.
    Unchanged,
}

/// A successful round resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub bracket: BracketId,
    pub round: RoundId,
    pub side: Side,
    pub winner: EntryId,
    /// Child round and slot the winner was written into.
    pub advanced_to: Option<(RoundId, Side)>,
    /// True when the finale resolved and `winner` is the bracket champion.
    pub champion: bool,
    pub invalidation: Invalidation,
}

/// Voting and resolution of a single round.
pub struct RoundMachine<'r, R: Repository + ?Sized> {
    repo: &'r mut R,
    round: RoundId,
}

impl<'r, R: Repository + ?Sized> RoundMachine<'r, R> {
    pub fn new(repo: &'r mut R, round: RoundId) -> Self {
        Self { repo, round }
    }

    pub fn round(&self) -> Result<Round, EngineError> {
        self.repo
            .lookup_round(self.round)
            .ok_or(EngineError::Store(StoreError::MissingRound(self.round)))
    }

    pub fn state(&self) -> Result<RoundState, EngineError> {
        Ok(self.round()?.state())
    }

    /// Records `user`'s choice. Locked and resolved rounds ignore votes.
    pub fn set_vote(&mut self, user: UserId, side: Side) -> Result<VoteOutcome, EngineError> {
        let state = self.state()?;
        if state != RoundState::Voting {
            log::debug!("Ignoring vote of user {user} on {state:?} round {}", self.round);
            return Ok(VoteOutcome::Ignored(state));
        }

        let outcome = match self.repo.upsert_vote(self.round, user, side)? {
            None => VoteOutcome::Recorded,
            Some(prev) if prev == side => VoteOutcome::Unchanged,
            Some(prev) => VoteOutcome::Changed { from: prev },
        };
        Ok(outcome)
    }

    /// True iff exactly `threshold` distinct users have voted.
    pub fn can_be_resolved(&self) -> Result<bool, EngineError> {
        let round = self.round()?;
        let bracket = self
            .repo
            .lookup_bracket(round.bracket)
            .ok_or(StoreError::MissingBracket(round.bracket))?;
        Ok(round.vote_count() == bracket.threshold as usize)
    }

    /// Decides the round if it holds exactly `threshold` votes.
    ///
    /// The side with strictly more votes wins, a tie goes to the right
    /// entrant. The winner is written into the child round's slot, or into
    /// the bracket's winner when this is the finale. Returns `None` when the
    /// round is locked, already resolved or still short of votes.
    pub fn try_resolve(&mut self) -> Result<Option<Resolution>, EngineError> {
        let round = self.round()?;
        if round.state() != RoundState::Voting {
            return Ok(None);
        }

        let target = match (round.child, round.child_entry) {
            (Some(child), Some(slot)) => {
                let child_round = self
                    .repo
                    .lookup_round(child)
                    .ok_or(StoreError::MissingRound(child))?;
                if child_round.slot(slot).is_some() {
                    return Err(StoreError::SlotOccupied { round: child, side: slot }.into());
                }
                Some((child, slot))
            }
            (None, _) => None,
            (Some(_), None) => return Err(EngineError::DanglingChild(round.id)),
        };

        if !self.repo.claim_resolution(round.id)? {
            log::debug!(
                "Round {} not resolvable yet ({} votes)",
                round.id,
                round.vote_count()
            );
            return Ok(None);
        }

        let side = round.leading_side();
        let (left, right) = round.tally();
        let winner = round.slot(side).ok_or(EngineError::EmptySlot {
            round: round.id,
            side,
        })?;

        match target {
            Some((child, slot)) => {
                self.repo.fill_slot(child, slot, winner)?;
                log::info!(
                    "Round {} resolved {left}:{right}, entry {winner} advances to round {child}",
                    round.id
                );
            }
            None => {
                self.repo.set_winner(round.bracket, winner)?;
                log::info!(
                    "Finale {} resolved {left}:{right}, entry {winner} wins bracket {}",
                    round.id,
                    round.bracket
                );
            }
        }

        Ok(Some(Resolution {
            bracket: round.bracket,
            round: round.id,
            side,
            winner,
            advanced_to: target,
            champion: target.is_none(),
            invalidation: Invalidation::for_resolution(
                round.bracket,
                round.id,
                target.map(|(child, _)| child),
            ),
        }))
    }
}

/// Casts a vote and immediately attempts resolution, the per-request flow.
///
/// When the round resolves, the invalidation keys are sent to `invalidator`.
/// Invalidation failures are logged and do not affect the result.
pub fn cast_vote<R: Repository + ?Sized>(
    repo: &mut R,
    invalidator: Option<&mut dyn CacheInvalidator>,
    round: RoundId,
    user: UserId,
    side: Side,
) -> Result<(VoteOutcome, Option<Resolution>), EngineError> {
    let mut machine = RoundMachine::new(repo, round);
    let outcome = machine.set_vote(user, side)?;
    if let VoteOutcome::Ignored(_) = outcome {
        return Ok((outcome, None));
    }

    let resolution = machine.try_resolve()?;
    if let (Some(resolution), Some(invalidator)) = (&resolution, invalidator) {
        resolution.invalidation.notify(invalidator);
    }
    Ok((outcome, resolution))
}
