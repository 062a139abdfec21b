use hashbrown::HashSet;
use thiserror::Error;

use crate::{
    core::{repository::Repository, store::StoreError},
    model::{Bracket, ParentLink, RoundDraft},
    types::{BracketId, EntryId, RoundId},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("a bracket needs at least 2 entries, got {0}")]
    TooFewEntries(usize),
    #[error("entry {0} is listed more than once")]
    DuplicateEntry(EntryId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Contestant left unpaired at the end of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leftover {
    Entry(EntryId),
    Round(RoundId),
}

/// Seeds an ordered entry list into a complete single-elimination tree.
///
/// Entries are paired in list order into the first level. An odd entry or
/// round at the end of a level is carried exactly one level up, where it is
/// matched against the winner of that level's first round. Levels are built
/// until a single round (the finale) remains.
pub struct BracketBuilder<'r, R: Repository + ?Sized> {
    repo: &'r mut R,
    next_number: u32,
}

impl<'r, R: Repository + ?Sized> BracketBuilder<'r, R> {
    pub fn new(repo: &'r mut R) -> Self {
        Self {
            repo,
            next_number: 1,
        }
    }

    /// Creates the bracket and its full round tree.
    ///
    /// The threshold is stored as given. Callers validate it beforehand.
    /// When a round cannot be created the partial bracket is deleted again
    /// and the error is returned.
    pub fn build(
        mut self,
        name: &str,
        threshold: u32,
        entries: &[EntryId],
    ) -> Result<Bracket, BuildError> {
        if entries.len() < 2 {
            return Err(BuildError::TooFewEntries(entries.len()));
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for id in entries {
            if !seen.insert(*id) {
                return Err(BuildError::DuplicateEntry(*id));
            }
            if self.repo.lookup_entry(*id).is_none() {
                return Err(StoreError::MissingEntry(*id).into());
            }
        }

        let bracket = self.repo.create_bracket(name, threshold)?;
        log::info!(
            "Creating bracket {bracket} {name:?} with {} entries, threshold {threshold}",
            entries.len()
        );

        match self.build_tree(bracket, entries) {
            Ok(depth) => {
                log::debug!(
                    "Bracket {bracket} complete with {} rounds, depth {depth}",
                    self.next_number - 1
                );
            }
            Err(err) => {
                // Drop the partial tree so no bracket is left without a finale.
                log::warn!("Building bracket {bracket} failed, removing it: {err}");
                if let Err(cleanup) = self.repo.delete_bracket(bracket) {
                    log::error!("Could not remove partial bracket {bracket}: {cleanup}");
                }
                return Err(err);
            }
        }

        self.repo
            .lookup_bracket(bracket)
            .ok_or(BuildError::Store(StoreError::MissingBracket(bracket)))
    }

    /// Creates every level and records the depth. Returns the depth.
    fn build_tree(&mut self, bracket: BracketId, entries: &[EntryId]) -> Result<u32, BuildError> {
        let (mut level, mut leftover) = self.seed_first_level(bracket, entries)?;
        let mut shallowness = 0;

        while level.len() > 1 || leftover.is_some() {
            shallowness += 1;
            (level, leftover) = self.build_level(bracket, shallowness, &level, leftover)?;
        }

        self.repo.set_depth(bracket, shallowness)?;
        Ok(shallowness)
    }

    fn seed_first_level(
        &mut self,
        bracket: BracketId,
        entries: &[EntryId],
    ) -> Result<(Vec<RoundId>, Option<Leftover>), BuildError> {
        let mut rounds = Vec::with_capacity(entries.len() / 2);
        let mut leftover = None;

        for pair in entries.chunks(2) {
            match *pair {
                [left, right] => {
                    rounds.push(self.create(bracket, 0, Some(left), Some(right), None)?);
                }
                [single] => leftover = Some(Leftover::Entry(single)),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }

        log::debug!("Level 0: {} rounds, leftover {leftover:?}", rounds.len());
        Ok((rounds, leftover))
    }

    fn build_level(
        &mut self,
        bracket: BracketId,
        shallowness: u32,
        previous: &[RoundId],
        leftover: Option<Leftover>,
    ) -> Result<(Vec<RoundId>, Option<Leftover>), BuildError> {
        let mut rounds = Vec::with_capacity(previous.len() / 2 + 1);
        let mut rest = previous;

        // The leftover meets the winner of the first round of this level.
        if let (Some(leftover), Some((&first, tail))) = (leftover, rest.split_first()) {
            let id = match leftover {
                Leftover::Entry(entry) => self.create(
                    bracket,
                    shallowness,
                    Some(entry),
                    None,
                    Some(ParentLink {
                        left: None,
                        right: first,
                    }),
                )?,
                Leftover::Round(round) => self.create(
                    bracket,
                    shallowness,
                    None,
                    None,
                    Some(ParentLink {
                        left: Some(round),
                        right: first,
                    }),
                )?,
            };
            rounds.push(id);
            rest = tail;
        }

        let mut next_leftover = None;
        for pair in rest.chunks(2) {
            match *pair {
                [left, right] => {
                    let id = self.create(
                        bracket,
                        shallowness,
                        None,
                        None,
                        Some(ParentLink {
                            left: Some(left),
                            right,
                        }),
                    )?;
                    rounds.push(id);
                }
                [single] => next_leftover = Some(Leftover::Round(single)),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }

        log::debug!(
            "Level {shallowness}: {} rounds, leftover {next_leftover:?}",
            rounds.len()
        );
        Ok((rounds, next_leftover))
    }

    fn create(
        &mut self,
        bracket: BracketId,
        shallowness: u32,
        left: Option<EntryId>,
        right: Option<EntryId>,
        parents: Option<ParentLink>,
    ) -> Result<RoundId, BuildError> {
        let number = self.next_number;
        self.next_number += 1;
        let id = self.repo.create_round(RoundDraft {
            bracket,
            number,
            shallowness,
            left,
            right,
            parents,
        })?;
        Ok(id)
    }
}
