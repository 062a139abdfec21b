use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::{Bracket, Entry, Round, RoundDraft, RoundState, User},
    op::{Op, StoredOp},
    types::{BracketId, EntryId, OpSeq, RoundId, Side, UserId},
};

use super::{indices::ParentIndex, repository::Repository};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entry {0} does not exist")]
    MissingEntry(EntryId),
    #[error("user {0} does not exist")]
    MissingUser(UserId),
    #[error("round {0} does not exist")]
    MissingRound(RoundId),
    #[error("bracket {0} does not exist")]
    MissingBracket(BracketId),
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: u64 },
    #[error("user name {0:?} is taken")]
    DuplicateUserName(String),
    #[error("entry {0} is still referenced")]
    EntryInUse(EntryId),
    #[error("round {round} belongs to bracket {actual}, expected {expected}")]
    ForeignRound {
        round: RoundId,
        expected: BracketId,
        actual: BracketId,
    },
    #[error("round {0} already feeds another round")]
    ParentAlreadyLinked(RoundId),
    #[error("round number {number} is not after {last} in bracket {bracket}")]
    NumberOutOfOrder {
        bracket: BracketId,
        number: u32,
        last: u32,
    },
    #[error("round {0} is not open for voting")]
    RoundClosed(RoundId),
    #[error("round {0} is already resolved")]
    AlreadyResolved(RoundId),
    #[error("slot {side:?} of round {round} is already filled")]
    SlotOccupied { round: RoundId, side: Side },
    #[error("bracket {0} already has a winner")]
    WinnerAlreadySet(BracketId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    pub next_op_seq: OpSeq,
    pub next_entry_id: EntryId,
    pub next_user_id: UserId,
    pub next_bracket_id: BracketId,
    pub next_round_id: RoundId,
    pub entries: Vec<Entry>,
    pub users: Vec<User>,
    pub brackets: Vec<Bracket>,
    pub rounds: Vec<Round>,
}

#[derive(Debug, Default)]
pub struct BracketStore {
    entries: HashMap<EntryId, Entry>,
    users: HashMap<UserId, User>,
    user_names: HashMap<String, UserId>,
    brackets: HashMap<BracketId, Bracket>,
    rounds: HashMap<RoundId, Round>,
    parents: ParentIndex,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_entry_id: EntryId,
    next_user_id: UserId,
    next_bracket_id: BracketId,
    next_round_id: RoundId,
}

impl BracketStore {
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_entry_id: 1,
            next_user_id: 1,
            next_bracket_id: 1,
            next_round_id: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        let mut store = Self {
            next_op_seq: snapshot.next_op_seq,
            next_entry_id: snapshot.next_entry_id,
            next_user_id: snapshot.next_user_id,
            next_bracket_id: snapshot.next_bracket_id,
            next_round_id: snapshot.next_round_id,
            ..Self::default()
        };

        for entry in snapshot.entries {
            store.entries.insert(entry.id, entry);
        }

        for user in snapshot.users {
            if store.user_names.contains_key(&user.name) {
                return Err(StoreError::DuplicateUserName(user.name));
            }
            store.user_names.insert(user.name.clone(), user.id);
            store.users.insert(user.id, user);
        }

        for bracket in snapshot.brackets {
            store.brackets.insert(bracket.id, bracket);
        }

        for round in snapshot.rounds {
            if !store.brackets.contains_key(&round.bracket) {
                return Err(StoreError::MissingBracket(round.bracket));
            }
            store.rounds.insert(round.id, round);
        }

        store.rebuild_parent_index();
        Ok(store)
    }

    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let mut entries: Vec<Entry> = self.entries.values().copied().collect();
        entries.sort_by_key(|e| e.id);

        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);

        let mut brackets: Vec<Bracket> = self.brackets.values().cloned().collect();
        brackets.sort_by_key(|b| b.id);

        let mut rounds: Vec<Round> = self.rounds.values().cloned().collect();
        rounds.sort_by_key(|r| r.id);

        StoreSnapshotV1 {
            next_op_seq: self.next_op_seq,
            next_entry_id: self.next_entry_id,
            next_user_id: self.next_user_id,
            next_bracket_id: self.next_bracket_id,
            next_round_id: self.next_round_id,
            entries,
            users,
            brackets,
            rounds,
        }
    }

    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        self.apply_op(&stored.op)?;
        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    pub fn get_entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn get_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.user_names.get(name).and_then(|id| self.users.get(id))
    }

    pub fn get_round(&self, id: RoundId) -> Option<&Round> {
        self.rounds.get(&id)
    }

    pub fn get_bracket(&self, id: BracketId) -> Option<&Bracket> {
        self.brackets.get(&id)
    }

    /// All brackets in creation order.
    pub fn brackets(&self) -> Vec<&Bracket> {
        let mut out: Vec<&Bracket> = self.brackets.values().collect();
        out.sort_by_key(|b| b.id);
        out
    }

    /// Rounds of `bracket` in `number` order.
    pub fn rounds_of(&self, bracket: BracketId) -> Vec<&Round> {
        self.brackets
            .get(&bracket)
            .into_iter()
            .flat_map(|b| b.rounds.iter())
            .filter_map(|id| self.rounds.get(id))
            .collect()
    }

    pub fn rounds_of_cloned(&self, bracket: BracketId) -> Vec<Round> {
        self.rounds_of(bracket).into_iter().cloned().collect()
    }

    /// The round without a child.
    pub fn finale_of(&self, bracket: BracketId) -> Option<&Round> {
        self.rounds_of(bracket).into_iter().find(|r| r.is_finale())
    }

    /// Rounds whose winners feed slot 0 and slot 1 of `round`.
    pub fn parents_of(&self, round: RoundId) -> [Option<RoundId>; 2] {
        self.parents.get(&round).copied().unwrap_or([None, None])
    }

    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn commit(&mut self, op: Op) -> Result<StoredOp, StoreError> {
        self.apply_op(&op)?;
        let stored = StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms: now_ms(),
            op,
        };
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    fn apply_op(&mut self, op: &Op) -> Result<(), StoreError> {
        match op {
            Op::CreateEntry { entry } => {
                if self.entries.contains_key(&entry.id) {
                    return Err(StoreError::AlreadyExists {
                        kind: "entry",
                        id: entry.id,
                    });
                }
                self.next_entry_id = self.next_entry_id.max(entry.id.saturating_add(1));
                self.entries.insert(entry.id, *entry);
            }
            Op::DeleteEntry { id } => {
                if !self.entries.contains_key(id) {
                    return Err(StoreError::MissingEntry(*id));
                }
                if self.entry_in_use(*id) {
                    return Err(StoreError::EntryInUse(*id));
                }
                self.entries.remove(id);
            }
            Op::CreateUser { user } => {
                if self.users.contains_key(&user.id) {
                    return Err(StoreError::AlreadyExists {
                        kind: "user",
                        id: user.id,
                    });
                }
                if self.user_names.contains_key(&user.name) {
                    return Err(StoreError::DuplicateUserName(user.name.clone()));
                }
                self.next_user_id = self.next_user_id.max(user.id.saturating_add(1));
                self.user_names.insert(user.name.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Op::CreateBracket { bracket } => {
                if self.brackets.contains_key(&bracket.id) {
                    return Err(StoreError::AlreadyExists {
                        kind: "bracket",
                        id: bracket.id,
                    });
                }
                self.next_bracket_id = self.next_bracket_id.max(bracket.id.saturating_add(1));
                self.brackets.insert(bracket.id, bracket.clone());
            }
            Op::CreateRound {
                round,
                left_parent,
                right_parent,
            } => self.apply_create_round(round, *left_parent, *right_parent)?,
            Op::SetDepth { bracket, depth } => {
                let b = self
                    .brackets
                    .get_mut(bracket)
                    .ok_or(StoreError::MissingBracket(*bracket))?;
                b.depth = *depth;
            }
            Op::CastVote { round, user, side } => {
                if !self.users.contains_key(user) {
                    return Err(StoreError::MissingUser(*user));
                }
                let r = self
                    .rounds
                    .get_mut(round)
                    .ok_or(StoreError::MissingRound(*round))?;
                if r.state() != RoundState::Voting {
                    return Err(StoreError::RoundClosed(*round));
                }
                r.votes.insert(*user, *side);
            }
            Op::Resolve { round } => {
                let r = self
                    .rounds
                    .get_mut(round)
                    .ok_or(StoreError::MissingRound(*round))?;
                if r.resolved {
                    return Err(StoreError::AlreadyResolved(*round));
                }
                r.resolved = true;
            }
            Op::FillSlot { round, side, entry } => {
                if !self.entries.contains_key(entry) {
                    return Err(StoreError::MissingEntry(*entry));
                }
                let r = self
                    .rounds
                    .get_mut(round)
                    .ok_or(StoreError::MissingRound(*round))?;
                let slot = r.slot_mut(*side);
                if slot.is_some() {
                    return Err(StoreError::SlotOccupied {
                        round: *round,
                        side: *side,
                    });
                }
                *slot = Some(*entry);
            }
            Op::SetWinner { bracket, entry } => {
                if !self.entries.contains_key(entry) {
                    return Err(StoreError::MissingEntry(*entry));
                }
                let b = self
                    .brackets
                    .get_mut(bracket)
                    .ok_or(StoreError::MissingBracket(*bracket))?;
                if b.winner.is_some() {
                    return Err(StoreError::WinnerAlreadySet(*bracket));
                }
                b.winner = Some(*entry);
            }
            Op::DeleteBracket { id } => {
                let bracket = self
                    .brackets
                    .remove(id)
                    .ok_or(StoreError::MissingBracket(*id))?;
                for round in bracket.rounds {
                    self.rounds.remove(&round);
                    self.parents.remove(&round);
                }
            }
        }
        Ok(())
    }

    fn apply_create_round(
        &mut self,
        round: &Round,
        left_parent: Option<RoundId>,
        right_parent: Option<RoundId>,
    ) -> Result<(), StoreError> {
        if self.rounds.contains_key(&round.id) {
            return Err(StoreError::AlreadyExists {
                kind: "round",
                id: round.id,
            });
        }
        for entry in [round.left, round.right].into_iter().flatten() {
            if !self.entries.contains_key(&entry) {
                return Err(StoreError::MissingEntry(entry));
            }
        }

        let last_number = {
            let bracket = self
                .brackets
                .get(&round.bracket)
                .ok_or(StoreError::MissingBracket(round.bracket))?;
            bracket
                .rounds
                .last()
                .and_then(|id| self.rounds.get(id))
                .map(|r| r.number)
        };
        match last_number {
            Some(last) if round.number <= last => {
                return Err(StoreError::NumberOutOfOrder {
                    bracket: round.bracket,
                    number: round.number,
                    last,
                });
            }
            _ => {}
        }

        for parent in [left_parent, right_parent].into_iter().flatten() {
            let p = self
                .rounds
                .get(&parent)
                .ok_or(StoreError::MissingRound(parent))?;
            if p.bracket != round.bracket {
                return Err(StoreError::ForeignRound {
                    round: parent,
                    expected: round.bracket,
                    actual: p.bracket,
                });
            }
            if p.child.is_some() {
                return Err(StoreError::ParentAlreadyLinked(parent));
            }
        }
        if left_parent.is_some() && left_parent == right_parent {
            return Err(StoreError::ParentAlreadyLinked(round.id));
        }

        for (side, parent) in [(Side::Left, left_parent), (Side::Right, right_parent)] {
            if let Some(p) = parent.and_then(|id| self.rounds.get_mut(&id)) {
                p.child = Some(round.id);
                p.child_entry = Some(side);
            }
        }

        self.parents.insert(round.id, [left_parent, right_parent]);
        self.next_round_id = self.next_round_id.max(round.id.saturating_add(1));
        if let Some(bracket) = self.brackets.get_mut(&round.bracket) {
            bracket.rounds.push(round.id);
        }
        self.rounds.insert(round.id, round.clone());
        Ok(())
    }

    fn entry_in_use(&self, id: EntryId) -> bool {
        self.rounds
            .values()
            .any(|r| r.left == Some(id) || r.right == Some(id))
            || self.brackets.values().any(|b| b.winner == Some(id))
    }

    fn rebuild_parent_index(&mut self) {
        self.parents.clear();
        for round in self.rounds.values() {
            let (Some(child), Some(side)) = (round.child, round.child_entry) else {
                continue;
            };
            self.parents.entry(child).or_insert([None, None])[side.index()] = Some(round.id);
        }
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

impl Repository for BracketStore {
    fn create_entry(&mut self) -> Result<Entry, StoreError> {
        let entry = Entry {
            id: self.next_entry_id,
        };
        self.commit(Op::CreateEntry { entry })?;
        Ok(entry)
    }

    fn delete_entry(&mut self, id: EntryId) -> Result<(), StoreError> {
        self.commit(Op::DeleteEntry { id })?;
        Ok(())
    }

    fn lookup_entry(&self, id: EntryId) -> Option<Entry> {
        self.entries.get(&id).copied()
    }

    fn create_user(&mut self, name: &str) -> Result<User, StoreError> {
        let user = User {
            id: self.next_user_id,
            name: name.to_string(),
        };
        self.commit(Op::CreateUser { user: user.clone() })?;
        Ok(user)
    }

    fn lookup_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).cloned()
    }

    fn create_bracket(&mut self, name: &str, threshold: u32) -> Result<BracketId, StoreError> {
        let bracket = Bracket {
            id: self.next_bracket_id,
            name: name.to_string(),
            threshold,
            depth: 0,
            winner: None,
            rounds: Vec::new(),
        };
        let id = bracket.id;
        self.commit(Op::CreateBracket { bracket })?;
        Ok(id)
    }

    fn set_depth(&mut self, bracket: BracketId, depth: u32) -> Result<(), StoreError> {
        self.commit(Op::SetDepth { bracket, depth })?;
        Ok(())
    }

    fn create_round(&mut self, draft: RoundDraft) -> Result<RoundId, StoreError> {
        let round = Round {
            id: self.next_round_id,
            bracket: draft.bracket,
            number: draft.number,
            shallowness: draft.shallowness,
            resolved: false,
            left: draft.left,
            right: draft.right,
            child: None,
            child_entry: None,
            votes: BTreeMap::new(),
        };
        let id = round.id;
        self.commit(Op::CreateRound {
            round,
            left_parent: draft.parents.and_then(|p| p.left),
            right_parent: draft.parents.map(|p| p.right),
        })?;
        Ok(id)
    }

    fn lookup_round(&self, id: RoundId) -> Option<Round> {
        self.rounds.get(&id).cloned()
    }

    fn lookup_bracket(&self, id: BracketId) -> Option<Bracket> {
        self.brackets.get(&id).cloned()
    }

    fn delete_bracket(&mut self, id: BracketId) -> Result<(), StoreError> {
        self.commit(Op::DeleteBracket { id })?;
        Ok(())
    }

    fn upsert_vote(
        &mut self,
        round: RoundId,
        user: UserId,
        side: Side,
    ) -> Result<Option<Side>, StoreError> {
        let prev = self
            .rounds
            .get(&round)
            .ok_or(StoreError::MissingRound(round))?
            .votes
            .get(&user)
            .copied();

        // Re-casting the same side changes nothing and is not journaled.
        if prev == Some(side) {
            return Ok(prev);
        }

        self.commit(Op::CastVote { round, user, side })?;
        Ok(prev)
    }

    fn claim_resolution(&mut self, round: RoundId) -> Result<bool, StoreError> {
        let r = self
            .rounds
            .get(&round)
            .ok_or(StoreError::MissingRound(round))?;
        if r.state() != RoundState::Voting {
            return Ok(false);
        }
        let threshold = self
            .brackets
            .get(&r.bracket)
            .ok_or(StoreError::MissingBracket(r.bracket))?
            .threshold;
        if r.vote_count() != threshold as usize {
            return Ok(false);
        }

        self.commit(Op::Resolve { round })?;
        Ok(true)
    }

    fn fill_slot(&mut self, round: RoundId, side: Side, entry: EntryId) -> Result<(), StoreError> {
        self.commit(Op::FillSlot { round, side, entry })?;
        Ok(())
    }

    fn set_winner(&mut self, bracket: BracketId, entry: EntryId) -> Result<(), StoreError> {
        self.commit(Op::SetWinner { bracket, entry })?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
