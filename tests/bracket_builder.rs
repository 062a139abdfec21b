use std::collections::BTreeSet;

use votebracket::{
    core::{
        repository::Repository,
        store::{BracketStore, StoreError},
    },
    engine::builder::{BracketBuilder, BuildError},
    model::{Bracket, Entry, Round, RoundDraft, RoundState, User},
    types::{BracketId, EntryId, RoundId, Side, UserId},
};

/// Store that refuses to create rounds once `rounds_left` reaches zero.
struct RoundLimitedStore {
    inner: BracketStore,
    rounds_left: usize,
}

impl Repository for RoundLimitedStore {
    fn create_entry(&mut self) -> Result<Entry, StoreError> {
        self.inner.create_entry()
    }

    fn delete_entry(&mut self, id: EntryId) -> Result<(), StoreError> {
        self.inner.delete_entry(id)
    }

    fn lookup_entry(&self, id: EntryId) -> Option<Entry> {
        self.inner.lookup_entry(id)
    }

    fn create_user(&mut self, name: &str) -> Result<User, StoreError> {
        self.inner.create_user(name)
    }

    fn lookup_user(&self, id: UserId) -> Option<User> {
        self.inner.lookup_user(id)
    }

    fn create_bracket(&mut self, name: &str, threshold: u32) -> Result<BracketId, StoreError> {
        self.inner.create_bracket(name, threshold)
    }

    fn set_depth(&mut self, bracket: BracketId, depth: u32) -> Result<(), StoreError> {
        self.inner.set_depth(bracket, depth)
    }

    fn create_round(&mut self, draft: RoundDraft) -> Result<RoundId, StoreError> {
        if self.rounds_left == 0 {
            return Err(StoreError::MissingBracket(draft.bracket));
        }
        self.rounds_left -= 1;
        self.inner.create_round(draft)
    }

    fn lookup_round(&self, id: RoundId) -> Option<Round> {
        self.inner.lookup_round(id)
    }

    fn lookup_bracket(&self, id: BracketId) -> Option<Bracket> {
        self.inner.lookup_bracket(id)
    }

    fn delete_bracket(&mut self, id: BracketId) -> Result<(), StoreError> {
        self.inner.delete_bracket(id)
    }

    fn upsert_vote(
        &mut self,
        round: RoundId,
        user: UserId,
        side: Side,
    ) -> Result<Option<Side>, StoreError> {
        self.inner.upsert_vote(round, user, side)
    }

    fn claim_resolution(&mut self, round: RoundId) -> Result<bool, StoreError> {
        self.inner.claim_resolution(round)
    }

    fn fill_slot(&mut self, round: RoundId, side: Side, entry: EntryId) -> Result<(), StoreError> {
        self.inner.fill_slot(round, side, entry)
    }

    fn set_winner(&mut self, bracket: BracketId, entry: EntryId) -> Result<(), StoreError> {
        self.inner.set_winner(bracket, entry)
    }
}

fn entries(store: &mut BracketStore, n: usize) -> Vec<EntryId> {
    (0..n)
        .map(|_| store.create_entry().expect("entry").id)
        .collect()
}

fn build(store: &mut BracketStore, ids: &[EntryId]) -> Bracket {
    BracketBuilder::new(store)
        .build("test", 3, ids)
        .expect("build")
}

#[test]
fn two_entries_make_a_single_finale() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 2);
    let bracket = build(&mut store, &ids);

    assert_eq!(bracket.depth, 0);
    assert_eq!(bracket.rounds.len(), 1);

    let finale = store.get_round(bracket.rounds[0]).expect("finale");
    assert_eq!(finale.number, 1);
    assert_eq!(finale.shallowness, 0);
    assert_eq!((finale.left, finale.right), (Some(ids[0]), Some(ids[1])));
    assert!(finale.is_finale());
    assert_eq!(finale.state(), RoundState::Voting);
    assert_eq!(bracket.tier_label(finale.shallowness), "Finals");
}

#[test]
fn odd_entry_meets_winner_of_first_round() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 3);
    let bracket = build(&mut store, &ids);

    assert_eq!(bracket.depth, 1);
    let rounds = store.rounds_of_cloned(bracket.id);
    assert_eq!(rounds.len(), 2);

    let (first, second) = (&rounds[0], &rounds[1]);
    assert_eq!((first.left, first.right), (Some(ids[0]), Some(ids[1])));
    assert_eq!(first.child, Some(second.id));
    assert_eq!(first.child_entry, Some(Side::Right));

    assert_eq!((second.left, second.right), (Some(ids[2]), None));
    assert_eq!(second.shallowness, 1);
    assert_eq!(second.state(), RoundState::Locked);
    assert_eq!(store.parents_of(second.id), [None, Some(first.id)]);
}

#[test]
fn leftover_round_is_carried_one_level_up() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 5);
    let bracket = build(&mut store, &ids);

    let rounds = store.rounds_of_cloned(bracket.id);
    let numbers: Vec<u32> = rounds.iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(bracket.depth, 2);

    let [r1, r2, r3, r4] = [&rounds[0], &rounds[1], &rounds[2], &rounds[3]];
    assert_eq!((r2.left, r2.right), (Some(ids[2]), Some(ids[3])));

    // Entry 5 waits for the winner of round 1.
    assert_eq!((r3.left, r3.right), (Some(ids[4]), None));
    assert_eq!(store.parents_of(r3.id), [None, Some(r1.id)]);

    // Round 2 was left over at level 1 and meets round 3 in the finale.
    assert_eq!(store.parents_of(r4.id), [Some(r2.id), Some(r3.id)]);
    assert_eq!(r2.child_entry, Some(Side::Left));
    assert_eq!(r3.child_entry, Some(Side::Right));
    assert!(r4.is_finale());
    assert_eq!(r4.shallowness, 2);
}

#[test]
fn eight_entries_form_a_balanced_tree() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 8);
    let bracket = build(&mut store, &ids);

    assert_eq!(bracket.depth, 2);
    let rounds = store.rounds_of(bracket.id);
    let per_level: Vec<usize> = (0..=2)
        .map(|s| rounds.iter().filter(|r| r.shallowness == s).count())
        .collect();
    assert_eq!(per_level, vec![4, 2, 1]);

    assert_eq!(bracket.tier_label(0), "Quarterfinals");
    assert_eq!(bracket.tier_label(1), "Semifinals");
    assert_eq!(bracket.tier_label(2), "Finals");
}

#[test]
fn tree_shape_holds_for_every_size_up_to_forty() {
    for n in 2..=40 {
        let mut store = BracketStore::new();
        let ids = entries(&mut store, n);
        let bracket = build(&mut store, &ids);
        let rounds = store.rounds_of(bracket.id);

        assert_eq!(rounds.len(), n - 1, "round count for {n} entries");

        let finales: Vec<_> = rounds.iter().filter(|r| r.is_finale()).collect();
        assert_eq!(finales.len(), 1, "finale count for {n} entries");
        assert_eq!(finales[0].shallowness, bracket.depth);

        let numbers: Vec<u32> = rounds.iter().map(|r| r.number).collect();
        assert_eq!(numbers, (1..n as u32).collect::<Vec<_>>());

        let mut seeded = BTreeSet::new();
        for round in &rounds {
            for entry in [round.left, round.right].into_iter().flatten() {
                assert!(seeded.insert(entry), "entry {entry} seeded twice");
            }

            let parents = store.parents_of(round.id);
            for side in Side::BOTH {
                let filled = round.slot(side).is_some();
                let fed = parents[side.index()].is_some();
                assert!(filled != fed, "slot {side:?} of round {} in {n}", round.id);
            }

            if let Some(child) = round.child {
                let child = store.get_round(child).expect("child");
                assert!(child.shallowness > round.shallowness);
                let side = round.child_entry.expect("child slot");
                assert_eq!(store.parents_of(child.id)[side.index()], Some(round.id));
            }
        }
        assert_eq!(seeded, ids.iter().copied().collect::<BTreeSet<_>>());
    }
}

#[test]
fn rejects_bad_entry_lists_before_creating_anything() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 3);

    let err = BracketBuilder::new(&mut store)
        .build("solo", 1, &ids[..1])
        .expect_err("one entry");
    assert_eq!(err, BuildError::TooFewEntries(1));

    let err = BracketBuilder::new(&mut store)
        .build("dup", 1, &[ids[0], ids[1], ids[0]])
        .expect_err("duplicate");
    assert_eq!(err, BuildError::DuplicateEntry(ids[0]));

    let err = BracketBuilder::new(&mut store)
        .build("ghost", 1, &[ids[0], 99])
        .expect_err("missing");
    assert_eq!(err, BuildError::Store(StoreError::MissingEntry(99)));

    assert!(store.brackets().is_empty());
}

#[test]
fn seeded_entries_cannot_be_deleted_until_bracket_is_gone() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 4);
    let bracket = build(&mut store, &ids);

    assert_eq!(
        store.delete_entry(ids[0]),
        Err(StoreError::EntryInUse(ids[0]))
    );

    store.delete_bracket(bracket.id).expect("delete bracket");
    assert!(store.rounds_of(bracket.id).is_empty());
    assert!(store.get_round(bracket.rounds[0]).is_none());
    store.delete_entry(ids[0]).expect("delete entry");
    assert!(store.lookup_entry(ids[0]).is_none());
}

#[test]
fn user_names_are_unique() {
    let mut store = BracketStore::new();
    let alice = store.create_user("alice").expect("alice");
    assert_eq!(
        store.create_user("alice"),
        Err(StoreError::DuplicateUserName("alice".to_string()))
    );
    assert_eq!(store.user_by_name("alice"), Some(&alice));
    assert_eq!(store.lookup_user(alice.id), Some(alice));
}

#[test]
fn failed_round_creation_removes_the_partial_bracket() {
    let mut store = BracketStore::new();
    let ids = entries(&mut store, 6);
    let mut limited = RoundLimitedStore {
        inner: store,
        rounds_left: 3,
    };

    let err = BracketBuilder::new(&mut limited)
        .build("partial", 3, &ids)
        .expect_err("fourth round fails");
    assert!(matches!(err, BuildError::Store(StoreError::MissingBracket(_))));

    let mut store = limited.inner;
    assert!(store.brackets().is_empty());
    for round in 1..=3 {
        assert!(store.get_round(round).is_none(), "round {round} left behind");
    }

    // The entries are free again once the partial tree is gone.
    store.delete_entry(ids[0]).expect("entry no longer seeded");
}
