use tempfile::TempDir;

use votebracket::{
    core::{repository::Repository, store::BracketStore},
    engine::{builder::BracketBuilder, round::cast_vote},
    model::RoundState,
    persist::{OpSink, sqlite::SqliteOpSink},
    types::{EntryId, Side, UserId},
};

fn seeded_store(n: usize, voters: usize) -> (BracketStore, Vec<EntryId>, Vec<UserId>) {
    let mut store = BracketStore::new();
    let entries: Vec<EntryId> = (0..n)
        .map(|_| store.create_entry().expect("entry").id)
        .collect();
    let users: Vec<UserId> = (0..voters)
        .map(|i| store.create_user(&format!("voter{i}")).expect("user").id)
        .collect();
    (store, entries, users)
}

#[test]
fn sqlite_replay_round_trips_bracket_and_votes() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("ops.db");

    let (mut store, entries, users) = seeded_store(5, 3);
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    let bracket = BracketBuilder::new(&mut store)
        .build("replay", 3, &entries)
        .expect("build");
    let first = bracket.rounds[0];
    cast_vote(&mut store, None, first, users[0], Side::Left).expect("vote");
    cast_vote(&mut store, None, first, users[0], Side::Right).expect("change");
    cast_vote(&mut store, None, first, users[1], Side::Right).expect("vote");
    cast_vote(&mut store, None, first, users[2], Side::Left).expect("vote");
    cast_vote(&mut store, None, bracket.rounds[1], users[0], Side::Left).expect("vote");

    let ops = store.drain_pending_ops();
    let last = sink.append_ops(&ops).expect("append");
    assert_eq!(last, store.latest_op_seq());
    assert_eq!(sink.latest_seq().expect("latest"), last);

    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());

    let r1 = replayed.get_round(first).expect("round");
    assert_eq!(r1.state(), RoundState::Resolved);
    assert_eq!(r1.winner(), Some(entries[1]));
    assert_eq!(
        replayed.parents_of(bracket.rounds[2]),
        store.parents_of(bracket.rounds[2])
    );
    assert_eq!(replayed.user_by_name("voter2").map(|u| u.id), Some(users[2]));
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let (mut store, entries, users) = seeded_store(8, 1);
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    let bracket = BracketBuilder::new(&mut store)
        .build("snap", 1, &entries)
        .expect("build");
    for round in &bracket.rounds[..4] {
        cast_vote(&mut store, None, *round, users[0], Side::Left).expect("vote");
    }
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert!(removed > 0);
    assert!(sink.load_events_after(0).expect("events").is_empty());

    // Ops after the snapshot are replayed on top of it.
    cast_vote(&mut store, None, bracket.rounds[4], users[0], Side::Right).expect("vote");
    sink.append_ops(&store.drain_pending_ops()).expect("append tail");

    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let mut replayed = reopened.load_store().expect("replay");
    assert_eq!(replayed.export_snapshot(), store.export_snapshot());

    // The replayed store keeps deciding rounds where the old one left off.
    let (_, resolution) =
        cast_vote(&mut replayed, None, bracket.rounds[5], users[0], Side::Left).expect("vote");
    assert!(resolution.is_some());
    let (_, resolution) =
        cast_vote(&mut replayed, None, bracket.rounds[6], users[0], Side::Left).expect("vote");
    assert!(resolution.expect("finale").champion);
    assert!(
        replayed
            .get_bracket(bracket.id)
            .and_then(|b| b.winner)
            .is_some()
    );
}

#[test]
fn deleted_bracket_stays_deleted_after_replay() {
    let tmp = TempDir::new().expect("tmp");
    let (mut store, entries, _) = seeded_store(4, 0);
    let mut sink = SqliteOpSink::open(tmp.path().join("gone.db")).expect("open sqlite");

    let bracket = BracketBuilder::new(&mut store)
        .build("gone", 1, &entries)
        .expect("build");
    store.delete_bracket(bracket.id).expect("delete");
    store.delete_entry(entries[0]).expect("delete entry");
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let replayed = sink.load_store().expect("replay");
    assert!(replayed.brackets().is_empty());
    assert!(replayed.get_entry(entries[0]).is_none());
    assert!(replayed.get_entry(entries[1]).is_some());
}
