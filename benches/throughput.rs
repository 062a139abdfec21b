use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use votebracket::{
    core::{repository::Repository, store::BracketStore},
    engine::{builder::BracketBuilder, round::cast_vote},
    model::RoundState,
    types::{EntryId, Side},
};

fn seeded(n: usize) -> (BracketStore, Vec<EntryId>) {
    let mut store = BracketStore::new();
    let entries = (0..n)
        .map(|_| store.create_entry().expect("entry").id)
        .collect();
    (store, entries)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_bracket");
    for n in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let (mut store, entries) = seeded(n);
                BracketBuilder::new(&mut store)
                    .build("bench", 1, &entries)
                    .expect("build");
            });
        });
    }
    group.finish();
}

fn bench_play_out(c: &mut Criterion) {
    c.bench_function("play_out_1024", |b| {
        b.iter(|| {
            let (mut store, entries) = seeded(1024);
            let voters: Vec<_> = (0..3)
                .map(|i| store.create_user(&format!("v{i}")).expect("user").id)
                .collect();
            let bracket = BracketBuilder::new(&mut store)
                .build("bench", 3, &entries)
                .expect("build");

            for round in &bracket.rounds {
                assert_eq!(
                    store.get_round(*round).map(|r| r.state()),
                    Some(RoundState::Voting)
                );
                for (i, voter) in voters.iter().enumerate() {
                    let side = if i % 2 == 0 { Side::Left } else { Side::Right };
                    cast_vote(&mut store, None, *round, *voter, side).expect("vote");
                }
                store.drain_pending_ops();
            }
            assert!(store.get_bracket(bracket.id).and_then(|b| b.winner).is_some());
        });
    });
}

criterion_group!(benches, bench_build, bench_play_out);
criterion_main!(benches);
