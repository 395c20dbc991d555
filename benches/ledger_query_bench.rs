//! Performance benchmarks for ledger appends and pagination
//!
//! Targets:
//! - Append with trim: <5us per message
//! - Any query mode on a full 1000-entry ledger: <50us

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use agent_relay::{types::MessageExtra, HistoryQuery, Ledger, MessageType, Role};

/// Ledger holding `count` appends, trimmed to `max_history`
fn create_test_ledger(max_history: usize, count: usize) -> Ledger {
    let mut ledger = Ledger::new(max_history);
    for i in 0..count {
        ledger.append(
            Role::Assistant,
            format!("message body {}", i),
            MessageType::Normal,
            MessageExtra::default(),
        );
    }
    ledger
}

/// Benchmark 1: Appends at the history bound
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_with_trim", |b| {
        let mut ledger = create_test_ledger(1000, 1000);
        b.iter(|| {
            ledger.append(
                Role::User,
                black_box("hello"),
                MessageType::Normal,
                MessageExtra::default(),
            )
        });
    });

    group.finish();
}

/// Benchmark 2: Query modes
fn bench_query_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_modes");

    for size in [100usize, 1000] {
        let ledger = create_test_ledger(size, size * 2);
        let first = size as u64;
        let middle = first + size as u64 / 2;

        let queries = [
            ("tail_50", HistoryQuery::tail(50)),
            ("head_50", HistoryQuery::head(50)),
            ("around_10", HistoryQuery::around(middle, 10)),
            ("after_50", HistoryQuery::after(middle).with_limit(50)),
            ("before_50", HistoryQuery::before(middle).with_limit(50)),
            ("all", HistoryQuery::default()),
        ];

        for (name, query) in queries {
            group.bench_with_input(BenchmarkId::new(name, size), &query, |b, query| {
                b.iter(|| ledger.query(black_box(query)).map(|page| page.messages.len()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_append, bench_query_modes);
criterion_main!(benches);
