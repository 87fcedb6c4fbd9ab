//! Criterion micro-benchmarks for the concurrency-control hot paths.
//!
//! Benchmarks:
//! - Cell ticket acquire/release latency
//! - Lock table acquire/release (shared and exclusive)
//! - Serialization-graph edge insertion + cycle check
//! - Single-transaction read/write/commit round trips per strategy

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use corvid_cc::{
    ConcurrencyControl, DependencyKind, EpochRegistry, LockManager, SerializationGraph,
    SgtCoordinator, SsplCoordinator,
};
use corvid_storage::{DEFAULT_SPIN_YIELD_THRESHOLD, Table};
use corvid_types::{AccessEntry, AccessMode, TableId, TxId};

fn bench_ticket_protocol(c: &mut Criterion) {
    let table: Table<u64> = Table::new(0, 1);
    let entry = AccessEntry::encode(TxId::from_parts(0, 1), AccessMode::Read);

    c.bench_function("cell_ticket_acquire_release", |b| {
        b.iter(|| {
            let cell = table.cell(0);
            let prv = cell.acquire(black_box(entry), DEFAULT_SPIN_YIELD_THRESHOLD);
            cell.accesses().erase(prv);
            cell.release(prv);
        });
    });
}

fn bench_lock_table(c: &mut Criterion) {
    let lm = LockManager::new();
    let table = TableId::new(1);
    let tx = TxId::from_parts(0, 1);

    c.bench_function("lock_shared_acquire_release", |b| {
        b.iter(|| {
            lm.try_lock(black_box(tx), false, table, 0);
            lm.unlock(tx, table, 0);
        });
    });

    c.bench_function("lock_exclusive_acquire_release", |b| {
        b.iter(|| {
            lm.try_lock(black_box(tx), true, table, 0);
            lm.unlock(tx, table, 0);
        });
    });
}

fn bench_graph_edges(c: &mut Criterion) {
    c.bench_function("sgt_edge_insert_and_check", |b| {
        let graph = SerializationGraph::default();
        let from = TxId::from_parts(0, 1);
        let to = TxId::from_parts(0, 2);
        graph.create_node(from);
        graph.create_node(to);

        b.iter(|| {
            black_box(graph.insert_and_check(from, to, DependencyKind::ReadWrite));
        });
    });
}

fn bench_round_trips(c: &mut Criterion) {
    c.bench_function("ss2pl_read_write_commit", |b| {
        let lm = Arc::new(LockManager::new());
        let registry = Arc::new(EpochRegistry::default());
        let mut coord: SsplCoordinator<u64> = SsplCoordinator::new(lm, registry);
        let table = Arc::new(Table::new(0_u64, 8));

        b.iter(|| {
            let tx = coord.start();
            let value = coord.read(&table, 3, tx).unwrap();
            coord.write(&table, 3, value + 1, tx).unwrap();
            coord.commit(tx).unwrap();
        });
    });

    c.bench_function("sgt_read_write_commit", |b| {
        let graph = Arc::new(SerializationGraph::default());
        let registry = Arc::new(EpochRegistry::default());
        let mut coord: SgtCoordinator<u64> = SgtCoordinator::new(graph, registry);
        let table = Arc::new(Table::new(0_u64, 8));

        b.iter(|| {
            let tx = coord.start();
            let value = coord.read(&table, 3, tx).unwrap();
            coord.write(&table, 3, value + 1, tx).unwrap();
            coord.commit(tx).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_ticket_protocol,
    bench_lock_table,
    bench_graph_edges,
    bench_round_trips
);
criterion_main!(benches);
