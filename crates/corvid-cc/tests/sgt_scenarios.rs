//! End-to-end SGT scenarios on a single 4-cell column of zeros.

use std::sync::Arc;

use corvid_cc::{ConcurrencyControl, EpochRegistry, SerializationGraph, SgtCoordinator};
use corvid_error::TxnError;
use corvid_storage::Table;

fn setup() -> (Arc<SerializationGraph>, Arc<EpochRegistry>, Arc<Table<u64>>) {
    (
        Arc::new(SerializationGraph::default()),
        Arc::new(EpochRegistry::default()),
        Arc::new(Table::new(0_u64, 4)),
    )
}

fn coordinator(
    graph: &Arc<SerializationGraph>,
    registry: &Arc<EpochRegistry>,
) -> SgtCoordinator<u64> {
    SgtCoordinator::new(Arc::clone(graph), Arc::clone(registry))
}

#[test]
fn write_skew_aborts_exactly_one_candidate() {
    let (graph, registry, table) = setup();
    let mut c1 = coordinator(&graph, &registry);
    let mut c2 = coordinator(&graph, &registry);

    let t1 = c1.start();
    let t2 = c2.start();

    c1.read(&table, 0, t1).unwrap();
    c1.read(&table, 1, t1).unwrap();
    c2.read(&table, 0, t2).unwrap();
    c2.read(&table, 1, t2).unwrap();

    c1.write(&table, 0, 1, t1).unwrap();
    // The second write closes the anti-dependency cycle.
    let err = c2.write(&table, 1, 1, t2).unwrap_err();
    assert_eq!(err, TxnError::CycleDetected { tx: t2, offset: 1 });

    c1.commit(t1).unwrap();
    assert_eq!(table.snapshot(), vec![1, 0, 0, 0]);
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn concurrent_single_cell_writers_both_commit_in_some_order() {
    let graph = Arc::new(SerializationGraph::default());
    let registry = Arc::new(EpochRegistry::default());
    let table = Arc::new(Table::new(0_u64, 4));

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for value in [5_u64, 7] {
        let graph = Arc::clone(&graph);
        let registry = Arc::clone(&registry);
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            let mut coord = SgtCoordinator::new(graph, registry);
            barrier.wait();
            let mut attempts = 0;
            loop {
                attempts += 1;
                assert!(attempts < 1000, "writer of {value} starved");
                let tx = coord.start();
                if coord.write(&table, 0, value, tx).is_err() {
                    continue;
                }
                if coord.commit(tx).is_ok() {
                    return;
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Both committed; the survivor of the serialization order is in place.
    assert!(matches!(table.column().load(0), 5 | 7));
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn aborted_writer_cascades_to_its_dirty_reader() {
    let (graph, registry, table) = setup();
    let mut writer = coordinator(&graph, &registry);
    let mut reader = coordinator(&graph, &registry);

    let t1 = writer.start();
    let t2 = reader.start();

    writer.write(&table, 0, 9, t1).unwrap();
    assert_eq!(reader.read(&table, 0, t2).unwrap(), 9);

    writer.abort(t1);
    assert_eq!(table.column().load(0), 0);

    // The reader observed state that no longer exists: its next operation
    // fails, and the writer's commit reports it as a victim.
    let err = reader.write(&table, 1, 1, t2).unwrap_err();
    assert_eq!(err, TxnError::CascadeAborted { tx: t2 });

    let err = writer.commit(t1).unwrap_err();
    assert_eq!(
        err,
        TxnError::CommitAborted {
            tx: t1,
            cascaded: vec![t2]
        }
    );
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn self_upgrade_commits() {
    let (graph, registry, table) = setup();
    let mut coord = coordinator(&graph, &registry);

    let tx = coord.start();
    assert_eq!(coord.read(&table, 2, tx).unwrap(), 0);
    coord.write(&table, 2, 3, tx).unwrap();
    coord.commit(tx).unwrap();
    assert_eq!(table.column().load(2), 3);
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn commit_barrier_orders_reader_after_writer() {
    let (graph, registry, table) = setup();
    let mut writer = coordinator(&graph, &registry);
    let mut reader = coordinator(&graph, &registry);

    let t1 = writer.start();
    let t2 = reader.start();

    writer.write(&table, 0, 5, t1).unwrap();
    assert_eq!(reader.read(&table, 0, t2).unwrap(), 5);

    // Writer first, then the dependent reader: both pass the barrier.
    writer.commit(t1).unwrap();
    reader.commit(t2).unwrap();

    assert_eq!(table.column().load(0), 5);
    assert!(table.cell(0).accesses().is_empty());
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn lost_update_interleaving_is_rejected() {
    let (graph, registry, table) = setup();
    let mut c1 = coordinator(&graph, &registry);
    let mut c2 = coordinator(&graph, &registry);

    let t1 = c1.start();
    let t2 = c2.start();

    // Classic lost update: both read, both try to write the increment.
    assert_eq!(c1.read(&table, 0, t1).unwrap(), 0);
    assert_eq!(c2.read(&table, 0, t2).unwrap(), 0);

    c1.write(&table, 0, 1, t1).unwrap();
    // The second writer must wait for the first, but waiting would close
    // the cycle with its own anti-dependency: it aborts instead.
    let err = c2.write(&table, 0, 1, t2).unwrap_err();
    assert_eq!(err, TxnError::CycleDetected { tx: t2, offset: 0 });

    c1.commit(t1).unwrap();
    assert_eq!(table.column().load(0), 1);
    assert_eq!(graph.node_count(), 0);
}
