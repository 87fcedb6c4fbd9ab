//! The shared graph of live transactions.
//!
//! Nodes are keyed by transaction id: an edge is a relation between ids, not
//! a reference count, so inserting one never owns the target node. Node
//! reclamation is deferred through the aborting/committing transaction's
//! epoch guard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use corvid_types::TxId;

use crate::epoch::EpochGuard;
use crate::metrics::CcMetrics;

/// How one transaction depends on a prior accessor of the same cell.
///
/// `WriteRead` (a read observed an uncommitted write) and `WriteWrite`
/// (a write overwrote an uncommitted write) expose uncommitted state, so the
/// predecessor's abort cascades along them. `ReadWrite` (a write follows a
/// read) is an anti-dependency: it orders the transactions but carries no
/// data, so aborts do not cascade along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    WriteRead,
    WriteWrite,
    ReadWrite,
}

impl DependencyKind {
    /// Whether a predecessor abort must propagate along this edge.
    #[must_use]
    pub const fn cascades(self) -> bool {
        !matches!(self, Self::ReadWrite)
    }
}

#[derive(Debug, Default)]
struct NodeLinks {
    /// Sources of incoming edges.
    incoming: HashSet<TxId>,
    /// Targets of outgoing edges with the strongest kind observed.
    outgoing: HashMap<TxId, DependencyKind>,
}

/// One live transaction.
#[derive(Debug)]
struct SgNode {
    tx: TxId,
    committed: AtomicBool,
    abort_needed: AtomicBool,
    links: Mutex<NodeLinks>,
}

impl SgNode {
    fn new(tx: TxId) -> Self {
        Self {
            tx,
            committed: AtomicBool::new(false),
            abort_needed: AtomicBool::new(false),
            links: Mutex::new(NodeLinks::default()),
        }
    }
}

/// The shared SGT strategy object.
pub struct SerializationGraph {
    nodes: RwLock<HashMap<TxId, Arc<SgNode>>>,
    cycle_search_limit: usize,
    metrics: CcMetrics,
}

impl SerializationGraph {
    /// Graph with the given cycle-search node budget.
    #[must_use]
    pub fn new(cycle_search_limit: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            cycle_search_limit,
            metrics: CcMetrics::default(),
        }
    }

    /// Strategy metrics.
    #[must_use]
    pub fn metrics(&self) -> &CcMetrics {
        &self.metrics
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Register a node for a freshly started transaction.
    pub fn create_node(&self, tx: TxId) {
        let prior = self.nodes.write().insert(tx, Arc::new(SgNode::new(tx)));
        debug_assert!(prior.is_none(), "duplicate graph node for {tx}");
    }

    /// Whether a cascading predecessor marked `tx` for abort.
    #[must_use]
    pub fn needs_abort(&self, tx: TxId) -> bool {
        self.nodes
            .read()
            .get(&tx)
            .is_some_and(|node| node.abort_needed.load(Ordering::Acquire))
    }

    /// Whether `tx` is out of the way of writers: committed, or gone
    /// entirely (a finished transaction's node is unlinked).
    #[must_use]
    pub fn is_finished(&self, tx: TxId) -> bool {
        self.nodes
            .read()
            .get(&tx)
            .is_none_or(|node| node.committed.load(Ordering::Acquire))
    }

    /// Insert the edge `from -> to` and test for a cycle among live,
    /// non-committed transactions.
    ///
    /// Returns `true` when the edge is admissible (inserted, or unnecessary
    /// because `from` is finished or equals `to`). Returns `false` when the
    /// edge closes a cycle — the edge is removed again and `to` must abort.
    /// Exhausting the node budget counts as a cycle: that can over-abort but
    /// never admits an unserializable schedule.
    pub fn insert_and_check(&self, from: TxId, to: TxId, kind: DependencyKind) -> bool {
        if from == to {
            return true;
        }

        let nodes = self.nodes.read();
        let Some(from_node) = nodes.get(&from) else {
            return true;
        };
        if from_node.committed.load(Ordering::Acquire) {
            return true;
        }
        let Some(to_node) = nodes.get(&to) else {
            debug_assert!(false, "edge target {to} has no node");
            return true;
        };

        Self::link(from_node, to_node, kind);

        if self.reaches(&nodes, to, from) {
            Self::unlink_edge(from_node, to_node);
            drop(nodes);
            tracing::debug!(
                target: "corvid_cc::sgt",
                from = %from,
                to = %to,
                ?kind,
                "edge rejected: cycle"
            );
            self.metrics.record_conflict_denial();
            return false;
        }
        true
    }

    /// Lock both link sets in id order and record the edge, keeping the
    /// strongest kind on duplicates.
    fn link(from_node: &Arc<SgNode>, to_node: &Arc<SgNode>, kind: DependencyKind) {
        let (first, second) = if from_node.tx < to_node.tx {
            (from_node, to_node)
        } else {
            (to_node, from_node)
        };
        let mut first_links = first.links.lock();
        let mut second_links = second.links.lock();
        let (from_links, to_links) = if first.tx == from_node.tx {
            (&mut *first_links, &mut *second_links)
        } else {
            (&mut *second_links, &mut *first_links)
        };

        to_links.incoming.insert(from_node.tx);
        from_links
            .outgoing
            .entry(to_node.tx)
            .and_modify(|existing| {
                if kind.cascades() {
                    *existing = kind;
                }
            })
            .or_insert(kind);
    }

    fn unlink_edge(from_node: &Arc<SgNode>, to_node: &Arc<SgNode>) {
        let (first, second) = if from_node.tx < to_node.tx {
            (from_node, to_node)
        } else {
            (to_node, from_node)
        };
        let mut first_links = first.links.lock();
        let mut second_links = second.links.lock();
        let (from_links, to_links) = if first.tx == from_node.tx {
            (&mut *first_links, &mut *second_links)
        } else {
            (&mut *second_links, &mut *first_links)
        };

        to_links.incoming.remove(&from_node.tx);
        from_links.outgoing.remove(&to_node.tx);
    }

    /// Bounded DFS over outgoing edges of non-committed nodes: can `start`
    /// reach `goal`? Committed nodes are skipped — their incoming edges are
    /// all committed (the commit barrier guarantees it), so no cycle among
    /// live transactions runs through them.
    fn reaches(&self, nodes: &HashMap<TxId, Arc<SgNode>>, start: TxId, goal: TxId) -> bool {
        let mut stack = vec![start];
        let mut visited: HashSet<TxId> = HashSet::new();
        let mut budget = self.cycle_search_limit;

        while let Some(current) = stack.pop() {
            if current == goal {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if budget == 0 {
                tracing::warn!(
                    target: "corvid_cc::sgt",
                    start = %start,
                    "cycle search budget exhausted; treating as cyclic"
                );
                return true;
            }
            budget -= 1;

            let Some(node) = nodes.get(&current) else {
                continue;
            };
            if node.committed.load(Ordering::Acquire) {
                continue;
            }
            stack.extend(node.links.lock().outgoing.keys().copied());
        }
        false
    }

    /// Whether every incoming edge of `tx` originates from a committed
    /// transaction — the commit barrier predicate.
    #[must_use]
    pub fn commit_ready(&self, tx: TxId) -> bool {
        let nodes = self.nodes.read();
        let Some(node) = nodes.get(&tx) else {
            return true;
        };
        let incoming: Vec<TxId> = node.links.lock().incoming.iter().copied().collect();
        incoming.into_iter().all(|source| {
            nodes
                .get(&source)
                .is_none_or(|src| src.committed.load(Ordering::Acquire))
        })
    }

    /// Mark `tx` committed. Outgoing dependents observing this lose their
    /// reason to wait for it.
    pub fn set_committed(&self, tx: TxId) {
        if let Some(node) = self.nodes.read().get(&tx) {
            node.committed.store(true, Ordering::Release);
        }
    }

    /// Walk `tx`'s outgoing cascading edges, marking each target for abort
    /// and collecting its id into `cascade`.
    pub fn propagate_abort(&self, tx: TxId, cascade: &mut impl Extend<TxId>) {
        let nodes = self.nodes.read();
        let Some(node) = nodes.get(&tx) else {
            return;
        };
        let outgoing: Vec<(TxId, DependencyKind)> = node
            .links
            .lock()
            .outgoing
            .iter()
            .map(|(target, kind)| (*target, *kind))
            .collect();

        let mut marked = 0_u64;
        for (target, kind) in outgoing {
            if !kind.cascades() {
                continue;
            }
            if let Some(victim) = nodes.get(&target) {
                victim.abort_needed.store(true, Ordering::Release);
                cascade.extend(std::iter::once(target));
                marked += 1;
                tracing::debug!(
                    target: "corvid_cc::sgt",
                    from = %tx,
                    to = %target,
                    "cascading abort"
                );
            }
        }
        if marked > 0 {
            self.metrics.record_cascade_marks(marked);
        }
    }

    /// Unlink `tx` from the graph at its terminal call. The node itself is
    /// retired through `guard` so concurrent readers that already hold a
    /// reference stay valid until their epochs close.
    pub fn remove_node(&self, tx: TxId, guard: Option<&EpochGuard>) {
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.remove(&tx) else {
            return;
        };

        let links = std::mem::take(&mut *node.links.lock());
        for source in &links.incoming {
            if let Some(src) = nodes.get(source) {
                src.links.lock().outgoing.remove(&tx);
            }
        }
        for target in links.outgoing.keys() {
            if let Some(dst) = nodes.get(target) {
                dst.links.lock().incoming.remove(&tx);
            }
        }

        match guard {
            Some(guard) => guard.defer_retire(node),
            None => drop(node),
        }
    }
}

impl std::fmt::Debug for SerializationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationGraph")
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl Default for SerializationGraph {
    fn default() -> Self {
        Self::new(crate::config::CcConfig::default().cycle_search_limit)
    }
}
