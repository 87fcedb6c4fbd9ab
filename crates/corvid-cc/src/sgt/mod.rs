//! Serialization-graph testing.
//!
//! No locks are held to commit. Each operation inserts dependency edges from
//! prior accessors of its cell into a shared graph of live transactions; an
//! operation whose edge would close a cycle aborts its transaction instead.
//! The subgraph of committed transactions is acyclic at every instant, which
//! is exactly serializability — every serializable schedule is admitted, no
//! unserializable one commits.

mod coordinator;
mod graph;

pub use coordinator::SgtCoordinator;
pub use graph::{DependencyKind, SerializationGraph};
