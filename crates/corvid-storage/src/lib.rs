//! Column storage and per-cell access bookkeeping.
//!
//! A [`Table`] bundles one [`Column`] of values with the per-cell metadata
//! the concurrency strategies drive: an ordered access list handing out
//! strictly increasing tickets, and the `lsn` ticket lock that serializes
//! operations on one cell without serializing different cells.

pub mod cache_aligned;
pub mod cell;
pub mod column;
pub mod table;

pub use cache_aligned::{CACHE_LINE_BYTES, CacheAligned};
pub use cell::{AccessList, Cell, DEFAULT_SPIN_YIELD_THRESHOLD};
pub use column::{Column, Value};
pub use table::Table;
