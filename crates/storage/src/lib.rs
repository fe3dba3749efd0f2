//! The typed MVCC memtable (spec §3.2, §4.2).
//!
//! A [`Memtable`] is the engine's only in-memory store: an ordered map from
//! user key to a version chain of [`VersionedCell`]s. It has no knowledge of
//! the WAL or of indexes above it — the control plane in `kvdb-engine`
//! assigns LSNs and replays the WAL into this structure; this crate only
//! guarantees that, given a `(key, seq)` pair, the right cell comes back.

pub mod memtable;

pub use memtable::{Memtable, MemtableStats, VersionedCell};
