//! Locking and commit-sequencing primitives shared by the control plane
//! (spec §5).
//!
//! This crate owns no data itself — it's the lock handles the engine
//! threads through `commit_tx`, index maintenance, and the memtable
//! compaction hook. The WAL's own append mutex lives inside
//! [`kvdb_durability::wal::SegmentedWal`] and isn't duplicated here.

pub mod commit;
pub mod index_lock;
pub mod snapshot;

pub use commit::{CommitGuard, CommitLock};
pub use index_lock::{IndexLockRegistry, IndexReadGuard, IndexWriteGuard};
pub use snapshot::SnapshotRegistry;
