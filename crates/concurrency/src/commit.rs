//! The single commit lock serializing transaction commit (spec §5): "single-
//! writer at any instant (serialized by the control plane's commit lock)".
//!
//! Grounded on `manager.rs`'s `commit()` sequence (validate → allocate
//! version → append WAL → apply writes) — this crate provides just the
//! lock; the sequence itself is `kvdb_engine::Database::commit_tx`'s job,
//! since only the engine has the WAL/memtable/index handles to sequence.

use parking_lot::{Mutex, MutexGuard};

/// Held for the duration of one transaction's commit. While held, no other
/// transaction may allocate an LSN or apply writes — this is what keeps LSN
/// assignment, WAL append order, and memtable apply order in lockstep.
pub struct CommitGuard<'a> {
    _inner: MutexGuard<'a, ()>,
}

/// A single global mutex. Unlike the teacher's per-branch
/// `DashMap<BranchId, Mutex<()>>` (this specification has no branch
/// concept to shard by), commits across the whole engine are serialized by
/// one lock.
#[derive(Default)]
pub struct CommitLock {
    inner: Mutex<()>,
}

impl CommitLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the commit lock is free, then holds it until the
    /// returned guard is dropped.
    pub fn lock(&self) -> CommitGuard<'_> {
        CommitGuard { _inner: self.inner.lock() }
    }

    /// Non-blocking variant: `None` if another commit is in progress.
    pub fn try_lock(&self) -> Option<CommitGuard<'_>> {
        self.inner.try_lock().map(|g| CommitGuard { _inner: g })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_commit_blocks_until_first_releases() {
        let lock = Arc::new(CommitLock::new());
        let guard = lock.lock();
        let lock2 = lock.clone();
        let handle = thread::spawn(move || lock2.try_lock().is_some());
        // The background thread should observe the lock held.
        assert!(!handle.join().unwrap());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn try_lock_succeeds_when_free() {
        let lock = CommitLock::new();
        assert!(lock.try_lock().is_some());
    }
}
