//! The control plane (spec §4.9, §6.5): orchestrates the WAL, memtable,
//! indexes, and the checkpoint/backup managers behind one `Database`
//! handle. Grounded on
//! `examples/stratadb-labs-strata-core/crates/engine/src/database/mod.rs`'s
//! orchestration role and its open/recovery sequencing, narrowed from that
//! teacher's branch-aware, closure-based transaction API down to this
//! specification's simpler buffered `begin_tx`/`commit_tx`/`rollback_tx`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use kvdb_concurrency::{CommitLock, SnapshotRegistry};
use kvdb_core::{deserialize_binary, serialize_binary, Error, Result, TypedValue};
use kvdb_durability::wal::payload;
use kvdb_durability::{
    BackupManager, BackupResult, CheckpointManager, CheckpointResult, CheckpointTrigger, DatabaseSnapshot,
    EntryKind, FileLsnTracker, RecoveryManager, RecoveryResult, SegmentedWal,
};
use kvdb_executor::{QueryCondition, QueryOptimizer, QueryPlan};
use kvdb_search::{IndexKind, IndexManager, IndexMetadata, IndexQuery, LookupResult};
use kvdb_storage::Memtable;
use parking_lot::Mutex;
use tracing::{debug, info, info_span};

use crate::change_stream::{change_channel, ChangeEvent, ChangeReceiver, ChangeSender};
use crate::config::EngineConfig;

const CHECKPOINT_DIR: &str = "checkpoints";
const BACKUP_DIR: &str = "backups";
const WAL_DIR: &str = "wal";

/// One buffered operation inside a not-yet-committed transaction (spec
/// §4.9: `begin_tx` "buffers `put`/`del` operations locally").
enum TxOp {
    Put(String, TypedValue),
    Del(String),
}

/// A transaction buffer returned by [`Database::begin_tx`]. Nothing is
/// visible to other readers until it's passed to [`Database::commit_tx`];
/// dropping it without committing is equivalent to `rollback_tx`.
#[derive(Default)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn put(&mut self, key: impl Into<String>, value: TypedValue) {
        self.ops.push(TxOp::Put(key.into(), value));
    }

    pub fn del(&mut self, key: impl Into<String>) {
        self.ops.push(TxOp::Del(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Shared state behind every `Database` handle. Split out from `Database`
/// itself so the checkpoint manager's `&dyn DatabaseSnapshot` and the
/// auto-checkpoint background thread can both hold an `Arc<Inner>`
/// without `Database` needing to be `Clone`.
struct Inner {
    data_dir: PathBuf,
    memtable: Memtable,
    wal: SegmentedWal,
    index_manager: Arc<IndexManager>,
    optimizer: QueryOptimizer,
    commit_lock: CommitLock,
    snapshots: SnapshotRegistry,
    checkpoint_mgr: CheckpointManager,
    backup_mgr: Mutex<BackupManager>,
    file_tracker: FileLsnTracker,
    config: EngineConfig,
    change_tx: ChangeSender,
    worker_stop: AtomicBool,
    txns_since_checkpoint: AtomicU64,
    bytes_since_checkpoint: AtomicU64,
}

/// The embeddable key-value storage engine (spec §6.5's "control surface").
///
/// Opening a `Database` recovers from any WAL entries left over from a
/// prior session, then leaves the instance ready for reads and writes.
/// One `Database` owns one on-disk directory; two `Database`s must not be
/// opened against the same `dir` concurrently (nothing enforces this —
/// matching the specification's single-node, single-process scope).
pub struct Database {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    change_rx: Mutex<Option<ChangeReceiver>>,
}

impl Inner {
    fn capture_typed_value(out: &mut Vec<u8>, value: &TypedValue) {
        let bytes = serialize_binary(value);
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, bytes.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&bytes);
    }

    fn read_typed_value(bytes: &[u8], cursor: &mut usize) -> Result<TypedValue> {
        if bytes.len() < *cursor + 4 {
            return Err(Error::CheckpointCorrupted {
                checkpoint_id: "<capture>".into(),
                reason: "truncated value length".into(),
            });
        }
        let len = LittleEndian::read_u32(&bytes[*cursor..*cursor + 4]) as usize;
        *cursor += 4;
        if bytes.len() < *cursor + len {
            return Err(Error::CheckpointCorrupted {
                checkpoint_id: "<capture>".into(),
                reason: "truncated value bytes".into(),
            });
        }
        let value = deserialize_binary(&bytes[*cursor..*cursor + len])?;
        *cursor += len;
        Ok(value)
    }
}

impl DatabaseSnapshot for Inner {
    /// `lsn (u64) | count (u64) | { key_len (u32) | key | value_len (u32)
    /// | serialize_binary(value) } × count`. Only the live keyspace is
    /// captured, not the full MVCC history — restoring replays these as
    /// fresh cells at the checkpoint's own LSN, which is sufficient since
    /// no reader can hold a snapshot older than the checkpoint across a
    /// restore.
    fn capture_state(&self) -> Result<Vec<u8>> {
        let lsn = self.wal.current_lsn();
        let rows = self.memtable.scan_all(lsn);

        let mut out = Vec::with_capacity(64 + rows.len() * 32);
        let mut header = [0u8; 16];
        LittleEndian::write_u64(&mut header[0..8], lsn);
        LittleEndian::write_u64(&mut header[8..16], rows.len() as u64);
        out.extend_from_slice(&header);

        for (key, value) in &rows {
            let mut len_buf = [0u8; 4];
            LittleEndian::write_u32(&mut len_buf, key.len() as u32);
            out.extend_from_slice(&len_buf);
            out.extend_from_slice(key.as_bytes());
            Self::capture_typed_value(&mut out, value);
        }
        Ok(out)
    }

    fn restore_state(&self, data: &[u8]) -> Result<()> {
        if data.len() < 16 {
            return Err(Error::CheckpointCorrupted {
                checkpoint_id: "<restore>".into(),
                reason: "truncated checkpoint header".into(),
            });
        }
        let lsn = LittleEndian::read_u64(&data[0..8]);
        let count = LittleEndian::read_u64(&data[8..16]) as usize;
        let mut cursor = 16usize;

        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < cursor + 4 {
                return Err(Error::CheckpointCorrupted {
                    checkpoint_id: "<restore>".into(),
                    reason: "truncated key length".into(),
                });
            }
            let key_len = LittleEndian::read_u32(&data[cursor..cursor + 4]) as usize;
            cursor += 4;
            if data.len() < cursor + key_len {
                return Err(Error::CheckpointCorrupted {
                    checkpoint_id: "<restore>".into(),
                    reason: "truncated key bytes".into(),
                });
            }
            let key = String::from_utf8(data[cursor..cursor + key_len].to_vec())
                .map_err(|e| Error::CheckpointCorrupted { checkpoint_id: "<restore>".into(), reason: e.to_string() })?;
            cursor += key_len;
            let value = Self::read_typed_value(data, &mut cursor)?;
            rows.push((key, value));
        }

        // `Memtable` has no `clear`: keys present now but absent from the
        // captured image are deleted at the checkpoint's LSN, and the
        // captured rows are (re-)applied at that same LSN, so a read at
        // `lsn` afterward sees exactly the captured state.
        for existing_key in self.memtable.scan_all(u64::MAX).into_iter().map(|(k, _)| k) {
            if !rows.iter().any(|(k, _)| k == &existing_key) {
                self.memtable.delete(&existing_key, lsn);
            }
        }
        for (key, value) in rows {
            self.memtable.put(&key, value, lsn);
        }
        self.wal.rollback_to(lsn)?;
        Ok(())
    }

    fn current_lsn(&self) -> u64 {
        self.wal.current_lsn()
    }
}

impl Database {
    /// Opens (or creates) a database rooted at `dir` with
    /// [`EngineConfig::default`].
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, EngineConfig::default())
    }

    /// Opens (or creates) a database rooted at `dir`, replaying any WAL
    /// entries left from a prior session before returning.
    pub fn open_with_config(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let span = info_span!("database_open", dir = %dir.as_ref().display());
        let _enter = span.enter();

        let data_dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let wal_dir = data_dir.join(WAL_DIR);

        let memtable = Memtable::new();
        let index_manager = Arc::new(IndexManager::new());

        let checkpoint_mgr = CheckpointManager::open(
            data_dir.join(CHECKPOINT_DIR),
            kvdb_durability::CheckpointConfig {
                auto_checkpoint_enabled: true,
                time_interval_secs: config.checkpoint_interval_secs,
                transaction_count_threshold: 10_000,
                wal_size_threshold_bytes: 100 * 1024 * 1024,
                max_checkpoints_to_keep: config.checkpoint_keep,
            },
        )?;

        let checkpoint_lsn = checkpoint_mgr.latest()?.map(|c| c.lsn).unwrap_or(0);

        let wal = SegmentedWal::open(&wal_dir, config.wal_max_segment_size, config.effective_wal_auto_flush())?;

        let recovery: RecoveryResult = RecoveryManager::recover_from_crash(
            &wal_dir,
            checkpoint_lsn,
            |key, value, lsn| memtable.put(key, value.clone(), lsn),
            |key, lsn| memtable.delete(key, lsn),
        )?;
        info!(
            entries = recovery.entries_recovered,
            corrupted = recovery.segments_corrupted,
            clean = recovery.is_clean(),
            "recovery complete"
        );

        let optimizer = QueryOptimizer::new(index_manager.clone())
            .with_recommend_threshold(config.index_recommend_threshold as usize);

        let (change_tx, change_rx) = change_channel(config.change_stream_capacity);

        let inner = Arc::new(Inner {
            data_dir: data_dir.clone(),
            memtable,
            wal,
            index_manager,
            optimizer,
            commit_lock: CommitLock::new(),
            snapshots: SnapshotRegistry::new(),
            checkpoint_mgr,
            backup_mgr: Mutex::new(BackupManager::open(data_dir.join(BACKUP_DIR))?),
            file_tracker: FileLsnTracker::new(),
            config,
            change_tx,
            worker_stop: AtomicBool::new(false),
            txns_since_checkpoint: AtomicU64::new(0),
            bytes_since_checkpoint: AtomicU64::new(0),
        });

        let worker = Self::spawn_checkpoint_worker(inner.clone());

        Ok(Database { inner, worker: Mutex::new(Some(worker)), change_rx: Mutex::new(Some(change_rx)) })
    }

    fn spawn_checkpoint_worker(inner: Arc<Inner>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let poll = Duration::from_millis(500);
            let mut last_checkpoint = Instant::now();
            while !inner.worker_stop.load(Ordering::Relaxed) {
                std::thread::sleep(poll);
                if inner.worker_stop.load(Ordering::Relaxed) {
                    break;
                }
                if last_checkpoint.elapsed().as_secs() < inner.config.checkpoint_interval_secs {
                    continue;
                }
                let txns = inner.txns_since_checkpoint.swap(0, Ordering::Relaxed);
                if txns == 0 {
                    last_checkpoint = Instant::now();
                    continue;
                }
                match inner.checkpoint_mgr.create(inner.as_ref(), CheckpointTrigger::TimeInterval, "auto") {
                    Ok(result) => {
                        info!(lsn = result.info.lsn, elapsed_ms = result.elapsed.as_millis() as u64, "auto checkpoint");
                        let _ = inner.checkpoint_mgr.cleanup_old(inner.config.checkpoint_keep);
                    }
                    Err(e) => tracing::warn!(error = %e, "auto checkpoint failed"),
                }
                last_checkpoint = Instant::now();
            }
        })
    }

    // ---- point operations -------------------------------------------------

    pub fn put(&self, key: &str, value: TypedValue) -> Result<u64> {
        let _guard = self.inner.commit_lock.lock();
        let lsn = self.inner.wal.write(EntryKind::Put, payload::encode_put(key, &value))?;
        self.apply_put(key, value, lsn)?;
        self.inner.txns_since_checkpoint.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    pub fn get(&self, key: &str) -> Option<TypedValue> {
        self.inner.memtable.get(key, self.get_snapshot())
    }

    pub fn del(&self, key: &str) -> Result<u64> {
        let _guard = self.inner.commit_lock.lock();
        let lsn = self.inner.wal.write(EntryKind::Del, payload::encode_del(key))?;
        self.apply_delete(key, lsn)?;
        self.inner.txns_since_checkpoint.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    fn apply_put(&self, key: &str, value: TypedValue, lsn: u64) -> Result<()> {
        let before = self.inner.memtable.get(key, lsn.saturating_sub(1));
        self.inner.memtable.put(key, value.clone(), lsn);
        match &before {
            Some(old) => self.inner.index_manager.update_indexes(key, old, &value)?,
            None => self.inner.index_manager.add_to_indexes(key, &value)?,
        }
        self.inner.change_tx.send(ChangeEvent { lsn, key: key.to_string(), before, after: Some(value) });
        Ok(())
    }

    fn apply_delete(&self, key: &str, lsn: u64) -> Result<()> {
        let before = self.inner.memtable.get(key, lsn.saturating_sub(1));
        self.inner.memtable.delete(key, lsn);
        if let Some(old) = &before {
            self.inner.index_manager.remove_from_indexes(key, old);
        }
        self.inner.change_tx.send(ChangeEvent { lsn, key: key.to_string(), before, after: None });
        Ok(())
    }

    /// Runs a memtable container mutation (list/set/map) through the
    /// commit path. Unlike plain `put`/`del`, the WAL entry can only be
    /// built once the mutated container's new value is known, so the
    /// memtable apply necessarily precedes the WAL append here instead of
    /// following it; validation errors (`WrongType`, `OutOfRange`,
    /// `Missing`) are raised by `mutate` before anything is appended.
    fn commit_container_op<T>(&self, key: &str, mutate: impl FnOnce(u64) -> Result<T>) -> Result<(u64, T)> {
        let _guard = self.inner.commit_lock.lock();
        let lsn = self.inner.wal.next_lsn();
        let before = self.inner.memtable.get(key, lsn.saturating_sub(1));
        let outcome = mutate(lsn)?;
        let after = self
            .inner
            .memtable
            .get(key, lsn)
            .expect("container mutation must leave a readable cell at its own seq");
        let assigned = self.inner.wal.write(EntryKind::Put, payload::encode_put(key, &after))?;
        debug_assert_eq!(assigned, lsn, "commit lock guarantees no interleaving WAL write");
        match &before {
            Some(old) => self.inner.index_manager.update_indexes(key, old, &after)?,
            None => self.inner.index_manager.add_to_indexes(key, &after)?,
        }
        self.inner.change_tx.send(ChangeEvent { lsn, key: key.to_string(), before, after: Some(after) });
        self.inner.txns_since_checkpoint.fetch_add(1, Ordering::Relaxed);
        Ok((lsn, outcome))
    }

    pub fn list_append(&self, key: &str, value: TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.list_append(key, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn list_prepend(&self, key: &str, value: TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.list_prepend(key, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn list_remove(&self, key: &str, index: i64) -> Result<(u64, TypedValue)> {
        let (lsn, removed) = self.commit_container_op(key, |seq| self.inner.memtable.list_remove(key, index, seq))?;
        Ok((lsn, removed))
    }

    pub fn list_set(&self, key: &str, index: i64, value: TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.list_set(key, index, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn list_get(&self, key: &str, index: i64) -> Result<TypedValue> {
        self.inner.memtable.list_get(key, index, self.get_snapshot())
    }

    pub fn list_size(&self, key: &str) -> Result<usize> {
        self.inner.memtable.list_size(key, self.get_snapshot())
    }

    pub fn set_add(&self, key: &str, value: TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.set_add(key, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn set_remove(&self, key: &str, value: &TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.set_remove(key, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn set_contains(&self, key: &str, value: &TypedValue) -> Result<bool> {
        self.inner.memtable.set_contains(key, value, self.get_snapshot())
    }

    pub fn set_size(&self, key: &str) -> Result<usize> {
        self.inner.memtable.set_size(key, self.get_snapshot())
    }

    pub fn map_put(&self, key: &str, field: &str, value: TypedValue) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.map_put(key, field, value, seq)).map(|(lsn, _)| lsn)
    }

    pub fn map_remove(&self, key: &str, field: &str) -> Result<u64> {
        self.commit_container_op(key, |seq| self.inner.memtable.map_remove(key, field, seq)).map(|(lsn, _)| lsn)
    }

    pub fn map_get(&self, key: &str, field: &str) -> Result<TypedValue> {
        self.inner.memtable.map_get(key, field, self.get_snapshot())
    }

    pub fn map_contains(&self, key: &str, field: &str) -> Result<bool> {
        self.inner.memtable.map_contains(key, field, self.get_snapshot())
    }

    pub fn map_keys(&self, key: &str) -> Result<Vec<String>> {
        self.inner.memtable.map_keys(key, self.get_snapshot())
    }

    pub fn map_size(&self, key: &str) -> Result<usize> {
        self.inner.memtable.map_size(key, self.get_snapshot())
    }

    // ---- transactions (spec §4.9) -----------------------------------------

    pub fn begin_tx(&self) -> Transaction {
        Transaction::default()
    }

    /// Assigns each buffered op a fresh LSN, appends it to the WAL, and
    /// applies it to the memtable and indexes, all under one hold of the
    /// commit lock — so the whole transaction is atomic with respect to
    /// snapshots, matching spec §4.9. Returns the LSN of the last op
    /// applied (the transaction's commit LSN).
    pub fn commit_tx(&self, txn: Transaction) -> Result<u64> {
        if txn.ops.is_empty() {
            return Ok(self.get_snapshot());
        }
        let _guard = self.inner.commit_lock.lock();
        let mut last_lsn = self.inner.wal.current_lsn();
        for op in txn.ops {
            match op {
                TxOp::Put(key, value) => {
                    let lsn = self.inner.wal.write(EntryKind::Put, payload::encode_put(&key, &value))?;
                    self.apply_put(&key, value, lsn)?;
                    last_lsn = lsn;
                }
                TxOp::Del(key) => {
                    let lsn = self.inner.wal.write(EntryKind::Del, payload::encode_del(&key))?;
                    self.apply_delete(&key, lsn)?;
                    last_lsn = lsn;
                }
            }
        }
        self.inner.txns_since_checkpoint.fetch_add(1, Ordering::Relaxed);
        Ok(last_lsn)
    }

    /// Discards the buffer. Nothing was ever made visible, so there is no
    /// on-disk or in-memory state to undo.
    pub fn rollback_tx(&self, _txn: Transaction) {}

    // ---- snapshots ----------------------------------------------------

    /// The current max committed LSN.
    pub fn get_snapshot(&self) -> u64 {
        self.inner.wal.current_lsn()
    }

    /// Registers interest in reading at `snapshot` so the memtable's GC
    /// hook (`compact_before`) won't reclaim cells it still needs.
    pub fn acquire_snapshot(&self) -> u64 {
        let lsn = self.get_snapshot();
        self.inner.snapshots.acquire(lsn);
        lsn
    }

    pub fn release_snapshot(&self, snapshot: u64) {
        self.inner.snapshots.release(snapshot);
        if let Some(min_live) = self.inner.snapshots.min_live_snapshot() {
            self.inner.memtable.compact_before(min_live);
        } else {
            self.inner.memtable.compact_before(self.get_snapshot() + 1);
        }
    }

    pub fn get_at(&self, key: &str, snapshot: u64) -> Option<TypedValue> {
        self.inner.memtable.get(key, snapshot)
    }

    pub fn range_scan(&self, lo: &str, hi: &str, limit: usize) -> Vec<(String, TypedValue)> {
        self.inner.memtable.range_scan(lo, hi, self.get_snapshot(), limit)
    }

    // ---- indexes (spec §4.7, §6.5) ----------------------------------------

    pub fn create_index(&self, kind: IndexKind, name: &str, fields: &[String]) -> Result<()> {
        let span = info_span!("create_index", name, kind = kind.name());
        let _enter = span.enter();
        debug!(fields = ?fields, "creating index");
        let snapshot = self.get_snapshot();
        match kind {
            IndexKind::Secondary => {
                let field = fields.first().ok_or_else(|| Error::UnsupportedQuery("secondary index needs one field".into()))?;
                self.inner.index_manager.create_secondary_index(name, field, false, &self.inner.memtable, snapshot)
            }
            IndexKind::Composite => {
                self.inner.index_manager.create_composite_index(name, fields.to_vec(), &self.inner.memtable, snapshot)
            }
            IndexKind::FullText => {
                let field = fields.first().ok_or_else(|| Error::UnsupportedQuery("full-text index needs one field".into()))?;
                self.inner.index_manager.create_fulltext_index(name, field, &self.inner.memtable, snapshot)
            }
            IndexKind::Positional => {
                let field = fields.first().ok_or_else(|| Error::UnsupportedQuery("positional index needs one field".into()))?;
                self.inner.index_manager.create_positional_index(name, field, &self.inner.memtable, snapshot)
            }
        }
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        debug!(name, "dropping index");
        self.inner.index_manager.drop_index(name)
    }

    pub fn lookup(&self, name: &str, query: &IndexQuery<'_>) -> LookupResult {
        self.inner.index_manager.lookup(name, query)
    }

    pub fn list_indexes(&self) -> Vec<IndexMetadata> {
        self.inner.index_manager.list_indexes()
    }

    // ---- query optimizer (spec §4.8) --------------------------------------

    /// Maps `conditions` to a [`QueryPlan`] without executing it — for
    /// callers that want to inspect the chosen strategy first.
    pub fn plan_query(&self, conditions: &[QueryCondition], use_and: bool) -> QueryPlan {
        let plan = self.inner.optimizer.optimize_multiple_conditions(conditions, use_and);
        debug!(
            use_index = plan.use_index,
            index = ?plan.index_name,
            cost = plan.est_cost,
            "optimizer plan selected"
        );
        plan
    }

    /// Plans and executes `conditions` against the current snapshot,
    /// reading each candidate key (or the full keyspace, for a full-scan
    /// plan) out of the memtable.
    pub fn execute_query(&self, conditions: &[QueryCondition], use_and: bool) -> Vec<(String, TypedValue)> {
        let plan = self.plan_query(conditions, use_and);
        let snapshot = self.get_snapshot();
        if plan.use_index {
            plan.candidate_keys
                .iter()
                .filter_map(|k| self.inner.memtable.get(k, snapshot).map(|v| (k.clone(), v)))
                .collect()
        } else {
            self.inner.memtable.scan_all(snapshot)
        }
    }

    pub fn optimizer_stats(&self) -> kvdb_executor::OptimizerStats {
        self.inner.optimizer.get_stats()
    }

    pub fn recommend_indexes(&self, frequent_conditions: &[QueryCondition]) -> Vec<kvdb_executor::IndexRecommendation> {
        self.inner.optimizer.recommend_indexes(frequent_conditions)
    }

    // ---- checkpoints and backups (spec §4.5, §4.6) ------------------------

    pub fn create_checkpoint(&self, description: impl Into<String>) -> Result<CheckpointResult> {
        let span = info_span!("create_checkpoint");
        let _enter = span.enter();
        let result = self.inner.checkpoint_mgr.create(self.inner.as_ref(), CheckpointTrigger::Manual, description)?;
        self.inner.checkpoint_mgr.cleanup_old(self.inner.config.checkpoint_keep)?;
        info!(lsn = result.info.lsn, elapsed_ms = result.elapsed.as_millis() as u64, "checkpoint created");
        Ok(result)
    }

    pub fn restore_checkpoint(&self, id: u64) -> Result<()> {
        let span = info_span!("restore_checkpoint", id);
        let _enter = span.enter();
        self.inner.checkpoint_mgr.restore(self.inner.as_ref(), id)?;
        info!("checkpoint restored");
        Ok(())
    }

    pub fn create_backup(&self, id: impl Into<String>) -> Result<BackupResult> {
        let span = info_span!("create_backup");
        let _enter = span.enter();
        let id = id.into();
        let end_lsn = self.get_snapshot();
        let result = self.inner.backup_mgr.lock().create_full(id, &self.inner.data_dir, end_lsn, &self.inner.file_tracker)?;
        info!(end_lsn, "backup created");
        Ok(result)
    }

    pub fn restore_backup(&self, id: &str, target_dir: impl AsRef<Path>) -> Result<()> {
        let span = info_span!("restore_backup", id);
        let _enter = span.enter();
        self.inner.backup_mgr.lock().restore_from_backup(id, target_dir.as_ref())?;
        info!("backup restored");
        Ok(())
    }

    // ---- change stream (spec §5) ------------------------------------------

    /// Hands the change-stream receiver to its one subscriber. `None` if
    /// already taken — only one collaborator is expected to subscribe per
    /// `Database`.
    pub fn subscribe_changes(&self) -> Option<ChangeReceiver> {
        self.change_rx.lock().take()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.inner.worker_stop.store(true, Ordering::Relaxed);
        self.inner.change_tx.close();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        let _ = self.inner.wal.persist_state();
    }
}
