//! Engine configuration (spec §4.12, ambient stack addition).
//!
//! A plain struct constructed by the caller, not a global registry —
//! [`Database::open`](crate::database::Database::open) uses
//! [`EngineConfig::default`]; callers who need non-default tunables use
//! `Database::open_with_config`.

/// How aggressively writes are forced to disk.
///
/// The WAL itself only has one knob (`auto_flush`, fsync on every
/// append); this enum layers a coarser policy on top of it plus the
/// checkpoint/segment-seal boundary, matching the original source's
/// three-tier `DurabilityMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No extra fsyncs beyond what the OS does on its own schedule.
    /// Fastest, least durable — acceptable for caches and scratch data.
    Cache,
    /// Fsync on segment seal and on checkpoint/backup creation, not on
    /// every write. The default: bounded data loss (at most one active
    /// segment's tail) in exchange for write throughput.
    Standard,
    /// Fsync on every WAL append (`wal_auto_flush = true`).
    Always,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Standard
    }
}

/// Tunables for [`crate::database::Database::open_with_config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Segment rollover threshold. Default 64 MiB, matching the original
    /// source's `MAX_SEGMENT_SIZE`.
    pub wal_max_segment_size: u64,
    /// Whether every WAL append fsyncs before returning. Independent of
    /// `durability_mode` so callers can force it on even under `Cache`.
    pub wal_auto_flush: bool,
    pub durability_mode: DurabilityMode,
    /// Cadence of the auto-checkpoint background worker.
    pub checkpoint_interval_secs: u64,
    pub checkpoint_keep: usize,
    /// Frequency threshold before `QueryOptimizer::recommend_indexes`
    /// surfaces a suggestion for a condition pattern.
    pub index_recommend_threshold: u32,
    /// Bound on the change-tuple channel (spec §5); oldest tuples are
    /// dropped once exceeded.
    pub change_stream_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            wal_max_segment_size: 64 * 1024 * 1024,
            wal_auto_flush: true,
            durability_mode: DurabilityMode::Standard,
            checkpoint_interval_secs: 60,
            checkpoint_keep: 5,
            index_recommend_threshold: 10,
            change_stream_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Resolves `wal_auto_flush` against `durability_mode`: `Always`
    /// forces it on regardless of the field's own value, `Cache` forces
    /// it off, `Standard` leaves the caller's choice alone.
    pub(crate) fn effective_wal_auto_flush(&self) -> bool {
        match self.durability_mode {
            DurabilityMode::Always => true,
            DurabilityMode::Cache => false,
            DurabilityMode::Standard => self.wal_auto_flush,
        }
    }
}
