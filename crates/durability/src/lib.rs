//! Durability: the segmented WAL, crash recovery, checkpoints, and backups
//! (spec §3.3–§3.6, §4.3–§4.6).
//!
//! Layering is strictly bottom-up: [`wal`] knows nothing about recovery;
//! [`recovery`] reads WAL segments directly off disk and knows nothing
//! about checkpoints; [`checkpoint`] and [`backup`] both depend on an
//! engine-supplied state abstraction rather than reaching into the
//! memtable or index layer themselves.

pub mod backup;
pub mod checkpoint;
pub mod recovery;
pub mod wal;

pub use backup::{BackupChainInfo, BackupManager, BackupMetadata, BackupResult, BackupType, FileLsnTracker};
pub use checkpoint::{
    CheckpointConfig, CheckpointInfo, CheckpointManager, CheckpointResult, CheckpointStatus, CheckpointTrigger,
    DatabaseSnapshot,
};
pub use recovery::{RecoveryManager, RecoveryResult};
pub use wal::{
    EntryKind, SegmentHeader, SegmentedWal, ValidationReport, WalEntry, WalSegment, WalStatistics,
    DEFAULT_MAX_SEGMENT_SIZE,
};
