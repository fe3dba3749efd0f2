//! The engine's unified error type.
//!
//! Every crate in the workspace returns this enum (or a `Result` alias over
//! it) rather than inventing crate-local error types, so a caller never has
//! to thread a `From` impl through three layers to find out why a commit
//! failed. Variants are grouped by the component that raises them; see the
//! module-level doc on each component for exactly which variants it uses.

use std::io;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised anywhere in the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // -- value model / codecs ------------------------------------------
    /// A binary or text payload was malformed, truncated, or carried an
    /// unsupported version/type tag.
    #[error("codec error: {0}")]
    Codec(String),

    /// `convert_to` was asked for a conversion that isn't defined, or a
    /// container operation was applied with a value of the wrong type.
    #[error("cannot convert value: {0}")]
    TypeConversion(String),

    // -- memtable --------------------------------------------------------
    /// A container operation (`list_*`, `set_*`, `map_*`) was applied to a
    /// cell holding a different variant.
    #[error("wrong type for key {key:?}: expected {expected}, found {found}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A lookup found no value (key absent, or the latest visible cell is
    /// a tombstone, or a map field/list index is absent).
    #[error("missing: {0}")]
    Missing(String),

    /// A list index or similar bound was out of range.
    #[error("index out of range: {index} (len {len})")]
    OutOfRange { index: i64, len: usize },

    // -- WAL --------------------------------------------------------------
    /// Append was attempted on a segment that has already been sealed.
    #[error("segment {segment_id} is sealed")]
    SegmentSealed { segment_id: u64 },

    /// The entry would not fit in the current segment even after sealing
    /// and rotating (i.e. the entry itself exceeds the segment capacity).
    #[error("entry of size {entry_size} exceeds segment capacity {capacity}")]
    SegmentFull { entry_size: u64, capacity: u64 },

    /// A segment or checkpoint/backup image failed CRC or structural
    /// validation.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// Replay of a segment stopped partway through because of a truncated
    /// or CRC-failing entry; this is reported, not fatal to the engine.
    #[error("partial segment {segment_id}: last good lsn {last_good_lsn}")]
    PartialSegment {
        segment_id: u64,
        last_good_lsn: u64,
    },

    // -- checkpoint / backup ----------------------------------------------
    #[error("checkpoint {checkpoint_id} is corrupted: {reason}")]
    CheckpointCorrupted { checkpoint_id: String, reason: String },

    #[error("a checkpoint is already in progress")]
    CheckpointBusy,

    #[error("backup chain broken: {0}")]
    BackupChainBroken(String),

    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // -- indexes ------------------------------------------------------------
    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("unique index violation on {index_name} for value {value}")]
    UniqueViolation { index_name: String, value: String },

    #[error("optimizer cannot map condition to an owned index kind: {0}")]
    UnsupportedQuery(String),

    // -- ambient ----------------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for errors that represent on-disk or in-memory corruption
    /// rather than a caller mistake or transient condition.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corrupted(_)
                | Error::PartialSegment { .. }
                | Error::CheckpointCorrupted { .. }
        )
    }

    /// True for errors the caller could plausibly retry (e.g. a busy
    /// checkpoint lock), as opposed to a structural mismatch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CheckpointBusy)
    }

    /// True for errors raised by the WAL or recovery path specifically.
    pub fn is_wal_error(&self) -> bool {
        matches!(
            self,
            Error::SegmentSealed { .. } | Error::SegmentFull { .. } | Error::PartialSegment { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        let e = Error::Corrupted("bad header".into());
        assert!(e.is_corruption());
        assert!(!e.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::CheckpointBusy.is_retryable());
        assert!(!Error::CheckpointBusy.is_corruption());
    }

    #[test]
    fn wal_error_classification() {
        assert!(Error::SegmentSealed { segment_id: 1 }.is_wal_error());
        assert!(!Error::Missing("k".into()).is_wal_error());
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "nope");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn json_conversion() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let e: Error = bad.unwrap_err().into();
        assert!(matches!(e, Error::Codec(_)));
    }
}
