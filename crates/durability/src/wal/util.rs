//! Free-function helpers used by the WAL and recovery manager internally:
//! filename parsing, and merging/sorting entries read back from multiple
//! segments. Grounded on the `WALUtils` namespace in the source engine's
//! `segmented_wal.h` (see SPEC_FULL.md §10); kept here rather than as
//! methods because `SegmentedWal`, `RecoveryManager`, and tests all need
//! them independently.

use std::path::Path;

use super::entry::WalEntry;

const SEGMENT_FILE_PREFIX: &str = "wal_segment_";
const SEGMENT_FILE_SUFFIX: &str = ".seg";

/// Whether `name` looks like a WAL segment filename (`wal_segment_N.seg`).
pub fn is_wal_segment_file(name: &str) -> bool {
    extract_segment_id_from_filename(name).is_some()
}

/// Parses the segment id out of a `wal_segment_N.seg` filename.
pub fn extract_segment_id_from_filename(name: &str) -> Option<u64> {
    let stripped = name.strip_prefix(SEGMENT_FILE_PREFIX)?;
    let stripped = stripped.strip_suffix(SEGMENT_FILE_SUFFIX)?;
    stripped.parse::<u64>().ok()
}

/// Scans `dir` for segment files and returns their ids in ascending
/// order.
pub fn find_wal_segment_files(dir: &Path) -> std::io::Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = extract_segment_id_from_filename(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Merges entry lists already individually sorted by LSN (one per
/// segment, as recovery's per-segment scan produces) into a single
/// globally LSN-ordered sequence. Segments do not overlap in LSN range
/// under normal operation, so this is closer to a concatenate-then-sort
/// than a real k-way merge, but sorting defensively costs little and
/// tolerates a malformed/out-of-order segment without panicking.
pub fn merge_entries_from_segments(per_segment: Vec<Vec<WalEntry>>) -> Vec<WalEntry> {
    let mut all: Vec<WalEntry> = per_segment.into_iter().flatten().collect();
    sort_entries_by_lsn(&mut all);
    all
}

pub fn sort_entries_by_lsn(entries: &mut [WalEntry]) {
    entries.sort_by_key(|e| e.lsn);
}

/// True if `lsn` is a valid (nonzero) assigned sequence number. LSN `0`
/// is reserved to mean "no writes yet" for an empty log.
pub fn is_valid_lsn(lsn: u64) -> bool {
    lsn > 0
}

/// Which segment, among sealed segments whose `[start_lsn, end_lsn]`
/// ranges are known, would contain `lsn`. Returns `None` if no segment in
/// `ranges` covers it (e.g. the active, not-yet-sealed segment).
pub fn get_segment_id_for_lsn(ranges: &[(u64, u64, u64)], lsn: u64) -> Option<u64> {
    ranges
        .iter()
        .find(|(_, start, end)| lsn >= *start && lsn <= *end)
        .map(|(id, _, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::entry::EntryKind;

    #[test]
    fn filename_parsing() {
        assert_eq!(extract_segment_id_from_filename("wal_segment_12.seg"), Some(12));
        assert_eq!(extract_segment_id_from_filename("wal_segment_0.seg"), Some(0));
        assert_eq!(extract_segment_id_from_filename("wal_state.meta"), None);
        assert_eq!(extract_segment_id_from_filename("wal_segment_x.seg"), None);
    }

    #[test]
    fn is_segment_file() {
        assert!(is_wal_segment_file("wal_segment_1.seg"));
        assert!(!is_wal_segment_file("README.md"));
    }

    #[test]
    fn merge_sorts_across_segments() {
        let seg_a = vec![WalEntry::new(3, EntryKind::Put, 0, vec![])];
        let seg_b = vec![
            WalEntry::new(1, EntryKind::Put, 0, vec![]),
            WalEntry::new(2, EntryKind::Put, 0, vec![]),
        ];
        let merged = merge_entries_from_segments(vec![seg_a, seg_b]);
        let lsns: Vec<u64> = merged.iter().map(|e| e.lsn).collect();
        assert_eq!(lsns, vec![1, 2, 3]);
    }

    #[test]
    fn lsn_validity() {
        assert!(!is_valid_lsn(0));
        assert!(is_valid_lsn(1));
    }

    #[test]
    fn segment_lookup_by_lsn() {
        let ranges = vec![(1u64, 1u64, 10u64), (2u64, 11u64, 20u64)];
        assert_eq!(get_segment_id_for_lsn(&ranges, 5), Some(1));
        assert_eq!(get_segment_id_for_lsn(&ranges, 15), Some(2));
        assert_eq!(get_segment_id_for_lsn(&ranges, 100), None);
    }
}
