//! `Memtable`: an ordered map of key to a version chain of cells.
//!
//! Per spec §3.2, each user key stores a sequence of [`VersionedCell`]s with
//! strictly increasing `seq`. A read at snapshot `S` selects the
//! highest-`seq` cell with `seq <= S`; writes never rewrite history, and
//! container mutations (`list_append`, `set_add`, `map_put`, ...) are
//! read-modify-append: they build a new value from the most recent cell and
//! append it as a fresh cell, never mutating a prior cell in place (spec §9:
//! "MVCC is copy-on-write at the cell granularity, not in-place").

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use kvdb_core::{DataType, Error, Result, TypedValue, ValueMap};
use parking_lot::RwLock;

/// A single `(seq, value-or-tombstone)` entry in a key's version chain.
#[derive(Debug, Clone)]
pub struct VersionedCell {
    pub seq: u64,
    /// `None` marks a tombstone (a deletion recorded at `seq`).
    pub value: Option<TypedValue>,
}

impl VersionedCell {
    fn live(seq: u64, value: TypedValue) -> Self {
        VersionedCell { seq, value: Some(value) }
    }

    fn tombstone(seq: u64) -> Self {
        VersionedCell { seq, value: None }
    }
}

/// Approximate byte-usage snapshot, for flush-trigger heuristics (spec
/// §4.2: "need not be exact").
#[derive(Debug, Clone, Copy, Default)]
pub struct MemtableStats {
    pub key_count: usize,
    pub cell_count: usize,
    pub approx_bytes: usize,
}

/// The versioned, snapshot-consistent in-memory table.
///
/// Keyed by an ordered `BTreeMap` (not a hash map) so that `range_scan` can
/// iterate a `[lo, hi]` sub-range directly rather than collecting and
/// sorting every key. A single `RwLock` protects structural changes to the
/// map and to any key's chain; spec §9 permits sharded locking if hot-key
/// contention shows up in profiling, but a single lock is the simplest
/// correct starting point and is what this implementation uses.
pub struct Memtable {
    chains: RwLock<BTreeMap<String, Vec<VersionedCell>>>,
    approx_bytes: AtomicUsize,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    pub fn new() -> Self {
        Memtable {
            chains: RwLock::new(BTreeMap::new()),
            approx_bytes: AtomicUsize::new(0),
        }
    }

    fn visible_cell<'a>(chain: &'a [VersionedCell], snap: u64) -> Option<&'a VersionedCell> {
        chain.iter().rev().find(|c| c.seq <= snap)
    }

    fn latest_cell(chain: &[VersionedCell]) -> Option<&VersionedCell> {
        chain.last()
    }

    fn push_cell(&self, chains: &mut BTreeMap<String, Vec<VersionedCell>>, key: &str, cell: VersionedCell) {
        self.approx_bytes.fetch_add(
            key.len() + cell.value.as_ref().map(TypedValue::approx_size).unwrap_or(1),
            Ordering::Relaxed,
        );
        chains.entry(key.to_string()).or_default().push(cell);
    }

    // -- point ops -----------------------------------------------------

    pub fn put(&self, key: &str, value: TypedValue, seq: u64) {
        let mut chains = self.chains.write();
        self.push_cell(&mut chains, key, VersionedCell::live(seq, value));
    }

    pub fn delete(&self, key: &str, seq: u64) {
        let mut chains = self.chains.write();
        self.push_cell(&mut chains, key, VersionedCell::tombstone(seq));
    }

    /// Reads `key` at `snapshot`. Returns `None` if the key has no cell
    /// visible at `snapshot` or if the visible cell is a tombstone.
    pub fn get(&self, key: &str, snapshot: u64) -> Option<TypedValue> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        Self::visible_cell(chain, snapshot).and_then(|c| c.value.clone())
    }

    pub fn get_key_type(&self, key: &str, snapshot: u64) -> DataType {
        self.get(key, snapshot).map(|v| v.data_type()).unwrap_or(DataType::Null)
    }

    // -- scans -----------------------------------------------------------

    /// Keys in `[lo, hi]` (inclusive), resolved at `snapshot`, up to `limit`
    /// results (`0` means unlimited). An empty range or `lo > hi` yields an
    /// empty vector, not an error (spec §8).
    pub fn range_scan(&self, lo: &str, hi: &str, snapshot: u64, limit: usize) -> Vec<(String, TypedValue)> {
        if lo > hi {
            return Vec::new();
        }
        let chains = self.chains.read();
        let mut out = Vec::new();
        for (k, chain) in chains.range(lo.to_string()..=hi.to_string()) {
            if let Some(cell) = Self::visible_cell(chain, snapshot) {
                if let Some(v) = &cell.value {
                    out.push((k.clone(), v.clone()));
                    if limit != 0 && out.len() >= limit {
                        break;
                    }
                }
            }
        }
        out
    }

    /// All keys whose value at `snapshot` has variant `dtype`, up to
    /// `limit` results (`0` = unlimited).
    pub fn type_scan(&self, dtype: DataType, snapshot: u64, limit: usize) -> Vec<(String, TypedValue)> {
        let chains = self.chains.read();
        let mut out = Vec::new();
        for (k, chain) in chains.iter() {
            if let Some(cell) = Self::visible_cell(chain, snapshot) {
                if let Some(v) = &cell.value {
                    if v.data_type() == dtype {
                        out.push((k.clone(), v.clone()));
                        if limit != 0 && out.len() >= limit {
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Every live `(key, value)` pair visible at `snapshot`. Used to
    /// populate a secondary/full-text/positional index built over an
    /// already-populated keyspace.
    pub fn scan_all(&self, snapshot: u64) -> Vec<(String, TypedValue)> {
        let chains = self.chains.read();
        let mut out = Vec::new();
        for (k, chain) in chains.iter() {
            if let Some(cell) = Self::visible_cell(chain, snapshot) {
                if let Some(v) = &cell.value {
                    out.push((k.clone(), v.clone()));
                }
            }
        }
        out
    }

    // -- list ops ----------------------------------------------------------

    fn with_list<F>(&self, key: &str, seq: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<TypedValue>) -> Result<()>,
    {
        let mut chains = self.chains.write();
        let mut items = match chains.get(key).and_then(Self::latest_cell) {
            Some(VersionedCell { value: Some(TypedValue::List(items)), .. }) => items.clone(),
            Some(VersionedCell { value: Some(other), .. }) => {
                return Err(Error::WrongType {
                    key: key.to_string(),
                    expected: "List",
                    found: other.data_type().name(),
                })
            }
            _ => Vec::new(),
        };
        f(&mut items)?;
        self.push_cell(&mut chains, key, VersionedCell::live(seq, TypedValue::List(items)));
        Ok(())
    }

    pub fn list_append(&self, key: &str, value: TypedValue, seq: u64) -> Result<()> {
        self.with_list(key, seq, |items| {
            items.push(value);
            Ok(())
        })
    }

    pub fn list_prepend(&self, key: &str, value: TypedValue, seq: u64) -> Result<()> {
        self.with_list(key, seq, |items| {
            items.insert(0, value);
            Ok(())
        })
    }

    pub fn list_remove(&self, key: &str, index: i64, seq: u64) -> Result<TypedValue> {
        let mut removed = None;
        self.with_list(key, seq, |items| {
            let idx = normalize_index(index, items.len())
                .ok_or(Error::OutOfRange { index, len: items.len() })?;
            removed = Some(items.remove(idx));
            Ok(())
        })?;
        Ok(removed.expect("with_list only returns Ok after a successful removal"))
    }

    pub fn list_set(&self, key: &str, index: i64, value: TypedValue, seq: u64) -> Result<()> {
        self.with_list(key, seq, |items| {
            let idx = normalize_index(index, items.len())
                .ok_or(Error::OutOfRange { index, len: items.len() })?;
            items[idx] = value;
            Ok(())
        })
    }

    pub fn list_get(&self, key: &str, index: i64, snapshot: u64) -> Result<TypedValue> {
        let chains = self.chains.read();
        let chain = chains.get(key);
        let items = match chain.and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::List(items)), .. }) => items,
            Some(VersionedCell { value: Some(other), .. }) => {
                return Err(Error::WrongType {
                    key: key.to_string(),
                    expected: "List",
                    found: other.data_type().name(),
                })
            }
            _ => return Err(Error::Missing(key.to_string())),
        };
        let idx = normalize_index(index, items.len()).ok_or(Error::OutOfRange { index, len: items.len() })?;
        Ok(items[idx].clone())
    }

    pub fn list_size(&self, key: &str, snapshot: u64) -> Result<usize> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::List(items)), .. }) => Ok(items.len()),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "List",
                found: other.data_type().name(),
            }),
            _ => Ok(0),
        }
    }

    // -- set ops -------------------------------------------------------------

    fn with_set<F>(&self, key: &str, seq: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<TypedValue>) -> Result<()>,
    {
        let mut chains = self.chains.write();
        let mut items = match chains.get(key).and_then(Self::latest_cell) {
            Some(VersionedCell { value: Some(TypedValue::Set(items)), .. }) => items.clone(),
            Some(VersionedCell { value: Some(other), .. }) => {
                return Err(Error::WrongType {
                    key: key.to_string(),
                    expected: "Set",
                    found: other.data_type().name(),
                })
            }
            _ => Vec::new(),
        };
        f(&mut items)?;
        items.sort();
        items.dedup();
        self.push_cell(&mut chains, key, VersionedCell::live(seq, TypedValue::Set(items)));
        Ok(())
    }

    pub fn set_add(&self, key: &str, value: TypedValue, seq: u64) -> Result<()> {
        self.with_set(key, seq, |items| {
            if !items.contains(&value) {
                items.push(value);
            }
            Ok(())
        })
    }

    pub fn set_remove(&self, key: &str, value: &TypedValue, seq: u64) -> Result<()> {
        self.with_set(key, seq, |items| {
            items.retain(|v| v != value);
            Ok(())
        })
    }

    pub fn set_contains(&self, key: &str, value: &TypedValue, snapshot: u64) -> Result<bool> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Set(items)), .. }) => Ok(items.contains(value)),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Set",
                found: other.data_type().name(),
            }),
            _ => Ok(false),
        }
    }

    pub fn set_size(&self, key: &str, snapshot: u64) -> Result<usize> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Set(items)), .. }) => Ok(items.len()),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Set",
                found: other.data_type().name(),
            }),
            _ => Ok(0),
        }
    }

    // -- map ops -------------------------------------------------------------

    fn with_map<F>(&self, key: &str, seq: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut ValueMap) -> Result<()>,
    {
        let mut chains = self.chains.write();
        let mut map = match chains.get(key).and_then(Self::latest_cell) {
            Some(VersionedCell { value: Some(TypedValue::Map(m)), .. }) => m.clone(),
            Some(VersionedCell { value: Some(other), .. }) => {
                return Err(Error::WrongType {
                    key: key.to_string(),
                    expected: "Map",
                    found: other.data_type().name(),
                })
            }
            _ => ValueMap::new(),
        };
        f(&mut map)?;
        self.push_cell(&mut chains, key, VersionedCell::live(seq, TypedValue::Map(map)));
        Ok(())
    }

    pub fn map_put(&self, key: &str, field: &str, value: TypedValue, seq: u64) -> Result<()> {
        self.with_map(key, seq, |map| {
            map.insert(field.to_string(), value);
            Ok(())
        })
    }

    pub fn map_remove(&self, key: &str, field: &str, seq: u64) -> Result<()> {
        self.with_map(key, seq, |map| {
            if map.remove(field).is_none() {
                return Err(Error::Missing(format!("{key}.{field}")));
            }
            Ok(())
        })
    }

    pub fn map_get(&self, key: &str, field: &str, snapshot: u64) -> Result<TypedValue> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Map(m)), .. }) => m
                .get(field)
                .cloned()
                .ok_or_else(|| Error::Missing(format!("{key}.{field}"))),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Map",
                found: other.data_type().name(),
            }),
            _ => Err(Error::Missing(key.to_string())),
        }
    }

    pub fn map_contains(&self, key: &str, field: &str, snapshot: u64) -> Result<bool> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Map(m)), .. }) => Ok(m.contains_key(field)),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Map",
                found: other.data_type().name(),
            }),
            _ => Ok(false),
        }
    }

    pub fn map_keys(&self, key: &str, snapshot: u64) -> Result<Vec<String>> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Map(m)), .. }) => Ok(m.keys().cloned().collect()),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Map",
                found: other.data_type().name(),
            }),
            _ => Ok(Vec::new()),
        }
    }

    pub fn map_size(&self, key: &str, snapshot: u64) -> Result<usize> {
        let chains = self.chains.read();
        match chains.get(key).and_then(|c| Self::visible_cell(c, snapshot)) {
            Some(VersionedCell { value: Some(TypedValue::Map(m)), .. }) => Ok(m.len()),
            Some(VersionedCell { value: Some(other), .. }) => Err(Error::WrongType {
                key: key.to_string(),
                expected: "Map",
                found: other.data_type().name(),
            }),
            _ => Ok(0),
        }
    }

    // -- stats / maintenance -------------------------------------------------

    pub fn stats(&self) -> MemtableStats {
        let chains = self.chains.read();
        MemtableStats {
            key_count: chains.len(),
            cell_count: chains.values().map(Vec::len).sum(),
            approx_bytes: self.approx_bytes.load(Ordering::Relaxed),
        }
    }

    /// Drops every cell strictly below `min_live_snapshot` for keys whose
    /// newest remaining cell is already visible to it, i.e. garbage collects
    /// history no live snapshot can still observe. Per spec §3.2 this is a
    /// future compaction hook, not required for correctness; exposed here so
    /// the control plane can call it once it tracks live snapshot refcounts.
    pub fn compact_before(&self, min_live_snapshot: u64) {
        let mut chains = self.chains.write();
        let before = chains.values().map(Vec::len).sum::<usize>();
        for chain in chains.values_mut() {
            let cut = chain
                .iter()
                .rposition(|c| c.seq <= min_live_snapshot)
                .unwrap_or(0);
            if cut > 0 {
                chain.drain(0..cut);
            }
        }
        chains.retain(|_, chain| !(chain.len() == 1 && chain[0].value.is_none() && chain[0].seq < min_live_snapshot));
        let after = chains.values().map(Vec::len).sum::<usize>();
        tracing::debug!(min_live_snapshot, cells_dropped = before.saturating_sub(after), "memtable compaction");
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved as usize >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_at_snapshot() {
        let mt = Memtable::new();
        mt.put("a", TypedValue::Int(1), 1);
        assert_eq!(mt.get("a", 1), Some(TypedValue::Int(1)));
        assert_eq!(mt.get("a", 0), None);
    }

    #[test]
    fn delete_is_a_tombstone_not_a_rewrite() {
        let mt = Memtable::new();
        mt.put("a", TypedValue::Int(1), 1);
        mt.delete("a", 2);
        assert_eq!(mt.get("a", 1), Some(TypedValue::Int(1)));
        assert_eq!(mt.get("a", 2), None);
    }

    #[test]
    fn snapshot_isolation_sees_history_not_future() {
        let mt = Memtable::new();
        mt.put("x", TypedValue::Int(10), 5);
        assert_eq!(mt.get("x", 4), None);
        assert_eq!(mt.get("x", 5), Some(TypedValue::Int(10)));
        assert_eq!(mt.get("x", 100), Some(TypedValue::Int(10)));
    }

    #[test]
    fn range_scan_respects_bounds_and_snapshot() {
        let mt = Memtable::new();
        mt.put("k1", TypedValue::Int(1), 1);
        mt.put("k2", TypedValue::Int(2), 2);
        mt.put("k3", TypedValue::Int(3), 3);
        let got = mt.range_scan("k1", "k2", 3, 0);
        assert_eq!(got.len(), 2);
        assert_eq!(mt.range_scan("k3", "k1", 3, 0), Vec::new());
    }

    #[test]
    fn type_scan_filters_by_variant() {
        let mt = Memtable::new();
        mt.put("a", TypedValue::Int(1), 1);
        mt.put("b", TypedValue::String("x".into()), 2);
        let ints = mt.type_scan(DataType::Int, 2, 0);
        assert_eq!(ints, vec![("a".to_string(), TypedValue::Int(1))]);
    }

    #[test]
    fn list_ops_round_trip() {
        let mt = Memtable::new();
        mt.list_append("l", TypedValue::Int(1), 1).unwrap();
        mt.list_append("l", TypedValue::Int(2), 2).unwrap();
        mt.list_prepend("l", TypedValue::Int(0), 3).unwrap();
        assert_eq!(mt.list_size("l", 3).unwrap(), 3);
        assert_eq!(mt.list_get("l", 0, 3).unwrap(), TypedValue::Int(0));
        assert_eq!(mt.list_get("l", -1, 3).unwrap(), TypedValue::Int(2));
        let removed = mt.list_remove("l", 0, 4).unwrap();
        assert_eq!(removed, TypedValue::Int(0));
        assert_eq!(mt.list_size("l", 4).unwrap(), 2);
    }

    #[test]
    fn list_out_of_range_fails() {
        let mt = Memtable::new();
        mt.list_append("l", TypedValue::Int(1), 1).unwrap();
        assert!(matches!(
            mt.list_get("l", 5, 1),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn list_wrong_type_fails() {
        let mt = Memtable::new();
        mt.put("l", TypedValue::Int(1), 1);
        assert!(matches!(
            mt.list_append("l", TypedValue::Int(2), 2),
            Err(Error::WrongType { .. })
        ));
    }

    #[test]
    fn set_ops_dedupe_and_stay_sorted() {
        let mt = Memtable::new();
        mt.set_add("s", TypedValue::Int(3), 1).unwrap();
        mt.set_add("s", TypedValue::Int(1), 2).unwrap();
        mt.set_add("s", TypedValue::Int(3), 3).unwrap();
        assert_eq!(mt.set_size("s", 3).unwrap(), 2);
        assert!(mt.set_contains("s", &TypedValue::Int(1), 3).unwrap());
        mt.set_remove("s", &TypedValue::Int(1), 4).unwrap();
        assert!(!mt.set_contains("s", &TypedValue::Int(1), 4).unwrap());
    }

    #[test]
    fn map_ops_round_trip() {
        let mt = Memtable::new();
        mt.map_put("m", "a", TypedValue::Int(1), 1).unwrap();
        mt.map_put("m", "b", TypedValue::Int(2), 2).unwrap();
        assert_eq!(mt.map_size("m", 2).unwrap(), 2);
        assert_eq!(mt.map_get("m", "a", 2).unwrap(), TypedValue::Int(1));
        assert!(mt.map_contains("m", "b", 2).unwrap());
        mt.map_remove("m", "a", 3).unwrap();
        assert!(mt.map_get("m", "a", 3).is_err());
        assert_eq!(mt.map_keys("m", 3).unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn map_remove_missing_field_fails() {
        let mt = Memtable::new();
        mt.map_put("m", "a", TypedValue::Int(1), 1).unwrap();
        assert!(matches!(mt.map_remove("m", "z", 2), Err(Error::Missing(_))));
    }

    #[test]
    fn container_mutations_do_not_rewrite_prior_cells() {
        let mt = Memtable::new();
        mt.list_append("l", TypedValue::Int(1), 1).unwrap();
        mt.list_append("l", TypedValue::Int(2), 2).unwrap();
        // The value at seq=1 must still show only the first append.
        assert_eq!(
            mt.get("l", 1),
            Some(TypedValue::List(vec![TypedValue::Int(1)]))
        );
    }

    #[test]
    fn get_key_type_reports_null_for_missing() {
        let mt = Memtable::new();
        assert_eq!(mt.get_key_type("nope", 100), DataType::Null);
        mt.put("k", TypedValue::Double(1.0), 1);
        assert_eq!(mt.get_key_type("k", 1), DataType::Double);
    }

    #[test]
    fn stats_track_keys_and_cells() {
        let mt = Memtable::new();
        mt.put("a", TypedValue::Int(1), 1);
        mt.put("a", TypedValue::Int(2), 2);
        let stats = mt.stats();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.cell_count, 2);
        assert!(stats.approx_bytes > 0);
    }

    #[test]
    fn compact_before_drops_old_history() {
        let mt = Memtable::new();
        mt.put("a", TypedValue::Int(1), 1);
        mt.put("a", TypedValue::Int(2), 2);
        mt.put("a", TypedValue::Int(3), 3);
        mt.compact_before(2);
        assert_eq!(mt.get("a", 2), Some(TypedValue::Int(2)));
        assert_eq!(mt.get("a", 3), Some(TypedValue::Int(3)));
    }
}
