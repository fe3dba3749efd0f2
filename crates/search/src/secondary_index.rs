//! Secondary index: one indexed value maps to a set of primary keys
//! (spec §4.7). Grounded on
//! `examples/original_source/src/index/secondary_index.h`'s `index_map_`
//! (`std::map<string, set<string>>`), `unique` constructor flag, and
//! `exact_lookup`/`range_lookup`/`prefix_lookup` surface.

use std::collections::{BTreeMap, BTreeSet};

use kvdb_core::{Error, Result};
use parking_lot::RwLock;

#[derive(Default)]
struct Inner {
    map: BTreeMap<String, BTreeSet<String>>,
}

/// A single-field secondary index over canonical string representations
/// of indexed values.
pub struct SecondaryIndex {
    name: String,
    field: String,
    unique: bool,
    inner: RwLock<Inner>,
}

impl SecondaryIndex {
    pub fn new(name: impl Into<String>, field: impl Into<String>, unique: bool) -> Self {
        SecondaryIndex { name: name.into(), field: field.into(), unique, inner: RwLock::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn field(&self) -> &str {
        &self.field
    }
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Associates `primary_key` with `value`. Fails with
    /// [`Error::UniqueViolation`] if this index is unique and `value`
    /// already maps to a different primary key.
    pub fn insert(&self, value: &str, primary_key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if self.unique {
            if let Some(existing) = inner.map.get(value) {
                if !existing.is_empty() && !existing.contains(primary_key) {
                    return Err(Error::UniqueViolation {
                        index_name: self.name.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        inner.map.entry(value.to_string()).or_default().insert(primary_key.to_string());
        Ok(())
    }

    pub fn remove(&self, value: &str, primary_key: &str) {
        let mut inner = self.inner.write();
        if let Some(set) = inner.map.get_mut(value) {
            set.remove(primary_key);
            if set.is_empty() {
                inner.map.remove(value);
            }
        }
    }

    pub fn update(&self, old_value: &str, new_value: &str, primary_key: &str) -> Result<()> {
        if old_value == new_value {
            return Ok(());
        }
        self.remove(old_value, primary_key);
        self.insert(new_value, primary_key)
    }

    pub fn exact_lookup(&self, value: &str) -> Vec<String> {
        self.inner.read().map.get(value).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn range_lookup(&self, start: &str, end: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (_, keys) in inner.map.range(start.to_string()..=end.to_string()) {
            out.extend(keys.iter().cloned());
        }
        out
    }

    pub fn prefix_lookup(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (v, keys) in inner.map.range(prefix.to_string()..) {
            if !v.starts_with(prefix) {
                break;
            }
            out.extend(keys.iter().cloned());
        }
        out
    }

    pub fn clear(&self) {
        self.inner.write().map.clear();
    }

    pub fn size(&self) -> usize {
        self.inner.read().map.values().map(|s| s.len()).sum()
    }

    pub fn unique_values(&self) -> usize {
        self.inner.read().map.len()
    }

    /// Fraction of primary keys expected to match a single equality
    /// lookup: `1 / distinct_values`, or `0.0` when empty.
    pub fn selectivity(&self) -> f64 {
        let inner = self.inner.read();
        if inner.map.is_empty() {
            return 0.0;
        }
        1.0 / inner.map.len() as f64
    }

    pub fn get_all_values(&self) -> Vec<String> {
        self.inner.read().map.keys().cloned().collect()
    }

    pub fn memory_usage(&self) -> usize {
        let inner = self.inner.read();
        inner
            .map
            .iter()
            .map(|(k, v)| k.len() + v.iter().map(|pk| pk.len()).sum::<usize>())
            .sum()
    }
}
