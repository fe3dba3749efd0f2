//! Multi-field composite index (spec §4.7). Grounded on
//! `examples/original_source/src/index/composite_index.h`'s
//! `index_map_: map<composite_key, set<primary_key>>` and
//! `exact_lookup`/`prefix_lookup`/`range_lookup`/`partial_lookup` surface,
//! with the composite key encoding resolved per Open Question #1
//! (`DESIGN.md`) as length-prefixed rather than sentinel-separated, so no
//! field value can ever collide across a separator byte.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

/// Encodes a sequence of field values as `(u32 len, bytes)*`, so that a
/// prefix over the leading `k` fields of one key is always a byte-prefix
/// of the encoding of any key sharing those leading values, regardless of
/// what bytes later fields contain.
fn encode(values: &[&str]) -> Vec<u8> {
    let mut buf = Vec::new();
    for v in values {
        let bytes = v.as_bytes();
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
    }
    buf
}

#[derive(Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, BTreeSet<String>>,
}

pub struct CompositeIndex {
    name: String,
    fields: Vec<String>,
    inner: RwLock<Inner>,
}

impl CompositeIndex {
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        CompositeIndex { name: name.into(), fields, inner: RwLock::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn insert(&self, values: &[&str], primary_key: &str) {
        let key = encode(values);
        self.inner.write().map.entry(key).or_default().insert(primary_key.to_string());
    }

    pub fn remove(&self, values: &[&str], primary_key: &str) {
        let key = encode(values);
        let mut inner = self.inner.write();
        if let Some(set) = inner.map.get_mut(&key) {
            set.remove(primary_key);
            if set.is_empty() {
                inner.map.remove(&key);
            }
        }
    }

    pub fn update(&self, old_values: &[&str], new_values: &[&str], primary_key: &str) {
        if old_values == new_values {
            return;
        }
        self.remove(old_values, primary_key);
        self.insert(new_values, primary_key);
    }

    pub fn exact_lookup(&self, values: &[&str]) -> Vec<String> {
        let key = encode(values);
        self.inner.read().map.get(&key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Matches every key whose *leading* `values.len()` fields equal
    /// `values` exactly, regardless of trailing fields. Also serves as
    /// `partial_lookup` in the original source, which is the same
    /// operation under a different name.
    pub fn prefix_lookup(&self, values: &[&str]) -> Vec<String> {
        let prefix = encode(values);
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (k, keys) in inner.map.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            out.extend(keys.iter().cloned());
        }
        out
    }

    /// Alias kept for parity with the original source's naming; identical
    /// to [`Self::prefix_lookup`].
    pub fn partial_lookup(&self, values: &[&str]) -> Vec<String> {
        self.prefix_lookup(values)
    }

    pub fn range_lookup(&self, start: &[&str], end: &[&str]) -> Vec<String> {
        let start_key = encode(start);
        let end_key = encode(end);
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (_, keys) in inner.map.range(start_key..=end_key) {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_lookup_matches_full_tuple() {
        let idx = CompositeIndex::new("by_region_tier", vec!["region".into(), "tier".into()]);
        idx.insert(&["us", "gold"], "k1");
        idx.insert(&["us", "silver"], "k2");
        assert_eq!(idx.exact_lookup(&["us", "gold"]), vec!["k1"]);
    }

    #[test]
    fn prefix_lookup_matches_leading_fields_regardless_of_trailing_byte_content() {
        let idx = CompositeIndex::new("by_region_tier", vec!["region".into(), "tier".into()]);
        // "u" + "sgold" vs "us" + "gold" would collide under a naive
        // separator-free concatenation; length-prefixing keeps them apart.
        idx.insert(&["u", "sgold"], "k1");
        idx.insert(&["us", "gold"], "k2");
        assert_eq!(idx.prefix_lookup(&["us"]), vec!["k2"]);
    }

    #[test]
    fn range_lookup_over_encoded_keys() {
        let idx = CompositeIndex::new("by_year", vec!["year".into()]);
        idx.insert(&["2020"], "k1");
        idx.insert(&["2021"], "k2");
        idx.insert(&["2022"], "k3");
        let mut got = idx.range_lookup(&["2020"], &["2021"]);
        got.sort();
        assert_eq!(got, vec!["k1", "k2"]);
    }

    #[test]
    fn update_moves_primary_key() {
        let idx = CompositeIndex::new("by_region_tier", vec!["region".into(), "tier".into()]);
        idx.insert(&["us", "gold"], "k1");
        idx.update(&["us", "gold"], &["eu", "gold"], "k1");
        assert!(idx.exact_lookup(&["us", "gold"]).is_empty());
        assert_eq!(idx.exact_lookup(&["eu", "gold"]), vec!["k1"]);
    }
}
