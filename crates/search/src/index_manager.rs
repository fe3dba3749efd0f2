//! Index manager (spec §4.7 "Index manager"): creates/drops named
//! indexes, populates them from the live keyspace on creation, and
//! exposes the maintenance hooks the control plane calls on every
//! committed mutation. Grounded on
//! `examples/original_source/src/index/index_manager.h`'s four
//! `unordered_map<string, unique_ptr<T>>` index tables and its
//! `lookup`/`add_to_indexes`/`remove_from_indexes`/`update_indexes`
//! surface.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use kvdb_concurrency::IndexLockRegistry;
use kvdb_core::value::TypedValue;
use kvdb_core::{Error, Result};
use kvdb_storage::Memtable;

use crate::composite_index::CompositeIndex;
use crate::fulltext_index::FullTextIndex;
use crate::positional_index::PositionalIndex;
use crate::secondary_index::SecondaryIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Secondary,
    Composite,
    FullText,
    Positional,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Secondary => "secondary",
            IndexKind::Composite => "composite",
            IndexKind::FullText => "fulltext",
            IndexKind::Positional => "positional",
        }
    }
}

#[derive(Clone)]
pub struct IndexMetadata {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<String>,
    pub unique: bool,
}

enum IndexHandle {
    Secondary(Arc<SecondaryIndex>),
    Composite(Arc<CompositeIndex>),
    FullText(Arc<FullTextIndex>),
    Positional(Arc<PositionalIndex>),
}

/// A query against a single named index. `Exact`/`Prefix` carry one
/// value; `Range` carries two; `Text`/`Phrase`/`Ranked` carry a raw query
/// string for the full-text/positional indexes.
pub enum IndexQuery<'a> {
    Exact(&'a [&'a str]),
    Prefix(&'a [&'a str]),
    Range(&'a [&'a str], &'a [&'a str]),
    Text(&'a str),
    Phrase(&'a str, u32),
    Wildcard(&'a str),
    Ranked(&'a str, usize),
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub keys: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub time_ms: f64,
}

/// The special field name meaning "the whole value at this key", used by
/// indexes built directly over scalar keys rather than over a field of a
/// `Map` value.
pub const WHOLE_VALUE_FIELD: &str = "value";

/// Extracts the canonical string representation of `field` from `value`.
/// `WHOLE_VALUE_FIELD` addresses the value itself; any other name
/// addresses that entry of a `Map` value. Returns `None` if the field
/// isn't present (a plain scalar indexed on a non-"value" field, or a
/// missing map key).
pub fn extract_field(value: &TypedValue, field: &str) -> Option<String> {
    if field == WHOLE_VALUE_FIELD {
        return Some(value.to_canonical_string());
    }
    match value {
        TypedValue::Map(m) => m.get(field).map(|v| v.to_canonical_string()),
        _ => None,
    }
}

pub struct IndexManager {
    indexes: DashMap<String, IndexHandle>,
    metadata: DashMap<String, IndexMetadata>,
    locks: IndexLockRegistry,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager { indexes: DashMap::new(), metadata: DashMap::new(), locks: IndexLockRegistry::new() }
    }

    fn ensure_absent(&self, name: &str) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(Error::IndexAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    fn ensure_present(&self, name: &str) -> Result<()> {
        if !self.indexes.contains_key(name) {
            return Err(Error::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn create_secondary_index(
        &self,
        name: &str,
        field: &str,
        unique: bool,
        memtable: &Memtable,
        snapshot: u64,
    ) -> Result<()> {
        self.ensure_absent(name)?;
        let _guard = self.locks.write(name);
        let index = SecondaryIndex::new(name, field, unique);
        for (key, value) in memtable.scan_all(snapshot) {
            if let Some(v) = extract_field(&value, field) {
                index.insert(&v, &key)?;
            }
        }
        self.indexes.insert(name.to_string(), IndexHandle::Secondary(Arc::new(index)));
        self.metadata.insert(
            name.to_string(),
            IndexMetadata { name: name.to_string(), kind: IndexKind::Secondary, fields: vec![field.to_string()], unique },
        );
        tracing::debug!(index = name, kind = "secondary", field, unique, "index created");
        Ok(())
    }

    pub fn create_composite_index(
        &self,
        name: &str,
        fields: Vec<String>,
        memtable: &Memtable,
        snapshot: u64,
    ) -> Result<()> {
        self.ensure_absent(name)?;
        let _guard = self.locks.write(name);
        let index = CompositeIndex::new(name, fields.clone());
        for (key, value) in memtable.scan_all(snapshot) {
            if let Some(values) = extract_composite(&value, &fields) {
                let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
                index.insert(&refs, &key);
            }
        }
        self.indexes.insert(name.to_string(), IndexHandle::Composite(Arc::new(index)));
        self.metadata.insert(
            name.to_string(),
            IndexMetadata { name: name.to_string(), kind: IndexKind::Composite, fields, unique: false },
        );
        tracing::debug!(index = name, kind = "composite", "index created");
        Ok(())
    }

    pub fn create_fulltext_index(&self, name: &str, field: &str, memtable: &Memtable, snapshot: u64) -> Result<()> {
        self.ensure_absent(name)?;
        let _guard = self.locks.write(name);
        let index = FullTextIndex::new(name, field);
        for (key, value) in memtable.scan_all(snapshot) {
            if let Some(text) = extract_field(&value, field) {
                index.index_document(&key, &text);
            }
        }
        self.indexes.insert(name.to_string(), IndexHandle::FullText(Arc::new(index)));
        self.metadata.insert(
            name.to_string(),
            IndexMetadata { name: name.to_string(), kind: IndexKind::FullText, fields: vec![field.to_string()], unique: false },
        );
        tracing::debug!(index = name, kind = "fulltext", field, "index created");
        Ok(())
    }

    pub fn create_positional_index(&self, name: &str, field: &str, memtable: &Memtable, snapshot: u64) -> Result<()> {
        self.ensure_absent(name)?;
        let _guard = self.locks.write(name);
        let index = PositionalIndex::new(name, field);
        for (key, value) in memtable.scan_all(snapshot) {
            if let Some(text) = extract_field(&value, field) {
                index.add_document(&key, &text);
            }
        }
        self.indexes.insert(name.to_string(), IndexHandle::Positional(Arc::new(index)));
        self.metadata.insert(
            name.to_string(),
            IndexMetadata { name: name.to_string(), kind: IndexKind::Positional, fields: vec![field.to_string()], unique: false },
        );
        tracing::debug!(index = name, kind = "positional", field, "index created");
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.ensure_present(name)?;
        let _guard = self.locks.write(name);
        self.indexes.remove(name);
        self.metadata.remove(name);
        self.locks.remove(name);
        tracing::debug!(index = name, "index dropped");
        Ok(())
    }

    pub fn list_indexes(&self) -> Vec<IndexMetadata> {
        self.metadata.iter().map(|e| e.value().clone()).collect()
    }

    pub fn metadata(&self, name: &str) -> Option<IndexMetadata> {
        self.metadata.get(name).map(|e| e.value().clone())
    }

    /// Indexes whose sole/leading field is `field`, for the optimizer's
    /// `get_applicable_indexes`.
    pub fn applicable_indexes(&self, field: &str) -> Vec<String> {
        self.metadata
            .iter()
            .filter(|e| e.value().fields.first().map(|f| f == field).unwrap_or(false))
            .map(|e| e.value().name.clone())
            .collect()
    }

    /// Total postings (not distinct values) in the named index, for the
    /// optimizer's range/prefix row-count estimates.
    pub fn index_size(&self, name: &str) -> Option<usize> {
        let entry = self.indexes.get(name)?;
        Some(match &*entry {
            IndexHandle::Secondary(idx) => idx.size(),
            IndexHandle::Composite(idx) => idx.size(),
            IndexHandle::FullText(idx) => idx.document_count(),
            IndexHandle::Positional(idx) => idx.document_count(),
        })
    }

    /// `1 / distinct_values` for the named secondary index, or `None` if
    /// the index isn't a secondary index (the others don't expose a
    /// meaningful single-value selectivity).
    pub fn index_selectivity(&self, name: &str) -> Option<f64> {
        let entry = self.indexes.get(name)?;
        match &*entry {
            IndexHandle::Secondary(idx) => Some(idx.selectivity()),
            _ => None,
        }
    }

    pub fn lookup(&self, name: &str, query: &IndexQuery<'_>) -> LookupResult {
        let start = Instant::now();
        let result = self.lookup_inner(name, query);
        let time_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(keys) => LookupResult { keys, success: true, error: None, time_ms },
            Err(e) => LookupResult { keys: Vec::new(), success: false, error: Some(e.to_string()), time_ms },
        }
    }

    fn lookup_inner(&self, name: &str, query: &IndexQuery<'_>) -> Result<Vec<String>> {
        let _guard = self.locks.read(name);
        let entry = self.indexes.get(name).ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        match (&*entry, query) {
            (IndexHandle::Secondary(idx), IndexQuery::Exact(v)) if v.len() == 1 => {
                Ok(idx.exact_lookup(v[0]))
            }
            (IndexHandle::Secondary(idx), IndexQuery::Prefix(v)) if v.len() == 1 => {
                Ok(idx.prefix_lookup(v[0]))
            }
            (IndexHandle::Secondary(idx), IndexQuery::Range(lo, hi)) if lo.len() == 1 && hi.len() == 1 => {
                Ok(idx.range_lookup(lo[0], hi[0]))
            }
            (IndexHandle::Composite(idx), IndexQuery::Exact(v)) => Ok(idx.exact_lookup(v)),
            (IndexHandle::Composite(idx), IndexQuery::Prefix(v)) => Ok(idx.prefix_lookup(v)),
            (IndexHandle::Composite(idx), IndexQuery::Range(lo, hi)) => Ok(idx.range_lookup(lo, hi)),
            (IndexHandle::FullText(idx), IndexQuery::Text(q)) => Ok(idx.search(q)),
            (IndexHandle::FullText(idx), IndexQuery::Phrase(q, _)) => Ok(idx.phrase_search(q)),
            (IndexHandle::FullText(idx), IndexQuery::Wildcard(p)) => Ok(idx.wildcard_search(p)),
            (IndexHandle::FullText(idx), IndexQuery::Ranked(q, limit)) => {
                Ok(idx.ranked_search(q, *limit).into_iter().map(|s| s.document_id).collect())
            }
            (IndexHandle::Positional(idx), IndexQuery::Text(q)) => {
                let terms: Vec<&str> = q.split_whitespace().collect();
                Ok(idx.search_and(&terms))
            }
            (IndexHandle::Positional(idx), IndexQuery::Phrase(q, max_distance)) => {
                let terms: Vec<&str> = q.split_whitespace().collect();
                Ok(idx.phrase_search(&terms, *max_distance))
            }
            (IndexHandle::Positional(idx), IndexQuery::Ranked(q, limit)) => {
                let terms: Vec<&str> = q.split_whitespace().collect();
                Ok(idx.ranked_search(&terms, *limit).into_iter().map(|s| s.document_id).collect())
            }
            _ => Err(Error::UnsupportedQuery(format!(
                "query kind not supported for index {name:?}"
            ))),
        }
    }

    /// Inserts `key`/`value` into every index defined over any of its
    /// addressable fields. Called by the control plane on every applied
    /// put.
    pub fn add_to_indexes(&self, key: &str, value: &TypedValue) -> Result<()> {
        for entry in self.indexes.iter() {
            let name = entry.key().clone();
            let meta = match self.metadata.get(&name) {
                Some(m) => m.clone(),
                None => continue,
            };
            let _guard = self.locks.write(&name);
            match entry.value() {
                IndexHandle::Secondary(idx) => {
                    if let Some(v) = extract_field(value, &meta.fields[0]) {
                        idx.insert(&v, key)?;
                    }
                }
                IndexHandle::Composite(idx) => {
                    if let Some(values) = extract_composite(value, &meta.fields) {
                        let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
                        idx.insert(&refs, key);
                    }
                }
                IndexHandle::FullText(idx) => {
                    if let Some(text) = extract_field(value, &meta.fields[0]) {
                        idx.index_document(key, &text);
                    }
                }
                IndexHandle::Positional(idx) => {
                    if let Some(text) = extract_field(value, &meta.fields[0]) {
                        idx.add_document(key, &text);
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes `key`/`value` from every applicable index. Called on every
    /// applied delete.
    pub fn remove_from_indexes(&self, key: &str, value: &TypedValue) {
        for entry in self.indexes.iter() {
            let name = entry.key().clone();
            let meta = match self.metadata.get(&name) {
                Some(m) => m.clone(),
                None => continue,
            };
            let _guard = self.locks.write(&name);
            match entry.value() {
                IndexHandle::Secondary(idx) => {
                    if let Some(v) = extract_field(value, &meta.fields[0]) {
                        idx.remove(&v, key);
                    }
                }
                IndexHandle::Composite(idx) => {
                    if let Some(values) = extract_composite(value, &meta.fields) {
                        let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
                        idx.remove(&refs, key);
                    }
                }
                IndexHandle::FullText(idx) => idx.remove_document(key),
                IndexHandle::Positional(idx) => idx.remove_document(key),
            }
        }
    }

    /// Updates every applicable index from `old_value` to `new_value` for
    /// `key`. Called on every applied overwrite.
    pub fn update_indexes(&self, key: &str, old_value: &TypedValue, new_value: &TypedValue) -> Result<()> {
        self.remove_from_indexes(key, old_value);
        self.add_to_indexes(key, new_value)
    }
}

fn extract_composite(value: &TypedValue, fields: &[String]) -> Option<Vec<String>> {
    let mut out = Vec::with_capacity(fields.len());
    for f in fields {
        out.push(extract_field(value, f)?);
    }
    Some(out)
}
