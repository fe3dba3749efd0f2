//! Full-text index (spec §4.7): term → posting set, with a tf·idf ranked
//! search. Grounded on
//! `examples/original_source/src/index/fulltext_index.h`'s
//! `inverted_index_`/`document_info_`/`term_frequencies_` fields and
//! `search`/`phrase_search`/`wildcard_search`/`ranked_search` surface.
//!
//! `phrase_search` here is the approximate AND-intersection contract
//! (Open Question #2, `DESIGN.md`): it does not check term adjacency.
//! True phrase matching lives in [`crate::positional_index::PositionalIndex`].

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::tokenizer::Tokenizer;

#[derive(Default, Clone)]
struct DocumentInfo {
    terms: BTreeSet<String>,
    term_count: usize,
}

#[derive(Default)]
struct Inner {
    postings: BTreeMap<String, BTreeSet<String>>,
    documents: BTreeMap<String, DocumentInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub document_id: String,
    pub score: f64,
}

pub struct FullTextIndex {
    name: String,
    field: String,
    tokenizer: Tokenizer,
    inner: RwLock<Inner>,
}

impl FullTextIndex {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        FullTextIndex {
            name: name.into(),
            field: field.into(),
            tokenizer: Tokenizer::new(),
            inner: RwLock::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn index_document(&self, document_id: &str, text: &str) {
        self.remove_document(document_id);
        let terms = self.tokenizer.tokenize(text);
        let mut inner = self.inner.write();
        let unique: BTreeSet<String> = terms.into_iter().collect();
        for term in &unique {
            inner.postings.entry(term.clone()).or_default().insert(document_id.to_string());
        }
        let term_count = unique.len();
        inner
            .documents
            .insert(document_id.to_string(), DocumentInfo { terms: unique, term_count });
    }

    pub fn remove_document(&self, document_id: &str) {
        let mut inner = self.inner.write();
        if let Some(info) = inner.documents.remove(document_id) {
            for term in info.terms {
                if let Some(set) = inner.postings.get_mut(&term) {
                    set.remove(document_id);
                    if set.is_empty() {
                        inner.postings.remove(&term);
                    }
                }
            }
        }
    }

    pub fn update_document(&self, document_id: &str, text: &str) {
        self.index_document(document_id, text);
    }

    /// AND-intersection of the query's terms' postings.
    pub fn search(&self, query: &str) -> Vec<String> {
        let terms = self.tokenizer.tokenize(query);
        self.intersect(&terms)
    }

    /// Same contract as [`Self::search`] — an approximation of phrase
    /// search, not adjacency-aware. See module docs.
    pub fn phrase_search(&self, query: &str) -> Vec<String> {
        self.search(query)
    }

    /// Glob match (`*` = any run, `?` = any one char) over indexed terms,
    /// via linear scan, returning every document containing a matching
    /// term.
    pub fn wildcard_search(&self, pattern: &str) -> Vec<String> {
        let pattern = self.tokenizer.normalize(pattern);
        let inner = self.inner.read();
        let mut out = BTreeSet::new();
        for (term, docs) in &inner.postings {
            if crate::glob::matches(&pattern, term) {
                out.extend(docs.iter().cloned());
            }
        }
        out.into_iter().collect()
    }

    fn intersect(&self, terms: &[String]) -> Vec<String> {
        if terms.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut sets: Vec<&BTreeSet<String>> =
            terms.iter().filter_map(|t| inner.postings.get(t)).collect();
        if sets.len() != terms.len() {
            return Vec::new();
        }
        sets.sort_by_key(|s| s.len());
        let mut acc: BTreeSet<String> = sets[0].clone();
        for s in &sets[1..] {
            acc.retain(|k| s.contains(k));
        }
        acc.into_iter().collect()
    }

    /// tf·idf ranked search: `tf(term, d) = 1 / |d|` (document length in
    /// surviving terms), `idf(term) = ln(N / df(term))`. Candidates are
    /// any document containing at least one query term; per-document
    /// score sums tf·idf over query terms present in that document.
    /// Returns the top `limit` by score descending, ties broken by
    /// document id ascending.
    pub fn ranked_search(&self, query: &str, limit: usize) -> Vec<ScoredDoc> {
        let terms = self.tokenizer.tokenize(query);
        let inner = self.inner.read();
        let total_docs = inner.documents.len();
        if total_docs == 0 || terms.is_empty() {
            return Vec::new();
        }

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for t in &terms {
            if let Some(set) = inner.postings.get(t) {
                candidates.extend(set.iter().cloned());
            }
        }

        let mut scored: Vec<ScoredDoc> = candidates
            .into_iter()
            .map(|doc_id| {
                let doc = &inner.documents[&doc_id];
                let mut score = 0.0;
                for t in &terms {
                    if !doc.terms.contains(t) {
                        continue;
                    }
                    let df = inner.postings.get(t).map(|s| s.len()).unwrap_or(0);
                    if df == 0 || doc.term_count == 0 {
                        continue;
                    }
                    let tf = 1.0 / doc.term_count as f64;
                    let idf = (total_docs as f64 / df as f64).ln();
                    score += tf * idf;
                }
                ScoredDoc { document_id: doc_id, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap().then_with(|| a.document_id.cmp(&b.document_id))
        });
        scored.truncate(limit);
        scored
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().documents.len()
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().postings.len()
    }

    pub fn total_terms(&self) -> usize {
        self.inner.read().documents.values().map(|d| d.term_count).sum()
    }

    pub fn average_document_length(&self) -> f64 {
        let inner = self.inner.read();
        if inner.documents.is_empty() {
            return 0.0;
        }
        self.total_terms() as f64 / inner.documents.len() as f64
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.postings.clear();
        inner.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FullTextIndex {
        let idx = FullTextIndex::new("body_fts", "body");
        idx.index_document("d1", "the quick brown fox jumps over the lazy dog");
        idx.index_document("d2", "the lazy dog sleeps all day");
        idx.index_document("d3", "quick foxes are rare in the city");
        idx
    }

    #[test]
    fn search_is_and_intersection() {
        let idx = sample();
        assert_eq!(idx.search("lazy dog"), vec!["d1".to_string(), "d2".to_string()]);
    }

    #[test]
    fn wildcard_search_matches_glob_pattern() {
        let idx = sample();
        let mut got = idx.wildcard_search("fox*");
        got.sort();
        assert_eq!(got, vec!["d1".to_string(), "d3".to_string()]);
    }

    #[test]
    fn ranked_search_orders_by_tfidf_and_truncates() {
        let idx = sample();
        let top = idx.ranked_search("quick lazy dog", 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].score >= top[1].score);
    }

    #[test]
    fn remove_document_drops_empty_postings() {
        let idx = sample();
        idx.remove_document("d1");
        idx.remove_document("d2");
        assert!(idx.search("lazy").is_empty());
        assert_eq!(idx.document_count(), 1);
    }

    #[test]
    fn update_document_replaces_terms() {
        let idx = sample();
        idx.update_document("d1", "completely different words here");
        assert!(idx.search("fox").is_empty());
        assert_eq!(idx.search("different"), vec!["d1".to_string()]);
    }
}
