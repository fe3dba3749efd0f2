//! Text tokenizer shared by the full-text and positional inverted indexes
//! (spec §4.7 "Tokenizer"; supplemented knob set per SPEC_FULL.md §10).
//!
//! Grounded field-for-field on `examples/original_source/src/index/tokenizer.h`/
//! `.cpp`: the same five configuration knobs, the same default English
//! stop-word list (reproduced verbatim, duplicates included in the source
//! collapsing naturally into the `HashSet`), and the same filter order
//! (clean punctuation → normalize case → length bounds → stop word →
//! optional numeric filter).

use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

/// The exact default stop-word list shipped by the source tokenizer.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with", "the", "this", "but", "they",
    "have", "had", "what", "said", "each", "which", "she", "do", "how", "their", "if", "up", "out",
    "many", "then", "them", "these", "so", "some", "her", "would", "make", "like", "into", "him",
    "time", "two", "more", "go", "no", "way", "could", "my", "than", "first", "been", "call", "who",
    "oil", "sit", "now", "find", "down", "day", "did", "get", "come", "made", "may", "part",
];

/// Configurable text tokenizer. Splits on whitespace, cleans and normalizes
/// each token, then applies length bounds and a stop-word filter.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
    min_term_length: usize,
    max_term_length: usize,
    case_sensitive: bool,
    remove_punctuation: bool,
    remove_numbers: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        let mut t = Tokenizer {
            stop_words: HashSet::new(),
            min_term_length: 2,
            max_term_length: 50,
            case_sensitive: false,
            remove_punctuation: true,
            remove_numbers: false,
        };
        t.load_default_stop_words();
        t
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits, cleans, normalizes, and filters `text` into index-ready
    /// terms, in order of appearance.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .filter_map(|raw| {
                let cleaned = self.clean_term(raw);
                let normalized = self.normalize(&cleaned);
                self.accept(&normalized).then_some(normalized)
            })
            .collect()
    }

    /// As [`Self::tokenize`], but also returns each surviving term's
    /// position within `text` (spec §3.5: `{pos, sent_id, para_id}`) for
    /// the positional inverted index: `pos` is the term's 0-based ordinal
    /// in the filtered token stream, `sent_id` counts sentence breaks
    /// (`.`, `!`, `?`) seen so far, and `para_id` counts blank-line
    /// paragraph breaks seen so far.
    pub fn tokenize_with_positions(&self, text: &str) -> Vec<(String, Position)> {
        let mut out = Vec::new();
        let mut pos = 0u32;
        for (para_id, paragraph) in split_paragraphs(text).enumerate() {
            for (sent_id, sentence) in split_sentences(paragraph).enumerate() {
                for raw in sentence.split_whitespace() {
                    let cleaned = self.clean_term(raw);
                    let normalized = self.normalize(&cleaned);
                    if self.accept(&normalized) {
                        out.push((normalized, Position { pos, sent_id: sent_id as u32, para_id: para_id as u32 }));
                        pos += 1;
                    }
                }
            }
        }
        out
    }

    fn accept(&self, normalized: &str) -> bool {
        if normalized.is_empty() {
            return false;
        }
        let len = normalized.graphemes(true).count();
        if len < self.min_term_length || len > self.max_term_length {
            return false;
        }
        if self.is_stop_word(normalized) {
            return false;
        }
        if self.remove_numbers && is_number(normalized) {
            return false;
        }
        true
    }

    fn clean_term(&self, term: &str) -> String {
        if !self.remove_punctuation {
            return term.to_string();
        }
        term.chars().filter(|c| !c.is_ascii_punctuation()).collect()
    }

    pub fn normalize(&self, term: &str) -> String {
        if self.case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        }
    }

    pub fn add_stop_word(&mut self, word: &str) {
        self.stop_words.insert(self.normalize(word));
    }

    pub fn remove_stop_word(&mut self, word: &str) {
        self.stop_words.remove(&self.normalize(word));
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(&self.normalize(word))
    }

    pub fn load_default_stop_words(&mut self) {
        for w in DEFAULT_STOP_WORDS {
            self.stop_words.insert(w.to_string());
        }
    }

    pub fn set_min_term_length(&mut self, len: usize) {
        self.min_term_length = len;
    }
    pub fn set_max_term_length(&mut self, len: usize) {
        self.max_term_length = len;
    }
    pub fn set_case_sensitive(&mut self, sensitive: bool) {
        self.case_sensitive = sensitive;
    }
    pub fn set_remove_punctuation(&mut self, remove: bool) {
        self.remove_punctuation = remove;
    }
    pub fn set_remove_numbers(&mut self, remove: bool) {
        self.remove_numbers = remove;
    }

    pub fn min_term_length(&self) -> usize {
        self.min_term_length
    }
    pub fn max_term_length(&self) -> usize {
        self.max_term_length
    }
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }
    pub fn should_remove_punctuation(&self) -> bool {
        self.remove_punctuation
    }
    pub fn should_remove_numbers(&self) -> bool {
        self.remove_numbers
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
}

/// A term's location within a document, per spec §3.5/§4.7: a token
/// ordinal plus the sentence and paragraph it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub pos: u32,
    pub sent_id: u32,
    pub para_id: u32,
}

/// Splits on blank lines. A document with no blank line is one paragraph.
fn split_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|s| !s.is_empty())
}

/// Splits a paragraph on sentence-terminal punctuation (`.`, `!`, `?`).
fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?']).map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_and_lowercases_by_default() {
        let t = Tokenizer::new();
        assert_eq!(t.tokenize("The Quick Brown Fox"), vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn strips_punctuation_by_default() {
        let t = Tokenizer::new();
        assert_eq!(t.tokenize("hello, world!"), vec!["hello", "world"]);
    }

    #[test]
    fn respects_min_and_max_length() {
        let mut t = Tokenizer::new();
        t.set_min_term_length(4);
        assert_eq!(t.tokenize("a fox jumps"), vec!["jumps"]);
    }

    #[test]
    fn case_sensitive_mode_preserves_case() {
        let mut t = Tokenizer::new();
        t.set_case_sensitive(true);
        assert_eq!(t.tokenize("Fox jumps"), vec!["Fox", "jumps"]);
    }

    #[test]
    fn removes_numbers_when_enabled() {
        let mut t = Tokenizer::new();
        t.set_remove_numbers(true);
        assert_eq!(t.tokenize("order 12345 shipped"), vec!["order", "shipped"]);
    }

    #[test]
    fn custom_stop_words_round_trip() {
        let mut t = Tokenizer::new();
        t.add_stop_word("fox");
        assert!(t.is_stop_word("fox"));
        assert_eq!(t.tokenize("quick fox jumps"), vec!["quick", "jumps"]);
        t.remove_stop_word("fox");
        assert!(!t.is_stop_word("fox"));
    }

    #[test]
    fn positions_are_zero_based_ordinals_of_surviving_tokens() {
        let t = Tokenizer::new();
        let terms = t.tokenize_with_positions("the quick brown fox");
        let got: Vec<(String, u32)> = terms.into_iter().map(|(term, p)| (term, p.pos)).collect();
        assert_eq!(
            got,
            vec![("quick".to_string(), 0), ("brown".to_string(), 1), ("fox".to_string(), 2)]
        );
    }

    #[test]
    fn positions_track_sentence_and_paragraph_breaks() {
        let t = Tokenizer::new();
        let terms = t.tokenize_with_positions("quick fox jumps. lazy dog sleeps.\n\nnew paragraph starts");
        let sent_ids: Vec<u32> = terms.iter().map(|(_, p)| p.sent_id).collect();
        let para_ids: Vec<u32> = terms.iter().map(|(_, p)| p.para_id).collect();
        assert_eq!(sent_ids, vec![0, 0, 0, 1, 1, 1, 0, 0, 0]);
        assert_eq!(para_ids, vec![0, 0, 0, 0, 0, 0, 1, 1, 1]);
    }
}
