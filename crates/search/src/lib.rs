//! Secondary, composite, full-text and positional inverted indexes, plus
//! the manager that owns them (spec §4.7).
//!
//! Each index type guards its own data with an internal lock and can be
//! driven directly; [`index_manager::IndexManager`] is the entry point
//! the control plane in `kvdb-engine` actually uses, since it also owns
//! index creation/population and the per-index lock registry from
//! `kvdb-concurrency`.

pub mod composite_index;
pub mod fulltext_index;
mod glob;
pub mod index_manager;
pub mod positional_index;
pub mod secondary_index;
pub mod tokenizer;

pub use composite_index::CompositeIndex;
pub use fulltext_index::{FullTextIndex, ScoredDoc as FullTextScoredDoc};
pub use index_manager::{
    extract_field, IndexKind, IndexManager, IndexMetadata, IndexQuery, LookupResult, WHOLE_VALUE_FIELD,
};
pub use positional_index::{PositionalIndex, ScoredDoc as PositionalScoredDoc};
pub use secondary_index::SecondaryIndex;
pub use tokenizer::{Position, Tokenizer};
