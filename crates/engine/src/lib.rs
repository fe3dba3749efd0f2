//! The control plane (spec §4.9): the single `Database` type that
//! orchestrates the WAL, memtable, indexes, query optimizer, and the
//! checkpoint/backup managers behind the public API in §6.5. Grounded on
//! `examples/stratadb-labs-strata-core/crates/engine`'s role as the crate
//! that owns `Database` and wires every lower layer together, narrowed
//! from that teacher's multi-branch, multi-storage-shard design down to
//! this specification's single keyspace and single commit lock.

pub mod change_stream;
pub mod config;
mod database;
#[cfg(test)]
mod tests;

pub use change_stream::{ChangeEvent, ChangeReceiver};
pub use config::{DurabilityMode, EngineConfig};
pub use database::{Database, Transaction};

pub use kvdb_core::{Error, Result, TypedValue};
pub use kvdb_durability::{CheckpointResult, CheckpointTrigger};
pub use kvdb_executor::{ConditionOperator, IndexRecommendation, OptimizerStats, QueryCondition, QueryPlan};
pub use kvdb_search::{IndexKind, IndexMetadata, IndexQuery, LookupResult};
