//! Cost-based query optimizer (spec §4.8).
//!
//! A [`QueryOptimizer`] maps a [`QueryCondition`] (or a conjunction/
//! disjunction of them) to a [`QueryPlan`]: either "use index `X` with
//! these candidate keys" or "full scan", chosen by the cost model in
//! `examples/original_source/src/index/query_optimizer.cpp`. It holds an
//! `Arc<kvdb_search::IndexManager>` and nothing else — the actual index
//! data structures live in `kvdb-search`; this crate only decides which
//! one (if any) a query should use.

pub mod optimizer;
pub mod types;

pub use optimizer::QueryOptimizer;
pub use types::{
    ConditionOperator, ExecutionStrategy, IndexQueryKind, IndexRecommendation, OptimizerStats, QueryCondition,
    QueryPlan,
};
