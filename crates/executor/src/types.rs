//! Types shared by the optimizer: conditions, plans, strategies, and the
//! supplemented recommendation/statistics surface (SPEC_FULL.md §10),
//! grounded on `examples/original_source/src/index/query_optimizer.h`'s
//! `QueryCondition`/`QueryPlan`/`ExecutionStrategy`/`IndexRecommendation`/
//! `OptimizerStats` structs.

use kvdb_search::IndexKind;

/// Comparison carried by a [`QueryCondition`]. Spec §4.8: `{=, ≠, <, ≤, >,
/// ≥, LIKE, NOT LIKE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

/// A single `field op value` predicate the optimizer maps to a plan.
#[derive(Debug, Clone)]
pub struct QueryCondition {
    pub field: String,
    pub op: ConditionOperator,
    pub value: String,
}

impl QueryCondition {
    pub fn new(field: impl Into<String>, op: ConditionOperator, value: impl Into<String>) -> Self {
        QueryCondition { field: field.into(), op, value: value.into() }
    }
}

/// What shape of index lookup a condition maps to (spec §4.8 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQueryKind {
    Exact,
    Range,
    Prefix,
}

/// How a plan should actually be carried out. `FullTextSearch` and
/// `InvertedIndex` are reachable only when an index of that kind happens
/// to cover the queried field; `QueryCondition` itself only ever produces
/// `Exact`/`Range`/`Prefix` lookups, so in practice this optimizer chooses
/// among `FullScan`, `IndexLookup`, `IndexRangeScan`, `CompositeIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    FullScan,
    IndexLookup,
    IndexRangeScan,
    CompositeIndex,
    FullTextSearch,
    InvertedIndex,
}

/// The optimizer's output for one condition (or one AND/OR group): which
/// index (if any) to use, the resolved candidate keys, and the cost model
/// values that led to the decision.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub use_index: bool,
    pub index_name: Option<String>,
    pub index_query_kind: Option<IndexQueryKind>,
    pub candidate_keys: Vec<String>,
    pub est_cost: f64,
    pub est_selectivity: f64,
}

impl Default for QueryPlan {
    fn default() -> Self {
        QueryPlan {
            use_index: false,
            index_name: None,
            index_query_kind: None,
            candidate_keys: Vec::new(),
            est_cost: 0.0,
            est_selectivity: 0.0,
        }
    }
}

/// A suggestion that a new index be created, produced by
/// `QueryOptimizer::recommend_indexes` from a sample of frequently-seen
/// conditions (supplemented feature, SPEC_FULL.md §10).
#[derive(Debug, Clone)]
pub struct IndexRecommendation {
    pub suggested_name: String,
    pub kind: IndexKind,
    pub fields: Vec<String>,
    pub expected_improvement: f64,
    pub reason: String,
}

/// Running counters surfaced by `QueryOptimizer::get_stats` (supplemented
/// feature, SPEC_FULL.md §10).
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizerStats {
    pub total_queries: u64,
    pub index_hits: u64,
    pub full_scans: u64,
    pub average_query_time_ms: f64,
}

impl OptimizerStats {
    pub fn index_hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.index_hits as f64 / self.total_queries as f64
        }
    }
}
