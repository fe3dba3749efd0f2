//! The cost-based query optimizer (spec §4.8).
//!
//! Grounded line-for-line on
//! `examples/original_source/src/index/query_optimizer.cpp`: the cost
//! model constants, the per-condition selectivity defaults, and the
//! AND/OR combination rules are carried over verbatim, adapted from the
//! original's `IndexManager&` reference to an `Arc<IndexManager>` handle
//! so a `QueryOptimizer` can be cloned freely and shared across the
//! control plane without a lifetime.

use std::sync::Arc;
use std::time::Instant;

use kvdb_search::{IndexKind, IndexManager, IndexQuery as SearchIndexQuery};
use parking_lot::Mutex;

use crate::types::{
    ConditionOperator, ExecutionStrategy, IndexQueryKind, IndexRecommendation, OptimizerStats, QueryCondition,
    QueryPlan,
};

const FULL_SCAN_COST_PER_RECORD: f64 = 1.0;
const INDEX_LOOKUP_BASE_COST: f64 = 10.0;
const INDEX_SCAN_COST_PER_RECORD: f64 = 0.1;

const DEFAULT_EQUALITY_SELECTIVITY: f64 = 0.1;
const DEFAULT_RANGE_SELECTIVITY: f64 = 0.3;
const DEFAULT_LIKE_SELECTIVITY: f64 = 0.2;

/// Threshold (occurrences) past which `recommend_indexes` suggests a
/// field, matching the original source's hardcoded `>= 5`. The engine may
/// override this via [`QueryOptimizer::with_recommend_threshold`] from
/// `EngineConfig::index_recommend_threshold`.
const DEFAULT_RECOMMEND_THRESHOLD: usize = 5;

#[derive(Default)]
struct StatsInner {
    total_queries: u64,
    index_hits: u64,
    full_scans: u64,
    total_time_ms: f64,
}

/// Maps `QueryCondition`s to `QueryPlan`s, choosing between the index set
/// and a full scan by estimated cost. Holds no data of its own beyond
/// bookkeeping — all index facts come from the shared [`IndexManager`].
pub struct QueryOptimizer {
    index_manager: Arc<IndexManager>,
    stats: Mutex<StatsInner>,
    /// Assumed table size used for full-scan cost when the caller hasn't
    /// supplied a real count (the original hardcodes 10_000 at every call
    /// site); settable via [`Self::set_estimated_total_records`].
    estimated_total_records: Mutex<usize>,
    recommend_threshold: usize,
}

impl QueryOptimizer {
    pub fn new(index_manager: Arc<IndexManager>) -> Self {
        QueryOptimizer {
            index_manager,
            stats: Mutex::new(StatsInner::default()),
            estimated_total_records: Mutex::new(10_000),
            recommend_threshold: DEFAULT_RECOMMEND_THRESHOLD,
        }
    }

    pub fn with_recommend_threshold(mut self, threshold: usize) -> Self {
        self.recommend_threshold = threshold;
        self
    }

    pub fn set_estimated_total_records(&self, n: usize) {
        *self.estimated_total_records.lock() = n;
    }

    fn total_records(&self) -> usize {
        *self.estimated_total_records.lock()
    }

    // -- cost / selectivity model ----------------------------------------

    pub fn estimate_full_scan_cost(&self, total_records: usize) -> f64 {
        total_records as f64 * FULL_SCAN_COST_PER_RECORD
    }

    pub fn estimate_condition_selectivity(&self, condition: &QueryCondition) -> f64 {
        match condition.op {
            ConditionOperator::Eq | ConditionOperator::Ne => DEFAULT_EQUALITY_SELECTIVITY,
            ConditionOperator::Lt | ConditionOperator::Le | ConditionOperator::Gt | ConditionOperator::Ge => {
                DEFAULT_RANGE_SELECTIVITY
            }
            ConditionOperator::Like | ConditionOperator::NotLike => DEFAULT_LIKE_SELECTIVITY,
        }
    }

    fn condition_to_query_kind(op: ConditionOperator) -> IndexQueryKind {
        match op {
            ConditionOperator::Eq => IndexQueryKind::Exact,
            ConditionOperator::Lt | ConditionOperator::Le | ConditionOperator::Gt | ConditionOperator::Ge => {
                IndexQueryKind::Range
            }
            ConditionOperator::Like => IndexQueryKind::Prefix,
            // NOT_EQUALS / NOT_LIKE aren't handled by any arm in the
            // source's switch either, so they fall through to its
            // default: EXACT_MATCH.
            ConditionOperator::Ne | ConditionOperator::NotLike => IndexQueryKind::Exact,
        }
    }

    pub fn estimate_index_lookup_cost(&self, index_name: &str, kind: IndexQueryKind) -> f64 {
        let total_entries = self.index_manager.index_size(index_name).unwrap_or(0) as f64;
        let scan_cost = match kind {
            IndexQueryKind::Exact => {
                let selectivity = self.index_manager.index_selectivity(index_name).unwrap_or(DEFAULT_EQUALITY_SELECTIVITY);
                if selectivity <= 0.0 {
                    INDEX_SCAN_COST_PER_RECORD
                } else {
                    INDEX_SCAN_COST_PER_RECORD * (1.0 / selectivity)
                }
            }
            IndexQueryKind::Range => INDEX_SCAN_COST_PER_RECORD * (total_entries * DEFAULT_RANGE_SELECTIVITY),
            IndexQueryKind::Prefix => INDEX_SCAN_COST_PER_RECORD * (total_entries * DEFAULT_LIKE_SELECTIVITY),
        };
        INDEX_LOOKUP_BASE_COST + scan_cost
    }

    pub fn estimate_index_selectivity(&self, index_name: &str, kind: IndexQueryKind) -> f64 {
        match kind {
            IndexQueryKind::Exact => self.index_manager.index_selectivity(index_name).unwrap_or(DEFAULT_EQUALITY_SELECTIVITY),
            IndexQueryKind::Range => DEFAULT_RANGE_SELECTIVITY,
            IndexQueryKind::Prefix => DEFAULT_LIKE_SELECTIVITY,
        }
    }

    // -- planning ----------------------------------------------------------

    /// Spec §4.8 algorithm for a single condition.
    pub fn optimize_single_condition(&self, condition: &QueryCondition) -> QueryPlan {
        self.stats.lock().total_queries += 1;
        let start = Instant::now();
        let plan = self.optimize_single_condition_inner(condition);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut stats = self.stats.lock();
        if plan.use_index {
            stats.index_hits += 1;
        } else {
            stats.full_scans += 1;
        }
        stats.total_time_ms += elapsed_ms;
        plan
    }

    fn optimize_single_condition_inner(&self, condition: &QueryCondition) -> QueryPlan {
        let kind = Self::condition_to_query_kind(condition.op);
        let applicable = self.applicable_indexes(&condition.field);

        if applicable.is_empty() {
            return QueryPlan {
                use_index: false,
                est_cost: self.estimate_full_scan_cost(self.total_records()),
                est_selectivity: self.estimate_condition_selectivity(condition),
                ..Default::default()
            };
        }

        let mut best: Option<(String, f64)> = None;
        for name in &applicable {
            let cost = self.estimate_index_lookup_cost(name, kind);
            if best.as_ref().map(|(_, c)| cost < *c).unwrap_or(true) {
                best = Some((name.clone(), cost));
            }
        }
        let (best_name, best_cost) = best.expect("applicable is non-empty");
        let full_scan_cost = self.estimate_full_scan_cost(self.total_records());

        if best_cost < full_scan_cost {
            let candidate_keys = self.lookup_candidates(&best_name, kind, &condition.value);
            tracing::debug!(
                field = condition.field,
                index = best_name,
                cost = best_cost,
                full_scan_cost,
                "optimizer chose index lookup"
            );
            QueryPlan {
                use_index: true,
                index_name: Some(best_name.clone()),
                index_query_kind: Some(kind),
                candidate_keys,
                est_cost: best_cost,
                est_selectivity: self.estimate_index_selectivity(&best_name, kind),
            }
        } else {
            tracing::debug!(field = condition.field, full_scan_cost, "optimizer chose full scan");
            QueryPlan {
                use_index: false,
                est_cost: full_scan_cost,
                est_selectivity: self.estimate_condition_selectivity(condition),
                ..Default::default()
            }
        }
    }

    /// Spec §4.8: AND picks the single cheapest-by-selectivity plan and
    /// multiplies in the other conditions' selectivities; OR falls back to
    /// a full scan with summed (capped) selectivities.
    pub fn optimize_multiple_conditions(&self, conditions: &[QueryCondition], use_and: bool) -> QueryPlan {
        if conditions.is_empty() {
            return QueryPlan::default();
        }
        if conditions.len() == 1 {
            return self.optimize_single_condition(&conditions[0]);
        }

        let individual: Vec<QueryPlan> = conditions.iter().map(|c| self.optimize_single_condition(c)).collect();

        if use_and {
            let best_idx = individual
                .iter()
                .enumerate()
                .filter(|(_, p)| p.use_index)
                .min_by(|(_, a), (_, b)| a.est_selectivity.total_cmp(&b.est_selectivity));

            match best_idx {
                Some((i, _)) => {
                    let mut plan = individual[i].clone();
                    let mut combined = plan.est_selectivity;
                    for (j, other) in individual.iter().enumerate() {
                        if j != i {
                            combined *= other.est_selectivity;
                        }
                    }
                    plan.est_selectivity = combined;
                    plan
                }
                None => {
                    let mut selectivity = DEFAULT_EQUALITY_SELECTIVITY;
                    for c in conditions {
                        selectivity *= self.estimate_condition_selectivity(c);
                    }
                    QueryPlan {
                        use_index: false,
                        est_cost: self.estimate_full_scan_cost(self.total_records()),
                        est_selectivity: selectivity,
                        ..Default::default()
                    }
                }
            }
        } else {
            let combined: f64 = conditions.iter().map(|c| self.estimate_condition_selectivity(c)).sum();
            QueryPlan {
                use_index: false,
                est_cost: self.estimate_full_scan_cost(self.total_records()),
                est_selectivity: combined.min(1.0),
                ..Default::default()
            }
        }
    }

    /// Spec §4.8 step 2: applicable indexes, narrowed to kinds this
    /// condition-based optimizer can actually drive (`Secondary`/
    /// `Composite`; full-text/positional indexes are queried directly by
    /// free-text, not through a `QueryCondition`).
    fn applicable_indexes(&self, field: &str) -> Vec<String> {
        self.index_manager
            .applicable_indexes(field)
            .into_iter()
            .filter(|name| {
                matches!(
                    self.index_manager.metadata(name).map(|m| m.kind),
                    Some(IndexKind::Secondary) | Some(IndexKind::Composite)
                )
            })
            .collect()
    }

    fn lookup_candidates(&self, index_name: &str, kind: IndexQueryKind, value: &str) -> Vec<String> {
        let query = match kind {
            IndexQueryKind::Exact => SearchIndexQuery::Exact(&[value]),
            IndexQueryKind::Prefix => SearchIndexQuery::Prefix(&[value]),
            IndexQueryKind::Range => SearchIndexQuery::Range(&[value], &["~"]),
        };
        let result = self.index_manager.lookup(index_name, &query);
        if result.success {
            result.keys
        } else {
            Vec::new()
        }
    }

    /// Execution strategy a plan should be carried out with (spec §4.8's
    /// `choose_strategy`, supplemented from the original source).
    pub fn choose_strategy(&self, plan: &QueryPlan) -> ExecutionStrategy {
        let Some(name) = &plan.index_name else {
            return ExecutionStrategy::FullScan;
        };
        if !plan.use_index {
            return ExecutionStrategy::FullScan;
        }
        match self.index_manager.metadata(name).map(|m| m.kind) {
            Some(IndexKind::Secondary) => match plan.index_query_kind {
                Some(IndexQueryKind::Range) => ExecutionStrategy::IndexRangeScan,
                _ => ExecutionStrategy::IndexLookup,
            },
            Some(IndexKind::Composite) => ExecutionStrategy::CompositeIndex,
            Some(IndexKind::FullText) => ExecutionStrategy::FullTextSearch,
            Some(IndexKind::Positional) => ExecutionStrategy::InvertedIndex,
            None => ExecutionStrategy::IndexLookup,
        }
    }

    /// Best-effort condition reordering: evaluate the most selective
    /// (cheapest) conditions first (supplemented feature, SPEC_FULL.md
    /// §10; original source's `rewrite_conditions`).
    pub fn rewrite_conditions(&self, conditions: &[QueryCondition]) -> Vec<QueryCondition> {
        let mut rewritten: Vec<QueryCondition> = conditions.to_vec();
        rewritten.sort_by(|a, b| {
            self.estimate_condition_selectivity(a)
                .total_cmp(&self.estimate_condition_selectivity(b))
        });
        rewritten
    }

    /// Proposes new secondary/full-text indexes from a sample of
    /// frequently-issued conditions (supplemented feature, SPEC_FULL.md
    /// §10; original source's `recommend_indexes`).
    pub fn recommend_indexes(&self, frequent_conditions: &[QueryCondition]) -> Vec<IndexRecommendation> {
        use std::collections::BTreeMap;

        let mut field_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for c in frequent_conditions {
            *field_frequency.entry(c.field.as_str()).or_insert(0) += 1;
        }

        let mut recommendations = Vec::new();
        for (field, frequency) in &field_frequency {
            if *frequency < self.recommend_threshold {
                continue;
            }
            if !self.applicable_indexes(field).is_empty() {
                continue;
            }
            recommendations.push(IndexRecommendation {
                suggested_name: format!("{field}_idx"),
                kind: IndexKind::Secondary,
                fields: vec![field.to_string()],
                expected_improvement: *frequency as f64 * 0.8,
                reason: format!("field '{field}' is frequently queried ({frequency} times)"),
            });
        }

        if frequent_conditions
            .iter()
            .any(|c| c.op == ConditionOperator::Like && c.field == "value")
        {
            let has_fulltext = self
                .index_manager
                .list_indexes()
                .iter()
                .any(|m| m.kind == IndexKind::FullText && m.fields.first().map(|f| f == "value").unwrap_or(false));
            if !has_fulltext {
                recommendations.push(IndexRecommendation {
                    suggested_name: "value_fulltext_idx".to_string(),
                    kind: IndexKind::FullText,
                    fields: vec!["value".to_string()],
                    expected_improvement: 10.0,
                    reason: "LIKE queries on the value field would benefit from a full-text index".to_string(),
                });
            }
        }

        recommendations
    }

    pub fn get_stats(&self) -> OptimizerStats {
        let stats = self.stats.lock();
        OptimizerStats {
            total_queries: stats.total_queries,
            index_hits: stats.index_hits,
            full_scans: stats.full_scans,
            average_query_time_ms: if stats.total_queries == 0 {
                0.0
            } else {
                stats.total_time_ms / stats.total_queries as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = StatsInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdb_core::value::TypedValue;
    use kvdb_storage::Memtable;

    fn condition(field: &str, op: ConditionOperator, value: &str) -> QueryCondition {
        QueryCondition::new(field, op, value)
    }

    fn indexed_manager() -> Arc<IndexManager> {
        let mgr = IndexManager::new();
        let mt = Memtable::new();
        mt.put("k1", TypedValue::String("10".into()), 1);
        mt.put("k2", TypedValue::String("20".into()), 2);
        mt.put("k3", TypedValue::String("20".into()), 3);
        mgr.create_secondary_index("by_value", kvdb_search::WHOLE_VALUE_FIELD, false, &mt, 10).unwrap();
        Arc::new(mgr)
    }

    #[test]
    fn equality_condition_uses_index_when_cheaper_than_full_scan() {
        let opt = QueryOptimizer::new(indexed_manager());
        let plan = opt.optimize_single_condition(&condition("value", ConditionOperator::Eq, "20"));
        assert!(plan.use_index);
        assert_eq!(plan.index_name.as_deref(), Some("by_value"));
        let mut keys = plan.candidate_keys.clone();
        keys.sort();
        assert_eq!(keys, vec!["k2".to_string(), "k3".to_string()]);
    }

    #[test]
    fn condition_on_unindexed_field_falls_back_to_full_scan() {
        let opt = QueryOptimizer::new(indexed_manager());
        let plan = opt.optimize_single_condition(&condition("other", ConditionOperator::Eq, "x"));
        assert!(!plan.use_index);
        assert_eq!(plan.est_selectivity, DEFAULT_EQUALITY_SELECTIVITY);
    }

    #[test]
    fn full_scan_cost_scales_with_total_records() {
        let opt = QueryOptimizer::new(Arc::new(IndexManager::new()));
        assert_eq!(opt.estimate_full_scan_cost(100), 100.0);
        assert_eq!(opt.estimate_full_scan_cost(0), 0.0);
    }

    #[test]
    fn and_combination_multiplies_selectivity_of_the_best_plan() {
        let opt = QueryOptimizer::new(indexed_manager());
        let conditions = vec![
            condition("value", ConditionOperator::Eq, "20"),
            condition("other", ConditionOperator::Like, "x"),
        ];
        let plan = opt.optimize_multiple_conditions(&conditions, true);
        assert!(plan.use_index);
        // selectivity(by_value) * selectivity(LIKE default)
        assert!((plan.est_selectivity - (0.5 * DEFAULT_LIKE_SELECTIVITY)).abs() < 1e-9);
    }

    #[test]
    fn or_combination_sums_and_caps_selectivity() {
        let opt = QueryOptimizer::new(indexed_manager());
        let conditions = vec![
            condition("value", ConditionOperator::Eq, "20"),
            condition("value", ConditionOperator::Eq, "10"),
            condition("value", ConditionOperator::Eq, "99"),
            condition("value", ConditionOperator::Eq, "1"),
            condition("value", ConditionOperator::Eq, "2"),
            condition("value", ConditionOperator::Eq, "3"),
            condition("value", ConditionOperator::Eq, "4"),
            condition("value", ConditionOperator::Eq, "5"),
            condition("value", ConditionOperator::Eq, "6"),
            condition("value", ConditionOperator::Eq, "7"),
            condition("value", ConditionOperator::Eq, "8"),
        ];
        let plan = opt.optimize_multiple_conditions(&conditions, false);
        assert!(!plan.use_index);
        assert_eq!(plan.est_selectivity, 1.0);
    }

    #[test]
    fn choose_strategy_maps_secondary_range_to_range_scan() {
        let opt = QueryOptimizer::new(indexed_manager());
        let plan = QueryPlan {
            use_index: true,
            index_name: Some("by_value".to_string()),
            index_query_kind: Some(IndexQueryKind::Range),
            ..Default::default()
        };
        assert_eq!(opt.choose_strategy(&plan), ExecutionStrategy::IndexRangeScan);
    }

    #[test]
    fn choose_strategy_without_index_is_full_scan() {
        let opt = QueryOptimizer::new(indexed_manager());
        assert_eq!(opt.choose_strategy(&QueryPlan::default()), ExecutionStrategy::FullScan);
    }

    #[test]
    fn rewrite_conditions_orders_by_selectivity() {
        let opt = QueryOptimizer::new(Arc::new(IndexManager::new()));
        let conditions = vec![
            condition("a", ConditionOperator::Like, "x"),
            condition("b", ConditionOperator::Eq, "y"),
            condition("c", ConditionOperator::Gt, "1"),
        ];
        let rewritten = opt.rewrite_conditions(&conditions);
        assert_eq!(rewritten[0].field, "b"); // equality: 0.1
        assert_eq!(rewritten[1].field, "a"); // like: 0.2
        assert_eq!(rewritten[2].field, "c"); // range: 0.3
    }

    #[test]
    fn recommend_indexes_suggests_frequent_unindexed_field() {
        let opt = QueryOptimizer::new(Arc::new(IndexManager::new())).with_recommend_threshold(3);
        let conditions = vec![
            condition("status", ConditionOperator::Eq, "a"),
            condition("status", ConditionOperator::Eq, "b"),
            condition("status", ConditionOperator::Eq, "c"),
        ];
        let recs = opt.recommend_indexes(&conditions);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].suggested_name, "status_idx");
        assert_eq!(recs[0].kind, IndexKind::Secondary);
    }

    #[test]
    fn recommend_indexes_skips_already_indexed_field() {
        let opt = QueryOptimizer::new(indexed_manager()).with_recommend_threshold(1);
        let conditions = vec![condition("value", ConditionOperator::Eq, "20")];
        let recs = opt.recommend_indexes(&conditions);
        assert!(recs.is_empty());
    }

    #[test]
    fn recommend_indexes_suggests_fulltext_for_like_on_value() {
        let opt = QueryOptimizer::new(Arc::new(IndexManager::new())).with_recommend_threshold(100);
        let conditions = vec![condition("value", ConditionOperator::Like, "needle")];
        let recs = opt.recommend_indexes(&conditions);
        assert!(recs.iter().any(|r| r.suggested_name == "value_fulltext_idx"));
    }

    #[test]
    fn stats_track_hits_and_scans() {
        let opt = QueryOptimizer::new(indexed_manager());
        opt.optimize_single_condition(&condition("value", ConditionOperator::Eq, "20"));
        opt.optimize_single_condition(&condition("missing", ConditionOperator::Eq, "x"));
        let stats = opt.get_stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.index_hits, 1);
        assert_eq!(stats.full_scans, 1);
        assert!((stats.index_hit_rate() - 0.5).abs() < 1e-9);

        opt.reset_stats();
        assert_eq!(opt.get_stats().total_queries, 0);
    }
}
