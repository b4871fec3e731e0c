//! Query cost model and selectivity statistics.
//!
//! Costs are unitless relative scores: each filter shrinks an estimated
//! candidate set multiplicatively, and the chosen engine's profile converts
//! the remaining candidates into cpu/io/memory components. Selectivities are
//! learned from observed result sizes through an exponential moving average,
//! so a single outlier query can't wreck the statistics.

use crate::config::OptimizerConfig;
use crate::model::Query;
use crate::optimizer::plan::IndexId;
use ahash::AHashMap;
use std::sync::{Arc, Mutex};

/// Selectivities are clamped into this range; 1.0 means "filters nothing",
/// and the floor keeps the multiplicative model away from zero.
const MIN_SELECTIVITY: f64 = 1e-4;

/// Cost estimate for one query or plan step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryCost {
    pub cpu: f64,
    pub io: f64,
    pub memory: f64,
    /// Weighted sum of the components.
    pub total: f64,
    /// 0..=1; low when the filters involved have no learned statistics.
    pub confidence: f64,
}

impl QueryCost {
    pub fn zero() -> Self {
        Self {
            cpu: 0.0,
            io: 0.0,
            memory: 0.0,
            total: 0.0,
            confidence: 1.0,
        }
    }
}

/// Per-filter selectivity factors, keyed `name=value`.
struct SelectivityStats {
    map: Mutex<AHashMap<String, f64>>,
    default_selectivity: f64,
    alpha: f64,
}

impl SelectivityStats {
    fn get(&self, key: &str) -> Option<f64> {
        self.map.lock().unwrap().get(key).copied()
    }

    fn observe(&self, key: &str, observed: f64) {
        let observed = observed.clamp(MIN_SELECTIVITY, 1.0);
        let mut map = self.map.lock().unwrap();
        let entry = map.entry(key.to_string()).or_insert(self.default_selectivity);
        *entry = (1.0 - self.alpha) * *entry + self.alpha * observed;
    }
}

/// The cost model shared by estimation, rewriting and planning.
pub struct CostModel {
    config: Arc<OptimizerConfig>,
    stats: SelectivityStats,
}

impl CostModel {
    pub fn new(config: Arc<OptimizerConfig>) -> Self {
        let stats = SelectivityStats {
            map: Mutex::new(AHashMap::new()),
            default_selectivity: config.default_selectivity,
            alpha: config.ema_alpha,
        };
        Self { config, stats }
    }

    pub(crate) fn filter_key(name: &str, value: &str) -> String {
        format!("{name}={value}")
    }

    /// Selectivity for a filter and whether it came from learned statistics.
    pub fn selectivity(&self, name: &str, value: &str) -> (f64, bool) {
        match self.stats.get(&Self::filter_key(name, value)) {
            Some(s) => (s.clamp(MIN_SELECTIVITY, 1.0), true),
            None => (self.config.default_selectivity, false),
        }
    }

    /// Estimate the query's cost against the default engine for its kind.
    pub fn estimate(&self, query: &Query, doc_count: u64) -> QueryCost {
        self.estimate_for_engine(query, IndexId::default_for(query.kind), doc_count)
    }

    /// Estimate the query's cost when served by a specific engine.
    ///
    /// io is proportional to the post-filter candidate estimate; cpu to the
    /// ranking work on those candidates. Because every selectivity is at
    /// most 1.0, adding a filter can never increase the estimate.
    pub fn estimate_for_engine(&self, query: &Query, engine: IndexId, doc_count: u64) -> QueryCost {
        let mut candidates = doc_count.max(1) as f64;
        let mut learned = 0usize;
        for (name, value) in &query.filters {
            let (selectivity, is_learned) = self.selectivity(name, value);
            if is_learned {
                learned += 1;
            }
            candidates *= selectivity;
        }

        let profile = engine.profile();
        let cpu = candidates * profile.cpu_factor;
        let io = candidates * profile.io_factor;
        let memory = candidates * profile.mem_factor;
        let total = self.config.cpu_weight * cpu
            + self.config.io_weight * io
            + self.config.memory_weight * memory;
        let confidence = if query.filters.is_empty() {
            1.0
        } else {
            learned as f64 / query.filters.len() as f64
        };

        QueryCost {
            cpu,
            io,
            memory,
            total,
            confidence,
        }
    }

    /// Fold an observed result size back into the per-filter selectivities.
    ///
    /// The overall observed selectivity is distributed evenly across the
    /// query's filters (nth root), since individual contributions are not
    /// separable from one measurement.
    pub fn observe_query(&self, query: &Query, result_count: usize, doc_count: u64) {
        if query.filters.is_empty() || doc_count == 0 {
            return;
        }
        let overall = (result_count as f64 / doc_count as f64).clamp(MIN_SELECTIVITY, 1.0);
        let per_filter = overall.powf(1.0 / query.filters.len() as f64);
        for (name, value) in &query.filters {
            self.stats.observe(&Self::filter_key(name, value), per_filter);
        }
    }
}
