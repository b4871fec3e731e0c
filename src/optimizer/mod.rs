//! Cost-based query optimization and execution.
//!
//! The pipeline is strictly one-directional: a [`Query`] is costed and
//! rewritten into an [`OptimizedQuery`], expanded into a [`SearchPlan`], and
//! executed against the storage port's engines. Execution feeds observed
//! result sizes and latencies back into the selectivity statistics and the
//! index advisor.

pub mod advisor;
pub mod cost;
pub mod exec;
pub mod monitor;
pub mod plan;
pub mod rewrite;

pub use advisor::IndexSuggestion;
pub use cost::QueryCost;
pub use exec::ExecutionOutcome;
pub use monitor::PerformanceReport;
pub use plan::{IndexId, PlanStep, SearchPlan};
pub use rewrite::OptimizedQuery;

use crate::config::OptimizerConfig;
use crate::error::QueryError;
use crate::model::Query;
use crate::optimizer::advisor::IndexAdvisor;
use crate::optimizer::cost::CostModel;
use crate::optimizer::exec::PlanExecutor;
use crate::optimizer::monitor::PerformanceMonitor;
use crate::storage::StoragePort;
use std::sync::Arc;
use std::time::Instant;

/// Facade wiring the cost model, rewriter, planner, executor, monitor and
/// advisor together over one storage port.
pub struct QueryOptimizer {
    storage: Arc<dyn StoragePort>,
    config: Arc<OptimizerConfig>,
    cost: CostModel,
    executor: PlanExecutor,
    monitor: PerformanceMonitor,
    advisor: IndexAdvisor,
}

impl QueryOptimizer {
    pub fn new(storage: Arc<dyn StoragePort>, config: OptimizerConfig) -> Self {
        let config = Arc::new(config);
        Self {
            cost: CostModel::new(config.clone()),
            executor: PlanExecutor::new(storage.clone(), config.cache_capacity),
            monitor: PerformanceMonitor::new(config.misestimate_tolerance, config.report_history),
            advisor: IndexAdvisor::new(config.suggestion_min_occurrences),
            storage,
            config,
        }
    }

    /// Estimate the query's cost without executing anything.
    pub fn estimate_cost(&self, query: &Query) -> QueryCost {
        self.cost.estimate(query, self.storage.doc_count())
    }

    /// Rewrite the query (filter ordering) and select the cheapest engine.
    pub fn optimize_query(&self, query: &Query) -> Result<OptimizedQuery, QueryError> {
        rewrite::optimize(query, &self.cost, self.storage.doc_count(), &self.config)
    }

    /// Build the full search plan for a query.
    pub fn plan_search(&self, query: &Query) -> Result<SearchPlan, QueryError> {
        let optimized = self.optimize_query(query)?;
        Ok(plan::build_plan(
            &optimized,
            &self.cost,
            self.storage.doc_count(),
        ))
    }

    /// Execute a plan, consulting the result cache when the plan is
    /// cache-eligible.
    pub fn execute_plan(&self, plan: &SearchPlan) -> Result<ExecutionOutcome, QueryError> {
        self.storage.record_index_usage(&plan.shape);
        self.executor.execute(plan)
    }

    /// The full pipeline: optimize, plan, execute, then feed observed cost
    /// and result size back into the statistics.
    pub fn search(&self, query: &Query) -> Result<ExecutionOutcome, QueryError> {
        let plan = self.plan_search(query)?;
        let started = Instant::now();
        let outcome = self.execute_plan(&plan)?;

        let actual_cost = started.elapsed().as_secs_f64() * self.config.cost_units_per_sec;
        self.analyze_performance(&plan, actual_cost);
        if !outcome.from_cache {
            self.cost
                .observe_query(query, outcome.hits.len(), self.storage.doc_count());
        }
        self.advisor.record(query, plan.total_cost());

        Ok(outcome)
    }

    /// Compare a plan's estimate against measured cost, flagging
    /// misestimates beyond the configured tolerance.
    pub fn analyze_performance(&self, plan: &SearchPlan, actual_cost: f64) -> PerformanceReport {
        self.monitor.analyze(plan, actual_cost)
    }

    /// Composite-index suggestions from recorded filter co-occurrence.
    pub fn recommend_indexes(&self) -> Vec<IndexSuggestion> {
        self.advisor.recommend()
    }

    /// Tell the advisor a combination is already served by a composite
    /// index so it stops suggesting it.
    pub fn note_existing_index(&self, filters: Vec<String>) {
        self.advisor.note_existing(filters);
    }

    pub fn recent_reports(&self) -> Vec<PerformanceReport> {
        self.monitor.recent()
    }
}
