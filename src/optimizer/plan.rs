//! Search plan construction.

use crate::model::{Query, QueryKind};
use crate::optimizer::cost::{CostModel, QueryCost};
use crate::optimizer::rewrite::OptimizedQuery;
use crate::storage::Filters;
use xxhash_rust::xxh3::xxh3_64;

/// Bumped whenever plan construction changes shape; part of the result cache
/// key so stale plans never serve cached results.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// The engines a plan step can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexId {
    Symbol,
    Text,
    Trigram,
    Vector,
    Reference,
}

/// Relative cost factors per candidate for one engine.
pub(crate) struct EngineProfile {
    pub io_factor: f64,
    pub cpu_factor: f64,
    pub mem_factor: f64,
}

impl IndexId {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexId::Symbol => "symbol-index",
            IndexId::Text => "text-index",
            IndexId::Trigram => "trigram-index",
            IndexId::Vector => "vector-index",
            IndexId::Reference => "reference-index",
        }
    }

    /// Point lookups are cheap all around; scans are io-heavy; embedding
    /// comparison is cpu-heavy.
    pub(crate) fn profile(self) -> EngineProfile {
        match self {
            IndexId::Symbol => EngineProfile {
                io_factor: 0.2,
                cpu_factor: 0.1,
                mem_factor: 0.05,
            },
            IndexId::Text => EngineProfile {
                io_factor: 1.0,
                cpu_factor: 0.4,
                mem_factor: 0.2,
            },
            IndexId::Trigram => EngineProfile {
                io_factor: 1.6,
                cpu_factor: 0.6,
                mem_factor: 0.3,
            },
            IndexId::Vector => EngineProfile {
                io_factor: 0.6,
                cpu_factor: 2.5,
                mem_factor: 0.8,
            },
            IndexId::Reference => EngineProfile {
                io_factor: 0.4,
                cpu_factor: 0.2,
                mem_factor: 0.1,
            },
        }
    }

    /// Engines capable of serving a query kind, in preference order.
    pub(crate) fn candidates_for(kind: QueryKind) -> &'static [IndexId] {
        match kind {
            QueryKind::Symbol => &[IndexId::Symbol],
            QueryKind::Text => &[IndexId::Text, IndexId::Trigram],
            QueryKind::Fuzzy => &[IndexId::Trigram],
            QueryKind::Semantic => &[IndexId::Vector],
            QueryKind::Reference => &[IndexId::Reference],
        }
    }

    pub(crate) fn default_for(kind: QueryKind) -> IndexId {
        Self::candidates_for(kind)[0]
    }
}

/// One engine invocation within a plan.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub engine: IndexId,
    pub term: String,
    pub filters: Filters,
    pub cost: QueryCost,
    /// Steps with no data dependency between them may run concurrently.
    pub parallel_eligible: bool,
}

/// Ordered sequence of engine invocations answering one query.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub steps: Vec<PlanStep>,
    pub version: u32,
    pub cache_eligible: bool,
    /// Usage-statistics shape of the originating query.
    pub(crate) shape: String,
    /// Fingerprint of the originating query, mixed into the cache key.
    pub(crate) cache_seed: u64,
}

impl SearchPlan {
    /// Plan-level cost: the sum of its step costs.
    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.cost.total).sum()
    }
}

/// Build the plan for an optimized query. A semantic query fans out into a
/// vector step plus a text step whose results are merged; every other kind
/// is answered by its single chosen engine.
pub(crate) fn build_plan(
    optimized: &OptimizedQuery,
    model: &CostModel,
    doc_count: u64,
) -> SearchPlan {
    let query = &optimized.query;
    let step = |engine: IndexId, parallel_eligible: bool| PlanStep {
        engine,
        term: query.term.clone(),
        filters: query.filters.clone(),
        cost: model.estimate_for_engine(query, engine, doc_count),
        parallel_eligible,
    };

    let steps = match query.kind {
        QueryKind::Semantic => vec![step(IndexId::Vector, true), step(IndexId::Text, true)],
        _ => vec![step(optimized.index, false)],
    };

    SearchPlan {
        steps,
        version: PLAN_FORMAT_VERSION,
        cache_eligible: optimized.cache_eligible,
        shape: query.shape(),
        cache_seed: query_fingerprint(query),
    }
}

/// Deterministic fingerprint of (kind, term, filters). Filters iterate in
/// key order, so equal queries hash equally regardless of construction
/// order.
fn query_fingerprint(query: &Query) -> u64 {
    let mut buf = String::new();
    buf.push_str(query.kind.as_str());
    buf.push('\x1f');
    buf.push_str(&query.term);
    for (name, value) in &query.filters {
        buf.push('\x1f');
        buf.push_str(name);
        buf.push('=');
        buf.push_str(value);
    }
    xxh3_64(buf.as_bytes())
}
