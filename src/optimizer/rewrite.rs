//! Query rewriting and index selection.

use crate::config::OptimizerConfig;
use crate::error::QueryError;
use crate::model::Query;
use crate::optimizer::cost::{CostModel, QueryCost};
use crate::optimizer::plan::IndexId;

/// A query plus everything the optimizer decided about it.
#[derive(Debug, Clone)]
pub struct OptimizedQuery {
    pub query: Query,
    /// Filter names ordered most-selective first. Filters are conjunctive,
    /// so reordering changes evaluation cost, never semantics.
    pub filter_order: Vec<String>,
    pub index: IndexId,
    pub cost: QueryCost,
    pub cache_eligible: bool,
}

/// Rewrite the query and pick the cheapest capable engine.
pub(crate) fn optimize(
    query: &Query,
    model: &CostModel,
    doc_count: u64,
    config: &OptimizerConfig,
) -> Result<OptimizedQuery, QueryError> {
    if query.term.trim().is_empty() {
        return Err(QueryError::InvalidQuery("empty search term".into()));
    }

    // Most selective (smallest estimated candidate set) first; name order
    // keeps ties deterministic.
    let mut order: Vec<(String, f64)> = query
        .filters
        .iter()
        .map(|(name, value)| (name.clone(), model.selectivity(name, value).0))
        .collect();
    order.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let filter_order: Vec<String> = order.into_iter().map(|(name, _)| name).collect();

    // Cost every capable engine; minimum total wins, ties break toward the
    // higher-confidence estimate.
    let mut best: Option<(IndexId, QueryCost)> = None;
    for &engine in IndexId::candidates_for(query.kind) {
        let cost = model.estimate_for_engine(query, engine, doc_count);
        let better = match &best {
            None => true,
            Some((_, incumbent)) => {
                cost.total < incumbent.total
                    || (cost.total == incumbent.total && cost.confidence > incumbent.confidence)
            }
        };
        if better {
            best = Some((engine, cost));
        }
    }
    let (index, cost) = best.unwrap_or_else(|| {
        let engine = IndexId::default_for(query.kind);
        (engine, model.estimate_for_engine(query, engine, doc_count))
    });

    // Expensive queries are worth caching; cheap ones would just churn it.
    let cache_eligible = cost.total >= config.cache_cost_threshold;

    Ok(OptimizedQuery {
        query: query.clone(),
        filter_order,
        index,
        cost,
        cache_eligible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryKind;
    use std::sync::Arc;

    fn setup() -> (CostModel, Arc<OptimizerConfig>) {
        let config = Arc::new(OptimizerConfig::default());
        (CostModel::new(config.clone()), config)
    }

    #[test]
    fn test_empty_term_is_invalid() {
        let (model, config) = setup();
        let query = Query::new(QueryKind::Text, "   ");
        assert!(matches!(
            optimize(&query, &model, 100, &config),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_filters_ordered_by_selectivity() {
        let (model, config) = setup();

        // Teach the model that language=rust is barely selective while
        // kind=function is highly selective.
        model.observe_query(
            &Query::new(QueryKind::Symbol, "x").with_filter("language", "rust"),
            900,
            1000,
        );
        model.observe_query(
            &Query::new(QueryKind::Symbol, "x").with_filter("kind", "function"),
            5,
            1000,
        );

        let query = Query::new(QueryKind::Symbol, "parse")
            .with_filter("language", "rust")
            .with_filter("kind", "function");
        let optimized = optimize(&query, &model, 1000, &config).unwrap();
        assert_eq!(optimized.filter_order, vec!["kind", "language"]);
        // The rewrite left the query itself untouched.
        assert_eq!(optimized.query, query);
    }

    #[test]
    fn test_text_query_prefers_text_index() {
        let (model, config) = setup();
        let optimized =
            optimize(&Query::new(QueryKind::Text, "handler"), &model, 1000, &config).unwrap();
        // The text engine's profile is cheaper than the trigram scan.
        assert_eq!(optimized.index, IndexId::Text);
    }

    #[test]
    fn test_cache_eligibility_follows_threshold() {
        let (model, config) = setup();

        // A large corpus makes the scan expensive enough to cache.
        let expensive =
            optimize(&Query::new(QueryKind::Text, "handler"), &model, 100_000, &config).unwrap();
        assert!(expensive.cache_eligible);

        // Ten documents cost nearly nothing.
        let cheap =
            optimize(&Query::new(QueryKind::Text, "handler"), &model, 10, &config).unwrap();
        assert!(!cheap.cache_eligible);
    }
}
