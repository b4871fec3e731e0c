//! Index suggestions from observed filter co-occurrence.

use crate::model::Query;
use ahash::{AHashMap, AHashSet};
use std::sync::Mutex;

/// A recommended composite index over a set of filter columns.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSuggestion {
    /// Filter names the index would cover, sorted.
    pub filters: Vec<String>,
    /// How many observed queries used exactly this combination.
    pub occurrences: u64,
    /// Estimated aggregate cost that would have been saved.
    pub benefit: f64,
}

struct ComboStat {
    count: u64,
    total_cost: f64,
}

/// Tracks which filter combinations queries actually use and suggests
/// composite indexes for the frequent ones not already covered.
pub(crate) struct IndexAdvisor {
    min_occurrences: u64,
    combos: Mutex<AHashMap<Vec<String>, ComboStat>>,
    existing: Mutex<AHashSet<Vec<String>>>,
}

impl IndexAdvisor {
    pub fn new(min_occurrences: u64) -> Self {
        Self {
            min_occurrences: min_occurrences.max(1),
            combos: Mutex::new(AHashMap::new()),
            existing: Mutex::new(AHashSet::new()),
        }
    }

    /// Record one executed query and its estimated cost. Single-filter
    /// queries are already served by per-column indexes and are ignored.
    pub fn record(&self, query: &Query, estimated_cost: f64) {
        if query.filters.len() < 2 {
            return;
        }
        let combo: Vec<String> = query.filters.keys().cloned().collect();
        let mut combos = self.combos.lock().unwrap();
        let stat = combos.entry(combo).or_insert(ComboStat {
            count: 0,
            total_cost: 0.0,
        });
        stat.count += 1;
        stat.total_cost += estimated_cost;
    }

    /// Mark a combination as served by an existing composite index.
    pub fn note_existing(&self, mut filters: Vec<String>) {
        filters.sort();
        self.existing.lock().unwrap().insert(filters);
    }

    /// Combinations at or above the frequency threshold, most beneficial
    /// first.
    pub fn recommend(&self) -> Vec<IndexSuggestion> {
        let combos = self.combos.lock().unwrap();
        let existing = self.existing.lock().unwrap();

        let mut suggestions: Vec<IndexSuggestion> = combos
            .iter()
            .filter(|(combo, stat)| {
                stat.count >= self.min_occurrences && !existing.contains(*combo)
            })
            .map(|(combo, stat)| IndexSuggestion {
                filters: combo.clone(),
                occurrences: stat.count,
                benefit: stat.total_cost,
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.benefit
                .partial_cmp(&a.benefit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.filters.cmp(&b.filters))
        });
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryKind;

    fn query() -> Query {
        Query::new(QueryKind::Symbol, "parse")
            .with_filter("language", "python")
            .with_filter("kind", "function")
    }

    #[test]
    fn test_suggestion_requires_threshold() {
        let advisor = IndexAdvisor::new(3);
        advisor.record(&query(), 100.0);
        advisor.record(&query(), 100.0);
        assert!(advisor.recommend().is_empty());

        advisor.record(&query(), 100.0);
        let suggestions = advisor.recommend();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].filters, vec!["kind", "language"]);
        assert_eq!(suggestions[0].occurrences, 3);
        assert!((suggestions[0].benefit - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_existing_index_suppresses_suggestion() {
        let advisor = IndexAdvisor::new(1);
        advisor.record(&query(), 50.0);
        advisor.note_existing(vec!["language".into(), "kind".into()]);
        assert!(advisor.recommend().is_empty());
    }

    #[test]
    fn test_single_filter_queries_ignored() {
        let advisor = IndexAdvisor::new(1);
        advisor.record(
            &Query::new(QueryKind::Text, "x").with_filter("language", "rust"),
            10.0,
        );
        assert!(advisor.recommend().is_empty());
    }

    #[test]
    fn test_suggestions_ranked_by_benefit() {
        let advisor = IndexAdvisor::new(1);
        advisor.record(&query(), 10.0);
        let other = Query::new(QueryKind::Text, "y")
            .with_filter("language", "go")
            .with_filter("path", "src/**");
        advisor.record(&other, 500.0);

        let suggestions = advisor.recommend();
        assert_eq!(suggestions[0].filters, vec!["language", "path"]);
    }
}
