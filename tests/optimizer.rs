//! Integration tests for the query optimizer: planning, execution, caching
//! and the feedback loops.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use symdex::config::{CoordinatorConfig, IndexOptions, OptimizerConfig};
use symdex::coordinator::IndexCoordinator;
use symdex::error::{IndexErrorKind, QueryError};
use symdex::model::{Query, QueryKind, SearchHit};
use symdex::optimizer::QueryOptimizer;
use symdex::plugin::{ParsedUnit, PluginRegistry};
use symdex::storage::{Filters, MemoryStore, StoragePort};

/// Storage wrapper that counts text-engine calls and can fail engines on
/// demand, for cache and degradation tests.
struct ProbeStore {
    inner: MemoryStore,
    text_calls: AtomicUsize,
    text_delay: Duration,
    fail_text: bool,
    fail_vector: bool,
}

impl ProbeStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            text_calls: AtomicUsize::new(0),
            text_delay: Duration::ZERO,
            fail_text: false,
            fail_vector: false,
        }
    }
}

impl StoragePort for ProbeStore {
    fn write_file_record(
        &self,
        path: &Path,
        unit: &ParsedUnit,
        language: &str,
        content: &[u8],
        fingerprint: u128,
    ) -> Result<(), IndexErrorKind> {
        self.inner
            .write_file_record(path, unit, language, content, fingerprint)
    }

    fn remove_file_record(&self, path: &Path) -> bool {
        self.inner.remove_file_record(path)
    }

    fn read_fingerprint(&self, path: &Path) -> Option<u128> {
        self.inner.read_fingerprint(path)
    }

    fn is_indexed(&self, path: &Path) -> bool {
        self.inner.is_indexed(path)
    }

    fn doc_count(&self) -> u64 {
        self.inner.doc_count()
    }

    fn index_version(&self) -> u64 {
        self.inner.index_version()
    }

    fn query_symbols(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError> {
        self.inner.query_symbols(term, filters)
    }

    fn query_references(
        &self,
        term: &str,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, QueryError> {
        self.inner.query_references(term, filters)
    }

    fn query_text(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if !self.text_delay.is_zero() {
            std::thread::sleep(self.text_delay);
        }
        if self.fail_text {
            return Err(QueryError::Storage("text engine offline".into()));
        }
        self.inner.query_text(term, filters)
    }

    fn query_trigram(&self, term: &str) -> Result<Vec<SearchHit>, QueryError> {
        self.inner.query_trigram(term)
    }

    fn query_vector(
        &self,
        embedding: &[f32],
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, QueryError> {
        if self.fail_vector {
            return Err(QueryError::Storage("vector engine offline".into()));
        }
        self.inner.query_vector(embedding, filters)
    }

    fn record_index_usage(&self, shape: &str) {
        self.inner.record_index_usage(shape)
    }
}

fn seed(store: &dyn StoragePort, path: &str, language: &str, content: &str) {
    use symdex::model::{Symbol, SymbolKind};
    let symbols = content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let name = line
                .strip_prefix("fn ")
                .or_else(|| line.strip_prefix("def "))?;
            let name = name.split('(').next()?.trim().to_string();
            Some(Symbol {
                name,
                kind: SymbolKind::Function,
                line: (i + 1) as u32,
                column: 0,
            })
        })
        .collect();
    let unit = ParsedUnit {
        symbols,
        references: Vec::new(),
    };
    store
        .write_file_record(Path::new(path), &unit, language, content.as_bytes(), 1)
        .unwrap();
}

fn cache_everything() -> OptimizerConfig {
    OptimizerConfig {
        cache_cost_threshold: 0.0,
        ..Default::default()
    }
}

fn cache_nothing() -> OptimizerConfig {
    OptimizerConfig {
        cache_cost_threshold: f64::MAX,
        ..Default::default()
    }
}

#[test]
fn scenario_b_symbol_lookup_with_language_filter() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.py"), "def parse_file():\n    pass\n").unwrap();
    fs::write(dir.path().join("b.rs"), "fn parse_file() {}\n").unwrap();
    fs::write(dir.path().join("c.rs"), "fn unrelated() {}\n").unwrap();

    let storage = Arc::new(MemoryStore::new());
    let coordinator = IndexCoordinator::new(
        Arc::new(PluginRegistry::with_defaults()),
        storage.clone(),
        CoordinatorConfig::default(),
    );
    coordinator
        .index_directory(dir.path(), &IndexOptions::default())
        .unwrap();

    let optimizer = QueryOptimizer::new(storage, OptimizerConfig::default());
    let query =
        Query::new(QueryKind::Symbol, "parse_file").with_filter("language", "python");
    let outcome = optimizer.search(&query).unwrap();

    assert_eq!(outcome.hits.len(), 1);
    let hit = &outcome.hits[0];
    assert_eq!(hit.path, dir.path().join("a.py").canonicalize().unwrap());
    assert_eq!(hit.symbol.as_deref(), Some("parse_file"));
    assert!(hit.score > 0.0);
}

#[test]
fn concurrent_identical_queries_execute_once() {
    let mut store = ProbeStore::new();
    store.text_delay = Duration::from_millis(50);
    let storage = Arc::new(store);
    seed(&*storage, "a.rs", "rust", "fn handler() {}\nhandler here too\n");

    let optimizer = Arc::new(QueryOptimizer::new(storage.clone(), cache_everything()));
    let query = Query::new(QueryKind::Text, "handler");
    let plan = Arc::new(optimizer.plan_search(&query).unwrap());
    assert!(plan.cache_eligible);

    let barrier = Arc::new(Barrier::new(2));
    let threads: Vec<_> = (0..2)
        .map(|_| {
            let optimizer = optimizer.clone();
            let plan = plan.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                optimizer.execute_plan(&plan).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    // Exactly one underlying execution, identical results for both callers.
    assert_eq!(storage.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes[0].hits, outcomes[1].hits);
    assert!(!outcomes[0].hits.is_empty());
}

#[test]
fn cache_hit_skips_storage_and_write_invalidates() {
    let storage = Arc::new(ProbeStore::new());
    seed(&*storage, "a.rs", "rust", "fn handler() {}\n");

    let optimizer = QueryOptimizer::new(storage.clone(), cache_everything());
    let query = Query::new(QueryKind::Text, "handler");

    let first = optimizer.search(&query).unwrap();
    assert!(!first.from_cache);
    assert_eq!(storage.text_calls.load(Ordering::SeqCst), 1);

    let second = optimizer.search(&query).unwrap();
    assert!(second.from_cache);
    assert_eq!(storage.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.hits, second.hits);

    // New data bumps the index version; the stale entry must not serve.
    seed(&*storage, "b.rs", "rust", "fn handler() { two }\n");
    let third = optimizer.search(&query).unwrap();
    assert!(!third.from_cache);
    assert_eq!(storage.text_calls.load(Ordering::SeqCst), 2);
    assert_eq!(third.hits.len(), 2);
}

#[test]
fn merge_is_deterministic_across_runs() {
    let storage = Arc::new(MemoryStore::new());
    seed(
        &*storage,
        "z.rs",
        "rust",
        "fn handler() {}\nhandler call\nhandler again\n",
    );
    seed(&*storage, "a.rs", "rust", "fn handler() {}\nhandler call\n");
    seed(&*storage, "m.rs", "rust", "handler in text only\n");

    let optimizer = QueryOptimizer::new(storage, cache_nothing());
    let query = Query::new(QueryKind::Semantic, "handler");
    let plan = optimizer.plan_search(&query).unwrap();
    assert!(!plan.cache_eligible);

    let first = optimizer.execute_plan(&plan).unwrap();
    let second = optimizer.execute_plan(&plan).unwrap();
    assert!(!first.from_cache && !second.from_cache);
    assert_eq!(first.hits, second.hits);

    // Scores descend; ties are ordered by path then line.
    for pair in first.hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        if pair[0].score == pair[1].score {
            assert!(
                (pair[0].path.clone(), pair[0].line) <= (pair[1].path.clone(), pair[1].line)
            );
        }
    }
}

#[test]
fn failed_step_degrades_instead_of_failing() {
    let mut store = ProbeStore::new();
    store.fail_text = true;
    let storage = Arc::new(store);
    seed(&*storage, "a.rs", "rust", "fn handler() {}\nparse file data\n");

    let optimizer = QueryOptimizer::new(storage, cache_nothing());
    // Semantic plans fan out to vector + text; only text is down.
    let outcome = optimizer
        .search(&Query::new(QueryKind::Semantic, "parse file"))
        .unwrap();
    assert!(outcome.degraded);
    assert!(!outcome.hits.is_empty());
}

#[test]
fn all_steps_failing_fails_the_query() {
    let mut store = ProbeStore::new();
    store.fail_text = true;
    store.fail_vector = true;
    let storage = Arc::new(store);
    seed(&*storage, "a.rs", "rust", "fn handler() {}\n");

    let optimizer = QueryOptimizer::new(storage, cache_nothing());
    let result = optimizer.search(&Query::new(QueryKind::Semantic, "anything"));
    assert!(matches!(result, Err(QueryError::PlanFailed(_))));
}

#[test]
fn estimated_io_cost_is_monotone_in_filters() {
    let storage = Arc::new(MemoryStore::new());
    for i in 0..20 {
        seed(
            &*storage,
            &format!("f{i}.rs"),
            "rust",
            &format!("fn handler{i}() {{}}\n"),
        );
    }

    let optimizer = QueryOptimizer::new(storage, OptimizerConfig::default());
    let base = Query::new(QueryKind::Text, "handler");
    let one = base.clone().with_filter("language", "rust");
    let two = one.clone().with_filter("kind", "function");

    let c0 = optimizer.estimate_cost(&base);
    let c1 = optimizer.estimate_cost(&one);
    let c2 = optimizer.estimate_cost(&two);
    assert!(c1.io <= c0.io);
    assert!(c2.io <= c1.io);
}

#[test]
fn repeated_filter_combos_produce_suggestions() {
    let storage = Arc::new(MemoryStore::new());
    seed(&*storage, "a.rs", "rust", "fn handler() {}\n");

    let config = OptimizerConfig {
        suggestion_min_occurrences: 3,
        ..cache_nothing()
    };
    let optimizer = QueryOptimizer::new(storage, config);
    let query = Query::new(QueryKind::Symbol, "handler")
        .with_filter("language", "rust")
        .with_filter("kind", "function");

    for _ in 0..2 {
        optimizer.search(&query).unwrap();
    }
    assert!(optimizer.recommend_indexes().is_empty());

    optimizer.search(&query).unwrap();
    let suggestions = optimizer.recommend_indexes();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].filters, vec!["kind", "language"]);
    assert_eq!(suggestions[0].occurrences, 3);

    // A known composite index suppresses the suggestion.
    optimizer.note_existing_index(vec!["language".into(), "kind".into()]);
    assert!(optimizer.recommend_indexes().is_empty());
}

#[test]
fn performance_reports_accumulate() {
    let storage = Arc::new(MemoryStore::new());
    seed(&*storage, "a.rs", "rust", "fn handler() {}\n");

    let optimizer = QueryOptimizer::new(storage, cache_nothing());
    optimizer
        .search(&Query::new(QueryKind::Text, "handler"))
        .unwrap();
    optimizer
        .search(&Query::new(QueryKind::Symbol, "handler"))
        .unwrap();

    assert_eq!(optimizer.recent_reports().len(), 2);
}

#[test]
fn reference_queries_hit_reference_postings() {
    use symdex::model::SymbolReference;
    let storage = Arc::new(MemoryStore::new());
    let unit = ParsedUnit {
        symbols: Vec::new(),
        references: vec![
            SymbolReference {
                name: "handler".into(),
                line: 4,
            },
            SymbolReference {
                name: "handler".into(),
                line: 9,
            },
        ],
    };
    storage
        .write_file_record(Path::new("a.rs"), &unit, "rust", b"handler\n", 1)
        .unwrap();

    let optimizer = QueryOptimizer::new(storage, OptimizerConfig::default());
    let outcome = optimizer
        .search(&Query::new(QueryKind::Reference, "handler"))
        .unwrap();
    let lines: Vec<u32> = outcome.hits.iter().map(|h| h.line).collect();
    assert_eq!(lines, vec![4, 9]);
}
