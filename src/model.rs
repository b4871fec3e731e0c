//! Shared data model for the coordinator and the optimizer.

use crate::error::IndexErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Opaque handle to a scheduled indexing task.
pub type TaskId = u64;

/// Lifecycle state of an indexing task.
///
/// `Queued -> Running -> {Completed, Failed, Cancelled}`. A `Queued` task may
/// go straight to `Cancelled`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Read-only snapshot of a scheduled task, as returned by
/// `IndexCoordinator::get_pending_tasks`. The coordinator owns the live
/// record; callers only ever see copies.
#[derive(Debug, Clone)]
pub struct IndexTask {
    pub id: TaskId,
    pub path: PathBuf,
    /// Higher runs sooner. Ties break by submission order.
    pub priority: i32,
    pub state: TaskState,
}

/// Outcome of indexing one file. All failure modes are encoded here; the
/// indexing entry points never return `Err` for a bad file.
#[derive(Debug, Clone)]
pub struct IndexResult {
    pub path: PathBuf,
    pub symbols: usize,
    pub references: usize,
    pub elapsed: Duration,
    /// File was unchanged since the last run and no work was done.
    pub skipped: bool,
    pub error: Option<IndexErrorKind>,
}

impl IndexResult {
    pub fn success(path: PathBuf, symbols: usize, references: usize, elapsed: Duration) -> Self {
        Self {
            path,
            symbols,
            references,
            elapsed,
            skipped: false,
            error: None,
        }
    }

    pub fn skipped(path: PathBuf, elapsed: Duration) -> Self {
        Self {
            path,
            symbols: 0,
            references: 0,
            elapsed,
            skipped: true,
            error: None,
        }
    }

    /// Invariant: an error result always carries zero counts.
    pub fn failed(path: PathBuf, error: IndexErrorKind, elapsed: Duration) -> Self {
        Self {
            path,
            symbols: 0,
            references: 0,
            elapsed,
            skipped: false,
            error: Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate over a directory run.
///
/// Invariant: `seen == indexed + skipped + failed`. Only failure records are
/// retained by default; full per-file results are kept when the run's
/// `IndexOptions::keep_results` is set.
#[derive(Debug, Clone, Default)]
pub struct BatchIndexResult {
    pub seen: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<IndexResult>,
    pub results: Vec<IndexResult>,
    pub elapsed: Duration,
}

impl BatchIndexResult {
    pub(crate) fn record(&mut self, result: IndexResult, keep_results: bool) {
        self.seen += 1;
        if result.is_failure() {
            self.failed += 1;
            self.failures.push(result.clone());
        } else if result.skipped {
            self.skipped += 1;
        } else {
            self.indexed += 1;
        }
        if keep_results {
            self.results.push(result);
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.seen == self.indexed + self.skipped + self.failed
    }
}

/// Live snapshot of indexing progress. `total` is best-effort and may still
/// grow while traversal is discovering files.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexProgress {
    pub completed: usize,
    pub total: usize,
    /// Throughput over a sliding window, in files per second.
    pub files_per_sec: f64,
}

/// Kind of search a query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    Symbol,
    Text,
    Fuzzy,
    Semantic,
    Reference,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Symbol => "symbol",
            QueryKind::Text => "text",
            QueryKind::Fuzzy => "fuzzy",
            QueryKind::Semantic => "semantic",
            QueryKind::Reference => "reference",
        }
    }
}

/// A search request. Immutable once it enters the optimizer pipeline.
///
/// Filters are conjunctive (AND). A `BTreeMap` keeps filter iteration
/// order-independent of insertion order, so cache fingerprints are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryKind,
    pub term: String,
    pub filters: BTreeMap<String, String>,
}

impl Query {
    pub fn new(kind: QueryKind, term: impl Into<String>) -> Self {
        Self {
            kind,
            term: term.into(),
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Shape key for usage statistics: kind plus the set of filter names.
    pub fn shape(&self) -> String {
        let mut shape = String::from(self.kind.as_str());
        for name in self.filters.keys() {
            shape.push(':');
            shape.push_str(name);
        }
        shape
    }
}

/// Category of a parsed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Type,
    Constant,
    Variable,
    Module,
    Other,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Type => "type",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::Module => "module",
            SymbolKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "function" | "fn" | "func" => Some(SymbolKind::Function),
            "type" | "struct" | "class" | "enum" => Some(SymbolKind::Type),
            "constant" | "const" => Some(SymbolKind::Constant),
            "variable" | "var" => Some(SymbolKind::Variable),
            "module" | "mod" => Some(SymbolKind::Module),
            "other" => Some(SymbolKind::Other),
            _ => None,
        }
    }
}

/// A definition produced by a parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line: u32,
    pub column: u32,
}

/// A use of a symbol name at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub name: String,
    pub line: u32,
}

/// One ranked result from plan execution.
///
/// The identity key used for merge deduplication is `(path, symbol, line)`.
/// `line == 0` marks a file-level hit (fuzzy and semantic engines rank whole
/// files).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub path: PathBuf,
    pub symbol: Option<String>,
    pub line: u32,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_invariant() {
        let mut batch = BatchIndexResult::default();
        batch.record(
            IndexResult::success(PathBuf::from("a.rs"), 3, 1, Duration::ZERO),
            false,
        );
        batch.record(
            IndexResult::skipped(PathBuf::from("b.rs"), Duration::ZERO),
            false,
        );
        batch.record(
            IndexResult::failed(
                PathBuf::from("c.rs"),
                IndexErrorKind::UnsupportedLanguage,
                Duration::ZERO,
            ),
            false,
        );

        assert_eq!(batch.seen, 3);
        assert_eq!(batch.indexed, 1);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.failed, 1);
        assert!(batch.is_consistent());
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.results.is_empty());
    }

    #[test]
    fn test_failed_result_carries_zero_counts() {
        let r = IndexResult::failed(
            PathBuf::from("x.py"),
            IndexErrorKind::Parse("bad input".into()),
            Duration::ZERO,
        );
        assert!(r.is_failure());
        assert_eq!(r.symbols, 0);
        assert_eq!(r.references, 0);
        assert!(!r.skipped);
    }

    #[test]
    fn test_query_shape_is_order_independent() {
        let a = Query::new(QueryKind::Symbol, "parse")
            .with_filter("language", "rust")
            .with_filter("kind", "function");
        let b = Query::new(QueryKind::Symbol, "parse")
            .with_filter("kind", "function")
            .with_filter("language", "rust");
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.shape(), "symbol:kind:language");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}
