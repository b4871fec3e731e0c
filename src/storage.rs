//! Storage port: the boundary to the physical index engines.
//!
//! [`StoragePort`] is the contract the coordinator writes through and the
//! optimizer queries against. [`MemoryStore`] is the in-process reference
//! implementation: token and trigram postings as roaring bitmaps over doc
//! ids, symbol/reference postings for lookup queries, and a hashed
//! bag-of-tokens projection standing in for a real embedding index. A
//! tantivy- or sqlite-backed engine implements the same trait.

use crate::error::{IndexErrorKind, QueryError};
use crate::model::{SearchHit, SymbolKind};
use crate::plugin::ParsedUnit;
use ahash::AHashMap;
use globset::Glob;
use rayon::prelude::*;
use regex::RegexBuilder;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use xxhash_rust::xxh3::xxh3_64;

/// Dimension of the stand-in embedding space.
pub const EMBED_DIM: usize = 64;

/// Per-file cap on hits returned by the file-ranking engines.
const MAX_ENGINE_HITS: usize = 100;

/// Minimum trigram similarity for a fuzzy hit.
const MIN_TRIGRAM_SIMILARITY: f32 = 0.3;

pub type Filters = BTreeMap<String, String>;

/// Storage contract consumed by the coordinator and the optimizer.
pub trait StoragePort: Send + Sync {
    /// Persist one file's record. Replaces any prior record for the path.
    fn write_file_record(
        &self,
        path: &Path,
        unit: &ParsedUnit,
        language: &str,
        content: &[u8],
        fingerprint: u128,
    ) -> Result<(), IndexErrorKind>;

    /// Tombstone a file's record. Returns false when the path was never
    /// indexed.
    fn remove_file_record(&self, path: &Path) -> bool;

    fn read_fingerprint(&self, path: &Path) -> Option<u128>;

    fn is_indexed(&self, path: &Path) -> bool;

    fn doc_count(&self) -> u64;

    /// Monotonic counter bumped by every write or removal. Query caches tag
    /// entries with this and drop them when it moves.
    fn index_version(&self) -> u64;

    fn query_symbols(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError>;

    fn query_references(&self, term: &str, filters: &Filters)
    -> Result<Vec<SearchHit>, QueryError>;

    fn query_text(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError>;

    fn query_trigram(&self, term: &str) -> Result<Vec<SearchHit>, QueryError>;

    fn query_vector(
        &self,
        embedding: &[f32],
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, QueryError>;

    /// Record that a query of the given shape consulted this store.
    fn record_index_usage(&self, shape: &str);
}

/// One indexed file.
#[derive(Debug, Clone)]
struct DocRecord {
    path: PathBuf,
    language: String,
    symbols: Vec<crate::model::Symbol>,
    references: Vec<crate::model::SymbolReference>,
    /// Retained verbatim so text hits can report line content positions.
    lines: Vec<String>,
    embedding: [f32; EMBED_DIM],
    fingerprint: u128,
    tombstone: bool,
}

impl DocRecord {
    fn is_valid(&self) -> bool {
        !self.tombstone
    }
}

#[derive(Default)]
struct StoreInner {
    docs: Vec<DocRecord>,
    by_path: AHashMap<PathBuf, u32>,
    token_postings: AHashMap<String, RoaringBitmap>,
    trigram_postings: FxHashMap<u32, RoaringBitmap>,
    symbol_postings: AHashMap<String, RoaringBitmap>,
    reference_postings: AHashMap<String, RoaringBitmap>,
    live_docs: u64,
}

/// Aggregate counters for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub docs: u64,
    pub symbols: u64,
    pub tokens: u64,
    pub trigrams: u64,
}

/// In-memory reference backend.
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    version: AtomicU64,
    usage: Mutex<AHashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            version: AtomicU64::new(0),
            usage: Mutex::new(AHashMap::new()),
        }
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read().unwrap();
        StoreStats {
            docs: inner.live_docs,
            symbols: inner
                .docs
                .iter()
                .filter(|d| d.is_valid())
                .map(|d| d.symbols.len() as u64)
                .sum(),
            tokens: inner.token_postings.len() as u64,
            trigrams: inner.trigram_postings.len() as u64,
        }
    }

    /// Observed query shapes and how often each consulted the store.
    pub fn usage_counts(&self) -> Vec<(String, u64)> {
        let usage = self.usage.lock().unwrap();
        let mut counts: Vec<_> = usage.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePort for MemoryStore {
    fn write_file_record(
        &self,
        path: &Path,
        unit: &ParsedUnit,
        language: &str,
        content: &[u8],
        fingerprint: u128,
    ) -> Result<(), IndexErrorKind> {
        let text = String::from_utf8_lossy(content);
        let tokens = extract_tokens(&text);
        let trigrams = extract_trigrams(text.as_bytes());
        let embedding = embed_tokens(&tokens);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();

        let mut inner = self.inner.write().unwrap();

        if let Some(&old_id) = inner.by_path.get(path) {
            let old = &mut inner.docs[old_id as usize];
            if old.is_valid() {
                old.tombstone = true;
                inner.live_docs -= 1;
            }
        }

        let doc_id = u32::try_from(inner.docs.len())
            .map_err(|_| IndexErrorKind::StorageWriteConflict("doc id space exhausted".into()))?;

        for token in &tokens {
            inner
                .token_postings
                .entry(token.clone())
                .or_default()
                .insert(doc_id);
        }
        for trigram in &trigrams {
            inner
                .trigram_postings
                .entry(*trigram)
                .or_default()
                .insert(doc_id);
        }
        for symbol in &unit.symbols {
            inner
                .symbol_postings
                .entry(symbol.name.to_lowercase())
                .or_default()
                .insert(doc_id);
        }
        for reference in &unit.references {
            inner
                .reference_postings
                .entry(reference.name.to_lowercase())
                .or_default()
                .insert(doc_id);
        }

        inner.docs.push(DocRecord {
            path: path.to_path_buf(),
            language: language.to_string(),
            symbols: unit.symbols.clone(),
            references: unit.references.clone(),
            lines,
            embedding,
            fingerprint,
            tombstone: false,
        });
        inner.by_path.insert(path.to_path_buf(), doc_id);
        inner.live_docs += 1;

        drop(inner);
        self.bump_version();
        Ok(())
    }

    fn remove_file_record(&self, path: &Path) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(&doc_id) = inner.by_path.get(path) else {
            return false;
        };
        let doc = &mut inner.docs[doc_id as usize];
        if !doc.is_valid() {
            return false;
        }
        doc.tombstone = true;
        inner.live_docs -= 1;
        inner.by_path.remove(path);
        drop(inner);
        self.bump_version();
        true
    }

    fn read_fingerprint(&self, path: &Path) -> Option<u128> {
        let inner = self.inner.read().unwrap();
        let &doc_id = inner.by_path.get(path)?;
        let doc = &inner.docs[doc_id as usize];
        doc.is_valid().then_some(doc.fingerprint)
    }

    fn is_indexed(&self, path: &Path) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .by_path
            .get(path)
            .is_some_and(|&id| inner.docs[id as usize].is_valid())
    }

    fn doc_count(&self) -> u64 {
        self.inner.read().unwrap().live_docs
    }

    fn index_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn query_symbols(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError> {
        let inner = self.inner.read().unwrap();
        let doc_filter = DocFilter::compile(filters);
        let kind_filter = filters.get("kind").and_then(|v| SymbolKind::parse(v));

        let mut hits = Vec::new();
        if let Some(postings) = inner.symbol_postings.get(&term.to_lowercase()) {
            for doc_id in postings.iter() {
                let doc = &inner.docs[doc_id as usize];
                if !doc.is_valid() || !doc_filter.matches(doc) {
                    continue;
                }
                for symbol in &doc.symbols {
                    if !symbol.name.eq_ignore_ascii_case(term) {
                        continue;
                    }
                    if let Some(kind) = kind_filter {
                        if symbol.kind != kind {
                            continue;
                        }
                    }
                    // Exact-case definitions outrank case-folded ones.
                    let score = if symbol.name == term { 2.0 } else { 1.0 };
                    hits.push(SearchHit {
                        path: doc.path.clone(),
                        symbol: Some(symbol.name.clone()),
                        line: symbol.line,
                        score,
                    });
                }
            }
        }
        Ok(hits)
    }

    fn query_references(
        &self,
        term: &str,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let inner = self.inner.read().unwrap();
        let doc_filter = DocFilter::compile(filters);

        let mut hits = Vec::new();
        if let Some(postings) = inner.reference_postings.get(&term.to_lowercase()) {
            for doc_id in postings.iter() {
                let doc = &inner.docs[doc_id as usize];
                if !doc.is_valid() || !doc_filter.matches(doc) {
                    continue;
                }
                let matching: Vec<_> = doc
                    .references
                    .iter()
                    .filter(|r| r.name.eq_ignore_ascii_case(term))
                    .collect();
                let score = 1.0 + (matching.len() as f32 + 1.0).log2();
                for reference in matching {
                    hits.push(SearchHit {
                        path: doc.path.clone(),
                        symbol: Some(reference.name.clone()),
                        line: reference.line,
                        score,
                    });
                }
            }
        }
        Ok(hits)
    }

    fn query_text(&self, term: &str, filters: &Filters) -> Result<Vec<SearchHit>, QueryError> {
        let inner = self.inner.read().unwrap();
        let doc_filter = DocFilter::compile(filters);
        let tokens = extract_tokens(term);
        let matcher = RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()
            .map_err(|e| QueryError::Storage(e.to_string()))?;

        // Narrow by token postings first, the cheap pass.
        let mut candidates: Option<RoaringBitmap> = None;
        for token in &tokens {
            let postings = inner.token_postings.get(token).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                Some(mut acc) => {
                    acc &= &postings;
                    acc
                }
                None => postings,
            });
        }
        let Some(candidates) = candidates else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for doc_id in candidates.iter() {
            let doc = &inner.docs[doc_id as usize];
            if !doc.is_valid() || !doc_filter.matches(doc) {
                continue;
            }
            let matches: Vec<u32> = doc
                .lines
                .iter()
                .enumerate()
                .filter(|(_, line)| matcher.is_match(line))
                .map(|(i, _)| (i + 1) as u32)
                .collect();
            if matches.is_empty() {
                continue;
            }
            let score = 1.0 + (matches.len() as f32 + 1.0).log2();
            for line in matches {
                hits.push(SearchHit {
                    path: doc.path.clone(),
                    symbol: None,
                    line,
                    score,
                });
            }
        }
        Ok(hits)
    }

    fn query_trigram(&self, term: &str) -> Result<Vec<SearchHit>, QueryError> {
        let inner = self.inner.read().unwrap();
        let trigrams = extract_trigrams(term.to_lowercase().as_bytes());
        if trigrams.is_empty() {
            return Ok(Vec::new());
        }

        let mut counts: FxHashMap<u32, u32> = FxHashMap::default();
        for trigram in &trigrams {
            if let Some(postings) = inner.trigram_postings.get(trigram) {
                for doc_id in postings.iter() {
                    *counts.entry(doc_id).or_insert(0) += 1;
                }
            }
        }

        let total = trigrams.len() as f32;
        let mut hits: Vec<SearchHit> = counts
            .into_iter()
            .filter_map(|(doc_id, count)| {
                let doc = &inner.docs[doc_id as usize];
                if !doc.is_valid() {
                    return None;
                }
                let similarity = count as f32 / total;
                (similarity >= MIN_TRIGRAM_SIMILARITY).then(|| SearchHit {
                    path: doc.path.clone(),
                    symbol: None,
                    line: 0,
                    score: similarity,
                })
            })
            .collect();

        sort_and_truncate(&mut hits);
        Ok(hits)
    }

    fn query_vector(
        &self,
        embedding: &[f32],
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, QueryError> {
        if embedding.len() != EMBED_DIM {
            return Err(QueryError::Storage(format!(
                "embedding dimension {} != {EMBED_DIM}",
                embedding.len()
            )));
        }
        let inner = self.inner.read().unwrap();
        let doc_filter = DocFilter::compile(filters);

        let mut hits: Vec<SearchHit> = inner
            .docs
            .par_iter()
            .filter(|doc| doc.is_valid() && doc_filter.matches(doc))
            .filter_map(|doc| {
                let similarity = cosine(embedding, &doc.embedding);
                (similarity > 0.0).then(|| SearchHit {
                    path: doc.path.clone(),
                    symbol: None,
                    line: 0,
                    score: similarity,
                })
            })
            .collect();

        sort_and_truncate(&mut hits);
        Ok(hits)
    }

    fn record_index_usage(&self, shape: &str) {
        let mut usage = self.usage.lock().unwrap();
        *usage.entry(shape.to_string()).or_insert(0) += 1;
    }
}

/// Compiled doc-level filters (language, path glob). Symbol-kind filtering
/// happens per symbol, not here.
struct DocFilter {
    language: Option<String>,
    path_glob: Option<globset::GlobMatcher>,
}

impl DocFilter {
    fn compile(filters: &Filters) -> Self {
        let path_glob = filters.get("path").map(|g| {
            Glob::new(g)
                .unwrap_or_else(|_| Glob::new("*").unwrap())
                .compile_matcher()
        });
        Self {
            language: filters.get("language").map(|l| l.to_lowercase()),
            path_glob,
        }
    }

    fn matches(&self, doc: &DocRecord) -> bool {
        if let Some(ref lang) = self.language {
            if !doc.language.eq_ignore_ascii_case(lang) {
                return false;
            }
        }
        if let Some(ref matcher) = self.path_glob {
            if !matcher.is_match(&doc.path) {
                return false;
            }
        }
        true
    }
}

fn sort_and_truncate(hits: &mut Vec<SearchHit>) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(MAX_ENGINE_HITS);
}

/// Extract lowercase identifier tokens, splitting camelCase and snake_case.
pub fn extract_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
                push_token(&mut tokens, &current);
                current.clear();
            }
            current.push(ch.to_ascii_lowercase());
            prev_lower = ch.is_ascii_lowercase();
        } else {
            if !current.is_empty() {
                push_token(&mut tokens, &current);
                current.clear();
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &current);
    }

    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: &str) {
    if token.len() >= 2 && token.len() <= 128 {
        tokens.push(token.to_string());
    }
}

/// Extract unique trigrams as packed u32 values (3 bytes, lower 24 bits).
pub fn extract_trigrams(content: &[u8]) -> Vec<u32> {
    if content.len() < 3 {
        return Vec::new();
    }
    let mut trigrams: Vec<u32> = content
        .windows(3)
        .map(|w| ((w[0] as u32) << 16) | ((w[1] as u32) << 8) | (w[2] as u32))
        .collect();
    trigrams.sort_unstable();
    trigrams.dedup();
    trigrams
}

/// Project a term into the stand-in embedding space.
pub fn embed_text(text: &str) -> [f32; EMBED_DIM] {
    embed_tokens(&extract_tokens(text))
}

fn embed_tokens(tokens: &[String]) -> [f32; EMBED_DIM] {
    let mut vector = [0f32; EMBED_DIM];
    for token in tokens {
        let bucket = (xxh3_64(token.as_bytes()) % EMBED_DIM as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Symbol, SymbolReference};

    fn unit_with_symbol(name: &str, kind: SymbolKind, line: u32) -> ParsedUnit {
        ParsedUnit {
            symbols: vec![Symbol {
                name: name.to_string(),
                kind,
                line,
                column: 0,
            }],
            references: vec![SymbolReference {
                name: name.to_string(),
                line: line + 1,
            }],
        }
    }

    fn write(store: &MemoryStore, path: &str, name: &str, language: &str, content: &str) {
        store
            .write_file_record(
                Path::new(path),
                &unit_with_symbol(name, SymbolKind::Function, 1),
                language,
                content.as_bytes(),
                42,
            )
            .unwrap();
    }

    #[test]
    fn test_write_then_symbol_lookup() {
        let store = MemoryStore::new();
        write(&store, "src/a.rs", "parse_file", "rust", "fn parse_file() {}");
        write(&store, "src/b.py", "parse_file", "python", "def parse_file():");

        let hits = store
            .query_symbols("parse_file", &Filters::new())
            .unwrap();
        assert_eq!(hits.len(), 2);

        let mut filters = Filters::new();
        filters.insert("language".into(), "python".into());
        let hits = store.query_symbols("parse_file", &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, PathBuf::from("src/b.py"));
    }

    #[test]
    fn test_rewrite_tombstones_old_record() {
        let store = MemoryStore::new();
        write(&store, "a.rs", "old_name", "rust", "fn old_name() {}");
        assert_eq!(store.doc_count(), 1);
        let v1 = store.index_version();

        write(&store, "a.rs", "new_name", "rust", "fn new_name() {}");
        assert_eq!(store.doc_count(), 1);
        assert!(store.index_version() > v1);

        assert!(
            store
                .query_symbols("old_name", &Filters::new())
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            store
                .query_symbols("new_name", &Filters::new())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_remove_file_record() {
        let store = MemoryStore::new();
        write(&store, "a.rs", "thing", "rust", "fn thing() {}");
        assert!(store.is_indexed(Path::new("a.rs")));
        assert!(store.remove_file_record(Path::new("a.rs")));
        assert!(!store.is_indexed(Path::new("a.rs")));
        assert!(!store.remove_file_record(Path::new("a.rs")));
        assert_eq!(store.doc_count(), 0);
    }

    #[test]
    fn test_text_query_reports_lines() {
        let store = MemoryStore::new();
        write(
            &store,
            "a.rs",
            "main",
            "rust",
            "fn main() {\n    let handler = Handler::new();\n    handler.run();\n}",
        );
        let hits = store.query_text("handler", &Filters::new()).unwrap();
        let lines: Vec<u32> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn test_trigram_similarity_ranks_closer_names_higher() {
        let store = MemoryStore::new();
        write(&store, "a.rs", "handler", "rust", "request_handler");
        write(&store, "b.rs", "other", "rust", "completely unrelated");

        let hits = store.query_trigram("request_handlr").unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, PathBuf::from("a.rs"));
    }

    #[test]
    fn test_vector_query_prefers_token_overlap() {
        let store = MemoryStore::new();
        write(&store, "a.rs", "x", "rust", "parse file tokens quickly");
        write(&store, "b.rs", "y", "rust", "network socket bytes");

        let embedding = embed_text("parse file");
        let hits = store.query_vector(&embedding, &Filters::new()).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, PathBuf::from("a.rs"));
    }

    #[test]
    fn test_vector_query_rejects_bad_dimension() {
        let store = MemoryStore::new();
        assert!(store.query_vector(&[0.5; 3], &Filters::new()).is_err());
    }

    #[test]
    fn test_fingerprint_round_trip() {
        let store = MemoryStore::new();
        write(&store, "a.rs", "x", "rust", "fn x() {}");
        assert_eq!(store.read_fingerprint(Path::new("a.rs")), Some(42));
        assert_eq!(store.read_fingerprint(Path::new("missing.rs")), None);
    }

    #[test]
    fn test_usage_counting() {
        let store = MemoryStore::new();
        store.record_index_usage("symbol:language");
        store.record_index_usage("symbol:language");
        store.record_index_usage("text");
        let counts = store.usage_counts();
        assert_eq!(counts[0], ("symbol:language".to_string(), 2));
    }

    #[test]
    fn test_extract_tokens_splits_cases() {
        let tokens = extract_tokens("getUserById AND snake_case_name");
        assert!(tokens.contains(&"get".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(tokens.contains(&"by".to_string()));
        assert!(tokens.contains(&"id".to_string()));
        assert!(tokens.contains(&"snake".to_string()));
        assert!(tokens.contains(&"case".to_string()));
    }

    #[test]
    fn test_extract_trigrams_dedups() {
        assert_eq!(extract_trigrams(b"ab").len(), 0);
        assert_eq!(extract_trigrams(b"abc").len(), 1);
        assert_eq!(extract_trigrams(b"aaaa").len(), 1);
        assert_eq!(extract_trigrams(b"hello").len(), 3);
    }
}
