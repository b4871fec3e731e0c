//! Plan execution: engine fan-out, result merging and the query cache.
//!
//! Merging uses the conservative best-evidence rule: a hit appearing in
//! several steps keeps its maximum score and is never double-counted. The
//! cache guarantees at most one underlying execution per key; concurrent
//! identical requests share the leader's result.

use crate::error::QueryError;
use crate::model::SearchHit;
use crate::optimizer::plan::{IndexId, PlanStep, SearchPlan};
use crate::storage::{StoragePort, embed_text};
use ahash::AHashMap;
use log::debug;
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

/// What `execute_plan` hands back.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Merged hits, best score first; ties break by path then line.
    pub hits: Vec<SearchHit>,
    /// At least one non-critical step failed and its results are missing.
    pub degraded: bool,
    /// Served from the result cache (or a concurrent identical execution)
    /// without touching storage.
    pub from_cache: bool,
}

struct CacheEntry {
    version: u64,
    hits: Arc<Vec<SearchHit>>,
    degraded: bool,
}

/// A single in-flight execution that concurrent identical requests wait on.
struct Flight {
    slot: Mutex<Option<Result<(Arc<Vec<SearchHit>>, bool), String>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, result: Result<(Arc<Vec<SearchHit>>, bool), String>) {
        *self.slot.lock().unwrap() = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<(Arc<Vec<SearchHit>>, bool), String> {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.done.wait(slot).unwrap();
        }
        slot.clone().unwrap()
    }
}

pub(crate) struct PlanExecutor {
    storage: Arc<dyn StoragePort>,
    cache: Mutex<LruCache<u64, CacheEntry>>,
    inflight: Mutex<AHashMap<u64, Arc<Flight>>>,
}

impl PlanExecutor {
    pub fn new(storage: Arc<dyn StoragePort>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        Self {
            storage,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(AHashMap::new()),
        }
    }

    pub fn execute(&self, plan: &SearchPlan) -> Result<ExecutionOutcome, QueryError> {
        if !plan.cache_eligible {
            let (hits, degraded) = self.run_steps(plan)?;
            return Ok(ExecutionOutcome {
                hits: hits.as_ref().clone(),
                degraded,
                from_cache: false,
            });
        }

        // Entries are tagged with the index version they were computed
        // against; a coordinator write bumps the version and implicitly
        // invalidates them.
        let version = self.storage.index_version();
        let key = cache_key(plan, version);

        if let Some(entry) = self.cache.lock().unwrap().get(&key) {
            if entry.version == version {
                debug!("query cache hit");
                return Ok(ExecutionOutcome {
                    hits: entry.hits.as_ref().clone(),
                    degraded: entry.degraded,
                    from_cache: true,
                });
            }
        }

        // Single flight: the first request per key becomes the leader and
        // executes; everyone else waits for its result.
        let flight = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(existing) = inflight.get(&key).cloned() {
                drop(inflight);
                let (hits, degraded) = existing.wait().map_err(QueryError::PlanFailed)?;
                return Ok(ExecutionOutcome {
                    hits: hits.as_ref().clone(),
                    degraded,
                    from_cache: true,
                });
            }
            let flight = Arc::new(Flight::new());
            inflight.insert(key, flight.clone());
            flight
        };

        let outcome = self.run_steps(plan);
        self.inflight.lock().unwrap().remove(&key);
        match outcome {
            Ok((hits, degraded)) => {
                self.cache.lock().unwrap().put(
                    key,
                    CacheEntry {
                        version,
                        hits: hits.clone(),
                        degraded,
                    },
                );
                flight.publish(Ok((hits.clone(), degraded)));
                Ok(ExecutionOutcome {
                    hits: hits.as_ref().clone(),
                    degraded,
                    from_cache: false,
                })
            }
            Err(e) => {
                flight.publish(Err(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run every step, parallel-eligible ones concurrently, and merge.
    /// Step failures are isolated: as long as one step succeeded the query
    /// degrades instead of failing.
    fn run_steps(&self, plan: &SearchPlan) -> Result<(Arc<Vec<SearchHit>>, bool), QueryError> {
        let (parallel, sequential): (Vec<&PlanStep>, Vec<&PlanStep>) =
            plan.steps.iter().partition(|s| s.parallel_eligible);

        let mut results: Vec<Result<Vec<SearchHit>, QueryError>> = parallel
            .par_iter()
            .map(|step| self.run_step(step))
            .collect();
        for step in sequential {
            results.push(self.run_step(step));
        }

        let mut hits = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(step_hits) => hits.extend(step_hits),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if !failures.is_empty() && failures.len() == plan.steps.len() {
            return Err(QueryError::PlanFailed(failures.join("; ")));
        }

        Ok((Arc::new(merge_hits(hits)), !failures.is_empty()))
    }

    fn run_step(&self, step: &PlanStep) -> Result<Vec<SearchHit>, QueryError> {
        match step.engine {
            IndexId::Symbol => self.storage.query_symbols(&step.term, &step.filters),
            IndexId::Text => self.storage.query_text(&step.term, &step.filters),
            IndexId::Trigram => self.storage.query_trigram(&step.term),
            IndexId::Vector => {
                let embedding = embed_text(&step.term);
                self.storage.query_vector(&embedding, &step.filters)
            }
            IndexId::Reference => self.storage.query_references(&step.term, &step.filters),
        }
    }
}

fn cache_key(plan: &SearchPlan, index_version: u64) -> u64 {
    // Mix the query fingerprint with plan format and index versions so any
    // of the three changing misses cleanly.
    plan.cache_seed ^ ((plan.version as u64) << 32) ^ index_version.rotate_left(17)
}

/// Deduplicate by identity key with max-score-wins, then order
/// deterministically: score descending, path, line. Swapping this for a
/// weighted-sum fusion would be a local change.
pub(crate) fn merge_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut best: AHashMap<(PathBuf, Option<String>, u32), SearchHit> =
        AHashMap::with_capacity(hits.len());
    for hit in hits {
        let key = (hit.path.clone(), hit.symbol.clone(), hit.line);
        match best.get_mut(&key) {
            Some(existing) => {
                if hit.score > existing.score {
                    *existing = hit;
                }
            }
            None => {
                best.insert(key, hit);
            }
        }
    }

    let mut merged: Vec<SearchHit> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
    });
    merged
}
