//! Progress tracking for indexing runs.

use crate::model::IndexProgress;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Window over which throughput is computed.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(10);

/// Counters mutated only by the coordinator and its workers; callers get
/// read-only [`IndexProgress`] snapshots. The completed counter is
/// monotonically non-decreasing within a run; `total` may grow while
/// traversal is still discovering files.
pub(crate) struct ProgressTracker {
    completed: AtomicUsize,
    total: AtomicUsize,
    window: Mutex<VecDeque<Instant>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Reset counters for a fresh run. Only safe when no tasks are pending.
    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.window.lock().unwrap().clear();
    }

    pub fn add_total(&self, n: usize) {
        self.total.fetch_add(n, Ordering::SeqCst);
    }

    pub fn task_done(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut window = self.window.lock().unwrap();
        window.push_back(now);
        while let Some(&front) = window.front() {
            if now.duration_since(front) > THROUGHPUT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> IndexProgress {
        let files_per_sec = {
            let window = self.window.lock().unwrap();
            match (window.front(), window.back()) {
                (Some(&first), Some(&last)) if last > first => {
                    let span = last.duration_since(first).as_secs_f64();
                    (window.len() as f64 - 1.0) / span
                }
                (Some(_), Some(_)) => window.len() as f64,
                _ => 0.0,
            }
        };
        IndexProgress {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            files_per_sec,
        }
    }
}
