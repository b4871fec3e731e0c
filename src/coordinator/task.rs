//! Task records, the priority queue workers pull from, and per-batch state.

use crate::config::IndexOptions;
use crate::model::{BatchIndexResult, IndexResult, IndexTask, TaskId, TaskState};
use rustc_hash::FxHashMap;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A task as it sits in the queue. Owned by the queue until a worker pops it.
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub path: PathBuf,
    pub priority: i32,
    /// Submission order; breaks priority ties FIFO.
    pub seq: u64,
    pub cancel: Arc<AtomicBool>,
    pub deadline: Option<Instant>,
    pub options: Arc<IndexOptions>,
    pub gate: Option<Arc<BatchGate>>,
    pub batch: Option<Arc<BatchState>>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounds how many of a batch's tasks run at once, independent of pool size.
pub(crate) struct BatchGate {
    limit: usize,
    active: Mutex<usize>,
}

impl BatchGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            active: Mutex::new(0),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut active = self.active.lock().unwrap();
        if *active < self.limit {
            *active += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&self) {
        let mut active = self.active.lock().unwrap();
        *active = active.saturating_sub(1);
    }
}

/// Aggregation point for one `index_directory` run. Workers push per-file
/// results in; the submitting call blocks on `wait` until the batch drains.
pub(crate) struct BatchState {
    inner: Mutex<BatchInner>,
    done: Condvar,
    keep_results: bool,
    started: Instant,
}

struct BatchInner {
    remaining: usize,
    result: BatchIndexResult,
}

impl BatchState {
    pub fn new(total: usize, keep_results: bool) -> Self {
        Self {
            inner: Mutex::new(BatchInner {
                remaining: total,
                result: BatchIndexResult::default(),
            }),
            done: Condvar::new(),
            keep_results,
            started: Instant::now(),
        }
    }

    pub fn record(&self, result: IndexResult) {
        let mut inner = self.inner.lock().unwrap();
        inner.result.record(result, self.keep_results);
        inner.remaining = inner.remaining.saturating_sub(1);
        if inner.remaining == 0 {
            self.done.notify_all();
        }
    }

    /// Blocks until every task of the batch reached a terminal state.
    pub fn wait(&self) -> BatchIndexResult {
        let mut inner = self.inner.lock().unwrap();
        while inner.remaining > 0 {
            inner = self.done.wait(inner).unwrap();
        }
        let mut result = inner.result.clone();
        result.elapsed = self.started.elapsed();
        result
    }
}

/// Shared priority queue. `pop` blocks until a runnable task exists; tasks
/// whose batch gate is saturated are parked and retried once a slot frees.
pub(crate) struct TaskQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

struct QueueInner {
    heap: BinaryHeap<QueuedTask>,
    parked: Vec<QueuedTask>,
    shutdown: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                parked: Vec::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, task: QueuedTask) {
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(task);
        drop(inner);
        self.cond.notify_all();
    }

    /// Wake waiting workers so they re-check parked tasks (called after a
    /// batch gate slot frees).
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    pub fn shutdown(&self) {
        self.inner.lock().unwrap().shutdown = true;
        self.cond.notify_all();
    }

    /// Next runnable task in priority order, or `None` after shutdown.
    pub fn pop(&self) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let parked = std::mem::take(&mut inner.parked);
            for task in parked {
                inner.heap.push(task);
            }

            let mut popped = None;
            while let Some(task) = inner.heap.pop() {
                let gate_full = task.gate.as_ref().is_some_and(|g| !g.try_acquire());
                if gate_full {
                    inner.parked.push(task);
                } else {
                    popped = Some(task);
                    break;
                }
            }
            if let Some(task) = popped {
                return Some(task);
            }

            if inner.shutdown {
                return None;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }
}

/// Terminal task records beyond this count are pruned oldest-first, so the
/// table stays bounded across long-lived coordinators.
const MAX_TRACKED_TASKS: usize = 65_536;

/// Live task records. The coordinator owns this; callers only see
/// [`IndexTask`] snapshots.
pub(crate) struct TaskTable {
    map: Mutex<FxHashMap<TaskId, TaskEntry>>,
}

pub(crate) struct TaskEntry {
    pub path: PathBuf,
    pub priority: i32,
    pub state: TaskState,
    pub cancel: Arc<AtomicBool>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn insert(&self, id: TaskId, path: PathBuf, priority: i32, cancel: Arc<AtomicBool>) {
        let mut map = self.map.lock().unwrap();
        map.insert(
            id,
            TaskEntry {
                path,
                priority,
                state: TaskState::Queued,
                cancel,
            },
        );

        if map.len() > MAX_TRACKED_TASKS {
            let mut terminal_ids: Vec<TaskId> = map
                .iter()
                .filter(|(_, e)| e.state.is_terminal())
                .map(|(&id, _)| id)
                .collect();
            terminal_ids.sort_unstable();
            let excess = map.len() - MAX_TRACKED_TASKS;
            for id in terminal_ids.into_iter().take(excess) {
                map.remove(&id);
            }
        }
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.map.lock().unwrap().get(&id).map(|e| e.state)
    }

    /// Move a task to a new state. Terminal states are final; a transition
    /// out of one is ignored.
    pub fn set_state(&self, id: TaskId, state: TaskState) {
        let mut map = self.map.lock().unwrap();
        if let Some(entry) = map.get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.state = state;
            }
        }
    }

    /// Cooperative cancel. Queued tasks flip straight to `Cancelled`; running
    /// tasks get their flag set and the worker aborts at the next check.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut map = self.map.lock().unwrap();
        let Some(entry) = map.get_mut(&id) else {
            return false;
        };
        match entry.state {
            TaskState::Queued => {
                entry.state = TaskState::Cancelled;
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            TaskState::Running => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Snapshots of every non-terminal task, highest priority first.
    pub fn pending(&self) -> Vec<IndexTask> {
        let map = self.map.lock().unwrap();
        let mut tasks: Vec<IndexTask> = map
            .iter()
            .filter(|(_, e)| !e.state.is_terminal())
            .map(|(&id, e)| IndexTask {
                id,
                path: e.path.clone(),
                priority: e.priority,
                state: e.state,
            })
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        tasks
    }
}

/// Deadline helper shared by the worker's suspension-point checks.
pub(crate) fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: i32, seq: u64) -> QueuedTask {
        QueuedTask {
            id: seq,
            path: PathBuf::from(format!("file{seq}.rs")),
            priority,
            seq,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            options: Arc::new(IndexOptions::default()),
            gate: None,
            batch: None,
        }
    }

    #[test]
    fn test_priority_order_with_fifo_ties() {
        let queue = TaskQueue::new();
        queue.push(task(1, 0));
        queue.push(task(5, 1));
        queue.push(task(3, 2));
        queue.push(task(5, 3));
        queue.shutdown();

        let order: Vec<(i32, u64)> = std::iter::from_fn(|| queue.pop())
            .map(|t| (t.priority, t.seq))
            .collect();
        assert_eq!(order, vec![(5, 1), (5, 3), (3, 2), (1, 0)]);
    }

    #[test]
    fn test_equal_priority_fifo() {
        let queue = TaskQueue::new();
        queue.push(task(0, 10));
        queue.push(task(0, 11));
        queue.push(task(0, 12));
        queue.shutdown();

        let seqs: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|t| t.seq).collect();
        assert_eq!(seqs, vec![10, 11, 12]);
    }

    #[test]
    fn test_gate_limits_concurrency() {
        let gate = BatchGate::new(2);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        gate.release();
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_gated_task_is_parked_not_lost() {
        let queue = TaskQueue::new();
        let gate = Arc::new(BatchGate::new(1));

        let mut first = task(0, 0);
        first.gate = Some(gate.clone());
        let mut second = task(0, 1);
        second.gate = Some(gate.clone());
        queue.push(first);
        queue.push(second);
        queue.shutdown();

        let popped = queue.pop().unwrap();
        assert_eq!(popped.seq, 0);
        // Gate is saturated; after shutdown the second stays unavailable.
        assert!(queue.pop().is_none());
        gate.release();
        queue.notify();
        let second = queue.pop().unwrap();
        assert_eq!(second.seq, 1);
    }

    #[test]
    fn test_cancel_semantics() {
        let table = TaskTable::new();
        let cancel = Arc::new(AtomicBool::new(false));
        table.insert(1, PathBuf::from("a.rs"), 0, cancel.clone());

        assert!(table.cancel(1));
        assert_eq!(table.state(1), Some(TaskState::Cancelled));
        assert!(cancel.load(Ordering::SeqCst));

        // Terminal tasks refuse cancellation.
        assert!(!table.cancel(1));
        assert!(!table.cancel(99));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let table = TaskTable::new();
        table.insert(1, PathBuf::from("a.rs"), 0, Arc::new(AtomicBool::new(false)));
        table.set_state(1, TaskState::Running);
        table.set_state(1, TaskState::Completed);
        table.set_state(1, TaskState::Failed);
        assert_eq!(table.state(1), Some(TaskState::Completed));
    }

    #[test]
    fn test_batch_state_aggregates() {
        let batch = BatchState::new(2, false);
        batch.record(IndexResult::success(
            PathBuf::from("a.rs"),
            1,
            0,
            Duration::ZERO,
        ));
        batch.record(IndexResult::skipped(PathBuf::from("b.rs"), Duration::ZERO));

        let result = batch.wait();
        assert_eq!(result.seen, 2);
        assert_eq!(result.indexed, 1);
        assert_eq!(result.skipped, 1);
        assert!(result.is_consistent());
    }
}
