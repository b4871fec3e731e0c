//! Index coordination: turning a path into indexed state.
//!
//! The coordinator discovers files, filters unchanged ones through the
//! [`change::ChangeDetector`], parses the rest through resolved plugins and
//! writes the results through the storage port, all under a bounded worker
//! pool with observable progress and cooperative cancellation. Per-file
//! failures are isolated into results; the only fatal condition is an
//! invalid root.

pub mod change;
pub(crate) mod pool;
pub(crate) mod progress;
pub(crate) mod task;

use crate::config::{CoordinatorConfig, IndexOptions};
use crate::coordinator::change::{ChangeDetector, ChangeStatus, is_binary};
use crate::coordinator::pool::{TaskRunner, WorkerPool};
use crate::coordinator::progress::ProgressTracker;
use crate::coordinator::task::{
    BatchGate, BatchState, QueuedTask, TaskQueue, TaskTable, deadline_from,
};
use crate::error::{CoordinatorError, IndexErrorKind};
use crate::model::{BatchIndexResult, IndexProgress, IndexResult, IndexTask, TaskId, TaskState};
use crate::plugin::PluginRegistry;
use crate::storage::StoragePort;
use ahash::AHashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Directories never worth walking into, whatever the ignore files say.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
];

/// Orchestrates indexing of files and directories.
///
/// Owns the task queue, the worker pool, the fingerprint cache and all task
/// state; callers interact through paths and opaque task ids.
pub struct IndexCoordinator {
    inner: Arc<CoordinatorInner>,
    _pool: WorkerPool,
}

struct CoordinatorInner {
    registry: Arc<PluginRegistry>,
    storage: Arc<dyn StoragePort>,
    detector: ChangeDetector,
    queue: Arc<TaskQueue>,
    tasks: TaskTable,
    progress: ProgressTracker,
    path_locks: PathLocks,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    config: CoordinatorConfig,
}

impl IndexCoordinator {
    pub fn new(
        registry: Arc<PluginRegistry>,
        storage: Arc<dyn StoragePort>,
        config: CoordinatorConfig,
    ) -> Self {
        let detector = match config.fingerprint_cache.clone() {
            Some(path) => ChangeDetector::with_cache_file(path),
            None => ChangeDetector::new(),
        };
        let queue = Arc::new(TaskQueue::new());
        let inner = Arc::new(CoordinatorInner {
            registry,
            storage,
            detector,
            queue: queue.clone(),
            tasks: TaskTable::new(),
            progress: ProgressTracker::new(),
            path_locks: PathLocks::new(),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            config: config.clone(),
        });
        let pool = WorkerPool::spawn(config.max_workers, queue, inner.clone());
        Self { inner, _pool: pool }
    }

    /// Index a single file synchronously. Every failure mode is encoded in
    /// the result; this never panics or errors out for a bad file.
    pub fn index_file(&self, path: &Path, options: &IndexOptions) -> IndexResult {
        self.inner.index_file(path, options, None, None)
    }

    /// Index a directory tree. Blocks until every task submitted for this
    /// batch reaches a terminal state; progress stays observable through
    /// [`IndexCoordinator::get_progress`] for the whole run.
    ///
    /// The only fatal error is an invalid root, raised before any task is
    /// created.
    pub fn index_directory(
        &self,
        root: &Path,
        options: &IndexOptions,
    ) -> Result<BatchIndexResult, CoordinatorError> {
        let root = root
            .canonicalize()
            .map_err(|_| CoordinatorError::InvalidRootPath(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(CoordinatorError::InvalidRootPath(root));
        }

        let include = build_globset(&options.include);
        let exclude = build_globset(&options.exclude);

        if self.inner.tasks.pending().is_empty() {
            self.inner.progress.reset();
        }

        let mut builder = WalkBuilder::new(&root);
        builder
            .follow_links(options.follow_symlinks)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !SKIP_DIRS.contains(&name.as_ref())
            });
        if !options.recursive {
            builder.max_depth(Some(1));
        }

        let mut files = Vec::new();
        for entry in builder.build().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path.strip_prefix(&root).unwrap_or(path);
            if let Some(ref include) = include {
                if !include.is_match(rel) {
                    continue;
                }
            }
            if let Some(ref exclude) = exclude {
                if exclude.is_match(rel) {
                    continue;
                }
            }
            files.push(path.to_path_buf());
        }
        debug!("discovered {} files under {}", files.len(), root.display());

        let batch = Arc::new(BatchState::new(files.len(), options.keep_results));
        let gate = Arc::new(BatchGate::new(options.max_concurrent));
        let shared_options = Arc::new(options.clone());
        self.inner.progress.add_total(files.len());

        for path in files {
            self.inner.submit(
                path,
                self.inner.config.default_priority,
                shared_options.clone(),
                Some(gate.clone()),
                Some(batch.clone()),
            );
        }

        let result = batch.wait();
        if let Err(e) = self.inner.detector.persist() {
            warn!("failed to persist fingerprint cache: {e}");
        }
        Ok(result)
    }

    /// Enqueue a single reindex task without blocking. Used for out-of-band
    /// updates, e.g. from a file watcher.
    pub fn schedule_reindex(&self, path: &Path, priority: i32) -> TaskId {
        self.inner.submit(
            path.to_path_buf(),
            priority,
            Arc::new(IndexOptions::default()),
            None,
            None,
        )
    }

    pub fn get_progress(&self) -> IndexProgress {
        self.inner.progress.snapshot()
    }

    pub fn get_pending_tasks(&self) -> Vec<IndexTask> {
        self.inner.tasks.pending()
    }

    /// Cooperative cancel. True for a Queued task (it will never run) or a
    /// Running one (the worker aborts before the write); false once terminal.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.inner.tasks.cancel(id)
    }

    /// State of a task, if the id is known.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.tasks.state(id)
    }

    /// Tombstone a file's record and drop its fingerprint, e.g. after a
    /// watcher reports a deletion.
    pub fn remove_file(&self, path: &Path) -> bool {
        let removed = self.inner.storage.remove_file_record(path);
        self.inner.detector.forget(path);
        removed
    }

    /// Drop cached fingerprints under a root. Returns how many were removed.
    pub fn forget_fingerprints_under(&self, root: &Path) -> usize {
        self.inner.detector.forget_under(root)
    }

    pub fn persist_fingerprints(&self) -> io::Result<()> {
        self.inner.detector.persist()
    }
}

impl CoordinatorInner {
    fn submit(
        &self,
        path: PathBuf,
        priority: i32,
        options: Arc<IndexOptions>,
        gate: Option<Arc<BatchGate>>,
        batch: Option<Arc<BatchState>>,
    ) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        self.tasks.insert(id, path.clone(), priority, cancel.clone());
        self.queue.push(QueuedTask {
            id,
            path,
            priority,
            seq,
            cancel,
            deadline: deadline_from(options.task_deadline),
            options,
            gate,
            batch,
        });
        id
    }

    /// The single-file pipeline: fingerprint, change check, parse, write.
    /// Cancellation and deadlines are checked at the suspension points
    /// (after hashing, after parsing); the fingerprint update and storage
    /// write happen as one unit under the per-path lock.
    fn index_file(
        &self,
        path: &Path,
        options: &IndexOptions,
        cancel: Option<&AtomicBool>,
        deadline: Option<Instant>,
    ) -> IndexResult {
        let start = Instant::now();
        let fail = |error: IndexErrorKind| {
            IndexResult::failed(path.to_path_buf(), error, start.elapsed())
        };

        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => return fail(IndexErrorKind::Io(e.to_string())),
        };
        if !metadata.is_file() {
            return fail(IndexErrorKind::Io("not a regular file".into()));
        }
        if metadata.len() > options.max_file_size {
            return fail(IndexErrorKind::FileTooLarge {
                size: metadata.len(),
                limit: options.max_file_size,
            });
        }

        let fingerprint = match ChangeDetector::fingerprint_file(path) {
            Ok(fp) => fp,
            Err(e) => return fail(e),
        };
        if !options.force
            && self.detector.status(path, fingerprint, &*self.storage) == ChangeStatus::Unchanged
        {
            return IndexResult::skipped(path.to_path_buf(), start.elapsed());
        }

        let Some(plugin) = self.registry.resolve(path) else {
            return fail(IndexErrorKind::UnsupportedLanguage);
        };

        let content = match fs::read(path) {
            Ok(c) => c,
            Err(e) => return fail(IndexErrorKind::Io(e.to_string())),
        };
        if is_binary(&content) {
            return fail(IndexErrorKind::UnsupportedLanguage);
        }

        if cancelled(cancel) {
            return fail(IndexErrorKind::Cancelled);
        }
        if expired(deadline) {
            return fail(IndexErrorKind::Timeout);
        }

        let unit = match plugin.parse(path, &content) {
            Ok(u) => u,
            Err(e) => return fail(IndexErrorKind::Parse(e.to_string())),
        };

        // The cancellation point between parse and write: an aborted task
        // must leave storage untouched.
        if cancelled(cancel) {
            return fail(IndexErrorKind::Cancelled);
        }
        if expired(deadline) {
            return fail(IndexErrorKind::Timeout);
        }

        let lock = self.path_locks.acquire(path);
        let _guard = lock.lock().unwrap();

        // A concurrent run may have indexed identical content while we
        // parsed; re-checking under the lock keeps writes idempotent.
        if !options.force
            && self.detector.status(path, fingerprint, &*self.storage) == ChangeStatus::Unchanged
        {
            return IndexResult::skipped(path.to_path_buf(), start.elapsed());
        }

        if let Err(e) =
            self.storage
                .write_file_record(path, &unit, plugin.language(), &content, fingerprint)
        {
            return fail(e);
        }
        self.detector.record(path, fingerprint);

        IndexResult::success(
            path.to_path_buf(),
            unit.symbols.len(),
            unit.references.len(),
            start.elapsed(),
        )
    }
}

impl TaskRunner for CoordinatorInner {
    fn run(&self, task: QueuedTask) {
        let result = if self.tasks.state(task.id) == Some(TaskState::Cancelled)
            || task.cancel.load(Ordering::SeqCst)
        {
            // Cancelled while queued: never transitions to Running.
            IndexResult::failed(
                task.path.clone(),
                IndexErrorKind::Cancelled,
                std::time::Duration::ZERO,
            )
        } else {
            self.tasks.set_state(task.id, TaskState::Running);
            if expired(task.deadline) {
                IndexResult::failed(
                    task.path.clone(),
                    IndexErrorKind::Timeout,
                    std::time::Duration::ZERO,
                )
            } else {
                self.index_file(&task.path, &task.options, Some(&task.cancel), task.deadline)
            }
        };

        let terminal = match result.error {
            Some(IndexErrorKind::Cancelled) => TaskState::Cancelled,
            Some(_) => TaskState::Failed,
            None => TaskState::Completed,
        };
        self.tasks.set_state(task.id, terminal);
        self.progress.task_done();

        if let Some(ref batch) = task.batch {
            batch.record(result);
        }
        if let Some(ref gate) = task.gate {
            gate.release();
            self.queue.notify();
        }
    }
}

fn cancelled(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::SeqCst))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() > d)
}

/// Compile user glob patterns, skipping invalid ones with a warning. An
/// empty pattern list means "no constraint", hence `None`.
fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!("ignoring invalid glob pattern {pattern:?}: {e}"),
        }
    }
    builder.build().ok()
}

/// Per-path write locks, lazily created and never reclaimed; bounded by the
/// number of distinct paths seen.
struct PathLocks {
    map: Mutex<AHashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    fn new() -> Self {
        Self {
            map: Mutex::new(AHashMap::new()),
        }
    }

    fn acquire(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut map = self.map.lock().unwrap();
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
