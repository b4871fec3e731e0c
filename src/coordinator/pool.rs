//! Bounded worker pool executing queued index tasks.

use crate::coordinator::task::{QueuedTask, TaskQueue};
use log::debug;
use std::sync::Arc;
use std::thread::JoinHandle;

/// What a worker does with each task it pops. Implemented by the
/// coordinator's shared state.
pub(crate) trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: QueuedTask);
}

/// Fixed-size pool of worker threads draining a [`TaskQueue`].
///
/// Dropping the pool shuts the queue down and joins every worker.
pub(crate) struct WorkerPool {
    queue: Arc<TaskQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<R: TaskRunner>(workers: usize, queue: Arc<TaskQueue>, runner: Arc<R>) -> Self {
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let queue = queue.clone();
            let runner = runner.clone();
            let handle = std::thread::Builder::new()
                .name(format!("symdex-worker-{i}"))
                .spawn(move || {
                    while let Some(task) = queue.pop() {
                        runner.run(task);
                    }
                    debug!("worker {i} exiting");
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        Self { queue, handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
