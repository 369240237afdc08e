//! WorkerPool implementation
//!
//! Mutex-guarded VecDeque plus a Condvar, shared by all workers.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel;
use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};

use super::handle::TaskHandle;
use super::Task;

/// Queue state guarded by a single mutex
struct QueueState {
    tasks: VecDeque<Task>,

    /// Flipped exactly once by `shutdown`
    closing: bool,
}

/// State shared between the pool owner and its workers
struct Shared {
    state: Mutex<QueueState>,

    /// Signals "task available" or "closing"
    available: Condvar,
}

/// Fixed-size pool of worker threads
///
/// ## Lifecycle
/// - accepting: `submit` enqueues and wakes one idle worker
/// - closing: `submit` fails with `PoolClosed`, workers drain the queue
/// - stopped: every worker has exited
///
/// Dropping the pool performs `shutdown`.
pub struct WorkerPool {
    shared: Arc<Shared>,

    /// Worker join handles; emptied by the first `shutdown`
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Worker count fixed at construction
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `threads` workers (at least one)
    ///
    /// Fails only if the OS refuses to spawn a thread; workers spawned
    /// before the failure are shut down again.
    pub fn new(threads: usize) -> Result<Self> {
        let size = threads.max(1);
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    closing: false,
                }),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(size)),
            size,
        };

        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("netpool-worker-{}", index))
                .spawn(move || worker_loop(shared))?;
            pool.workers.lock().push(handle);
        }

        tracing::debug!("Worker pool started with {} threads", size);
        Ok(pool)
    }

    /// Create a pool sized to the available hardware parallelism
    pub fn with_default_size() -> Result<Self> {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(threads)
    }

    /// Submit a closure and get a handle to its result
    ///
    /// A panic inside the closure is captured and surfaced by the handle;
    /// the worker keeps running.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.enqueue(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            // The handle may have been dropped; the result is then discarded.
            let _ = tx.send(outcome);
        }))?;
        Ok(TaskHandle::new(rx))
    }

    /// Submit a closure without a result handle
    ///
    /// Panics are contained and logged so the worker survives.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(move || {
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                tracing::error!("Pool task panicked");
            }
        }))
    }

    /// Number of queued tasks not yet picked up (advisory)
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closing
    }

    /// Stop accepting work, drain the queue and join every worker
    ///
    /// Idempotent: only the first call joins; later calls return at once.
    /// When called from one of this pool's own workers, that worker is not
    /// joined (it exits after its current task).
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closing {
                return;
            }
            state.closing = true;
        }
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Pool worker exited abnormally");
            }
        }

        tracing::debug!("Worker pool shut down");
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.closing {
                return Err(NetError::PoolClosed);
            }
            state.tasks.push_back(task);
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of every worker thread
fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            while state.tasks.is_empty() && !state.closing {
                shared.available.wait(&mut state);
            }
            match state.tasks.pop_front() {
                Some(task) => task,
                // Closing and drained
                None => return,
            }
        };

        task();
    }
}
