//! Bounded worker pool with a shared FIFO backlog.

use crate::job::Job;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live worker threads.
    pub max_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: num_cpus(),
        }
    }
}

/// Returns the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

struct PoolQueue {
    backlog: VecDeque<Job>,
    active: usize,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
}

/// Bounded pool of worker threads.
///
/// A submitted job spawns a thread while fewer than `max_threads` workers are
/// live; otherwise it waits in a shared FIFO backlog that idle workers drain
/// before exiting. No ordering is guaranteed between jobs beyond best-effort
/// FIFO from the backlog.
///
/// A process-global instance is available through [`WorkerPool::global`];
/// explicit instances are preferred where test isolation matters.
pub struct WorkerPool {
    max_threads: usize,
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();

impl WorkerPool {
    /// Creates a pool bounded by the configured thread count (at least one).
    pub fn new(config: PoolConfig) -> Self {
        Self {
            max_threads: config.max_threads.max(1),
            shared: Arc::new(PoolShared {
                queue: Mutex::new(PoolQueue {
                    backlog: VecDeque::new(),
                    active: 0,
                }),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide pool, created on first use.
    ///
    /// Statics have no end-of-process destructor; applications using the
    /// global pool call `global().join_all()` before exiting.
    pub fn global() -> &'static WorkerPool {
        GLOBAL.get_or_init(WorkerPool::default)
    }

    /// Maximum number of live worker threads.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Number of currently active worker threads.
    pub fn active_threads(&self) -> usize {
        self.shared.queue.lock().active
    }

    /// Number of jobs waiting for a free worker.
    pub fn backlog_len(&self) -> usize {
        self.shared.queue.lock().backlog.len()
    }

    /// Enqueues a callable for execution.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.submit_job(Job::new(task));
    }

    /// Enqueues a prepared job.
    ///
    /// Spawns a worker seeded with the job when capacity allows, otherwise
    /// places it in the backlog.
    pub fn submit_job(&self, job: Job) {
        let mut queue = self.shared.queue.lock();
        if queue.active >= self.max_threads {
            queue.backlog.push_back(job);
            return;
        }
        queue.active += 1;
        drop(queue);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || run_worker(shared, job));
        self.handles.lock().push(handle);
    }

    /// Waits for every spawned worker to complete, including workers spawned
    /// while joining.
    pub fn join_all(&self) {
        loop {
            let handle = self.handles.lock().pop();
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_all();
    }
}

/// Runs the seed job, then drains the backlog until it is empty.
fn run_worker(shared: Arc<PoolShared>, seed: Job) {
    tracing::debug!("pool worker started");
    seed.run();
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            match queue.backlog.pop_front() {
                Some(job) => job,
                None => {
                    queue.active -= 1;
                    break;
                }
            }
        };
        next.run();
    }
    tracing::debug!("pool worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert!(config.max_threads >= 1);
    }

    #[test]
    fn test_pool_config_serde_roundtrip() {
        let original = PoolConfig { max_threads: 8 };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PoolConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.max_threads, deserialized.max_threads);
    }

    #[test]
    fn test_submit_runs_every_job() {
        let pool = WorkerPool::new(PoolConfig { max_threads: 4 });
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..15 {
            let calls = Arc::clone(&calls);
            pool.submit(move || {
                std::thread::sleep(Duration::from_micros(500));
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.join_all();
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_thread_bound_respected() {
        let pool = WorkerPool::new(PoolConfig { max_threads: 2 });
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let peak = Arc::clone(&peak);
            let running = Arc::clone(&running);
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
            });
            assert!(pool.active_threads() <= 2);
        }

        pool.join_all();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active_threads(), 0);
        assert_eq!(pool.backlog_len(), 0);
    }

    #[test]
    fn test_panicking_job_does_not_leak_worker() {
        let pool = WorkerPool::new(PoolConfig { max_threads: 1 });
        let survived = Arc::new(AtomicBool::new(false));

        pool.submit(|| panic!("task failure"));
        let flag = Arc::clone(&survived);
        pool.submit(move || flag.store(true, Ordering::SeqCst));

        pool.join_all();
        assert!(survived.load(Ordering::SeqCst));
    }

    #[test]
    fn test_submit_job_with_arg() {
        let pool = WorkerPool::new(PoolConfig { max_threads: 2 });
        let total = Arc::new(AtomicUsize::new(0));

        for n in 1..=4usize {
            let total = Arc::clone(&total);
            pool.submit_job(Job::with_arg(
                move |n: usize| {
                    total.fetch_add(n, Ordering::SeqCst);
                },
                n,
            ));
        }

        pool.join_all();
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_joins_outstanding_work() {
        let done = Arc::new(AtomicBool::new(false));
        {
            let pool = WorkerPool::new(PoolConfig { max_threads: 1 });
            let flag = Arc::clone(&done);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                flag.store(true, Ordering::SeqCst);
            });
        }
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_global_pool_is_shared() {
        let a = WorkerPool::global() as *const WorkerPool;
        let b = WorkerPool::global() as *const WorkerPool;
        assert_eq!(a, b);
    }
}
