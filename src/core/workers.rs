//! Worker pool for background render jobs
//!
//! Uses work-stealing deques:
//! - New jobs land in a global injector (high priority)
//! - Idle workers steal aged jobs from each other
//! - Zero lock contention between workers
//!
//! Cancellation lives in the jobs themselves: each render job carries a
//! `CancelToken` and bails out the moment its generation goes stale, so the
//! pool stays generic over plain closures.

use crossbeam::deque::{Injector, Worker};
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Recommended pool size: 75% of cores, leaving headroom for the
/// interactive thread.
pub fn default_worker_count() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// Work-stealing render worker pool.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::new();
        let mut stealers = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            workers_local.push(worker);
        }

        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("playhead-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        // 1. Own queue first (cache locality)
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }

                        // 2. Global injector
                        if let Some(job) = injector.steal().success() {
                            job();
                            continue;
                        }

                        // 3. Steal aged jobs from peers
                        let mut found_work = false;
                        for stealer in &stealers {
                            if let Some(job) = stealer.steal().success() {
                                job();
                                found_work = true;
                                break;
                            }
                        }

                        if found_work {
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work - short sleep instead of a hot spin
                        thread::sleep(std::time::Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                })
                .expect("Failed to spawn worker thread");

            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Self {
            injector,
            handles,
            shutdown,
        }
    }

    /// Execute closure on a worker thread.
    ///
    /// Runs asynchronously, no return value; results travel back through
    /// whatever channel the closure captured.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        use std::time::{Duration, Instant};

        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Wait with timeout; cancelled render jobs notice their stale
        // tokens quickly, so this is a safety net, not the common path.
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_jobs_execute() {
        let workers = Workers::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            workers.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(());
            });
        }

        for _ in 0..16 {
            rx.recv_timeout(Duration::from_secs(2)).expect("job ran");
        }
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_min_one_thread() {
        let workers = Workers::new(0);
        assert_eq!(workers.num_threads(), 1);
    }

    /// Test: drop joins idle workers without hanging
    #[test]
    fn test_shutdown() {
        let workers = Workers::new(3);
        drop(workers);
    }
}
