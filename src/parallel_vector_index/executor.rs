//! Parallel execution engine for index batch operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::ThreadPool;

use super::MIN_ROWS_PER_THREAD;
use crate::error::{Result, VicinityError};

/// Fan-out executor over a half-open index range.
///
/// One worker pool is built lazily and reused by later batches. A batch
/// asking for more workers than the pool holds replaces it with a larger one;
/// smaller batches spawn only as many jobs as they have workers.
pub struct ParallelExecutor {
    pool: Mutex<Option<Arc<ThreadPool>>>,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("pool_threads", &self.pool_threads())
            .finish()
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelExecutor {
    /// Create a new parallel executor.
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(None),
        }
    }

    /// Threads in the cached pool; 0 before the first parallel batch.
    pub fn pool_threads(&self) -> usize {
        self.pool
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.current_num_threads())
    }

    /// Hardware concurrency of the host.
    pub fn default_threads() -> usize {
        num_cpus::get().max(1)
    }

    /// Number of workers that will actually process a batch of `len` rows.
    ///
    /// `requested == 0` means "use every core"; small batches
    /// (`len <= threads * 4`) run on the calling thread.
    pub fn worker_count(requested: usize, len: usize) -> usize {
        let threads = if requested == 0 {
            Self::default_threads()
        } else {
            requested
        };
        if len <= threads * MIN_ROWS_PER_THREAD {
            1
        } else {
            threads
        }
    }

    /// Run `f(index, worker_id)` for every index in `start..end`.
    ///
    /// `worker_id` is in `0..worker_count(threads, end - start)` and is stable
    /// for the lifetime of one worker, so callers can keep per-worker scratch
    /// space. Returns the first error any worker observed; rows claimed after
    /// the failure are never started.
    pub fn run<F>(&self, start: usize, end: usize, threads: usize, f: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Sync,
    {
        if start >= end {
            return Ok(());
        }

        let workers = Self::worker_count(threads, end - start);
        if workers == 1 {
            for id in start..end {
                f(id, 0)?;
            }
            return Ok(());
        }

        let pool = self.pool(workers)?;
        let cursor = AtomicUsize::new(start);
        let cancelled = AtomicBool::new(false);
        let first_error: Mutex<Option<VicinityError>> = Mutex::new(None);

        tracing::trace!(start, end, workers, "dispatching batch");

        pool.scope(|scope| {
            for worker_id in 0..workers {
                let cursor = &cursor;
                let cancelled = &cancelled;
                let first_error = &first_error;
                let f = &f;
                scope.spawn(move |_| {
                    while !cancelled.load(Ordering::Acquire) {
                        let id = cursor.fetch_add(1, Ordering::Relaxed);
                        if id >= end {
                            break;
                        }
                        if let Err(err) = f(id, worker_id) {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            cancelled.store(true, Ordering::Release);
                            break;
                        }
                    }
                });
            }
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn pool(&self, threads: usize) -> Result<Arc<ThreadPool>> {
        let mut cached = self.pool.lock();
        if let Some(pool) = cached.as_ref()
            && pool.current_num_threads() >= threads
        {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("vicinity-worker-{i}"))
                .build()
                .map_err(|e| {
                    VicinityError::ThreadPool(format!("Failed to create thread pool: {e}"))
                })?,
        );
        tracing::debug!(threads, "built worker pool");
        *cached = Some(Arc::clone(&pool));
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_worker_count_heuristics() {
        assert_eq!(ParallelExecutor::worker_count(4, 16), 1);
        assert_eq!(ParallelExecutor::worker_count(4, 17), 4);
        assert_eq!(ParallelExecutor::worker_count(1, 1000), 1);
        assert!(ParallelExecutor::worker_count(0, 1_000_000) >= 1);
    }

    #[test]
    fn test_every_index_visited_once() {
        let executor = ParallelExecutor::new();
        let seen = Mutex::new(Vec::new());

        executor
            .run(10, 500, 4, |id, worker| {
                assert!(worker < 4);
                seen.lock().push(id);
                Ok(())
            })
            .unwrap();

        let mut seen = seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, (10..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_path_uses_worker_zero() {
        let executor = ParallelExecutor::new();
        let workers = Mutex::new(HashSet::new());
        executor
            .run(0, 8, 8, |_, worker| {
                workers.lock().insert(worker);
                Ok(())
            })
            .unwrap();
        assert_eq!(workers.into_inner(), HashSet::from([0]));
    }

    #[test]
    fn test_first_error_wins() {
        let executor = ParallelExecutor::new();
        let processed = AtomicUsize::new(0);

        let err = executor
            .run(0, 10_000, 4, |id, _| {
                processed.fetch_add(1, Ordering::Relaxed);
                if id == 50 {
                    Err(VicinityError::invalid_argument(format!("row {id}")))
                } else {
                    std::thread::sleep(std::time::Duration::from_micros(200));
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid argument: row 50");
        assert!(processed.load(Ordering::Relaxed) < 10_000);
    }

    #[test]
    fn test_sequential_error_stops_immediately() {
        let executor = ParallelExecutor::new();
        let processed = AtomicUsize::new(0);
        let result = executor.run(0, 3, 1, |id, _| {
            processed.fetch_add(1, Ordering::Relaxed);
            if id == 1 {
                Err(VicinityError::capacity_exceeded("full"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(processed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_single_pool_grows_to_largest_request() {
        let executor = ParallelExecutor::new();
        assert_eq!(executor.pool_threads(), 0);

        for threads in [2, 6, 3, 12, 4] {
            let workers = Mutex::new(HashSet::new());
            executor
                .run(0, 1000, threads, |_, worker| {
                    workers.lock().insert(worker);
                    Ok(())
                })
                .unwrap();
            assert!(workers.into_inner().iter().all(|&w| w < threads));
        }
        assert_eq!(executor.pool_threads(), 12);

        let first = executor.pool(4).unwrap();
        let second = executor.pool(12).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
