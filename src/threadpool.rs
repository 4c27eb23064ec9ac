//! The fixed-size worker pool backing the CCC kernels.
//!
//! Grounded on `original_source/src/Threadpool.h`: a singleton sized to
//! hardware concurrency (falling back to 12 threads, exactly as the
//! original's `std::thread::hardware_concurrency() != 0 ? ... : 12`), which
//! partitions a kernel's output into contiguous ranges and runs one task per
//! range, blocking the caller until every task completes.
//!
//! The original pairs a persistent OS-thread pool with a mutex/condvar task
//! queue of type-erased `Args*` pointers - an unsafe, C++-specific way to
//! share borrowed buffers across long-lived worker threads. This crate uses
//! [`crossbeam::scope`] instead: a scoped-thread fan-out gets the same
//! "partition, submit, block" shape without unsafe code, while the pool
//! object itself (and its thread count) is still process-global and lazily
//! initialized once, matching the original's singleton lifecycle.

use std::ops::Range;
use std::sync::OnceLock;
use std::thread::available_parallelism;

use tracing::trace;

/// A lazily-initialized, process-global fan-out pool.
pub struct ThreadPool {
    thread_count: usize,
}

static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();

impl ThreadPool {
    /// The process-global pool, created on first use.
    pub fn global() -> &'static ThreadPool {
        GLOBAL.get_or_init(|| ThreadPool::new(default_thread_count()))
    }

    fn new(thread_count: usize) -> Self {
        ThreadPool {
            thread_count: thread_count.max(1),
        }
    }

    /// Number of worker threads this pool will fan out to.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Partition `0..total` into up to [`Self::thread_count`] contiguous,
    /// roughly-equal ranges and run `f` on each in parallel, blocking until
    /// every range completes. Falls back to running `f(0..total)` on the
    /// calling thread when `total` is below `threshold` or the pool has only
    /// one worker - multithreading a kernel smaller than its threshold costs
    /// more in scheduling than it saves.
    pub fn for_ranges<F>(&self, total: usize, threshold: u64, f: F)
    where
        F: Fn(Range<usize>) + Sync,
    {
        if total == 0 {
            return;
        }

        if (total as u64) < threshold || self.thread_count <= 1 {
            trace!(total, threshold, "kernel dispatch: single-threaded");
            f(0..total);
            return;
        }

        let workers = self.thread_count.min(total);
        let chunk = total.div_ceil(workers);
        trace!(total, threshold, workers, chunk, "kernel dispatch: multithreaded");

        crossbeam::scope(|scope| {
            for w in 0..workers {
                let start = w * chunk;
                if start >= total {
                    break;
                }
                let end = (start + chunk).min(total);
                let f = &f;
                scope.spawn(move |_| f(start..end));
            }
        })
        .expect("a kernel worker thread panicked");
    }

    /// Split `data` into fixed-size `unit`-element groups and run `f` on
    /// disjoint, contiguous runs of groups in parallel, blocking until every
    /// run completes. `f` receives the index of the first unit in its run
    /// (in units, not elements) together with the run's slice.
    ///
    /// Falls back to a single call `f(0, data)` when the number of units is
    /// below `threshold` or the pool has only one worker. This is the
    /// in-place counterpart to [`Self::for_ranges`], used by kernels that
    /// write their output rather than merely reading a shared input (CCC
    /// add/multiply/permute).
    pub fn parallel_chunks_mut<T, F>(&self, data: &mut [T], unit: usize, threshold: u64, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if unit == 0 || data.is_empty() {
            return;
        }
        let total_units = data.len() / unit;

        if (total_units as u64) < threshold || self.thread_count <= 1 {
            trace!(total_units, threshold, "kernel dispatch: single-threaded");
            f(0, data);
            return;
        }

        let workers = self.thread_count.min(total_units);
        let units_per_worker = total_units.div_ceil(workers);
        let items_per_worker = units_per_worker * unit;
        trace!(
            total_units,
            threshold,
            workers,
            units_per_worker,
            "kernel dispatch: multithreaded"
        );

        crossbeam::scope(|scope| {
            let mut rest = data;
            let mut start_unit = 0usize;
            for _ in 0..workers {
                if rest.is_empty() {
                    break;
                }
                let take = items_per_worker.min(rest.len());
                let (head, tail) = rest.split_at_mut(take);
                rest = tail;
                let f = &f;
                let su = start_unit;
                scope.spawn(move |_| f(su, head));
                start_unit += take / unit;
            }
        })
        .expect("a kernel worker thread panicked");
    }
}

fn default_thread_count() -> usize {
    available_parallelism().map(|n| n.get()).unwrap_or(12)
}
