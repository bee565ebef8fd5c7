use std::sync::Arc;

use rayon::prelude::*;

/// Below this many items a dispatch runs on the calling thread.
const MINIMUM_PARALLEL_BATCH: usize = 16;

/// Provides data-parallel dispatch primitives for the solver.
///
/// The solver never needs a general purpose scheduler: every parallel section is a map over a slice whose
/// elements are independent (narrow phase pairs, constraints within one color bucket, evolutions within one tick).
/// Results always come back in input order, so a parallel dispatch produces the same values as a serial one.
#[derive(Clone)]
pub struct ThreadDispatcher {
    mode: DispatchMode,
}

#[derive(Clone)]
enum DispatchMode {
    Serial,
    Global,
    Pool(Arc<rayon::ThreadPool>),
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDispatcher")
            .field("thread_count", &self.thread_count())
            .finish()
    }
}

impl ThreadDispatcher {
    /// Runs every dispatch inline on the caller's thread.
    pub fn serial() -> Self {
        Self {
            mode: DispatchMode::Serial,
        }
    }

    /// Uses rayon's global pool.
    pub fn global() -> Self {
        Self {
            mode: DispatchMode::Global,
        }
    }

    /// Builds a dedicated pool with `thread_count` workers.
    pub fn with_threads(thread_count: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|index| format!("pbd-worker-{index}"))
            .build()?;
        Ok(Self {
            mode: DispatchMode::Pool(Arc::new(pool)),
        })
    }

    /// Builds a dispatcher from a configured worker count. Zero selects the global pool.
    pub fn from_worker_count(worker_threads: usize, parallel: bool) -> Self {
        if !parallel {
            return Self::serial();
        }
        if worker_threads == 0 {
            return Self::global();
        }
        match Self::with_threads(worker_threads) {
            Ok(dispatcher) => dispatcher,
            Err(error) => {
                tracing::warn!(%error, worker_threads, "failed to build worker pool, using the global pool");
                Self::global()
            }
        }
    }

    /// Gets the number of workers available to a dispatch.
    pub fn thread_count(&self) -> usize {
        match &self.mode {
            DispatchMode::Serial => 1,
            DispatchMode::Global => rayon::current_num_threads(),
            DispatchMode::Pool(pool) => pool.current_num_threads(),
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.mode, DispatchMode::Serial)
    }

    /// Maps every element of `items` through `worker`, preserving order.
    pub fn map<T, R, F>(&self, items: &[T], worker: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if items.len() < MINIMUM_PARALLEL_BATCH {
            return items.iter().map(worker).collect();
        }
        match &self.mode {
            DispatchMode::Serial => items.iter().map(worker).collect(),
            DispatchMode::Global => items.par_iter().map(worker).collect(),
            DispatchMode::Pool(pool) => pool.install(|| items.par_iter().map(worker).collect()),
        }
    }

    /// Invokes `worker` on every element of `items` with mutable access.
    pub fn for_each_mut<T, F>(&self, items: &mut [T], worker: F)
    where
        T: Send,
        F: Fn(&mut T) + Sync + Send,
    {
        match &self.mode {
            DispatchMode::Serial => items.iter_mut().for_each(worker),
            DispatchMode::Global => items.par_iter_mut().for_each(worker),
            DispatchMode::Pool(pool) => pool.install(|| items.par_iter_mut().for_each(worker)),
        }
    }

    /// Maps every element of `items` through `worker` with mutable access, preserving order.
    pub fn map_mut<T, R, F>(&self, items: &mut [T], worker: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(&mut T) -> R + Sync + Send,
    {
        match &self.mode {
            DispatchMode::Serial => items.iter_mut().map(worker).collect(),
            DispatchMode::Global => items.par_iter_mut().map(worker).collect(),
            DispatchMode::Pool(pool) => pool.install(|| items.par_iter_mut().map(worker).collect()),
        }
    }
}
