//! Parallel processing strategies

use aohcalc_core::Result;
use std::ops::Range;

/// How independent units of work are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing on the global pool
    #[default]
    Parallel,
    /// Parallel on a dedicated pool of this many threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Mode for an optional `-j` style thread count; `Some(1)` is sequential.
    pub fn from_threads(threads: Option<usize>) -> Self {
        match threads {
            None | Some(0) => ProcessingMode::Parallel,
            Some(1) => ProcessingMode::Sequential,
            Some(n) => ProcessingMode::ParallelWith(n),
        }
    }
}

/// Strategy for parallel execution
pub trait ParallelStrategy {
    /// Map a function over indices and collect results in index order
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

#[cfg(feature = "parallel")]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        use rayon::prelude::*;

        match self {
            ProcessingMode::Sequential => Ok(range.map(f).collect()),
            ProcessingMode::Parallel => Ok(range.into_par_iter().map(f).collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()
                    .map_err(|e| aohcalc_core::Error::Other(format!("failed to build thread pool: {}", e)))?;
                Ok(pool.install(|| range.into_par_iter().map(f).collect()))
            }
        }
    }
}

#[cfg(not(feature = "parallel"))]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        Ok(range.map(f).collect())
    }
}

/// Get the number of available worker threads
#[cfg(feature = "parallel")]
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "parallel"))]
pub fn num_cpus() -> usize {
    1
}
