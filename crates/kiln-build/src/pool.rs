//! Bounded worker pool for per-file work inside a stage

use crate::error::{BuildError, BuildResult};
use rayon::prelude::*;

/// Apply `f` to every item on at most `max_workers` threads
///
/// Results come back in input order. After the first error, items that have
/// not started yet are skipped and that error is returned once in-flight work
/// has finished. With `max_workers <= 1` items run sequentially on the
/// calling thread.
pub fn run_parallel<T, R, F>(items: &[T], f: F, max_workers: usize) -> BuildResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> BuildResult<R> + Sync + Send,
{
    if max_workers <= 1 || items.len() <= 1 {
        return items.iter().map(f).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.min(items.len()))
        .build()
        .map_err(|e| BuildError::BuildFailed(format!("failed to start worker pool: {}", e)))?;

    pool.install(|| items.par_iter().map(&f).collect::<BuildResult<Vec<_>>>())
}
