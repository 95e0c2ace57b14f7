use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/**
 * Fixed-size pool of worker threads. Every data-parallel loop started inside
 * `install` runs on these workers; a loop returns only after all of its
 * iterations have finished, which is the barrier between two phases.
 */
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Result<WorkerPool, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|idx| format!("pbf-worker-{}", idx))
            .build()?;
        Ok(WorkerPool { pool })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }
}

pub fn into_par_iter<T: Send>(v: impl IntoParallelIterator<Item = T>) -> impl ParallelIterator<Item = T> {
    v.into_par_iter()
}

pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
    arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
        f(idx, v1);
    });
}

pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
    arr1: &mut [T1],
    arr2: &mut [T2],
    f: F,
) {
    arr1.into_par_iter()
        .zip(arr2.into_par_iter())
        .enumerate()
        .for_each(|(idx, (v1, v2))| {
            f(idx, v1, v2);
        });
}

pub fn par_iter_mut3<
    T1: Send + Sync,
    T2: Send + Sync,
    T3: Send + Sync,
    F: Fn(usize, &mut T1, &mut T2, &mut T3) + Send + Sync,
>(
    arr1: &mut [T1],
    arr2: &mut [T2],
    arr3: &mut [T3],
    f: F,
) {
    arr1.into_par_iter()
        .zip(arr2.into_par_iter())
        .zip(arr3.into_par_iter())
        .enumerate()
        .for_each(|(idx, ((v1, v2), v3))| {
            f(idx, v1, v2, v3);
        });
}
