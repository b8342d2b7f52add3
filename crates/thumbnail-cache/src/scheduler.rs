//! Batch-then-wait scheduler with a hard cap on parallelism
//!
//! Items are cut into consecutive batches of `max_concurrency`. Each batch runs
//! one task per item on a dedicated rayon pool of exactly `max_concurrency`
//! threads, and the next batch only starts once every task of the current one
//! has returned. Batch boundaries are where callers report progress and decide
//! whether to keep going.

use crate::error::PipelineError;
use rayon::prelude::*;
use std::ops::ControlFlow;

/// Lower bound for the derived concurrency ceiling
pub const MIN_CONCURRENCY: usize = 4;

/// Workers per logical core; thumbnail work mixes disk waits with decoding
const WORKERS_PER_CORE: usize = 3;

/// Highest concurrency the pipeline will use: `max(4, logical_cores * 3)`
pub fn concurrency_ceiling() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * WORKERS_PER_CORE).max(MIN_CONCURRENCY)
}

/// Apply an operator override, clamped to `[1, concurrency_ceiling()]`
pub fn resolve_concurrency(limit: Option<usize>) -> usize {
    let ceiling = concurrency_ceiling();
    match limit {
        Some(n) => n.clamp(1, ceiling),
        None => ceiling,
    }
}

/// Results of one completed batch, in the same order as its items
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub index: usize,
    /// Position of the batch's first item in the full item list
    pub offset: usize,
    pub results: Vec<R>,
}

/// Summary of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub processed: usize,
    pub stopped_early: bool,
}

/// Runs work over items in fixed-size, sequential batches
pub struct BatchScheduler {
    pool: rayon::ThreadPool,
    max_concurrency: usize,
}

impl BatchScheduler {
    /// Build a scheduler whose batches never run more than `max_concurrency`
    /// items at once
    pub fn new(max_concurrency: usize) -> Result<Self, PipelineError> {
        let max_concurrency = max_concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrency)
            .thread_name(|i| format!("thumb-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        Ok(Self {
            pool,
            max_concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `work` over `items`, calling `on_batch` after each batch completes.
    ///
    /// Failures are values of `R`; they never abort a batch. Returning
    /// `ControlFlow::Break` from `on_batch` stops before the next batch starts.
    pub fn run<T, R, W, B>(&self, items: &[T], work: W, mut on_batch: B) -> RunSummary
    where
        T: Sync,
        R: Send,
        W: Fn(&T) -> R + Sync,
        B: FnMut(BatchOutcome<R>) -> ControlFlow<()>,
    {
        let mut summary = RunSummary {
            batches: 0,
            processed: 0,
            stopped_early: false,
        };

        for (index, chunk) in items.chunks(self.max_concurrency).enumerate() {
            let results: Vec<R> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .with_max_len(1)
                    .map(|item| work(item))
                    .collect()
            });

            let offset = summary.processed;
            summary.batches += 1;
            summary.processed += chunk.len();

            let flow = on_batch(BatchOutcome {
                index,
                offset,
                results,
            });
            if flow.is_break() {
                summary.stopped_early = summary.processed < items.len();
                break;
            }
        }

        summary
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}
