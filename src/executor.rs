//! Bounded-concurrency batch executor
//!
//! Actions fan work out per resource (or per chunk of resources) through an
//! explicit worker pool handle. The pool is passed into each action
//! invocation rather than hidden behind a global, so tests can run batches
//! deterministically with a single-worker pool.
//!
//! Failure isolation: each unit's error is captured individually. One unit
//! failing never cancels or skips its siblings; the batch completes and the
//! failures are reported together.

use crate::error::EngineError;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Bounded worker pool for one action invocation.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    /// Pool with at most `max_workers` units in flight. Clamped to >= 1.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Maximum number of units in flight.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Drive all `units` to completion, at most `max_workers` at a time.
    ///
    /// Completion order is whichever unit finishes first, not submission
    /// order. Returns once every unit has completed or failed.
    pub async fn run<T, F>(&self, label: &str, units: Vec<F>) -> Batch<T>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let total = units.len();
        let mut completed = Vec::with_capacity(total);
        let mut failures = Vec::new();

        let mut in_flight = stream::iter(units).buffer_unordered(self.max_workers);
        while let Some(result) = in_flight.next().await {
            match result {
                Ok(item) => completed.push(item),
                Err(err) => {
                    tracing::error!("{}: unit failed: {}", label, err);
                    failures.push(err);
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                "{}: {} of {} units failed",
                label,
                failures.len(),
                total
            );
        }

        Batch { completed, failures }
    }
}

/// Outcome of one concurrently-executed batch. Completed units' side
/// effects stand even when sibling units failed; there is no rollback.
#[derive(Debug)]
pub struct Batch<T> {
    pub completed: Vec<T>,
    pub failures: Vec<EngineError>,
}

impl<T> Batch<T> {
    /// Whether any unit failed.
    pub fn degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Total units submitted.
    pub fn total(&self) -> usize {
        self.completed.len() + self.failures.len()
    }
}
