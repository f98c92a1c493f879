// src/batch.rs

//! Bounded-concurrency execution of independent units of work
//!
//! Units run on a dedicated rayon pool with exactly `concurrency` threads.
//! A unit's failure (or panic) is reported for that unit only; the others
//! keep running until the whole backlog has drained.

use crate::error::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Outcome of a drained batch, in submission order
#[derive(Debug)]
pub struct BatchReport<T> {
    results: Vec<Result<T>>,
}

impl<T> BatchReport<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn results(&self) -> &[Result<T>] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Result<T>> {
        self.results
    }

    /// All values, or the first failure in submission order
    pub fn into_all(self) -> Result<Vec<T>> {
        self.results.into_iter().collect()
    }
}

/// Fixed-size worker pool
pub struct BatchRunner {
    pool: ThreadPool,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(concurrency: usize) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("quill-batch-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("Failed to start worker pool: {}", e)))?;
        Ok(Self { pool, concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every unit, calling `on_each(index, result)` as each one finishes
    pub fn run<T, F, C>(&self, units: Vec<F>, on_each: C) -> BatchReport<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
        C: Fn(usize, &Result<T>) + Sync,
    {
        debug!(
            "Running {} units with concurrency {}",
            units.len(),
            self.concurrency
        );

        let results = self.pool.install(|| {
            units
                .into_par_iter()
                .enumerate()
                .map(|(index, unit)| {
                    let result = panic::catch_unwind(AssertUnwindSafe(unit)).unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        warn!("Batch unit {} panicked: {}", index, message);
                        Err(Error::Panicked { index, message })
                    });
                    on_each(index, &result);
                    result
                })
                .collect()
        });

        BatchReport { results }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
