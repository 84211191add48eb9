//! Bulk MOT checking: runner, pacing, retry and result aggregation.

pub mod aggregate;
pub mod rate_limit;
pub mod retry;
pub mod runner;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AuthError;
use crate::models::CheckOutcome;
use crate::store::MotStatusStore;

pub use aggregate::{Aggregator, BatchRunSummary};
pub use rate_limit::{RateLimiter, TokenBucket, Unlimited};
pub use retry::RetryPolicy;
pub use runner::{BatchRun, BatchRunner, ResultSink};

/// Tuning for one bulk run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub retry: RetryPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 15,
            batch_size: 50,
            delay_between_batches: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.batch_concurrency,
            batch_size: cfg.batch_size,
            delay_between_batches: Duration::from_millis(cfg.batch_delay_ms),
            retry: RetryPolicy::with_max_retries(cfg.retry_max),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Concurrency clamped to `1..=batch_size`.
    pub fn concurrency(&self) -> usize {
        self.concurrency.clamp(1, self.batch_size())
    }

    /// Worker futures for a chunk of `chunk_len` items.
    pub fn workers_for(&self, chunk_len: usize) -> usize {
        self.concurrency().min(chunk_len).max(1)
    }
}

/// Snapshot passed to the progress callback after each item.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub current: String,
    pub avg_latency_ms: f64,
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct RunControl {
    pub progress: Option<ProgressFn>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchRunSummary,
    pub results: Vec<CheckOutcome>,
}

/// Run a bulk check and aggregate it into a report. Successful results are
/// written to `store` as they complete.
pub async fn run_bulk_check(
    runner: &BatchRunner,
    store: Arc<dyn MotStatusStore>,
    run_id: Uuid,
    identifiers: &[String],
    options: &BatchOptions,
    control: &RunControl,
) -> Result<BatchReport, AuthError> {
    let aggregator = Aggregator::new(run_id, store);

    let run = match runner.run(identifiers, options, control, &aggregator).await {
        Ok(run) => run,
        Err(e) => {
            crate::metrics::global().record_batch_run("auth_failed");
            tracing::error!(run_id = %run_id, error = %e, "bulk check aborted: no token");
            return Err(e);
        }
    };

    let summary = aggregator.finish(&run);
    crate::metrics::global().record_batch_run(if summary.cancelled {
        "cancelled"
    } else {
        "completed"
    });

    tracing::info!(
        run_id = %run_id,
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        dropped = summary.dropped,
        skipped = summary.skipped,
        persist_failures = summary.persist_failures,
        elapsed_ms = summary.elapsed_ms,
        throughput_per_sec = summary.throughput_per_sec,
        "bulk check finished"
    );

    Ok(BatchReport {
        summary,
        results: run.results,
    })
}

/// Allows at most one bulk run at a time across the API and scheduled job.
#[derive(Debug, Default)]
pub struct RunGuard {
    active: AtomicBool,
}

/// Held for the duration of a run; releases the guard on drop.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
}

impl RunGuard {
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                guard: self.clone(),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}
