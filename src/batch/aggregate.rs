//! Persists successful checks as they complete and tallies the run summary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::runner::{BatchRun, ResultSink};
use crate::models::{CheckOutcome, CheckResult, FailureReason, MotStatus, MotStatusUpdate};
use crate::store::MotStatusStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub valid: usize,
    pub due_soon: usize,
    pub expired: usize,
    pub no_record: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub network: usize,
    pub upstream_4xx: usize,
    pub upstream_5xx: usize,
    pub timeout: usize,
    pub parse_error: usize,
}

/// Immutable record of one completed (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub submitted: usize,
    pub dropped: usize,
    pub dropped_identifiers: Vec<String>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub by_status: StatusCounts,
    pub by_failure: FailureCounts,
    pub persisted: usize,
    pub persist_failures: usize,
    pub chunks: usize,
    pub elapsed_ms: u64,
    /// Processed items per second of wall-clock time.
    pub throughput_per_sec: f64,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

pub struct Aggregator {
    run_id: Uuid,
    store: Arc<dyn MotStatusStore>,
    persisted: AtomicUsize,
    persist_failures: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl Aggregator {
    pub fn new(run_id: Uuid, store: Arc<dyn MotStatusStore>) -> Self {
        Self {
            run_id,
            store,
            persisted: AtomicUsize::new(0),
            persist_failures: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn finish(self, run: &BatchRun) -> BatchRunSummary {
        let mut by_status = StatusCounts::default();
        let mut by_failure = FailureCounts::default();

        for outcome in &run.results {
            match &outcome.result {
                CheckResult::Success { status, .. } => match status {
                    MotStatus::Valid => by_status.valid += 1,
                    MotStatus::DueSoon => by_status.due_soon += 1,
                    MotStatus::Expired => by_status.expired += 1,
                    MotStatus::NoRecord => by_status.no_record += 1,
                },
                CheckResult::Failure { reason, .. } => match reason {
                    FailureReason::Network => by_failure.network += 1,
                    FailureReason::Upstream4xx => by_failure.upstream_4xx += 1,
                    FailureReason::Upstream5xx => by_failure.upstream_5xx += 1,
                    FailureReason::Timeout => by_failure.timeout += 1,
                    FailureReason::ParseError => by_failure.parse_error += 1,
                },
            }
        }

        let processed = run.results.len();
        let succeeded = run.results.iter().filter(|o| o.result.is_success()).count();
        let secs = run.elapsed.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 { processed as f64 / secs } else { 0.0 };

        BatchRunSummary {
            run_id: self.run_id,
            started_at: run.started_at,
            finished_at: Utc::now(),
            submitted: run.submitted,
            dropped: run.dropped.len(),
            dropped_identifiers: run.dropped.clone(),
            processed,
            succeeded,
            failed: processed - succeeded,
            skipped: run.skipped,
            by_status,
            by_failure,
            persisted: self.persisted.into_inner(),
            persist_failures: self.persist_failures.into_inner(),
            chunks: run.chunks,
            elapsed_ms: run.elapsed.as_millis() as u64,
            throughput_per_sec,
            errors: self.errors.into_inner(),
            cancelled: run.cancelled,
        }
    }
}

#[async_trait]
impl ResultSink for Aggregator {
    async fn accept(&self, outcome: &CheckOutcome) {
        let Some(update) = MotStatusUpdate::from_outcome(outcome) else {
            if let CheckResult::Failure { reason, message } = &outcome.result {
                self.errors.lock().await.push(format!(
                    "{}: {}: {}",
                    outcome.registration,
                    reason.as_str(),
                    message
                ));
            }
            return;
        };

        match self.store.record_status(&update).await {
            Ok(()) => {
                self.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                crate::metrics::global().record_persist_error();
                tracing::warn!(
                    run_id = %self.run_id,
                    vrm = %outcome.registration,
                    error = %e,
                    "failed to persist MOT status"
                );
                self.errors
                    .lock()
                    .await
                    .push(format!("persist {}: {:#}", outcome.registration, e));
            }
        }
    }
}
