//! Concurrency-bounded bulk checker.
//!
//! Identifiers are validated, split into fixed-size chunks and fed to a fixed
//! pool of worker futures per chunk. Workers pull the next index from a shared
//! atomic cursor, so at most `workers` lookups are in flight at once. Chunks are
//! separated by a fixed delay which doubles as the cancellation window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::rate_limit::{RateLimiter, Unlimited};
use super::retry::RetryPolicy;
use super::{BatchOptions, Progress, ProgressFn, RunControl};
use crate::errors::AuthError;
use crate::models::{AccessToken, CheckOutcome, Vrm};
use crate::mot::auth::TokenProvider;
use crate::mot::client::VehicleChecker;
use crate::mot::MotService;

/// Receives each outcome as soon as it completes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, outcome: &CheckOutcome);
}

/// Raw result of a run, before aggregation.
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Outcomes in completion order.
    pub results: Vec<CheckOutcome>,
    /// Identifiers rejected before dispatch, as submitted.
    pub dropped: Vec<String>,
    pub submitted: usize,
    pub valid: usize,
    pub chunks: usize,
    /// Valid identifiers never dispatched because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

pub struct BatchRunner {
    tokens: Arc<dyn TokenProvider>,
    checker: Arc<dyn VehicleChecker>,
    limiter: Arc<dyn RateLimiter>,
}

/// Counters shared by the workers of every chunk in one run.
struct RunState<'a> {
    total: usize,
    processed: AtomicUsize,
    latency_total_ms: AtomicU64,
    results: Mutex<Vec<CheckOutcome>>,
    progress: Option<&'a ProgressFn>,
    sink: &'a dyn ResultSink,
    retry: &'a RetryPolicy,
}

impl BatchRunner {
    pub fn new(tokens: Arc<dyn TokenProvider>, checker: Arc<dyn VehicleChecker>) -> Self {
        Self {
            tokens,
            checker,
            limiter: Arc::new(Unlimited),
        }
    }

    pub fn from_service(mot: &MotService) -> Self {
        Self::new(mot.tokens(), mot.checker())
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Check every valid identifier once.
    ///
    /// Returns `AuthError` only when the initial token cannot be obtained, in
    /// which case no lookup has been attempted. Every other problem is captured
    /// per item.
    pub async fn run(
        &self,
        identifiers: &[String],
        options: &BatchOptions,
        control: &RunControl,
        sink: &dyn ResultSink,
    ) -> Result<BatchRun, AuthError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let mut valid = Vec::with_capacity(identifiers.len());
        let mut dropped = Vec::new();
        for raw in identifiers {
            match Vrm::parse(raw) {
                Ok(vrm) => valid.push(vrm),
                Err(e) => {
                    tracing::debug!(identifier = %raw, error = %e, "dropping identifier");
                    dropped.push(raw.clone());
                }
            }
        }

        if valid.is_empty() {
            tracing::info!(
                submitted = identifiers.len(),
                dropped = dropped.len(),
                "nothing to check"
            );
            return Ok(BatchRun {
                results: Vec::new(),
                dropped,
                submitted: identifiers.len(),
                valid: 0,
                chunks: 0,
                skipped: 0,
                cancelled: false,
                started_at,
                elapsed: started.elapsed(),
            });
        }

        let mut token = self.tokens.get_token().await?;

        let batch_size = options.batch_size();
        let total_chunks = valid.len().div_ceil(batch_size);
        tracing::info!(
            submitted = identifiers.len(),
            valid = valid.len(),
            dropped = dropped.len(),
            chunks = total_chunks,
            concurrency = options.concurrency(),
            "bulk check started"
        );

        let state = RunState {
            total: valid.len(),
            processed: AtomicUsize::new(0),
            latency_total_ms: AtomicU64::new(0),
            results: Mutex::new(Vec::with_capacity(valid.len())),
            progress: control.progress.as_ref(),
            sink,
            retry: &options.retry,
        };

        let mut dispatched = 0;
        let mut chunks = 0;
        let mut cancelled = false;

        for (index, chunk) in valid.chunks(batch_size).enumerate() {
            if control.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            if index > 0 {
                tokio::select! {
                    _ = control.cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(options.delay_between_batches) => {}
                }

                match self.tokens.get_token().await {
                    Ok(fresh) => token = fresh,
                    Err(e) => tracing::warn!(
                        error = %e,
                        "token refresh failed mid-run, continuing with previous token"
                    ),
                }
            }

            let workers = options.workers_for(chunk.len());
            tracing::debug!(
                chunk = index + 1,
                of = total_chunks,
                size = chunk.len(),
                workers,
                "dispatching chunk"
            );

            self.run_chunk(chunk, &token, workers, &state).await;
            dispatched += chunk.len();
            chunks += 1;
        }

        if cancelled {
            tracing::warn!(
                processed = dispatched,
                skipped = valid.len() - dispatched,
                "bulk check cancelled"
            );
        }

        Ok(BatchRun {
            results: state.results.into_inner(),
            dropped,
            submitted: identifiers.len(),
            valid: valid.len(),
            chunks,
            skipped: valid.len() - dispatched,
            cancelled,
            started_at,
            elapsed: started.elapsed(),
        })
    }

    async fn run_chunk(
        &self,
        chunk: &[Vrm],
        token: &AccessToken,
        workers: usize,
        state: &RunState<'_>,
    ) {
        let cursor = &AtomicUsize::new(0);
        let pool = (0..workers).map(|_| async move {
            loop {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(vrm) = chunk.get(i) else { break };

                let outcome = self.check_with_retry(vrm, token, state.retry).await;
                crate::metrics::global().record_check(&outcome.result, outcome.latency_ms);

                let processed = state.processed.fetch_add(1, Ordering::SeqCst) + 1;
                let latency_total = state
                    .latency_total_ms
                    .fetch_add(outcome.latency_ms, Ordering::SeqCst)
                    + outcome.latency_ms;

                state.sink.accept(&outcome).await;

                if let Some(progress) = state.progress {
                    progress(&Progress {
                        processed,
                        total: state.total,
                        current: outcome.registration.clone(),
                        avg_latency_ms: latency_total as f64 / processed as f64,
                    });
                }

                state.results.lock().await.push(outcome);
            }
        });
        futures::future::join_all(pool).await;
    }

    /// One lookup plus any retries the policy allows. `latency_ms` sums the
    /// time spent in upstream calls and excludes backoff and limiter waits.
    async fn check_with_retry(
        &self,
        vrm: &Vrm,
        token: &AccessToken,
        retry: &RetryPolicy,
    ) -> CheckOutcome {
        let mut attempt = 1;
        let mut latency = Duration::ZERO;
        loop {
            self.limiter.acquire().await;
            let call_started = Instant::now();
            let result = self.checker.check_one(vrm.as_str(), token).await;
            latency += call_started.elapsed();

            if retry.should_retry(&result, attempt) {
                let backoff = retry.backoff(attempt);
                tracing::warn!(
                    vrm = %vrm,
                    attempt,
                    outcome = result.outcome_label(),
                    backoff_ms = backoff.as_millis() as u64,
                    "transient lookup failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            return CheckOutcome {
                registration: vrm.to_string(),
                result,
                latency_ms: latency.as_millis() as u64,
                attempts: attempt,
                checked_at: Utc::now(),
            };
        }
    }
}
