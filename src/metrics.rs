//! Prometheus metrics for MOT lookups and bulk runs.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Everything is registered once in the global default registry.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter_vec, register_histogram_vec, register_int_counter, CounterVec,
    Encoder, HistogramVec, IntCounter, TextEncoder,
};

use crate::models::CheckResult;

static RECORDER: Lazy<MotMetrics> = Lazy::new(MotMetrics::register);

/// The process-wide recorder.
pub fn global() -> &'static MotMetrics {
    &RECORDER
}

pub struct MotMetrics {
    checks_total: CounterVec,
    check_duration_seconds: HistogramVec,
    token_refresh_total: CounterVec,
    persist_errors_total: IntCounter,
    batch_runs_total: CounterVec,
}

impl MotMetrics {
    fn register() -> Self {
        let checks_total = register_counter_vec!(
            opts!("motwatch_checks_total", "MOT lookups by outcome"),
            &["outcome"]
        )
        .expect("failed to register motwatch_checks_total");

        let check_duration_seconds = register_histogram_vec!(
            prometheus::histogram_opts!(
                "motwatch_check_duration_seconds",
                "MOT lookup latency in seconds",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0]
            ),
            &["outcome"]
        )
        .expect("failed to register motwatch_check_duration_seconds");

        let token_refresh_total = register_counter_vec!(
            opts!("motwatch_token_refresh_total", "Access token requests by result"),
            &["result"]
        )
        .expect("failed to register motwatch_token_refresh_total");

        let persist_errors_total = register_int_counter!(
            "motwatch_persist_errors_total",
            "MOT status writes that failed"
        )
        .expect("failed to register motwatch_persist_errors_total");

        let batch_runs_total = register_counter_vec!(
            opts!("motwatch_batch_runs_total", "Bulk MOT runs by result"),
            &["result"]
        )
        .expect("failed to register motwatch_batch_runs_total");

        Self {
            checks_total,
            check_duration_seconds,
            token_refresh_total,
            persist_errors_total,
            batch_runs_total,
        }
    }

    pub fn record_check(&self, result: &CheckResult, latency_ms: u64) {
        let outcome = result.outcome_label();
        self.checks_total.with_label_values(&[outcome]).inc();
        self.check_duration_seconds
            .with_label_values(&[outcome])
            .observe(latency_ms as f64 / 1000.0);
    }

    pub fn record_token_refresh(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.token_refresh_total.with_label_values(&[result]).inc();
    }

    pub fn record_persist_error(&self) {
        self.persist_errors_total.inc();
    }

    /// `result` is one of "completed", "cancelled", "auth_failed".
    pub fn record_batch_run(&self, result: &str) {
        self.batch_runs_total.with_label_values(&[result]).inc();
    }
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    // make sure our collectors exist before the first scrape
    let _ = global();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
