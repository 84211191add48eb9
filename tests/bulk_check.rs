//! End-to-end bulk check tests against mocked DVSA token and MOT endpoints.
//!
//! Uses the real OAuth token provider and MOT history client pointed at a
//! wiremock server, with the in-memory status store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use motwatch::batch::{run_bulk_check, BatchOptions, BatchRunner, RetryPolicy, RunControl};
use motwatch::errors::AuthError;
use motwatch::models::{MotStatus, MotStatusUpdate};
use motwatch::mot::auth::OAuthTokenProvider;
use motwatch::mot::client::MotHistoryClient;
use motwatch::store::{MemoryStatusStore, MotStatusStore};

const TOKEN_PATH: &str = "/oauth2/v2.0/token";
const LOOKUP_PATTERN: &str = r"^/v1/trade/vehicles/registration/[A-Z0-9]+$";

fn runner(server: &MockServer) -> BatchRunner {
    let tokens = OAuthTokenProvider::new(
        reqwest::Client::new(),
        format!("{}{}", server.uri(), TOKEN_PATH),
        "client-id",
        "client-secret",
        "https://tapi.dvsa.gov.uk/.default",
    );
    let checker = MotHistoryClient::new(server.uri(), "api-key", Duration::from_secs(2)).unwrap();
    BatchRunner::new(Arc::new(tokens), Arc::new(checker))
}

fn options(concurrency: usize, batch_size: usize, delay_ms: u64) -> BatchOptions {
    BatchOptions {
        concurrency,
        batch_size,
        delay_between_batches: Duration::from_millis(delay_ms),
        retry: RetryPolicy::default(),
    }
}

fn history(vrm: &str, result: &str, days_left: i64) -> serde_json::Value {
    let expiry = Utc::now().date_naive() + chrono::Duration::days(days_left);
    json!({
        "registration": vrm,
        "make": "FORD",
        "model": "FIESTA",
        "motTests": [{
            "completedDate": "2025-11-02T09:30:00.000Z",
            "testResult": result,
            "expiryDate": expiry.format("%Y-%m-%d").to_string(),
            "motTestNumber": "100200300400"
        }]
    })
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "eyJ.test.token"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_vehicle(server: &MockServer, vrm: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/trade/vehicles/registration/{}", vrm)))
        .respond_with(response)
        .mount(server)
        .await;
}

fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("KX{:05}", i)).collect()
}

mod scenario_tests {
    use super::*;

    /// Three vehicles: one valid, one expired, one with no history.
    #[tokio::test]
    async fn test_mixed_statuses_are_classified_and_persisted() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_vehicle(
            &server,
            "AB12CDE",
            ResponseTemplate::new(200).set_body_json(history("AB12CDE", "PASSED", 90)),
        )
        .await;
        mount_vehicle(
            &server,
            "CD34EFG",
            ResponseTemplate::new(200).set_body_json(history("CD34EFG", "PASSED", -5)),
        )
        .await;
        mount_vehicle(&server, "EF56GHI", ResponseTemplate::new(404)).await;

        let store = Arc::new(MemoryStatusStore::new());
        let input: Vec<String> = ["AB12CDE", "cd34 efg", "EF56GHI"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let report = run_bulk_check(
            &runner(&server),
            store.clone(),
            Uuid::new_v4(),
            &input,
            &options(15, 50, 1000),
            &RunControl::default(),
        )
        .await
        .unwrap();

        let s = &report.summary;
        assert_eq!(report.results.len(), 3);
        assert_eq!(s.processed, 3);
        assert_eq!(s.succeeded, 3);
        assert_eq!(s.failed, 0);
        assert_eq!(s.by_status.valid, 1);
        assert_eq!(s.by_status.expired, 1);
        assert_eq!(s.by_status.no_record, 1);
        assert_eq!(s.chunks, 1);
        assert_eq!(s.persisted, 3);
        assert!(s.errors.is_empty());

        assert_eq!(
            store.get("CD34EFG").await.map(|u| u.status),
            Some(MotStatus::Expired)
        );
        assert_eq!(store.len().await, 3);
    }

    /// 120 vehicles, chunks of 50, instant upstream: three chunks and two delays.
    #[tokio::test]
    async fn test_chunks_are_separated_by_the_fixed_delay() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path_regex(LOOKUP_PATTERN))
            .respond_with(ResponseTemplate::new(200).set_body_json(history("KX00000", "PASSED", 200)))
            .expect(120)
            .mount(&server)
            .await;

        let delay_ms = 250;
        let started = std::time::Instant::now();
        let report = run_bulk_check(
            &runner(&server),
            Arc::new(MemoryStatusStore::new()),
            Uuid::new_v4(),
            &ids(120),
            &options(15, 50, delay_ms),
            &RunControl::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.chunks, 3);
        assert_eq!(report.summary.processed, 120);
        assert_eq!(report.summary.succeeded, 120);
        assert!(report.summary.elapsed_ms >= 2 * delay_ms);
        assert!(started.elapsed() >= Duration::from_millis(2 * delay_ms));
        assert!(report.summary.throughput_per_sec > 0.0);
    }

    /// Rejected client credentials abort the run before any lookup.
    #[tokio::test]
    async fn test_token_rejection_aborts_before_any_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(LOOKUP_PATTERN))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::new());
        let err = run_bulk_check(
            &runner(&server),
            store.clone(),
            Uuid::new_v4(),
            &ids(5),
            &options(15, 50, 0),
            &RunControl::default(),
        )
        .await
        .unwrap_err();

        match err {
            AuthError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert!(store.is_empty().await);
    }
}

mod accounting_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_identifiers_are_dropped_not_failed() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path_regex(LOOKUP_PATTERN))
            .respond_with(ResponseTemplate::new(200).set_body_json(history("X", "PASSED", 200)))
            .expect(2)
            .mount(&server)
            .await;

        let input: Vec<String> = ["AB12CDE", "", "Z", "   ", "LM51NOP"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = run_bulk_check(
            &runner(&server),
            Arc::new(MemoryStatusStore::new()),
            Uuid::new_v4(),
            &input,
            &options(4, 10, 0),
            &RunControl::default(),
        )
        .await
        .unwrap();

        let s = &report.summary;
        assert_eq!(s.submitted, 5);
        assert_eq!(s.dropped, 3);
        assert_eq!(s.processed, 2);
        assert_eq!(s.succeeded + s.failed, s.processed);
        assert_eq!(s.dropped_identifiers, vec!["", "Z", "   "]);
    }

    #[tokio::test]
    async fn test_only_invalid_identifiers_never_request_a_token() {
        let server = MockServer::start().await;
        mount_token(&server, 0).await;

        let report = run_bulk_check(
            &runner(&server),
            Arc::new(MemoryStatusStore::new()),
            Uuid::new_v4(),
            &["".to_string(), "Q".to_string()],
            &BatchOptions::default(),
            &RunControl::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.processed, 0);
        assert_eq!(report.summary.dropped, 2);
        assert_eq!(report.summary.chunks, 0);
    }

    #[tokio::test]
    async fn test_item_failures_are_tallied_with_readable_errors() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_vehicle(
            &server,
            "AB12CDE",
            ResponseTemplate::new(200).set_body_json(history("AB12CDE", "PASSED", 10)),
        )
        .await;
        mount_vehicle(
            &server,
            "FA11URE",
            ResponseTemplate::new(503).set_body_string("service unavailable"),
        )
        .await;
        mount_vehicle(
            &server,
            "DE11ED",
            ResponseTemplate::new(403).set_body_string("forbidden"),
        )
        .await;
        mount_vehicle(
            &server,
            "BAD1JSON",
            ResponseTemplate::new(200).set_body_string("not json"),
        )
        .await;

        let input: Vec<String> = ["AB12CDE", "FA11URE", "DE11ED", "BAD1JSON"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = run_bulk_check(
            &runner(&server),
            Arc::new(MemoryStatusStore::new()),
            Uuid::new_v4(),
            &input,
            &options(2, 50, 0),
            &RunControl::default(),
        )
        .await
        .unwrap();

        let s = &report.summary;
        assert_eq!(s.processed, 4);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.failed, 3);
        assert_eq!(s.by_status.due_soon, 1);
        assert_eq!(s.by_failure.upstream_5xx, 1);
        assert_eq!(s.by_failure.upstream_4xx, 1);
        assert_eq!(s.by_failure.parse_error, 1);
        assert_eq!(s.errors.len(), 3);
        assert!(s
            .errors
            .iter()
            .any(|e| e.starts_with("FA11URE: upstream_5xx: HTTP 503")));
        assert!(s.errors.iter().any(|e| e.starts_with("DE11ED: upstream_4xx:")));
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_upstream_errors() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        // first call fails, later calls succeed
        Mock::given(method("GET"))
            .and(path("/v1/trade/vehicles/registration/AB12CDE"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_vehicle(
            &server,
            "AB12CDE",
            ResponseTemplate::new(200).set_body_json(history("AB12CDE", "PASSED", 100)),
        )
        .await;

        let mut opts = options(1, 10, 0);
        opts.retry = RetryPolicy {
            max_retries: 2,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
            jitter_ms: 0,
        };

        let report = run_bulk_check(
            &runner(&server),
            Arc::new(MemoryStatusStore::new()),
            Uuid::new_v4(),
            &["AB12CDE".to_string()],
            &opts,
            &RunControl::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.results[0].attempts, 2);
        assert!(report.summary.errors.is_empty());
    }
}

mod persistence_tests {
    use super::*;

    /// Wraps the memory store and fails writes for one registration.
    struct FlakyStore {
        inner: MemoryStatusStore,
        fail_for: String,
    }

    #[async_trait]
    impl MotStatusStore for FlakyStore {
        async fn record_status(&self, update: &MotStatusUpdate) -> anyhow::Result<()> {
            if update.registration == self.fail_for {
                anyhow::bail!("deadlock detected");
            }
            self.inner.record_status(update).await
        }
    }

    #[tokio::test]
    async fn test_one_failed_write_does_not_affect_the_others() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path_regex(LOOKUP_PATTERN))
            .respond_with(ResponseTemplate::new(200).set_body_json(history("X", "PASSED", 200)))
            .mount(&server)
            .await;

        let input = ids(10);
        let store = Arc::new(FlakyStore {
            inner: MemoryStatusStore::new(),
            fail_for: input[4].clone(),
        });

        let report = run_bulk_check(
            &runner(&server),
            store.clone(),
            Uuid::new_v4(),
            &input,
            &options(3, 10, 0),
            &RunControl::default(),
        )
        .await
        .unwrap();

        let s = &report.summary;
        assert_eq!(s.succeeded, 10, "lookup outcome unaffected by the write");
        assert_eq!(s.by_status.valid, 10);
        assert_eq!(s.persisted, 9);
        assert_eq!(s.persist_failures, 1);
        assert_eq!(
            s.errors,
            vec![format!("persist {}: deadlock detected", input[4])]
        );
        assert_eq!(store.inner.len().await, 9);
        assert!(store.inner.get(&input[4]).await.is_none());
    }
}
