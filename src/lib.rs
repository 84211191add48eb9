//! motwatch: bulk MOT status checking against the DVSA MOT History API.
//!
//! The binary in `main.rs` is a thin CLI over this library; integration tests
//! in `tests/` drive the same modules.

pub mod api;
pub mod batch;
pub mod config;
pub mod dvla;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod mot;
pub mod store;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use batch::RunGuard;
use dvla::VehicleEnquiryClient;
use mot::MotService;
use store::PgStore;

/// Shared application state passed to handlers, middleware and jobs.
pub struct AppState {
    pub db: PgStore,
    pub config: config::Config,
    /// `None` when DVSA credentials are not configured.
    pub mot: Option<MotService>,
    pub dvla: Option<VehicleEnquiryClient>,
    pub run_guard: Arc<RunGuard>,
    /// Cancelled on shutdown; background runs stop at the next chunk boundary.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state from config. Missing upstream credentials disable the
    /// matching endpoints instead of failing startup.
    pub fn new(db: PgStore, config: config::Config) -> anyhow::Result<Self> {
        let mot = match MotService::from_config(&config) {
            Ok(mot) => Some(mot),
            Err(e) => {
                tracing::warn!("MOT history API disabled: {:#}", e);
                None
            }
        };

        let dvla = match &config.dvla_api_key {
            Some(key) => Some(VehicleEnquiryClient::new(
                &config.dvla_api_url,
                key,
                config.request_timeout(),
                3,
            )?),
            None => {
                tracing::warn!("DVLA_API_KEY not set, vehicle enquiry disabled");
                None
            }
        };

        Ok(Self {
            db,
            config,
            mot,
            dvla,
            run_guard: Arc::new(RunGuard::default()),
            shutdown: CancellationToken::new(),
        })
    }
}

/// The full HTTP application: health probes, metrics and the admin API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

async fn readiness_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::encode_metrics(),
    )
}

/// Middleware: echoes the caller's X-Request-Id or assigns a new one, and
/// records it on the request span.
async fn request_id_middleware(
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        req.headers_mut().insert("x-request-id", val.clone());
        let span = tracing::info_span!("request", request_id = %req_id);
        let mut resp = tracing::Instrument::instrument(next.run(req), span).await;
        resp.headers_mut().insert("x-request-id", val);
        return resp;
    }
    next.run(req).await
}
