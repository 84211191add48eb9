//! Single-vehicle lookups against the DVSA MOT History API.
//!
//! `check_one` never returns an error: every transport, status and parse
//! problem is folded into a `CheckResult::Failure` so callers always receive
//! exactly one result per vehicle.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Duration;

use super::auth::truncate;
use super::classify::classify;
use super::models::VehicleHistory;
use crate::models::{AccessToken, CheckResult, FailureReason, Vrm};

const BODY_SNIPPET_LEN: usize = 500;

#[async_trait]
pub trait VehicleChecker: Send + Sync {
    async fn check_one(&self, registration: &str, token: &AccessToken) -> CheckResult;
}

pub struct MotHistoryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MotHistoryClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn lookup_url(&self, vrm: &Vrm) -> String {
        format!("{}/v1/trade/vehicles/registration/{}", self.base_url, vrm)
    }
}

#[async_trait]
impl VehicleChecker for MotHistoryClient {
    async fn check_one(&self, registration: &str, token: &AccessToken) -> CheckResult {
        let vrm = match Vrm::parse(registration) {
            Ok(vrm) => vrm,
            Err(e) => return CheckResult::failure(FailureReason::ParseError, e.to_string()),
        };

        let resp = match self
            .http
            .get(self.lookup_url(&vrm))
            .bearer_auth(&token.value)
            .header("X-API-Key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return transport_failure(&e),
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return transport_failure(&e),
        };

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(vrm = %vrm, "no MOT history");
            return CheckResult::no_record();
        }

        if !status.is_success() {
            let reason = if status.is_server_error() {
                FailureReason::Upstream5xx
            } else {
                FailureReason::Upstream4xx
            };
            tracing::warn!(vrm = %vrm, status = status.as_u16(), "MOT history lookup failed");
            return CheckResult::failure(
                reason,
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, BODY_SNIPPET_LEN)),
            );
        }

        interpret_body(&body)
    }
}

/// Classify a 2xx response body.
pub fn interpret_body(body: &str) -> CheckResult {
    let raw: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return CheckResult::failure(
                FailureReason::ParseError,
                format!("invalid JSON ({}): {}", e, truncate(body, BODY_SNIPPET_LEN)),
            )
        }
    };

    // Older API versions wrap the vehicle in a one-element array
    let vehicle = match &raw {
        serde_json::Value::Array(items) => match items.first() {
            Some(v) => v.clone(),
            None => return CheckResult::no_record(),
        },
        other => other.clone(),
    };

    let history: VehicleHistory = match serde_json::from_value(vehicle) {
        Ok(h) => h,
        Err(e) => {
            return CheckResult::failure(
                FailureReason::ParseError,
                format!("unexpected vehicle shape: {}", e),
            )
        }
    };

    match classify(&history, Utc::now().date_naive()) {
        Ok(c) => CheckResult::Success {
            status: c.status,
            expiry_date: c.expiry_date,
            last_test_date: c.last_test_date,
            raw_payload: raw,
        },
        Err(msg) => CheckResult::failure(FailureReason::ParseError, msg),
    }
}

fn transport_failure(e: &reqwest::Error) -> CheckResult {
    if e.is_timeout() {
        CheckResult::failure(FailureReason::Timeout, format!("request timed out: {}", e))
    } else if e.is_decode() || e.is_body() {
        CheckResult::failure(FailureReason::ParseError, format!("unreadable body: {}", e))
    } else {
        CheckResult::failure(FailureReason::Network, e.to_string())
    }
}
