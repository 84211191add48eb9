//! DVLA Vehicle Enquiry Service client.
//! Uses reqwest-middleware so transient upstream errors are retried.

use chrono::NaiveDate;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::Vrm;
use crate::mot::auth::truncate;

/// Registration details as returned by the enquiry endpoint. Fields this crate
/// does not model are kept in `extra` so the stored payload is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    pub registration_number: String,
    pub make: Option<String>,
    pub colour: Option<String>,
    pub fuel_type: Option<String>,
    pub year_of_manufacture: Option<i32>,
    pub tax_status: Option<String>,
    pub tax_due_date: Option<NaiveDate>,
    pub mot_status: Option<String>,
    pub mot_expiry_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

pub struct VehicleEnquiryClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl VehicleEnquiryClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .build_with_max_retries(max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Look up a vehicle. `Ok(None)` when DVLA has no such registration.
    pub async fn lookup(&self, vrm: &Vrm) -> Result<Option<VehicleDetails>, AppError> {
        let body = serde_json::to_vec(&serde_json::json!({ "registrationNumber": vrm.as_str() }))
            .map_err(|e| AppError::Internal(e.into()))?;

        let resp = self
            .client
            .post(format!("{}/vehicle-enquiry/v1/vehicles", self.base_url))
            .header("x-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(vrm = %vrm, "DVLA request failed after retries: {}", e);
                AppError::Upstream(e.to_string())
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("DVLA body: {}", e)))?;

        if !status.is_success() {
            tracing::warn!(vrm = %vrm, status = status.as_u16(), "DVLA enquiry rejected");
            return Err(AppError::Upstream(format!(
                "DVLA HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 300)
            )));
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| AppError::Upstream(format!("DVLA returned unexpected JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, retries: u32) -> VehicleEnquiryClient {
        VehicleEnquiryClient::new(server.uri(), "dvla-key", Duration::from_secs(2), retries)
            .unwrap()
    }

    fn vrm() -> Vrm {
        Vrm::parse("AB12CDE").unwrap()
    }

    #[tokio::test]
    async fn test_lookup_parses_details_and_keeps_extra_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vehicle-enquiry/v1/vehicles"))
            .and(header("x-api-key", "dvla-key"))
            .and(body_json(json!({"registrationNumber": "AB12CDE"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "registrationNumber": "AB12CDE",
                "make": "VAUXHALL",
                "colour": "RED",
                "fuelType": "PETROL",
                "yearOfManufacture": 2012,
                "taxStatus": "Taxed",
                "taxDueDate": "2027-03-01",
                "motStatus": "Valid",
                "motExpiryDate": "2027-01-15",
                "engineCapacity": 1398
            })))
            .expect(1)
            .mount(&server)
            .await;

        let details = client(&server, 0).lookup(&vrm()).await.unwrap().unwrap();
        assert_eq!(details.make.as_deref(), Some("VAUXHALL"));
        assert_eq!(details.year_of_manufacture, Some(2012));
        assert_eq!(details.mot_expiry_date, NaiveDate::from_ymd_opt(2027, 1, 15));
        assert_eq!(details.extra["engineCapacity"], 1398);
    }

    #[tokio::test]
    async fn test_unknown_vehicle_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        assert!(client(&server, 0).lookup(&vrm()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, 2).lookup(&vrm()).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref m) if m.contains("503")), "{:?}", err);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad registration"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 2).lookup(&vrm()).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref m) if m.contains("bad registration")));
    }
}
