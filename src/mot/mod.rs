//! DVSA MOT History API: token provider, single-vehicle checker and the
//! service object that wires them together.

pub mod auth;
pub mod classify;
pub mod client;
pub mod models;

use std::sync::Arc;

use crate::config::Config;
use crate::errors::AuthError;
use crate::models::{CheckOutcome, Vrm};

use auth::{OAuthTokenProvider, TokenProvider};
use client::{MotHistoryClient, VehicleChecker};

/// Shared handle on the MOT API collaborators.
#[derive(Clone)]
pub struct MotService {
    tokens: Arc<dyn TokenProvider>,
    checker: Arc<dyn VehicleChecker>,
}

impl MotService {
    pub fn new(tokens: Arc<dyn TokenProvider>, checker: Arc<dyn VehicleChecker>) -> Self {
        Self { tokens, checker }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let creds = cfg.dvsa_credentials()?;
        let tokens = OAuthTokenProvider::new(
            reqwest::Client::builder()
                .use_rustls_tls()
                .timeout(cfg.request_timeout())
                .build()?,
            creds.token_url,
            creds.client_id,
            creds.client_secret,
            cfg.dvsa_scope.clone(),
        );
        let checker =
            MotHistoryClient::new(&cfg.mot_api_base_url, creds.api_key, cfg.request_timeout())?;
        Ok(Self::new(Arc::new(tokens), Arc::new(checker)))
    }

    pub fn tokens(&self) -> Arc<dyn TokenProvider> {
        self.tokens.clone()
    }

    pub fn checker(&self) -> Arc<dyn VehicleChecker> {
        self.checker.clone()
    }

    /// Check a single, already validated registration.
    pub async fn check(&self, vrm: &Vrm) -> Result<CheckOutcome, AuthError> {
        let token = self.tokens.get_token().await?;
        let started = std::time::Instant::now();
        let result = self.checker.check_one(vrm.as_str(), &token).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        crate::metrics::global().record_check(&result, latency_ms);
        Ok(CheckOutcome {
            registration: vrm.to_string(),
            result,
            latency_ms,
            attempts: 1,
            checked_at: chrono::Utc::now(),
        })
    }
}
