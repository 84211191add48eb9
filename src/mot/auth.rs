//! DVSA OAuth2 client-credentials token provider.
//!
//! Tokens are cached per provider instance and reused until they come within
//! [`TOKEN_SAFETY_MARGIN_SECS`] of expiry. Refreshes are single-flight:
//! callers that arrive while a refresh is in progress wait for it and then
//! read the new token instead of issuing their own request.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::errors::AuthError;
use crate::metrics;
use crate::models::token::{AccessToken, TOKEN_SAFETY_MARGIN_SECS};

/// Source of bearer tokens for the MOT history API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken, AuthError>;
}

/// Token endpoint response (subset of fields we need).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

pub struct OAuthTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl OAuthTokenProvider {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    async fn cached(&self) -> Option<AccessToken> {
        let cache = self.cache.read().await;
        cache.as_ref().filter(|t| t.is_fresh()).cloned()
    }

    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        tracing::debug!(token_url = %self.token_url, "requesting MOT API access token");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".into()));
        }

        let expires_at = Utc::now() + Duration::seconds(parsed.expires_in.max(0));
        if parsed.expires_in <= TOKEN_SAFETY_MARGIN_SECS {
            tracing::warn!(
                expires_in = parsed.expires_in,
                "access token lifetime is shorter than the refresh margin; it will not be cached"
            );
        }

        Ok(AccessToken::new(parsed.access_token, expires_at))
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // another caller may have refreshed while we waited for the lock
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        match self.fetch().await {
            Ok(token) => {
                metrics::global().record_token_refresh(true);
                *self.cache.write().await = Some(token.clone());
                tracing::info!(expires_at = %token.expires_at, "obtained MOT API access token");
                Ok(token)
            }
            Err(e) => {
                metrics::global().record_token_refresh(false);
                tracing::error!("MOT API token request failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Hands out a fixed, pre-issued token.
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// A token valid for the next 24 hours.
    pub fn long_lived(value: impl Into<String>) -> Self {
        Self::new(AccessToken::new(value, Utc::now() + Duration::hours(24)))
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OAuthTokenProvider {
        OAuthTokenProvider::new(
            reqwest::Client::new(),
            format!("{}/oauth2/token", server.uri()),
            "client-id",
            "client-secret",
            "https://tapi.dvsa.gov.uk/.default",
        )
    }

    #[tokio::test]
    async fn test_second_call_within_validity_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "tok-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let first = provider.get_token().await.unwrap();
        let second = provider.get_token().await.unwrap();
        assert_eq!(first.value, "tok-1");
        assert_eq!(second.value, "tok-1");
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": 300,
                "access_token": "short-lived"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider.get_token().await.unwrap();
        provider.get_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "expires_in": 3600,
                        "access_token": "shared"
                    }))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let calls = (0..10).map(|_| {
            let p = provider.clone();
            tokio::spawn(async move { p.get_token().await })
        });
        for handle in futures::future::join_all(calls).await {
            assert_eq!(handle.unwrap().unwrap().value, "shared");
        }
    }

    #[tokio::test]
    async fn test_rejected_credentials_surface_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_client"}"#))
            .mount(&server)
            .await;

        let err = provider(&server).get_token().await.unwrap_err();
        match err {
            AuthError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let err = provider(&server).get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let provider = OAuthTokenProvider::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/token",
            "id",
            "secret",
            "scope",
        );
        let err = provider.get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Unreachable(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é…");
    }
}
