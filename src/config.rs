use std::time::Duration;

use serde::Deserialize;

const DEFAULT_SCOPE: &str = "https://tapi.dvsa.gov.uk/.default";
const DEFAULT_MOT_API_BASE_URL: &str = "https://history.mot.api.gov.uk";
const DEFAULT_DVLA_API_URL: &str = "https://driver-vehicle-licensing.api.gov.uk";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub admin_key: Option<String>,
    pub dvsa_client_id: Option<String>,
    pub dvsa_client_secret: Option<String>,
    pub dvsa_api_key: Option<String>,
    /// OAuth2 token endpoint issued alongside the DVSA client credentials.
    pub dvsa_token_url: Option<String>,
    pub dvsa_scope: String,
    pub mot_api_base_url: String,
    pub dvla_api_key: Option<String>,
    pub dvla_api_url: String,
    /// Workers per chunk. Set via MOTWATCH_BATCH_CONCURRENCY. Default: 15.
    pub batch_concurrency: usize,
    /// Identifiers per chunk. Set via MOTWATCH_BATCH_SIZE. Default: 50.
    pub batch_size: usize,
    /// Fixed pause between chunks. Set via MOTWATCH_BATCH_DELAY_MS. Default: 1000.
    pub batch_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Token-bucket rate for upstream lookups. 0 = disabled.
    pub rate_limit_rps: f64,
    /// Retries for transient lookup failures. 0 = no retry.
    pub retry_max: u32,
    /// Scheduled refresh interval for `serve`. 0 = disabled.
    pub refresh_interval_hours: u64,
    /// A vehicle is due a re-check once its last check is older than this.
    pub stale_after_hours: u64,
}

/// Credentials needed to talk to the DVSA MOT History API.
#[derive(Debug, Clone)]
pub struct DvsaCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
}

impl Config {
    /// Returns the DVSA credentials, or an error naming every missing variable.
    pub fn dvsa_credentials(&self) -> anyhow::Result<DvsaCredentials> {
        let mut missing = Vec::new();
        if self.dvsa_token_url.is_none() {
            missing.push("DVSA_TOKEN_URL");
        }
        if self.dvsa_client_id.is_none() {
            missing.push("DVSA_CLIENT_ID");
        }
        if self.dvsa_client_secret.is_none() {
            missing.push("DVSA_CLIENT_SECRET");
        }
        if self.dvsa_api_key.is_none() {
            missing.push("DVSA_API_KEY");
        }
        match (
            &self.dvsa_token_url,
            &self.dvsa_client_id,
            &self.dvsa_client_secret,
            &self.dvsa_api_key,
        ) {
            (Some(token_url), Some(client_id), Some(client_secret), Some(api_key)) => Ok(DvsaCredentials {
                token_url: token_url.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                api_key: api_key.clone(),
            }),
            _ => anyhow::bail!("MOT history API is not configured: set {}", missing.join(", ")),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable lookup. `load()` passes the process env.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let cfg = Config {
        port: parse_or(&lookup, "MOTWATCH_PORT", 8080),
        database_url: non_empty("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/motwatch".into()),
        admin_key: non_empty("MOTWATCH_ADMIN_KEY"),
        dvsa_client_id: non_empty("DVSA_CLIENT_ID"),
        dvsa_client_secret: non_empty("DVSA_CLIENT_SECRET"),
        dvsa_api_key: non_empty("DVSA_API_KEY"),
        dvsa_token_url: non_empty("DVSA_TOKEN_URL"),
        dvsa_scope: non_empty("DVSA_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.into()),
        mot_api_base_url: non_empty("MOT_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_MOT_API_BASE_URL.into()),
        dvla_api_key: non_empty("DVLA_API_KEY"),
        dvla_api_url: non_empty("DVLA_API_URL").unwrap_or_else(|| DEFAULT_DVLA_API_URL.into()),
        batch_concurrency: parse_or(&lookup, "MOTWATCH_BATCH_CONCURRENCY", 15),
        batch_size: parse_or(&lookup, "MOTWATCH_BATCH_SIZE", 50),
        batch_delay_ms: parse_or(&lookup, "MOTWATCH_BATCH_DELAY_MS", 1000),
        request_timeout_secs: parse_or(&lookup, "MOTWATCH_REQUEST_TIMEOUT_SECS", 8),
        rate_limit_rps: parse_or(&lookup, "MOTWATCH_RATE_LIMIT_RPS", 0.0),
        retry_max: parse_or(&lookup, "MOTWATCH_RETRY_MAX", 0),
        refresh_interval_hours: parse_or(&lookup, "MOTWATCH_REFRESH_INTERVAL_HOURS", 0),
        stale_after_hours: parse_or(&lookup, "MOTWATCH_STALE_AFTER_HOURS", 24),
    };

    url::Url::parse(&cfg.mot_api_base_url)
        .map_err(|e| anyhow::anyhow!("MOT_API_BASE_URL is not a valid URL: {}", e))?;
    if let Some(token_url) = &cfg.dvsa_token_url {
        url::Url::parse(token_url)
            .map_err(|e| anyhow::anyhow!("DVSA_TOKEN_URL is not a valid URL: {}", e))?;
    }
    url::Url::parse(&cfg.dvla_api_url)
        .map_err(|e| anyhow::anyhow!("DVLA_API_URL is not a valid URL: {}", e))?;

    if cfg.admin_key.is_none() {
        tracing::warn!("MOTWATCH_ADMIN_KEY is not set; the admin API will reject every request");
    }

    Ok(cfg)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
