// Bearer credential for the DVSA MOT History API.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Tokens are treated as stale this long before their stated expiry.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 600;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// True while `now < expires_at - margin`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(TOKEN_SAFETY_MARGIN_SECS)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

// Never print the bearer value.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
