//! Per-vehicle MOT check outcomes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// MOT status derived from a vehicle's most recent test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotStatus {
    Valid,
    DueSoon,
    Expired,
    /// The upstream has no MOT history for this vehicle.
    NoRecord,
}

impl MotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotStatus::Valid => "valid",
            MotStatus::DueSoon => "due_soon",
            MotStatus::Expired => "expired",
            MotStatus::NoRecord => "no_record",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "due_soon" => Some(Self::DueSoon),
            "expired" => Some(Self::Expired),
            "no_record" => Some(Self::NoRecord),
            _ => None,
        }
    }
}

/// Why a single check did not produce a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    #[serde(rename = "upstream_4xx")]
    Upstream4xx,
    #[serde(rename = "upstream_5xx")]
    Upstream5xx,
    Timeout,
    ParseError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Network => "network",
            FailureReason::Upstream4xx => "upstream_4xx",
            FailureReason::Upstream5xx => "upstream_5xx",
            FailureReason::Timeout => "timeout",
            FailureReason::ParseError => "parse_error",
        }
    }

    /// Transient failures that a bounded retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureReason::Network | FailureReason::Timeout | FailureReason::Upstream5xx
        )
    }
}

/// Outcome of checking one vehicle. Exactly one is produced per checked identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckResult {
    Success {
        status: MotStatus,
        expiry_date: Option<NaiveDate>,
        last_test_date: Option<NaiveDate>,
        raw_payload: serde_json::Value,
    },
    Failure {
        reason: FailureReason,
        message: String,
    },
}

impl CheckResult {
    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        CheckResult::Failure {
            reason,
            message: message.into(),
        }
    }

    pub fn no_record() -> Self {
        CheckResult::Success {
            status: MotStatus::NoRecord,
            expiry_date: None,
            last_test_date: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckResult::Success { .. })
    }

    pub fn status(&self) -> Option<MotStatus> {
        match self {
            CheckResult::Success { status, .. } => Some(*status),
            CheckResult::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            CheckResult::Success { .. } => None,
            CheckResult::Failure { reason, .. } => Some(*reason),
        }
    }

    /// Short label used for metrics and log fields.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            CheckResult::Success { status, .. } => status.as_str(),
            CheckResult::Failure { reason, .. } => reason.as_str(),
        }
    }
}

/// A check result tagged with the registration it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub registration: String,
    pub result: CheckResult,
    pub latency_ms: u64,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
}

/// The write issued to the persistence sink for a successful check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotStatusUpdate {
    pub registration: String,
    pub status: MotStatus,
    pub expiry_date: Option<NaiveDate>,
    pub last_test_date: Option<NaiveDate>,
    pub checked_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

impl MotStatusUpdate {
    /// Build the update for a successful outcome. Failures produce no write.
    pub fn from_outcome(outcome: &CheckOutcome) -> Option<Self> {
        match &outcome.result {
            CheckResult::Success {
                status,
                expiry_date,
                last_test_date,
                raw_payload,
            } => Some(Self {
                registration: outcome.registration.clone(),
                status: *status,
                expiry_date: *expiry_date,
                last_test_date: *last_test_date,
                checked_at: outcome.checked_at,
                raw_payload: raw_payload.clone(),
            }),
            CheckResult::Failure { .. } => None,
        }
    }
}
