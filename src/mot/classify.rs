//! Derive an MOT status from a vehicle's test history.

use chrono::NaiveDate;

use super::models::{parse_api_date, VehicleHistory};
use crate::models::MotStatus;

/// An expiry this many days out (or fewer) counts as due soon.
pub const DUE_SOON_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: MotStatus,
    pub expiry_date: Option<NaiveDate>,
    pub last_test_date: Option<NaiveDate>,
}

/// Status for a certificate that runs out on `expiry`.
pub fn status_for_expiry(expiry: NaiveDate, today: NaiveDate) -> MotStatus {
    let days_left = (expiry - today).num_days();
    if days_left < 0 {
        MotStatus::Expired
    } else if days_left <= DUE_SOON_DAYS {
        MotStatus::DueSoon
    } else {
        MotStatus::Valid
    }
}

/// Classify using the first test in API order. Errors describe unusable data.
pub fn classify(history: &VehicleHistory, today: NaiveDate) -> Result<Classification, String> {
    let Some(latest) = history.mot_tests.first() else {
        // New vehicles carry a first-test due date instead of any history
        return Ok(match history.mot_test_due_date.as_deref().and_then(parse_api_date) {
            Some(due) => Classification {
                status: status_for_expiry(due, today),
                expiry_date: Some(due),
                last_test_date: None,
            },
            None => Classification {
                status: MotStatus::NoRecord,
                expiry_date: None,
                last_test_date: None,
            },
        });
    };

    let last_test_date = latest.completed_date.as_deref().and_then(parse_api_date);
    let expiry_date = latest.expiry_date.as_deref().and_then(parse_api_date);

    if !latest.passed() {
        return Ok(Classification {
            status: MotStatus::Expired,
            expiry_date,
            last_test_date,
        });
    }

    let expiry = expiry_date.ok_or_else(|| {
        format!(
            "passed test {} has no usable expiry date ({:?})",
            latest.mot_test_number.as_deref().unwrap_or("<unknown>"),
            latest.expiry_date
        )
    })?;

    Ok(Classification {
        status: status_for_expiry(expiry, today),
        expiry_date: Some(expiry),
        last_test_date,
    })
}
