//! MOT History API response shapes (subset of fields we need).

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleHistory {
    pub registration: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub first_used_date: Option<String>,
    pub fuel_type: Option<String>,
    pub primary_colour: Option<String>,
    /// Only present for vehicles that have not had their first MOT yet.
    pub mot_test_due_date: Option<String>,
    /// Most recent first, per the API contract.
    #[serde(default)]
    pub mot_tests: Vec<MotTest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotTest {
    pub completed_date: Option<String>,
    pub test_result: Option<String>,
    pub expiry_date: Option<String>,
    pub mot_test_number: Option<String>,
}

impl MotTest {
    pub fn passed(&self) -> bool {
        self.test_result
            .as_deref()
            .map(|r| r.trim().eq_ignore_ascii_case("PASSED"))
            .unwrap_or(false)
    }
}

/// Parse the date formats the API has used over time:
/// `2024-03-01`, `2024.03.01`, and either followed by a time component.
pub fn parse_api_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10)?;
    let normalized = date_part.replace('.', "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").ok()
}
