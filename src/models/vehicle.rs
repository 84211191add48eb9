//! Vehicle registration marks (VRMs) as used for MOT lookups.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized VRM is 2–8 uppercase ASCII letters or digits.
static VRM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{2,8}$").expect("valid VRM regex"));

/// A normalized vehicle registration mark.
///
/// Construction goes through [`Vrm::parse`], so every value held by this type
/// is already uppercase with whitespace stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vrm(String);

impl Vrm {
    /// Normalize and validate a raw registration string.
    pub fn parse(raw: &str) -> Result<Self, InvalidVrm> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(InvalidVrm::Empty);
        }
        if normalized.len() < 2 {
            return Err(InvalidVrm::TooShort(normalized));
        }
        if !VRM_PATTERN.is_match(&normalized) {
            return Err(InvalidVrm::Malformed(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vrm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Vrm {
    type Error = InvalidVrm;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Vrm> for String {
    fn from(value: Vrm) -> Self {
        value.0
    }
}

/// Strip all whitespace and uppercase. Does not validate.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidVrm {
    #[error("registration is empty")]
    Empty,
    #[error("registration '{0}' is too short")]
    TooShort(String),
    #[error("registration '{0}' is not 2-8 letters or digits")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_whitespace_and_uppercases() {
        let vrm = Vrm::parse(" ab12 cde ").unwrap();
        assert_eq!(vrm.as_str(), "AB12CDE");
        assert_eq!(vrm.to_string(), "AB12CDE");
    }

    #[test]
    fn test_parse_rejects_empty_and_short() {
        assert_eq!(Vrm::parse(""), Err(InvalidVrm::Empty));
        assert_eq!(Vrm::parse("   \t"), Err(InvalidVrm::Empty));
        assert_eq!(Vrm::parse(" a "), Err(InvalidVrm::TooShort("A".into())));
        assert!(Vrm::parse("A1").is_ok(), "two characters is the minimum");
    }

    #[test]
    fn test_parse_rejects_punctuation_and_overlong() {
        assert!(matches!(Vrm::parse("AB-12"), Err(InvalidVrm::Malformed(_))));
        assert!(matches!(Vrm::parse("../etc"), Err(InvalidVrm::Malformed(_))));
        assert!(matches!(Vrm::parse("ABCDEFGHI"), Err(InvalidVrm::Malformed(_))));
    }

    #[test]
    fn test_serde_goes_through_parse() {
        let vrm: Vrm = serde_json::from_str(r#""xy99 zzz""#).unwrap();
        assert_eq!(vrm.as_str(), "XY99ZZZ");
        assert!(serde_json::from_str::<Vrm>(r#""!""#).is_err());
    }
}
