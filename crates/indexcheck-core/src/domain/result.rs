//! Per-URL result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OwnerId, PropertyId};

/// The external API's classification of a URL's indexing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Partial,
    Fail,
    Neutral,
    VerdictUnspecified,
}

impl Verdict {
    /// PASS and NEUTRAL count as indexed (or on its way).
    pub fn is_pass_like(self) -> bool {
        matches!(self, Verdict::Pass | Verdict::Neutral)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Partial => "PARTIAL",
            Verdict::Fail => "FAIL",
            Verdict::Neutral => "NEUTRAL",
            Verdict::VerdictUnspecified => "VERDICT_UNSPECIFIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASS" => Some(Verdict::Pass),
            "PARTIAL" => Some(Verdict::Partial),
            "FAIL" => Some(Verdict::Fail),
            "NEUTRAL" => Some(Verdict::Neutral),
            "VERDICT_UNSPECIFIED" => Some(Verdict::VerdictUnspecified),
            _ => None,
        }
    }
}

/// Stored status of one URL: a verdict, an error tag, or a sentinel.
///
/// Serialized as a flat string (`"PASS"`, `"api_error"`, `"reindex_requested"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UrlStatus {
    Verdict(Verdict),
    ApiError,
    GenericError,
    ReindexRequested,
    /// The API answered but carried no verdict.
    Unknown,
}

impl UrlStatus {
    pub fn is_error(self) -> bool {
        matches!(self, UrlStatus::ApiError | UrlStatus::GenericError)
    }

    pub fn is_pass_like(self) -> bool {
        matches!(self, UrlStatus::Verdict(v) if v.is_pass_like())
    }

    /// Eligible for a re-index request: a real verdict that is not passing.
    pub fn needs_reindex(self) -> bool {
        matches!(self, UrlStatus::Verdict(v) if !v.is_pass_like())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UrlStatus::Verdict(v) => v.as_str(),
            UrlStatus::ApiError => "api_error",
            UrlStatus::GenericError => "generic_error",
            UrlStatus::ReindexRequested => "reindex_requested",
            UrlStatus::Unknown => "UNKNOWN",
        }
    }
}

impl From<UrlStatus> for String {
    fn from(status: UrlStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for UrlStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if let Some(v) = Verdict::parse(&s) {
            return Ok(UrlStatus::Verdict(v));
        }
        match s.as_str() {
            "api_error" => Ok(UrlStatus::ApiError),
            "generic_error" => Ok(UrlStatus::GenericError),
            "reindex_requested" => Ok(UrlStatus::ReindexRequested),
            "UNKNOWN" => Ok(UrlStatus::Unknown),
            other => Err(format!("unknown url status: {other}")),
        }
    }
}

/// Identity of a result record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    pub owner_id: OwnerId,
    pub property_id: PropertyId,
    pub url: String,
}

/// Latest known status of one URL of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub owner_id: OwnerId,
    pub property_id: PropertyId,
    pub property_url: String,
    pub url: String,
    pub status: UrlStatus,
    pub last_checked_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn key(&self) -> ResultKey {
        ResultKey {
            owner_id: self.owner_id.clone(),
            property_id: self.property_id.clone(),
            url: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(UrlStatus::Verdict(Verdict::Pass), "\"PASS\"")]
    #[case(UrlStatus::Verdict(Verdict::VerdictUnspecified), "\"VERDICT_UNSPECIFIED\"")]
    #[case(UrlStatus::ApiError, "\"api_error\"")]
    #[case(UrlStatus::GenericError, "\"generic_error\"")]
    #[case(UrlStatus::ReindexRequested, "\"reindex_requested\"")]
    fn url_status_serializes_flat(#[case] status: UrlStatus, #[case] json: &str) {
        assert_eq!(serde_json::to_string(&status).unwrap(), json);
        let back: UrlStatus = serde_json::from_str(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        let err = serde_json::from_str::<UrlStatus>("\"MAYBE\"").unwrap_err();
        assert!(err.to_string().contains("unknown url status"));
    }

    #[rstest]
    #[case(UrlStatus::Verdict(Verdict::Fail), true)]
    #[case(UrlStatus::Verdict(Verdict::Partial), true)]
    #[case(UrlStatus::Verdict(Verdict::VerdictUnspecified), true)]
    #[case(UrlStatus::Verdict(Verdict::Pass), false)]
    #[case(UrlStatus::Verdict(Verdict::Neutral), false)]
    #[case(UrlStatus::ApiError, false)]
    #[case(UrlStatus::GenericError, false)]
    #[case(UrlStatus::ReindexRequested, false)]
    #[case(UrlStatus::Unknown, false)]
    fn reindex_eligibility(#[case] status: UrlStatus, #[case] eligible: bool) {
        assert_eq!(status.needs_reindex(), eligible);
    }
}
