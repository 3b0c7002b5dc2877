//! External API credentials.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::AuthError;

/// Credential fields as the account directory stores them. Any of them may be
/// missing on accounts that never finished connecting the external API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: Option<String>,
    /// Milliseconds since the epoch.
    pub expires_at_ms: Option<i64>,
    pub refresh_token: Option<String>,
}

/// A complete credential bundle, travelling inside the task message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CredentialBundle {
    /// Validate a stored credential. A missing refresh token is allowed: the
    /// access token may still be valid, and refresh is refused later if needed.
    pub fn from_stored(stored: StoredCredential) -> Result<Self, AuthError> {
        let access_token = stored
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidCredential("missing access token".to_string()))?;
        let expiry_ms = stored
            .expires_at_ms
            .ok_or_else(|| AuthError::InvalidCredential("missing access token expiry".to_string()))?;
        let expires_at = Utc
            .timestamp_millis_opt(expiry_ms)
            .single()
            .ok_or_else(|| {
                AuthError::InvalidCredential(format!("access token expiry out of range: {expiry_ms}"))
            })?;
        if stored.refresh_token.is_none() {
            tracing::warn!("credential has no refresh token; refresh will not be possible");
        }
        Ok(Self {
            access_token,
            expires_at,
            refresh_token: stored.refresh_token.filter(|t| !t.is_empty()),
        })
    }

    /// Expired, or expiring within `margin` of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at < now + margin
    }

    pub fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            access_token: Some(self.access_token.clone()),
            expires_at_ms: Some(self.expires_at.timestamp_millis()),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> StoredCredential {
        StoredCredential {
            access_token: Some("ya29.token".into()),
            expires_at_ms: Some(1_704_110_400_000),
            refresh_token: Some("1//refresh".into()),
        }
    }

    #[test]
    fn complete_credential_is_accepted() {
        let bundle = CredentialBundle::from_stored(stored()).unwrap();
        assert_eq!(bundle.access_token, "ya29.token");
        assert_eq!(bundle.expires_at.timestamp_millis(), 1_704_110_400_000);
        assert_eq!(bundle.to_stored(), stored());
    }

    #[test]
    fn missing_token_or_expiry_is_rejected() {
        let mut no_token = stored();
        no_token.access_token = None;
        assert!(matches!(
            CredentialBundle::from_stored(no_token),
            Err(AuthError::InvalidCredential(_))
        ));

        let mut no_expiry = stored();
        no_expiry.expires_at_ms = None;
        assert!(matches!(
            CredentialBundle::from_stored(no_expiry),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn missing_refresh_token_is_tolerated() {
        let mut s = stored();
        s.refresh_token = None;
        let bundle = CredentialBundle::from_stored(s).unwrap();
        assert!(bundle.refresh_token.is_none());
    }

    #[test]
    fn refresh_needed_inside_safety_margin() {
        let bundle = CredentialBundle::from_stored(stored()).unwrap();
        let margin = Duration::minutes(5);

        assert!(!bundle.needs_refresh(bundle.expires_at - Duration::minutes(10), margin));
        assert!(bundle.needs_refresh(bundle.expires_at - Duration::minutes(4), margin));
        assert!(bundle.needs_refresh(bundle.expires_at + Duration::minutes(1), margin));
    }
}
