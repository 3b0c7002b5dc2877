//! Token endpoint and client construction ports.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ports::{ApiError, SearchConsole};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Token expired and there is nothing to refresh it with.
    #[error("access token expired and no refresh token is available")]
    MissingRefreshToken,

    /// The grant is permanently invalid (revoked, expired refresh token).
    #[error("refresh grant rejected: {0}")]
    InvalidGrant(String),

    /// Refresh failed for a reason that may go away on retry.
    #[error("token refresh failed: {0}")]
    Transient(String),

    /// The stored credential is incomplete.
    #[error("incomplete credential: {0}")]
    InvalidCredential(String),

    /// Building the API client failed.
    #[error("client setup failed: {0}")]
    Client(String),
}

impl AuthError {
    /// Message suitable for the job record or the caller.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::MissingRefreshToken => {
                "Google API access token has expired. No refresh token available. Please re-authenticate via the application."
            }
            AuthError::InvalidGrant(_) => {
                "Google API access token has expired, and refresh failed. Please re-authenticate via the application."
            }
            AuthError::InvalidCredential(_) => {
                "Google API authentication details not found or incomplete in your user profile. Please ensure your Google Account is connected."
            }
            AuthError::Transient(_) => {
                "An unexpected error occurred while trying to refresh the Google access token."
            }
            AuthError::Client(_) => "Failed to initialize the Google Search Console API client.",
        }
    }

    /// Whether the user has to reconnect their account.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, AuthError::MissingRefreshToken | AuthError::InvalidGrant(_))
    }
}

/// Fresh access token returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Some providers rotate the refresh token.
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, AuthError>;
}

/// Builds an API client bound to one access token.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, access_token: &str) -> Result<Arc<dyn SearchConsole>, ApiError>;
}
