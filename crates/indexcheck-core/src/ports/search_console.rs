//! External inspection API port.

use async_trait::async_trait;

use crate::domain::{UrlStatus, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The API answered with an error status.
    #[error("api error {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport failure or a malformed response.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Tag recorded for a URL whose call failed this way.
    pub fn tag(&self) -> UrlStatus {
        match self {
            ApiError::Http { .. } => UrlStatus::ApiError,
            ApiError::Other(_) => UrlStatus::GenericError,
        }
    }
}

/// Independent discovery calls feeding the URL collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoverySource {
    /// Pages with recent search traffic.
    SearchAnalytics,
    /// URLs listed by the property's submitted sitemaps.
    Sitemaps,
}

impl DiscoverySource {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscoverySource::SearchAnalytics => "search_analytics",
            DiscoverySource::Sitemaps => "sitemaps",
        }
    }
}

/// Authenticated client of the rate-limited inspection API.
#[async_trait]
pub trait SearchConsole: Send + Sync {
    /// `Ok(None)` when the API answered without a verdict.
    async fn inspect(&self, url: &str, property_url: &str) -> Result<Option<Verdict>, ApiError>;

    async fn list_candidates(
        &self,
        source: DiscoverySource,
        property_url: &str,
    ) -> Result<Vec<String>, ApiError>;

    async fn request_reindex(&self, url: &str) -> Result<(), ApiError>;
}
