//! HTTP adapters for the Google Search Console, Indexing and OAuth2 APIs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::Reader;
use serde::Deserialize;
use serde_json::json;

use crate::domain::Verdict;
use crate::ports::{
    ApiError, AuthError, ClientFactory, Clock, DiscoverySource, RefreshedToken, SearchConsole,
    TokenEndpoint,
};

const INSPECT_URL: &str = "https://searchconsole.googleapis.com/v1/urlInspection/index:inspect";
const WEBMASTERS_BASE: &str = "https://www.googleapis.com/webmasters/v3/sites";
const INDEXING_PUBLISH_URL: &str = "https://indexing.googleapis.com/v3/urlNotifications:publish";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const ANALYTICS_ROW_LIMIT: u32 = 25_000;

/// Shared HTTP client for every Google adapter. Each request is bounded by
/// `timeout` so a stalled peer cannot pin a worker.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Other(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: String,
}

/// Turn a non-2xx response into `ApiError::Http`, preferring the API's own
/// error message over the raw body.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GoogleErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(ApiError::Http {
        status: status.as_u16(),
        message,
    })
}

fn site_endpoint(property_url: &str, tail: &str) -> String {
    format!(
        "{WEBMASTERS_BASE}/{}/{tail}",
        urlencoding::encode(property_url)
    )
}

/// Verdict of a `urlInspection/index:inspect` response body.
pub(crate) fn parse_verdict(body: &serde_json::Value) -> Option<Verdict> {
    body.pointer("/inspectionResult/indexStatusResult/verdict")
        .and_then(|v| v.as_str())
        .and_then(Verdict::parse)
}

/// Page URLs of a `searchAnalytics/query` response body.
pub(crate) fn parse_analytics_pages(body: &serde_json::Value) -> Vec<String> {
    body.get("rows")
        .and_then(|rows| rows.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.pointer("/keys/0").and_then(|k| k.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Sitemap paths of a `sitemaps` list response body.
pub(crate) fn parse_sitemap_paths(body: &serde_json::Value) -> Vec<String> {
    body.get("sitemap")
        .and_then(|s| s.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("path").and_then(|p| p.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sitemap {
    /// `<urlset>`: page URLs.
    Urls(Vec<String>),
    /// `<sitemapindex>`: URLs of child sitemaps.
    Index(Vec<String>),
}

fn xml_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::Other(format!("sitemap xml: {err}"))
}

fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, ApiError> {
    if let Some(ch) = reference.resolve_char_ref().map_err(xml_error)? {
        return Ok(ch.to_string());
    }
    let name = reference.decode().map_err(xml_error)?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| xml_error(format!("unknown entity &{name};")))
}

/// Parse a sitemap, telling an index from a urlset by its root element.
pub(crate) fn parse_sitemap(xml: &str) -> Result<Sitemap, ApiError> {
    let mut reader = Reader::from_str(xml);
    let mut is_index = None;
    let mut current: Option<String> = None;
    let mut locs = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if is_index.is_none() => {
                is_index = match e.local_name().as_ref() {
                    b"sitemapindex" => Some(true),
                    b"urlset" => Some(false),
                    other => {
                        return Err(xml_error(format!(
                            "unexpected root <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                };
            }
            Event::Start(e) if e.local_name().as_ref() == b"loc" => {
                current = Some(String::new());
            }
            Event::Text(e) => {
                if let Some(loc) = current.as_mut() {
                    loc.push_str(&e.decode().map_err(xml_error)?);
                }
            }
            Event::CData(e) => {
                if let Some(loc) = current.as_mut() {
                    loc.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(loc) = current.as_mut() {
                    loc.push_str(&resolve_reference(&e)?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => {
                if let Some(loc) = current.take() {
                    let loc = loc.trim();
                    if !loc.is_empty() {
                        locs.push(loc.to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match is_index {
        Some(true) => Ok(Sitemap::Index(locs)),
        Some(false) => Ok(Sitemap::Urls(locs)),
        None => Err(xml_error("document has no root element")),
    }
}

/// Search Console client bound to one access token.
pub struct GoogleSearchConsole {
    http: reqwest::Client,
    access_token: String,
    clock: Arc<dyn Clock>,
    lookback_days: i64,
}

impl GoogleSearchConsole {
    async fn analytics_pages(&self, property_url: &str) -> Result<Vec<String>, ApiError> {
        let today = self.clock.now().date_naive();
        let start = today - Duration::days(self.lookback_days);
        let body = json!({
            "startDate": start.format("%Y-%m-%d").to_string(),
            "endDate": today.format("%Y-%m-%d").to_string(),
            "dimensions": ["page"],
            "rowLimit": ANALYTICS_ROW_LIMIT,
        });
        let resp = self
            .http
            .post(site_endpoint(property_url, "searchAnalytics/query"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let value: serde_json::Value = check(resp).await?.json().await?;
        Ok(parse_analytics_pages(&value))
    }

    async fn sitemap_urls(&self, property_url: &str) -> Result<Vec<String>, ApiError> {
        let resp = self
            .http
            .get(site_endpoint(property_url, "sitemaps"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let value: serde_json::Value = check(resp).await?.json().await?;

        let mut urls = Vec::new();
        for path in parse_sitemap_paths(&value) {
            // one unreadable sitemap does not hide the others
            match self.fetch_sitemap(&path).await {
                Ok(locs) => urls.extend(locs),
                Err(err) => tracing::warn!(sitemap = %path, error = %err, "sitemap fetch failed"),
            }
        }
        Ok(urls)
    }

    async fn fetch_sitemap(&self, path: &str) -> Result<Vec<String>, ApiError> {
        match self.fetch_sitemap_document(path).await? {
            Sitemap::Urls(urls) => Ok(urls),
            Sitemap::Index(children) => {
                // one level deep; an index inside an index is skipped
                let mut urls = Vec::new();
                for child in children {
                    match self.fetch_sitemap_document(&child).await {
                        Ok(Sitemap::Urls(locs)) => urls.extend(locs),
                        Ok(Sitemap::Index(_)) => {
                            tracing::warn!(sitemap = %child, "nested sitemap index skipped")
                        }
                        Err(err) => {
                            tracing::warn!(sitemap = %child, error = %err, "sitemap fetch failed")
                        }
                    }
                }
                Ok(urls)
            }
        }
    }

    async fn fetch_sitemap_document(&self, path: &str) -> Result<Sitemap, ApiError> {
        let resp = self.http.get(path).send().await?;
        let xml = check(resp).await?.text().await?;
        parse_sitemap(&xml)
    }
}

#[async_trait]
impl SearchConsole for GoogleSearchConsole {
    async fn inspect(&self, url: &str, property_url: &str) -> Result<Option<Verdict>, ApiError> {
        let resp = self
            .http
            .post(INSPECT_URL)
            .bearer_auth(&self.access_token)
            .json(&json!({ "inspectionUrl": url, "siteUrl": property_url }))
            .send()
            .await?;
        let value: serde_json::Value = check(resp).await?.json().await?;
        Ok(parse_verdict(&value))
    }

    async fn list_candidates(
        &self,
        source: DiscoverySource,
        property_url: &str,
    ) -> Result<Vec<String>, ApiError> {
        match source {
            DiscoverySource::SearchAnalytics => self.analytics_pages(property_url).await,
            DiscoverySource::Sitemaps => self.sitemap_urls(property_url).await,
        }
    }

    async fn request_reindex(&self, url: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(INDEXING_PUBLISH_URL)
            .bearer_auth(&self.access_token)
            .json(&json!({ "url": url, "type": "URL_UPDATED" }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// Builds [`GoogleSearchConsole`] clients sharing one connection pool.
pub struct GoogleClientFactory {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    lookback_days: i64,
}

impl GoogleClientFactory {
    pub fn new(http: reqwest::Client, clock: Arc<dyn Clock>, lookback_days: u32) -> Self {
        Self {
            http,
            clock,
            lookback_days: i64::from(lookback_days),
        }
    }
}

impl ClientFactory for GoogleClientFactory {
    fn connect(&self, access_token: &str) -> Result<Arc<dyn SearchConsole>, ApiError> {
        if access_token.is_empty() {
            return Err(ApiError::Other("empty access token".to_string()));
        }
        Ok(Arc::new(GoogleSearchConsole {
            http: self.http.clone(),
            access_token: access_token.to_string(),
            clock: self.clock.clone(),
            lookback_days: self.lookback_days,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Classify a failed token response.
pub(crate) fn token_error(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(e) if e.error == "invalid_grant" => {
            AuthError::InvalidGrant(e.error_description.unwrap_or(e.error))
        }
        Ok(e) => AuthError::Transient(format!(
            "{status}: {}",
            e.error_description.unwrap_or(e.error)
        )),
        Err(_) => AuthError::Transient(format!("{status}: {body}")),
    }
}

/// OAuth2 refresh-token grant against Google's token endpoint.
pub struct GoogleTokenEndpoint {
    http: reqwest::Client,
    token_uri: String,
    client_id: String,
    client_secret: String,
    clock: Arc<dyn Clock>,
}

impl GoogleTokenEndpoint {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            clock,
        }
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(token_error(status.as_u16(), &body));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Transient(format!("malformed token response: {e}")))?;
        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_at: self.clock.now() + Duration::seconds(token.expires_in),
            refresh_token: token.refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PASS", Some(Verdict::Pass))]
    #[case("NEUTRAL", Some(Verdict::Neutral))]
    #[case("VERDICT_UNSPECIFIED", Some(Verdict::VerdictUnspecified))]
    #[case("SOMETHING_NEW", None)]
    fn verdict_is_read_from_index_status(#[case] raw: &str, #[case] expected: Option<Verdict>) {
        let body = json!({
            "inspectionResult": { "indexStatusResult": { "verdict": raw, "coverageState": "x" } }
        });
        assert_eq!(parse_verdict(&body), expected);
    }

    #[test]
    fn missing_index_status_has_no_verdict() {
        assert_eq!(parse_verdict(&json!({ "inspectionResult": {} })), None);
    }

    #[test]
    fn analytics_rows_yield_first_key() {
        let body = json!({
            "rows": [
                { "keys": ["https://example.com/a"], "clicks": 3 },
                { "keys": ["https://example.com/b"], "clicks": 1 },
                { "clicks": 0 }
            ]
        });
        assert_eq!(
            parse_analytics_pages(&body),
            vec!["https://example.com/a", "https://example.com/b"]
        );
        assert!(parse_analytics_pages(&json!({})).is_empty());
    }

    #[test]
    fn sitemap_listing_yields_paths() {
        let listing = json!({ "sitemap": [ { "path": "https://example.com/sitemap.xml" } ] });
        assert_eq!(parse_sitemap_paths(&listing), vec!["https://example.com/sitemap.xml"]);
    }

    #[rstest]
    #[case::plain("<loc>https://example.com/a</loc>", "https://example.com/a")]
    #[case::padded("<loc>\n    https://example.com/a\n  </loc>", "https://example.com/a")]
    #[case::named_entity("<loc>https://example.com/b?x=1&amp;y=2</loc>", "https://example.com/b?x=1&y=2")]
    #[case::char_ref("<loc>https://example.com/b?x=1&#38;y=2</loc>", "https://example.com/b?x=1&y=2")]
    #[case::cdata("<loc><![CDATA[https://example.com/b?x=1&y=2]]></loc>", "https://example.com/b?x=1&y=2")]
    #[case::xml_page("<loc>https://example.com/feed.xml</loc>", "https://example.com/feed.xml")]
    fn urlset_locs_are_decoded(#[case] loc: &str, #[case] expected: &str) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"><url>{loc}</url></urlset>"#
        );
        assert_eq!(
            parse_sitemap(&xml).unwrap(),
            Sitemap::Urls(vec![expected.to_string()])
        );
    }

    #[test]
    fn sitemap_index_is_told_apart_by_root() {
        let xml = r#"<?xml version="1.0"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>https://example.com/posts.xml</loc></sitemap>
              <sitemap><loc>https://example.com/pages.xml</loc><lastmod>2024-06-01</lastmod></sitemap>
            </sitemapindex>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::Index(vec![
                "https://example.com/posts.xml".to_string(),
                "https://example.com/pages.xml".to_string(),
            ])
        );
    }

    #[rstest]
    #[case::empty_urlset("<urlset/>", Some(Sitemap::Urls(vec![])))]
    #[case::foreign_root("<html><body>moved</body></html>", None)]
    #[case::no_root("", None)]
    fn sitemap_roots(#[case] xml: &str, #[case] expected: Option<Sitemap>) {
        assert_eq!(parse_sitemap(xml).ok(), expected);
    }

    #[tokio::test]
    async fn stalled_token_endpoint_times_out() {
        // accepts TCP connections into the backlog and never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}/token", listener.local_addr().unwrap());
        let http = http_client(std::time::Duration::from_millis(200)).unwrap();
        let endpoint = GoogleTokenEndpoint::new(
            http,
            "client",
            "secret",
            Arc::new(crate::ports::SystemClock),
        )
        .with_token_uri(uri);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            endpoint.refresh("1//refresh"),
        )
        .await
        .expect("refresh returned before the outer timeout");
        assert!(matches!(outcome, Err(AuthError::Transient(_))));
        drop(listener);
    }

    #[test]
    fn site_url_is_path_encoded() {
        let url = site_endpoint("sc-domain:example.com", "sitemaps");
        assert_eq!(
            url,
            "https://www.googleapis.com/webmasters/v3/sites/sc-domain%3Aexample.com/sitemaps"
        );
    }

    #[rstest]
    #[case::revoked(
        400,
        r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        true
    )]
    #[case::client(400, r#"{"error":"invalid_client"}"#, false)]
    #[case::html(502, "<html>bad gateway</html>", false)]
    fn token_errors_are_classified(#[case] status: u16, #[case] body: &str, #[case] reauth: bool) {
        let err = token_error(status, body);
        assert_eq!(err.requires_reauthentication(), reauth);
        if !reauth {
            assert!(matches!(err, AuthError::Transient(_)));
        }
    }

    #[test]
    fn factory_rejects_empty_token() {
        let factory = GoogleClientFactory::new(
            http_client(std::time::Duration::from_secs(30)).unwrap(),
            Arc::new(crate::ports::SystemClock),
            90,
        );
        assert!(factory.connect("").is_err());
        assert!(factory.connect("ya29.token").is_ok());
    }
}
