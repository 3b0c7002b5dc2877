//! URL collector.
//!
//! Queries every discovery source independently. A failing source only
//! shrinks the set; when nothing is left the result is [`Collected::Empty`],
//! which callers treat as a normal outcome rather than an error.

use std::collections::HashSet;

use crate::ports::{DiscoverySource, SearchConsole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    /// Non-empty, deduplicated, in first-seen order.
    Urls(Vec<String>),
    Empty,
}

pub struct UrlCollector {
    sources: Vec<DiscoverySource>,
    max_urls: Option<usize>,
}

impl Default for UrlCollector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl UrlCollector {
    /// Search analytics first, then sitemaps.
    pub fn new(max_urls: Option<usize>) -> Self {
        Self {
            sources: vec![DiscoverySource::SearchAnalytics, DiscoverySource::Sitemaps],
            max_urls,
        }
    }

    pub fn with_sources(mut self, sources: Vec<DiscoverySource>) -> Self {
        self.sources = sources;
        self
    }

    pub async fn collect(&self, client: &dyn SearchConsole, property_url: &str) -> Collected {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for &source in &self.sources {
            let candidates = match client.list_candidates(source, property_url).await {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(
                        source = source.as_str(),
                        property_url,
                        error = %err,
                        "discovery source failed; continuing without it"
                    );
                    continue;
                }
            };
            let before = urls.len();
            for candidate in candidates {
                let url = candidate.trim();
                if url.is_empty() || seen.contains(url) {
                    continue;
                }
                seen.insert(url.to_string());
                urls.push(url.to_string());
            }
            tracing::debug!(source = source.as_str(), added = urls.len() - before, "collected");
        }

        if let Some(cap) = self.max_urls
            && urls.len() > cap
        {
            tracing::info!(found = urls.len(), cap, "truncating url set");
            urls.truncate(cap);
        }

        if urls.is_empty() {
            Collected::Empty
        } else {
            Collected::Urls(urls)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::ScriptedConsole;
    use rstest::rstest;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[tokio::test]
    async fn merges_sources_in_first_seen_order() {
        let console = ScriptedConsole::new()
            .with_candidates(DiscoverySource::SearchAnalytics, s(&["https://a/1", "https://a/2"]))
            .with_candidates(DiscoverySource::Sitemaps, s(&["https://a/2", "https://a/3", "  ", ""]));

        let got = UrlCollector::default().collect(&console, "https://a/").await;
        assert_eq!(got, Collected::Urls(s(&["https://a/1", "https://a/2", "https://a/3"])));
    }

    #[tokio::test]
    async fn one_failing_source_degrades_the_set() {
        let console = ScriptedConsole::new()
            .with_failing_source(DiscoverySource::SearchAnalytics)
            .with_candidates(DiscoverySource::Sitemaps, s(&["https://a/3"]));

        let got = UrlCollector::default().collect(&console, "https://a/").await;
        assert_eq!(got, Collected::Urls(s(&["https://a/3"])));
    }

    #[rstest]
    #[case::both_fail(true, true)]
    #[case::both_empty(false, false)]
    #[tokio::test]
    async fn nothing_found_is_empty(#[case] analytics_fails: bool, #[case] sitemaps_fail: bool) {
        let mut console = ScriptedConsole::new();
        if analytics_fails {
            console = console.with_failing_source(DiscoverySource::SearchAnalytics);
        }
        if sitemaps_fail {
            console = console.with_failing_source(DiscoverySource::Sitemaps);
        }
        let got = UrlCollector::default().collect(&console, "https://a/").await;
        assert_eq!(got, Collected::Empty);
    }

    #[tokio::test]
    async fn output_never_exceeds_cap_or_repeats() {
        let many: Vec<String> = (0..50).map(|i| format!("https://a/{}", i % 20)).collect();
        let console = ScriptedConsole::new().with_candidates(DiscoverySource::Sitemaps, many);

        let Collected::Urls(urls) = UrlCollector::new(Some(15)).collect(&console, "https://a/").await
        else {
            panic!("expected urls");
        };
        assert_eq!(urls.len(), 15);
        let unique: HashSet<&String> = urls.iter().collect();
        assert_eq!(unique.len(), urls.len());
    }
}
