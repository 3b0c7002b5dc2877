//! Pipeline configuration.
//!
//! Loaded from an optional TOML file, then overridden field by field from
//! `INDEXCHECK_*` environment variables. Every field has a default, so an
//! empty file (or none at all) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CreditPackage;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// OAuth client used for token refresh. Never hardcoded; comes from the file
/// or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Credits per inspected URL.
    pub unit_cost: u64,
    /// Credits per re-index request.
    pub reindex_unit_cost: u64,
    /// Queue topic carrying task messages.
    pub topic: String,

    pub pacing_delay_ms: u64,
    /// When set, a token bucket replaces the fixed delay.
    pub rate_per_second: Option<u32>,

    pub token_safety_margin_secs: i64,
    /// Per-URL loop budget of one run. Must stay below `stale_job_after_secs`.
    pub run_deadline_secs: u64,
    /// How often a running job refreshes its `updated_at`.
    pub heartbeat_secs: u64,
    /// Per-request timeout of the Google HTTP client.
    pub http_timeout_secs: u64,
    /// Cap on collected URLs per job.
    pub max_urls: Option<usize>,
    pub analytics_lookback_days: u32,

    pub consumers: usize,
    pub receive_wait_ms: u64,
    pub stale_job_after_secs: i64,
    pub reconcile_interval_secs: u64,

    pub oauth: OAuthConfig,
    pub log: LogConfig,
    pub packages: Vec<CreditPackage>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            unit_cost: 1,
            reindex_unit_cost: 1,
            topic: "index-check-tasks".to_string(),
            pacing_delay_ms: 200,
            rate_per_second: None,
            token_safety_margin_secs: 300,
            run_deadline_secs: 1_800,
            heartbeat_secs: 60,
            http_timeout_secs: 30,
            max_urls: None,
            analytics_lookback_days: 90,
            consumers: 2,
            receive_wait_ms: 1_000,
            stale_job_after_secs: 3_600,
            reconcile_interval_secs: 300,
            oauth: OAuthConfig::default(),
            log: LogConfig::default(),
            packages: default_packages(),
        }
    }
}

fn default_packages() -> Vec<CreditPackage> {
    [
        ("starter", "Starter", 100, 49_900),
        ("growth", "Growth", 500, 199_900),
        ("agency", "Agency", 2_000, 599_900),
    ]
    .into_iter()
    .map(|(id, name, credits, price)| CreditPackage {
        id: id.to_string(),
        name: name.to_string(),
        credits,
        price,
    })
    .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` when given, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `INDEXCHECK_*` variables looked up through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        macro_rules! set_from_env {
            ($key:literal => Some $field:expr) => {
                if let Some(v) = var($key) {
                    $field = Some(parse_env($key, v)?);
                }
            };
            ($key:literal => $field:expr) => {
                if let Some(v) = var($key) {
                    $field = parse_env($key, v)?;
                }
            };
        }

        set_from_env!("INDEXCHECK_UNIT_COST" => self.unit_cost);
        set_from_env!("INDEXCHECK_REINDEX_UNIT_COST" => self.reindex_unit_cost);
        set_from_env!("INDEXCHECK_TOPIC" => self.topic);
        set_from_env!("INDEXCHECK_PACING_DELAY_MS" => self.pacing_delay_ms);
        set_from_env!("INDEXCHECK_RATE_PER_SECOND" => Some self.rate_per_second);
        set_from_env!("INDEXCHECK_TOKEN_SAFETY_MARGIN_SECS" => self.token_safety_margin_secs);
        set_from_env!("INDEXCHECK_RUN_DEADLINE_SECS" => self.run_deadline_secs);
        set_from_env!("INDEXCHECK_HEARTBEAT_SECS" => self.heartbeat_secs);
        set_from_env!("INDEXCHECK_HTTP_TIMEOUT_SECS" => self.http_timeout_secs);
        set_from_env!("INDEXCHECK_MAX_URLS" => Some self.max_urls);
        set_from_env!("INDEXCHECK_ANALYTICS_LOOKBACK_DAYS" => self.analytics_lookback_days);
        set_from_env!("INDEXCHECK_CONSUMERS" => self.consumers);
        set_from_env!("INDEXCHECK_RECEIVE_WAIT_MS" => self.receive_wait_ms);
        set_from_env!("INDEXCHECK_STALE_JOB_AFTER_SECS" => self.stale_job_after_secs);
        set_from_env!("INDEXCHECK_RECONCILE_INTERVAL_SECS" => self.reconcile_interval_secs);
        set_from_env!("INDEXCHECK_OAUTH_CLIENT_ID" => self.oauth.client_id);
        set_from_env!("INDEXCHECK_OAUTH_CLIENT_SECRET" => self.oauth.client_secret);
        set_from_env!("INDEXCHECK_OAUTH_TOKEN_URI" => Some self.oauth.token_uri);
        set_from_env!("INDEXCHECK_LOG_FILTER" => self.log.filter);
        set_from_env!("INDEXCHECK_LOG_JSON" => self.log.json);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".into()));
        }
        if self.consumers == 0 {
            return Err(ConfigError::Invalid("consumers must be at least 1".into()));
        }
        if self.token_safety_margin_secs < 0 {
            return Err(ConfigError::Invalid(
                "token_safety_margin_secs must not be negative".into(),
            ));
        }
        if self.rate_per_second == Some(0) {
            return Err(ConfigError::Invalid("rate_per_second must be positive".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid("http_timeout_secs must be positive".into()));
        }
        if self.stale_job_after_secs <= 0 {
            return Err(ConfigError::Invalid("stale_job_after_secs must be positive".into()));
        }
        let stale = self.stale_job_after_secs.unsigned_abs();
        if self.run_deadline_secs == 0 || self.run_deadline_secs >= stale {
            return Err(ConfigError::Invalid(format!(
                "run_deadline_secs must be between 1 and stale_job_after_secs ({stale}), got {}",
                self.run_deadline_secs
            )));
        }
        if self.heartbeat_secs == 0 || self.heartbeat_secs >= stale {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_secs must be between 1 and stale_job_after_secs ({stale}), got {}",
                self.heartbeat_secs
            )));
        }
        Ok(())
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn heartbeat(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.heartbeat_secs).unwrap_or(i64::MAX))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn token_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs)
    }

    pub fn stale_job_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_job_after_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn package(&self, id: &str) -> Option<&CreditPackage> {
        self.packages.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.pacing_delay(), Duration::from_millis(200));
        assert_eq!(config.token_safety_margin(), chrono::Duration::minutes(5));
        assert_eq!(config.analytics_lookback_days, 90);
        assert_eq!(config.run_deadline(), Duration::from_secs(1_800));
        assert_eq!(config.heartbeat(), chrono::Duration::minutes(1));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            unit_cost = 2
            rate_per_second = 5
            max_urls = 500

            [oauth]
            client_id = "cid"
            client_secret = "secret"

            [[packages]]
            id = "tiny"
            name = "Tiny"
            credits = 10
            price = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.unit_cost, 2);
        assert_eq!(config.reindex_unit_cost, 1);
        assert_eq!(config.rate_per_second, Some(5));
        assert_eq!(config.max_urls, Some(500));
        assert_eq!(config.oauth.client_id, "cid");
        assert_eq!(config.packages.len(), 1);
        assert_eq!(config.package("tiny").map(|p| p.credits), Some(10));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("INDEXCHECK_UNIT_COST", "3"),
            ("INDEXCHECK_RUN_DEADLINE_SECS", "540"),
            ("INDEXCHECK_LOG_JSON", "true"),
            ("INDEXCHECK_OAUTH_CLIENT_SECRET", "from-env"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.unit_cost, 3);
        assert_eq!(config.run_deadline(), Duration::from_secs(540));
        assert!(config.log.json);
        assert_eq!(config.oauth.client_secret, "from-env");
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|k| (k == "INDEXCHECK_CONSUMERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "INDEXCHECK_CONSUMERS"));
    }

    #[rstest]
    #[case::deadline_outlives_stale_cutoff("run_deadline_secs = 3600")]
    #[case::deadline_zero("run_deadline_secs = 0")]
    #[case::heartbeat_slower_than_stale_cutoff("stale_job_after_secs = 600\nrun_deadline_secs = 300\nheartbeat_secs = 900")]
    #[case::heartbeat_zero("heartbeat_secs = 0")]
    #[case::stale_cutoff_zero("stale_job_after_secs = 0")]
    #[case::no_http_timeout("http_timeout_secs = 0")]
    fn timing_settings_are_checked_against_each_other(#[case] toml: &str) {
        let err = PipelineConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{toml}: {err}");
    }

    #[test]
    fn env_deadline_is_validated_on_load() {
        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| (k == "INDEXCHECK_RUN_DEADLINE_SECS").then(|| "7200".to_string()))
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_consumers_is_invalid() {
        let err = PipelineConfig::from_toml_str("consumers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
