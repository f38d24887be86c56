//! Runtime configuration, merged from `catalog.toml` and the environment.

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Optional config file looked up in the working directory.
pub const CONFIG_FILE: &str = "catalog.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Level applied to this crate's own log targets.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root of the catalog REST API, e.g. `http://localhost:3000/api`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Directory holding the persisted store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_cache_ttl", deserialize_with = "deserialize_duration")]
    pub cache_ttl: Duration,
    #[serde(
        default = "default_fetch_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    pub fetch_cooldown: Duration,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Outbound pacing for catalog API requests.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl Config {
    /// Load from `catalog.toml` (if present), then environment variables.
    /// Nested keys use a double underscore: `RATE_LIMITING__BURST=4`.
    pub fn load() -> anyhow::Result<Self> {
        Self::figment().extract().context("Failed to load config")
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().split("__"))
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_api_base_url() -> String {
    "http://localhost:3000/api".to_owned()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".catalog-store")
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_fetch_cooldown() -> Duration {
    Duration::from_millis(3000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_burst() -> u32 {
    10
}

/// Accept either whole seconds (`900`) or a unit-suffixed string (`"15m"`, `"1500ms"`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_duration(text: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ]);
    let parsed = parser
        .parse(text.trim())
        .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {text:?}: {e}"))
}
