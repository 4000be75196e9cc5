// src/config/mod.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::ingest::providers::{ProviderConfig, FETCHES_PER_CALL};
use crate::resilience::ResilienceConfig;

const ENV_PATH: &str = "AGGREGATOR_CONFIG_PATH";

fn default_queries() -> Vec<String> {
    [
        "software developer",
        "web development",
        "data science",
        "machine learning",
        "graphic design",
        "digital marketing",
        "finance",
        "content writing",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_politeness_delay_ms() -> u64 {
    2_000
}
fn default_daily_at() -> String {
    "02:00".to_string()
}
fn default_initial_delay_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    1_800
}
fn default_retention_days() -> i64 {
    30
}
fn default_purge_interval_secs() -> u64 {
    3_600
}
fn default_user_agent() -> String {
    concat!("internship-aggregator/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_http_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Search terms fanned out to every source on each run.
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    /// Pause between successive (query, source) calls.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    /// Local wall-clock time of the daily run, "HH:MM".
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            politeness_delay_ms: default_politeness_delay_ms(),
            daily_at: default_daily_at(),
            initial_delay_secs: default_initial_delay_secs(),
            scheduler_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Records not re-synced within this many days are hidden and purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// JSON snapshot file; in-memory only when unset.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            purge_interval_secs: default_purge_interval_secs(),
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub linkedin: ProviderConfig,
    #[serde(default)]
    pub indeed: ProviderConfig,
    #[serde(default)]
    pub internshala: ProviderConfig,
    /// Emit placeholder listings when a page yields no cards.
    #[serde(default = "default_true")]
    pub synthetic_fallback: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            linkedin: ProviderConfig::default(),
            indeed: ProviderConfig::default(),
            internshala: ProviderConfig::default(),
            synthetic_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl AggregatorConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: AggregatorConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?,
            _ => toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?,
        };
        cfg.finish()
    }

    /// Load using env var + fallbacks:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/aggregator.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/aggregator.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Self::default().finish()
    }

    /// Resolve "ENV" keys, clean the query list and check values.
    fn finish(mut self) -> Result<Self> {
        resolve_key(&mut self.providers.linkedin, "LINKEDIN_API_KEY");
        resolve_key(&mut self.providers.indeed, "INDEED_API_KEY");
        resolve_key(&mut self.providers.internshala, "INTERNSHALA_API_KEY");

        let mut seen = std::collections::HashSet::new();
        self.sync.queries = self
            .sync
            .queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
            .collect();

        parse_daily_at(&self.sync.daily_at)?;
        if self.store.retention_days <= 0 {
            bail!("store.retention_days must be positive");
        }
        if self.resilience.failure_threshold == 0 {
            bail!("resilience.failure_threshold must be at least 1");
        }
        let min_attempt_secs = self.min_attempt_secs();
        if self.resilience.call_timeout_secs < min_attempt_secs {
            tracing::warn!(
                configured = self.resilience.call_timeout_secs,
                raised_to = min_attempt_secs,
                "resilience.call_timeout_secs cannot cover the api and page fetches; raising it"
            );
            self.resilience.call_timeout_secs = min_attempt_secs;
        }
        Ok(self)
    }

    /// Smallest attempt budget that lets a hung API fetch time out and the page
    /// fetch still run to its own timeout.
    pub fn min_attempt_secs(&self) -> u64 {
        self.http.timeout_secs * u64::from(FETCHES_PER_CALL) + 5
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.sync.politeness_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.store.retention_days)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.store.purge_interval_secs.max(1))
    }
}

/// "ENV" means: read the key from `var`. A missing variable disables the API strategy.
fn resolve_key(p: &mut ProviderConfig, var: &str) {
    let wants_env = p
        .api_key
        .as_deref()
        .map(|k| k.trim().eq_ignore_ascii_case("env"))
        .unwrap_or(false);
    if wants_env {
        p.api_key = env::var(var).ok().filter(|v| !v.trim().is_empty());
        if p.api_key.is_none() {
            tracing::warn!(var, "api key set to ENV but variable is missing; api strategy disabled");
        }
    }
}

/// Parse "HH:MM" (24h).
pub fn parse_daily_at(s: &str) -> Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("invalid daily_at '{s}', expected HH:MM"))
}
