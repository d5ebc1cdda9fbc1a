// src/config.rs
//! Runtime configuration: optional TOML file, then environment overrides.
//!
//! Resolution order:
//! 1) `$BOT_CONFIG_PATH` (must exist when set)
//! 2) `config/bot.toml` if present
//! 3) built-in defaults
//!
//! Environment variables always win over file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::analysis::client::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::analysis::RetryPolicy;
use crate::social::bluesky::DEFAULT_SERVICE;

pub const ENV_CONFIG_PATH: &str = "BOT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/bot.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bluesky: BlueskyConfig,
    pub analysis: AnalysisConfig,
    pub dispatch: DispatchConfig,
    pub quota_path: PathBuf,
    pub port: u16,
    pub poll_interval_secs: u64,
    pub metrics_enabled: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bluesky: BlueskyConfig::default(),
            analysis: AnalysisConfig::default(),
            dispatch: DispatchConfig::default(),
            quota_path: PathBuf::from("data/ratelimit.json"),
            port: 3000,
            poll_interval_secs: 30,
            metrics_enabled: false,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BlueskyConfig {
    pub service: String,
    pub identifier: String,
    pub password: String,
    pub session_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            identifier: String::new(),
            password: String::new(),
            session_path: PathBuf::from("data/session.json"),
            request_timeout_secs: 30,
        }
    }
}

impl BlueskyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl fmt::Debug for BlueskyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueskyConfig")
            .field("service", &self.service)
            .field("identifier", &self.identifier)
            .field("password_len", &self.password.len())
            .field("session_path", &self.session_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            request_timeout_secs: 30,
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            jitter_ms: 1_000,
        }
    }
}

impl AnalysisConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_max: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key_len", &self.api_key.len())
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Pacing and limits for one poll cycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mention_page_size: u32,
    pub inter_item_delay_ms: u64,
    pub inter_post_delay_ms: u64,
    pub post_cooldown_secs: u64,
    pub max_post_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mention_page_size: 20,
            inter_item_delay_ms: 2_000,
            inter_post_delay_ms: 1_000,
            post_cooldown_secs: 300,
            max_post_attempts: 3,
        }
    }
}

impl DispatchConfig {
    /// No pacing at all; used by tests and dry runs.
    pub fn unpaced() -> Self {
        Self {
            inter_item_delay_ms: 0,
            inter_post_delay_ms: 0,
            post_cooldown_secs: 0,
            ..Self::default()
        }
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn inter_post_delay(&self) -> Duration {
        Duration::from_millis(self.inter_post_delay_ms)
    }

    pub fn post_cooldown(&self) -> Duration {
        Duration::from_secs(self.post_cooldown_secs)
    }
}

impl BotConfig {
    /// File (if any) + env overrides + validation.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_file()?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_file() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(default);
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_string("BLUESKY_USERNAME") {
            self.bluesky.identifier = v;
        }
        if let Some(v) = env_string("BLUESKY_PASSWORD") {
            self.bluesky.password = v;
        }
        if let Some(v) = env_string("BLUESKY_SERVICE") {
            self.bluesky.service = v;
        }
        if let Some(v) = env_string("SESSION_FILE") {
            self.bluesky.session_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("PERPLEXITY_API_KEY") {
            self.analysis.api_key = v;
        }
        if let Some(v) = env_string("PERPLEXITY_MODEL") {
            self.analysis.model = v;
        }
        if let Some(v) = env_string("QUOTA_FILE") {
            self.quota_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("PORT")? {
            self.port = v;
        }
        if let Some(v) = env_parse("POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_string("METRICS_ENABLED") {
            self.metrics_enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bluesky.identifier.trim().is_empty() || self.bluesky.password.is_empty() {
            bail!("Missing BLUESKY_USERNAME / BLUESKY_PASSWORD");
        }
        if self.analysis.api_key.trim().is_empty() {
            bail!("Missing PERPLEXITY_API_KEY");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll interval must be at least one second");
        }
        if !(1..=100).contains(&self.dispatch.mention_page_size) {
            bail!("mention_page_size must be within 1..=100");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    env_string(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| anyhow!("{key} must be a number, got {v:?}"))
        })
        .transpose()
}
