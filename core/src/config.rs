use crate::delivery::RetryPolicy;
use crate::rule::AlertRule;
use crate::webhook::WebhookConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SENTIX_ALERTS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    /// Seeded on startup when not already persisted.
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// sled directory; `None` keeps everything in memory.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
    #[serde(default = "default_monitoring_interval_secs")]
    pub monitoring_interval_secs: u64,
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            persistence_path: None,
            monitoring_interval_secs: default_monitoring_interval_secs(),
            history_retention_days: default_history_retention_days(),
            retention_sweep_secs: default_retention_sweep_secs(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_monitoring_interval_secs() -> u64 {
    60
}

fn default_history_retention_days() -> u32 {
    30
}

fn default_retention_sweep_secs() -> u64 {
    3600
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/snapshots.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub allow_inline_targets: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            allow_inline_targets: false,
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl DeliverySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_secs(self.timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            chat_id: None,
            parse_mode: default_parse_mode(),
        }
    }
}

fn default_parse_mode() -> String {
    "HTML".to_string()
}

impl AlertConfig {
    /// Loads a YAML file, then applies `SENTIX_ALERTS__SECTION__KEY`
    /// environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?;

        let config: AlertConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_concurrent == 0 {
            bail!("delivery.max_concurrent must be at least 1");
        }
        if self.delivery.max_attempts == 0 {
            bail!("delivery.max_attempts must be at least 1");
        }
        if self.delivery.timeout_secs == 0 {
            bail!("delivery.timeout_secs must be at least 1");
        }
        if !self.delivery.backoff_multiplier.is_finite() || self.delivery.backoff_multiplier < 1.0 {
            bail!("delivery.backoff_multiplier must be a finite number >= 1.0");
        }
        if self.engine.monitoring_interval_secs == 0 {
            bail!("engine.monitoring_interval_secs must be at least 1");
        }
        if self.engine.retention_sweep_secs == 0 {
            bail!("engine.retention_sweep_secs must be at least 1");
        }

        if self.telegram.enabled {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
            if missing(&self.telegram.token) || missing(&self.telegram.chat_id) {
                bail!("telegram is enabled but token or chat_id is missing");
            }
        }

        let mut urls = HashSet::new();
        for webhook in &self.webhooks {
            webhook.validate()?;
            if !urls.insert(webhook.url.as_str()) {
                bail!("duplicate webhook url '{}'", webhook.url);
            }
        }

        let mut ids = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !ids.insert(rule.id.as_str()) {
                bail!("duplicate rule id '{}'", rule.id);
            }
        }

        Ok(())
    }
}
