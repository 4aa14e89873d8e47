use crate::error::{AlertError, AlertResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A registered webhook destination, keyed by its URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub succeeded: u64,
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: default_headers(),
            enabled: true,
            sent: 0,
            succeeded: 0,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> AlertResult<()> {
        if !is_http_url(&self.url) {
            return Err(AlertError::validation(format!(
                "webhook url '{}' must start with http:// or https://",
                self.url
            )));
        }
        Ok(())
    }
}

pub(crate) fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// Webhook definitions in insertion order plus their delivery counters.
#[derive(Debug, Default)]
pub struct WebhookStore {
    order: Vec<String>,
    entries: HashMap<String, WebhookConfig>,
}

impl WebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: WebhookConfig) -> AlertResult<()> {
        if self.entries.contains_key(&config.url) {
            return Err(AlertError::DuplicateTarget(config.url));
        }
        self.order.push(config.url.clone());
        self.entries.insert(config.url.clone(), config);
        Ok(())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&WebhookConfig> {
        self.entries.get(url)
    }

    pub fn remove(&mut self, url: &str) -> AlertResult<WebhookConfig> {
        let removed = self
            .entries
            .remove(url)
            .ok_or_else(|| AlertError::TargetNotFound(url.to_string()))?;
        self.order.retain(|u| u != url);
        Ok(removed)
    }

    pub fn set_enabled(&mut self, url: &str, enabled: bool) -> AlertResult<WebhookConfig> {
        let entry = self
            .entries
            .get_mut(url)
            .ok_or_else(|| AlertError::TargetNotFound(url.to_string()))?;
        entry.enabled = enabled;
        Ok(entry.clone())
    }

    /// Bumps the counters after a delivery attempt sequence. Unknown urls
    /// (deleted mid-tick, or inline targets) are ignored.
    pub fn record_delivery(&mut self, url: &str, succeeded: bool) -> Option<WebhookConfig> {
        let entry = self.entries.get_mut(url)?;
        entry.sent += 1;
        if succeeded {
            entry.succeeded += 1;
        }
        Some(entry.clone())
    }

    pub fn list(&self) -> Vec<WebhookConfig> {
        self.order
            .iter()
            .filter_map(|url| self.entries.get(url).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.values().filter(|w| w.enabled).count()
    }
}
