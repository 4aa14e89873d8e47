//! Durable storage for rule and webhook definitions and trigger history.

use crate::history::TriggerRecord;
use crate::rule::AlertRule;
use crate::webhook::WebhookConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, warn};

const RULES_TREE: &str = "rules";
const WEBHOOKS_TREE: &str = "webhooks";
const HISTORY_TREE: &str = "trigger_history";

/// Persisted form of a rule: the definition plus engine-owned bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRule {
    #[serde(flatten)]
    pub rule: AlertRule,
    pub created_at: DateTime<Utc>,
}

/// An entry as it sits in storage, before decoding and validation.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl RawEntry {
    pub fn decode<T: DeserializeOwned>(&self) -> std::result::Result<T, String> {
        serde_json::from_slice(&self.value).map_err(|e| e.to_string())
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<RawEntry>>;
    async fn save_rule(&self, rule: &StoredRule) -> Result<()>;
    async fn delete_rule(&self, rule_id: &str) -> Result<()>;

    async fn load_webhooks(&self) -> Result<Vec<RawEntry>>;
    async fn save_webhook(&self, webhook: &WebhookConfig) -> Result<()>;
    async fn delete_webhook(&self, url: &str) -> Result<()>;

    async fn append_trigger(&self, record: &TriggerRecord) -> Result<()>;
    /// Oldest first. Undecodable records are skipped with a warning.
    async fn load_triggers(&self) -> Result<Vec<TriggerRecord>>;
    /// Removes records strictly older than `before`; returns how many.
    async fn prune_triggers(&self, before: DateTime<Utc>) -> Result<usize>;
}

pub struct SledRepository {
    db: Db,
    rules: Tree,
    webhooks: Tree,
    history: Tree,
}

impl SledRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).with_context(|| format!("opening sled database at {}", path.display()))?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            rules: db.open_tree(RULES_TREE)?,
            webhooks: db.open_tree(WEBHOOKS_TREE)?,
            history: db.open_tree(HISTORY_TREE)?,
            db,
        })
    }

    fn raw_entries(tree: &Tree) -> Result<Vec<RawEntry>> {
        tree.iter()
            .map(|item| {
                let (key, value) = item?;
                Ok(RawEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value: value.to_vec(),
                })
            })
            .collect()
    }

    async fn put(&self, tree: &Tree, key: &str, value: Vec<u8>) -> Result<()> {
        tree.insert(key.as_bytes(), value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn remove(&self, tree: &Tree, key: &str) -> Result<()> {
        tree.remove(key.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Zero-padded so byte order matches time order.
fn time_prefix(ts: DateTime<Utc>) -> String {
    format!("{:020}", ts.timestamp_nanos_opt().unwrap_or(0).max(0))
}

fn history_key(record: &TriggerRecord) -> String {
    format!("{}_{}", time_prefix(record.timestamp), record.id)
}

#[async_trait]
impl Repository for SledRepository {
    async fn load_rules(&self) -> Result<Vec<RawEntry>> {
        Self::raw_entries(&self.rules)
    }

    async fn save_rule(&self, rule: &StoredRule) -> Result<()> {
        let value = serde_json::to_vec(rule)?;
        self.put(&self.rules, &rule.rule.id, value).await
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        self.remove(&self.rules, rule_id).await
    }

    async fn load_webhooks(&self) -> Result<Vec<RawEntry>> {
        Self::raw_entries(&self.webhooks)
    }

    async fn save_webhook(&self, webhook: &WebhookConfig) -> Result<()> {
        let value = serde_json::to_vec(webhook)?;
        self.put(&self.webhooks, &webhook.url, value).await
    }

    async fn delete_webhook(&self, url: &str) -> Result<()> {
        self.remove(&self.webhooks, url).await
    }

    async fn append_trigger(&self, record: &TriggerRecord) -> Result<()> {
        let key = history_key(record);
        let value = serde_json::to_vec(record)?;
        self.put(&self.history, &key, value).await?;
        debug!(record_id = %record.id, rule_id = %record.rule_id, "Trigger record persisted");
        Ok(())
    }

    async fn load_triggers(&self) -> Result<Vec<TriggerRecord>> {
        let mut records = Vec::new();
        for entry in Self::raw_entries(&self.history)? {
            match entry.decode::<TriggerRecord>() {
                Ok(record) => records.push(record),
                Err(reason) => warn!(key = %entry.key, reason = %reason, "Skipping unreadable trigger record"),
            }
        }
        Ok(records)
    }

    async fn prune_triggers(&self, before: DateTime<Utc>) -> Result<usize> {
        let bound = time_prefix(before);
        let mut removed = 0;
        for item in self.history.range(..bound.as_bytes()) {
            let (key, _) = item?;
            self.history.remove(key)?;
            removed += 1;
        }
        if removed > 0 {
            self.db.flush_async().await?;
        }
        Ok(removed)
    }
}
