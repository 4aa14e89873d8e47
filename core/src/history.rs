//! Append-only trigger history and the aggregates served from it.

use crate::agent::Activation;
use crate::condition::Field;
use crate::delivery::DeliveryOutcome;
use crate::repository::Repository;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Immutable audit entry for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub rule_name: String,
    pub ticker: String,
    pub trigger_field: Field,
    /// Value of the decisive field at trigger time.
    pub trigger_value: f64,
    pub actions_executed: Vec<DeliveryOutcome>,
}

impl TriggerRecord {
    pub fn new(activation: &Activation, outcomes: Vec<DeliveryOutcome>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: activation.triggered_at,
            rule_id: activation.rule_id.clone(),
            rule_name: activation.rule_name.clone(),
            ticker: activation.ticker.clone(),
            trigger_field: activation.field,
            trigger_value: activation.value,
            actions_executed: outcomes,
        }
    }

    pub fn successful_deliveries(&self) -> usize {
        self.actions_executed.iter().filter(|o| o.is_success()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_triggers: usize,
    pub triggers_last_24h: usize,
    pub total_deliveries: usize,
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,
    /// Successful over total deliveries, 0.0 when nothing was delivered.
    pub success_ratio: f64,
}

/// In-memory history, optionally mirrored to a repository.
pub struct AlertLog {
    records: RwLock<Vec<TriggerRecord>>,
    repository: Option<Arc<dyn Repository>>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            repository: None,
        }
    }

    /// Loads persisted history and mirrors new records back to `repository`.
    pub async fn open(repository: Arc<dyn Repository>) -> Result<Self> {
        let mut records = repository.load_triggers().await?;
        records.sort_by_key(|r| r.timestamp);
        debug!(records = records.len(), "Trigger history loaded");
        Ok(Self {
            records: RwLock::new(records),
            repository: Some(repository),
        })
    }

    /// Appends a record. A persistence failure is logged; the in-memory
    /// history still gets the record.
    pub async fn record(&self, record: TriggerRecord) {
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.append_trigger(&record).await {
                warn!(rule_id = %record.rule_id, error = %e, "Failed to persist trigger record");
            }
        }
        let mut records = self.records.write().await;
        let at = records.partition_point(|r| r.timestamp <= record.timestamp);
        records.insert(at, record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> HistoryStats {
        let records = self.records.read().await;
        let since = now - Duration::hours(24);
        let mut stats = HistoryStats {
            total_triggers: records.len(),
            ..HistoryStats::default()
        };
        for record in records.iter() {
            if record.timestamp >= since {
                stats.triggers_last_24h += 1;
            }
            stats.total_deliveries += record.actions_executed.len();
            stats.successful_deliveries += record.successful_deliveries();
        }
        stats.failed_deliveries = stats.total_deliveries - stats.successful_deliveries;
        if stats.total_deliveries > 0 {
            stats.success_ratio = stats.successful_deliveries as f64 / stats.total_deliveries as f64;
        }
        stats
    }

    /// Records from the trailing `days` window, most recent first.
    pub async fn history(&self, rule_id: Option<&str>, days: u32, now: DateTime<Utc>) -> Vec<TriggerRecord> {
        let since = now - Duration::days(i64::from(days));
        self.records
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.timestamp >= since)
            .filter(|r| rule_id.map_or(true, |id| r.rule_id == id))
            .cloned()
            .collect()
    }

    /// Drops records older than `days`. Readers holding a returned history
    /// keep their copy.
    pub async fn prune(&self, days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(days));
        if let Some(repo) = &self.repository {
            repo.prune_triggers(cutoff).await?;
        }
        let mut records = self.records.write().await;
        let stale = records.partition_point(|r| r.timestamp < cutoff);
        records.drain(..stale);
        Ok(stale)
    }

    /// Periodically prunes records older than `days`.
    pub fn start_retention_task(self: &Arc<Self>, days: u32, every: std::time::Duration) -> JoinHandle<()> {
        let log = Arc::clone(self);
        let every = every.max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match log.prune(days, Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, retention_days = days, "Pruned trigger history"),
                    Err(e) => warn!(error = %e, "Trigger history retention sweep failed"),
                }
            }
        })
    }
}
