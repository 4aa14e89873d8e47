//! Per-ticker sentiment snapshots and the provider contract the engine
//! consumes them through.

use crate::condition::Field;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Latest statistical summary of sentiment for one ticker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(alias = "mean_sent")]
    pub mean: f64,
    #[serde(alias = "std_sent", default)]
    pub std_dev: f64,
    #[serde(alias = "min_sent", default)]
    pub min: f64,
    #[serde(alias = "max_sent", default)]
    pub max: f64,
    #[serde(default)]
    pub count: u64,
    #[serde(alias = "unc_mean", default)]
    pub mean_uncertainty: f64,
    #[serde(alias = "time_decay_mean", default)]
    pub time_decayed_mean: f64,
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Sets one field. `Count` is truncated to an integer.
    pub fn with(mut self, field: Field, value: f64) -> Self {
        match field {
            Field::Mean => self.mean = value,
            Field::StdDev => self.std_dev = value,
            Field::Min => self.min = value,
            Field::Max => self.max = value,
            Field::Count => self.count = value.max(0.0) as u64,
            Field::MeanUncertainty => self.mean_uncertainty = value,
            Field::TimeDecayedMean => self.time_decayed_mean = value,
            Field::Volatility => self.volatility = Some(value),
        }
        self
    }
}

/// Source of the latest snapshot per ticker, owned by the feature pipeline.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// `Ok(None)` when no snapshot exists yet for the ticker.
    async fn latest_snapshot(&self, ticker: &str) -> Result<Option<Snapshot>>;

    /// Every ticker the provider currently knows; used by wildcard rules.
    async fn known_tickers(&self) -> Result<Vec<String>>;
}

/// Snapshots held in memory and published by the embedding application.
#[derive(Default)]
pub struct InMemorySnapshots {
    inner: RwLock<BTreeMap<String, Snapshot>>,
}

impl InMemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, ticker: impl Into<String>, snapshot: Snapshot) {
        self.inner.write().await.insert(ticker.into(), snapshot);
    }

    pub async fn remove(&self, ticker: &str) -> Option<Snapshot> {
        self.inner.write().await.remove(ticker)
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshots {
    async fn latest_snapshot(&self, ticker: &str) -> Result<Option<Snapshot>> {
        Ok(self.inner.read().await.get(ticker).cloned())
    }

    async fn known_tickers(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }
}

/// Reads a JSON object of `ticker -> snapshot` written by the feature
/// pipeline. The parsed file is cached until its modification time or size
/// changes, so a tick parses it at most once; a missing file yields no
/// snapshots.
pub struct JsonFileSnapshots {
    path: PathBuf,
    cache: Mutex<Option<CachedFile>>,
}

struct CachedFile {
    modified: SystemTime,
    len: u64,
    snapshots: Arc<BTreeMap<String, Snapshot>>,
}

impl JsonFileSnapshots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    async fn read_all(&self) -> Result<Arc<BTreeMap<String, Snapshot>>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Snapshot file not present yet");
                *self.cache.lock().await = None;
                return Ok(Arc::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        let modified = meta
            .modified()
            .with_context(|| format!("reading mtime of {}", self.path.display()))?;

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache
            .as_ref()
            .filter(|c| c.modified == modified && c.len == meta.len())
        {
            return Ok(Arc::clone(&cached.snapshots));
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let snapshots: BTreeMap<String, Snapshot> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing snapshots from {}", self.path.display()))?;
        debug!(path = %self.path.display(), tickers = snapshots.len(), "Snapshot file reloaded");

        let snapshots = Arc::new(snapshots);
        *cache = Some(CachedFile {
            modified,
            len: meta.len(),
            snapshots: Arc::clone(&snapshots),
        });
        Ok(snapshots)
    }
}

#[async_trait]
impl SnapshotProvider for JsonFileSnapshots {
    async fn latest_snapshot(&self, ticker: &str) -> Result<Option<Snapshot>> {
        Ok(self.read_all().await?.get(ticker).cloned())
    }

    async fn known_tickers(&self) -> Result<Vec<String>> {
        Ok(self.read_all().await?.keys().cloned().collect())
    }
}
