//! # Sentix Alerts - sentiment alert rule engine
//!
//! Evaluates operator-defined rules against per-ticker sentiment snapshots
//! and fans triggered rules out to webhooks, a chat channel, or the log.
//!
//! ```no_run
//! use sentix_alert_core::{AlertEngine, snapshot::InMemorySnapshots};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<dyn sentix_alert_core::agent::WebhookClient>) -> anyhow::Result<()> {
//! let engine = AlertEngine::builder(client).build().await?;
//! let snapshots = InMemorySnapshots::new();
//! let report = engine.process_once(&snapshots).await;
//! println!("{} rules triggered", report.triggered);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Rule definitions and evaluation state sit behind one `RwLock`; CRUD calls
//! and the evaluation phase of a tick take it for writing, so a CRUD change
//! is either fully visible to a rule's evaluation or not at all. Ticks are
//! serialized by a separate mutex: a manual tick waits, a scheduled tick that
//! finds one running is skipped. Delivery runs outside both rule locks.
//!
//! A tick finishes within roughly `ceil(d / c) * RetryPolicy::worst_case()`
//! for `d` deliveries and a delivery capacity `c`.

pub mod agent;
pub mod condition;
pub mod config;
pub mod delivery;
pub mod error;
pub mod history;
pub mod metrics;
pub mod repository;
pub mod rule;
pub mod snapshot;
pub mod state;
pub mod webhook;

pub use crate::error::{AlertError, AlertResult, DeliveryError};
pub use crate::rule::{Action, AlertRule, TickerScope};

use crate::agent::{Activation, ChatChannel, WebhookClient};
use crate::config::AlertConfig;
use crate::delivery::{DeliveryManager, DeliveryOutcome, DispatchContext, RetryPolicy};
use crate::history::{AlertLog, HistoryStats, TriggerRecord};
use crate::metrics::EngineMetrics;
use crate::repository::{Repository, SledRepository, StoredRule};
use crate::rule::ActionKind;
use crate::snapshot::{Snapshot, SnapshotProvider};
use crate::state::{Evaluation, RuleEntry, RuleStore};
use crate::webhook::{WebhookConfig, WebhookStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Rule/ticker pairs evaluated against a snapshot.
    pub evaluated: usize,
    /// Rules that fired at least once; always `triggered_rule_ids.len()`.
    pub triggered: usize,
    /// Distinct ids, in trigger order.
    pub triggered_rule_ids: Vec<String>,
    /// Rule/ticker pairs that fired. Differs from `triggered` for wildcard rules.
    pub trigger_records: usize,
    pub suppressed_by_cooldown: usize,
    pub snapshots_missing: usize,
    pub deliveries: usize,
    pub failed_deliveries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedEntry {
    pub key: String,
    pub reason: String,
}

/// What `restore` found in the repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub rules_loaded: usize,
    pub webhooks_loaded: usize,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub total_webhooks: usize,
    pub enabled_webhooks: usize,
    pub is_monitoring: bool,
    #[serde(flatten)]
    pub history: HistoryStats,
}

struct Monitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A rule that triggered in the current tick, ready for delivery.
struct Fired {
    actions: Vec<Action>,
    ctx: DispatchContext,
}

pub struct AlertEngineBuilder {
    webhook_client: Arc<dyn WebhookClient>,
    chat: Option<Arc<dyn ChatChannel>>,
    policy: RetryPolicy,
    max_concurrent: usize,
    allow_inline_targets: bool,
    repository: Option<Arc<dyn Repository>>,
}

impl AlertEngineBuilder {
    pub fn chat_channel(mut self, chat: Arc<dyn ChatChannel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn allow_inline_targets(mut self, allow: bool) -> Self {
        self.allow_inline_targets = allow;
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Builds the engine and loads persisted trigger history. Rules and
    /// webhooks are loaded separately by `AlertEngine::restore`.
    pub async fn build(self) -> anyhow::Result<AlertEngine> {
        let log = match &self.repository {
            Some(repo) => AlertLog::open(Arc::clone(repo)).await?,
            None => AlertLog::new(),
        };

        let client_name = self.webhook_client.name().to_string();
        let mut delivery = DeliveryManager::new(self.webhook_client, self.max_concurrent)
            .with_retry_policy(self.policy)
            .with_inline_targets(self.allow_inline_targets);
        if let Some(chat) = self.chat {
            delivery = delivery.with_chat_channel(chat);
        }
        debug!(
            client = %client_name,
            capacity = delivery.capacity(),
            max_attempts = delivery.policy().max_attempts,
            "Delivery manager ready"
        );

        Ok(AlertEngine {
            rules: RwLock::new(RuleStore::new()),
            webhooks: RwLock::new(WebhookStore::new()),
            log: Arc::new(log),
            delivery,
            repository: self.repository,
            metrics: Arc::new(EngineMetrics::new()),
            tick_lock: Mutex::new(()),
            monitor: Mutex::new(None),
        })
    }
}

pub struct AlertEngine {
    rules: RwLock<RuleStore>,
    webhooks: RwLock<WebhookStore>,
    log: Arc<AlertLog>,
    delivery: DeliveryManager,
    repository: Option<Arc<dyn Repository>>,
    metrics: Arc<EngineMetrics>,
    tick_lock: Mutex<()>,
    monitor: Mutex<Option<Monitor>>,
}

impl AlertEngine {
    pub fn builder(webhook_client: Arc<dyn WebhookClient>) -> AlertEngineBuilder {
        AlertEngineBuilder {
            webhook_client,
            chat: None,
            policy: RetryPolicy::default(),
            max_concurrent: 10,
            allow_inline_targets: false,
            repository: None,
        }
    }

    /// Builds an engine from configuration: opens the sled store if one is
    /// configured, restores persisted definitions, then seeds the rules and
    /// webhooks from the config that are not already present.
    pub async fn from_config(
        config: &AlertConfig,
        webhook_client: Arc<dyn WebhookClient>,
        chat: Option<Arc<dyn ChatChannel>>,
    ) -> anyhow::Result<(Self, LoadReport)> {
        let mut builder = AlertEngine::builder(webhook_client)
            .retry_policy(config.delivery.retry_policy())
            .max_concurrent_deliveries(config.delivery.max_concurrent)
            .allow_inline_targets(config.delivery.allow_inline_targets);
        if let Some(chat) = chat {
            builder = builder.chat_channel(chat);
        }
        if let Some(path) = &config.engine.persistence_path {
            builder = builder.repository(Arc::new(SledRepository::open(path)?));
        }

        let engine = builder.build().await?;
        let report = engine.restore().await?;

        for webhook in &config.webhooks {
            match engine.add_webhook(webhook.clone()).await {
                Ok(_) | Err(AlertError::DuplicateTarget(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for rule in &config.rules {
            match engine.add_rule(rule.clone()).await {
                Ok(_) | Err(AlertError::DuplicateRuleId(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let rules = engine.rules.read().await.len();
        let webhooks = engine.webhooks.read().await.len();
        info!(
            rules,
            webhooks,
            rejected = report.rejected.len(),
            "Alert engine initialized"
        );
        Ok((engine, report))
    }

    /// Loads persisted webhooks and rules. Each entry is decoded and
    /// validated on its own; a bad entry is reported and skipped.
    pub async fn restore(&self) -> AlertResult<LoadReport> {
        let Some(repo) = &self.repository else {
            return Ok(LoadReport::default());
        };
        let mut report = LoadReport::default();

        {
            let mut webhooks = self.webhooks.write().await;
            for entry in repo.load_webhooks().await? {
                let decoded = entry.decode::<WebhookConfig>().and_then(|w| {
                    w.validate().map_err(|e| e.to_string())?;
                    Ok(w)
                });
                match decoded.and_then(|w| webhooks.insert(w).map_err(|e| e.to_string())) {
                    Ok(()) => report.webhooks_loaded += 1,
                    Err(reason) => reject(&mut report, entry.key, reason),
                }
            }
        }

        let mut stored = Vec::new();
        for entry in repo.load_rules().await? {
            let decoded = entry.decode::<StoredRule>().and_then(|s| {
                s.rule.validate().map_err(|e| e.to_string())?;
                Ok(s)
            });
            match decoded {
                Ok(s) => stored.push(s),
                Err(reason) => reject(&mut report, entry.key, reason),
            }
        }
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.rule.id.cmp(&b.rule.id)));

        let mut rules = self.rules.write().await;
        for s in stored {
            let key = s.rule.id.clone();
            match rules.insert(RuleEntry::new(s.rule, s.created_at)) {
                Ok(()) => report.rules_loaded += 1,
                Err(e) => reject(&mut report, key, e.to_string()),
            }
        }

        info!(
            rules = report.rules_loaded,
            webhooks = report.webhooks_loaded,
            rejected = report.rejected.len(),
            "Restored alert definitions"
        );
        Ok(report)
    }

    // Rules

    pub async fn add_rule(&self, mut rule: AlertRule) -> AlertResult<AlertRule> {
        rule.validate()?;
        rule.last_triggered_at = None;

        let mut rules = self.rules.write().await;
        if rules.contains(&rule.id) {
            return Err(AlertError::DuplicateRuleId(rule.id));
        }
        let entry = RuleEntry::new(rule, Utc::now());
        self.persist_rule(&entry.stored()).await?;
        let created = entry.rule.clone();
        rules.insert(entry)?;

        info!(rule_id = %created.id, ticker = %created.ticker, "Rule added");
        Ok(created)
    }

    pub async fn get_rule(&self, id: &str) -> AlertResult<AlertRule> {
        self.rules
            .read()
            .await
            .get(id)
            .map(|e| e.rule.clone())
            .ok_or_else(|| AlertError::RuleNotFound(id.to_string()))
    }

    /// Insertion order.
    pub async fn list_rules(&self) -> Vec<AlertRule> {
        self.rules.read().await.rules()
    }

    /// Replaces the whole definition. The trigger time and crossing history
    /// of fields the new definition still uses carry over.
    pub async fn update_rule(&self, id: &str, mut rule: AlertRule) -> AlertResult<AlertRule> {
        if rule.id != id {
            return Err(AlertError::validation(format!(
                "rule id '{}' in body does not match '{}'",
                rule.id, id
            )));
        }
        rule.validate()?;

        let mut rules = self.rules.write().await;
        let existing = rules
            .get(id)
            .ok_or_else(|| AlertError::RuleNotFound(id.to_string()))?;
        rule.last_triggered_at = existing.rule.last_triggered_at;
        let stored = StoredRule {
            rule,
            created_at: existing.created_at,
        };
        self.persist_rule(&stored).await?;
        let updated = rules.replace(stored.rule)?.rule.clone();

        info!(rule_id = %id, "Rule updated");
        Ok(updated)
    }

    pub async fn delete_rule(&self, id: &str) -> AlertResult<()> {
        let mut rules = self.rules.write().await;
        if !rules.contains(id) {
            return Err(AlertError::RuleNotFound(id.to_string()));
        }
        if let Some(repo) = &self.repository {
            repo.delete_rule(id).await?;
        }
        rules.remove(id)?;
        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> AlertResult<AlertRule> {
        let mut rules = self.rules.write().await;
        let entry = rules
            .get_mut(id)
            .ok_or_else(|| AlertError::RuleNotFound(id.to_string()))?;
        let mut stored = entry.stored();
        stored.rule.enabled = enabled;
        self.persist_rule(&stored).await?;
        entry.rule.enabled = enabled;

        info!(rule_id = %id, enabled, "Rule toggled");
        Ok(entry.rule.clone())
    }

    // Webhooks

    pub async fn add_webhook(&self, mut webhook: WebhookConfig) -> AlertResult<WebhookConfig> {
        webhook.validate()?;
        webhook.sent = 0;
        webhook.succeeded = 0;

        let mut webhooks = self.webhooks.write().await;
        if webhooks.contains(&webhook.url) {
            return Err(AlertError::DuplicateTarget(webhook.url));
        }
        self.persist_webhook(&webhook).await?;
        webhooks.insert(webhook.clone())?;
        info!(url = %webhook.url, "Webhook added");
        Ok(webhook)
    }

    pub async fn list_webhooks(&self) -> Vec<WebhookConfig> {
        self.webhooks.read().await.list()
    }

    pub async fn delete_webhook(&self, url: &str) -> AlertResult<()> {
        let mut webhooks = self.webhooks.write().await;
        if !webhooks.contains(url) {
            return Err(AlertError::TargetNotFound(url.to_string()));
        }
        if let Some(repo) = &self.repository {
            repo.delete_webhook(url).await?;
        }
        webhooks.remove(url)?;
        info!(url = %url, "Webhook deleted");
        Ok(())
    }

    pub async fn set_webhook_enabled(&self, url: &str, enabled: bool) -> AlertResult<WebhookConfig> {
        let mut webhooks = self.webhooks.write().await;
        let mut updated = webhooks
            .get(url)
            .cloned()
            .ok_or_else(|| AlertError::TargetNotFound(url.to_string()))?;
        updated.enabled = enabled;
        self.persist_webhook(&updated).await?;
        webhooks.set_enabled(url, enabled)
    }

    async fn persist_rule(&self, stored: &StoredRule) -> AlertResult<()> {
        if let Some(repo) = &self.repository {
            repo.save_rule(stored).await?;
        }
        Ok(())
    }

    async fn persist_webhook(&self, webhook: &WebhookConfig) -> AlertResult<()> {
        if let Some(repo) = &self.repository {
            repo.save_webhook(webhook).await?;
        }
        Ok(())
    }

    // Ticks

    /// Runs one evaluation pass now, waiting for any tick in progress.
    pub async fn process_once(&self, source: &dyn SnapshotProvider) -> TickReport {
        self.process_once_at(source, Utc::now()).await
    }

    /// Like `process_once` with an explicit clock reading.
    pub async fn process_once_at(&self, source: &dyn SnapshotProvider, now: DateTime<Utc>) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        self.run_tick(source, now).await
    }

    async fn scheduled_tick(&self, source: &dyn SnapshotProvider) {
        match self.tick_lock.try_lock() {
            Ok(_tick) => {
                let report = self.run_tick(source, Utc::now()).await;
                debug!(
                    evaluated = report.evaluated,
                    triggered = report.triggered,
                    failed_deliveries = report.failed_deliveries,
                    "Scheduled tick finished"
                );
            }
            Err(_) => {
                self.metrics.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                warn!("Previous tick still running, skipping scheduled tick");
            }
        }
    }

    async fn run_tick(&self, source: &dyn SnapshotProvider, now: DateTime<Utc>) -> TickReport {
        self.metrics.ticks_total.fetch_add(1, Ordering::Relaxed);
        let mut report = TickReport::default();

        let plan: Vec<(String, TickerScope)> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|e| e.rule.enabled)
            .map(|e| (e.rule.id.clone(), e.rule.ticker.clone()))
            .collect();
        if plan.is_empty() {
            return report;
        }

        let (snapshots, all_tickers) = self.fetch_snapshots(source, &plan).await;

        let mut fired = Vec::new();
        {
            let mut rules = self.rules.write().await;
            for (rule_id, scope) in &plan {
                // deleted or disabled since planning
                let Some(entry) = rules.get_mut(rule_id).filter(|e| e.rule.enabled) else {
                    continue;
                };
                let tickers: &[String] = match scope {
                    TickerScope::All => &all_tickers,
                    TickerScope::Symbol(symbol) => std::slice::from_ref(symbol),
                };
                for ticker in tickers {
                    let Some(snapshot) = snapshots.get(ticker).and_then(Option::as_ref) else {
                        report.snapshots_missing += 1;
                        self.metrics.snapshots_missing.fetch_add(1, Ordering::Relaxed);
                        debug!(rule_id = %rule_id, ticker = %ticker, "No snapshot, skipping rule");
                        continue;
                    };
                    report.evaluated += 1;
                    self.metrics.rules_evaluated.fetch_add(1, Ordering::Relaxed);

                    match entry.evaluate(ticker, snapshot, now) {
                        Evaluation::Triggered { field, value } => {
                            info!(
                                rule_id = %rule_id,
                                rule_name = %entry.rule.name,
                                ticker = %ticker,
                                field = %field,
                                value,
                                "Alert triggered"
                            );
                            fired.push(Fired {
                                actions: entry.rule.actions.clone(),
                                ctx: DispatchContext {
                                    activation: Activation {
                                        rule_id: rule_id.clone(),
                                        rule_name: entry.rule.name.clone(),
                                        ticker: ticker.clone(),
                                        field,
                                        value,
                                        triggered_at: now,
                                    },
                                    targets: HashMap::new(),
                                },
                            });
                        }
                        Evaluation::CoolingDown { remaining } => {
                            report.suppressed_by_cooldown += 1;
                            self.metrics.suppressed_by_cooldown.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                rule_id = %rule_id,
                                ticker = %ticker,
                                remaining_secs = remaining.num_seconds(),
                                "Rule in cooldown"
                            );
                        }
                        Evaluation::DataNotReady(field) => {
                            debug!(rule_id = %rule_id, ticker = %ticker, field = %field, "Field not available yet");
                        }
                        Evaluation::NoMatch => {}
                    }
                }
            }
        }

        if fired.is_empty() {
            return report;
        }

        {
            let webhooks = self.webhooks.read().await;
            for f in &mut fired {
                for action in &f.actions {
                    if let Action::Webhook { target, .. } = action {
                        if let Some(config) = webhooks.get(target) {
                            f.ctx.targets.insert(target.clone(), config.clone());
                        }
                    }
                }
            }
        }

        let outcomes = join_all(fired.iter().map(|f| self.delivery.dispatch(&f.actions, &f.ctx))).await;

        for (f, outcomes) in fired.into_iter().zip(outcomes) {
            let rule_id = f.ctx.activation.rule_id.clone();
            report.trigger_records += 1;
            if !report.triggered_rule_ids.contains(&rule_id) {
                report.triggered_rule_ids.push(rule_id.clone());
            }
            self.metrics.record_trigger(&rule_id);
            for outcome in &outcomes {
                report.deliveries += 1;
                if !outcome.is_success() {
                    report.failed_deliveries += 1;
                }
                self.metrics.record_delivery(outcome.is_success(), outcome.latency_ms);
            }

            self.update_webhook_counters(&outcomes).await;
            self.log.record(TriggerRecord::new(&f.ctx.activation, outcomes)).await;
        }

        report.triggered = report.triggered_rule_ids.len();
        self.persist_trigger_times(&report.triggered_rule_ids).await;
        report
    }

    /// Fetches each distinct ticker once. Provider errors count as a missing
    /// snapshot. Returns the snapshots and the wildcard ticker list.
    async fn fetch_snapshots(
        &self,
        source: &dyn SnapshotProvider,
        plan: &[(String, TickerScope)],
    ) -> (HashMap<String, Option<Snapshot>>, Vec<String>) {
        let mut wanted = BTreeSet::new();
        let mut all_tickers = Vec::new();
        if plan.iter().any(|(_, scope)| *scope == TickerScope::All) {
            match source.known_tickers().await {
                Ok(tickers) => all_tickers = tickers,
                Err(e) => warn!(error = %e, "Failed to list tickers for wildcard rules"),
            }
            wanted.extend(all_tickers.iter().cloned());
        }
        for (_, scope) in plan {
            if let TickerScope::Symbol(symbol) = scope {
                wanted.insert(symbol.clone());
            }
        }

        let mut snapshots = HashMap::with_capacity(wanted.len());
        for ticker in wanted {
            let snapshot = match source.latest_snapshot(&ticker).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Failed to read snapshot");
                    None
                }
            };
            snapshots.insert(ticker, snapshot);
        }
        (snapshots, all_tickers)
    }

    async fn update_webhook_counters(&self, outcomes: &[DeliveryOutcome]) {
        let mut updated = Vec::new();
        {
            let mut webhooks = self.webhooks.write().await;
            for outcome in outcomes {
                if outcome.action_type != ActionKind::Webhook || outcome.attempts == 0 {
                    continue;
                }
                if let Some(config) = webhooks.record_delivery(&outcome.target, outcome.is_success()) {
                    updated.push(config);
                }
            }
        }
        for config in updated {
            if let Err(e) = self.persist_webhook(&config).await {
                warn!(url = %config.url, error = %e, "Failed to persist webhook counters");
            }
        }
    }

    async fn persist_trigger_times(&self, rule_ids: &[String]) {
        if self.repository.is_none() {
            return;
        }
        let stored: Vec<StoredRule> = {
            let rules = self.rules.read().await;
            rule_ids.iter().filter_map(|id| rules.get(id)).map(RuleEntry::stored).collect()
        };
        for s in stored {
            if let Err(e) = self.persist_rule(&s).await {
                warn!(rule_id = %s.rule.id, error = %e, "Failed to persist trigger time");
            }
        }
    }

    // Monitoring

    /// Starts periodic ticks against `source`. Returns `Ok(false)` if
    /// monitoring is already running and a validation error for a zero
    /// interval. The task holds a clone of the engine until
    /// `stop_monitoring` is called.
    pub async fn start_monitoring(
        self: &Arc<Self>,
        source: Arc<dyn SnapshotProvider>,
        every: Duration,
    ) -> AlertResult<bool> {
        if every.is_zero() {
            return Err(AlertError::validation("monitoring interval must be greater than zero"));
        }
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            return Ok(false);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "Alert monitoring started");
            loop {
                tokio::select! {
                    _ = interval.tick() => engine.scheduled_tick(source.as_ref()).await,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Alert monitoring stopped");
        });

        *monitor = Some(Monitor { shutdown, handle });
        Ok(true)
    }

    /// Signals the monitoring task and waits for it; a tick in progress
    /// completes first. Returns `false` if monitoring was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let Some(monitor) = self.monitor.lock().await.take() else {
            return false;
        };
        let _ = monitor.shutdown.send(true);
        if let Err(e) = monitor.handle.await {
            warn!(error = %e, "Monitoring task ended abnormally");
        }
        true
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    // Queries

    pub async fn stats(&self) -> EngineStats {
        let (total_rules, enabled_rules) = {
            let rules = self.rules.read().await;
            (rules.len(), rules.enabled_count())
        };
        let (total_webhooks, enabled_webhooks) = {
            let webhooks = self.webhooks.read().await;
            (webhooks.len(), webhooks.enabled_count())
        };
        EngineStats {
            total_rules,
            enabled_rules,
            total_webhooks,
            enabled_webhooks,
            is_monitoring: self.is_monitoring().await,
            history: self.log.stats(Utc::now()).await,
        }
    }

    /// Trigger records from the last `days`, most recent first.
    pub async fn history(&self, rule_id: Option<&str>, days: u32) -> Vec<TriggerRecord> {
        self.log.history(rule_id, days, Utc::now()).await
    }

    pub async fn prune_history(&self, days: u32) -> AlertResult<usize> {
        Ok(self.log.prune(days, Utc::now()).await?)
    }

    /// Background sweep dropping history older than `days`.
    pub fn start_retention_task(&self, days: u32, every: Duration) -> JoinHandle<()> {
        self.log.start_retention_task(days, every)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }
}

fn reject(report: &mut LoadReport, key: String, reason: String) {
    warn!(key = %key, reason = %reason, "Skipping persisted entry");
    report.rejected.push(RejectedEntry { key, reason });
}
