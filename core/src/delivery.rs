//! Concurrent, bounded, retrying execution of a triggered rule's actions.
//!
//! Every attempt of every action, across all rules triggered in a tick,
//! draws from one semaphore sized by the configured in-flight limit. A
//! request for a permit waits rather than being dropped. Each attempt is
//! bounded by `RetryPolicy::attempt_timeout`, so one action occupies the
//! pipeline for at most `RetryPolicy::worst_case()`, and a tick with `n`
//! deliveries and capacity `c` finishes within `ceil(n / c)` of that.

use crate::agent::{Activation, ChatChannel, WebhookClient};
use crate::error::{DeliveryError, FailureKind};
use crate::rule::{Action, ActionKind};
use crate::webhook::{is_http_url, WebhookConfig};
use chrono::SecondsFormat;
use futures::future::join_all;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

pub const SIGNAL_PAYLOAD_TYPE: &str = "trading_signal";
pub const DEFAULT_SIGNAL_TYPE: &str = "hold";

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed 1-based `attempt`: 1s, 2s, 4s, ... with the
    /// defaults, capped at `max_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    /// Upper bound on the wall-clock time one action can take.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let backoffs: Duration = (1..attempts).map(|a| self.backoff_after(a)).sum();
        self.attempt_timeout * attempts + backoffs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Result of attempting one action for one trigger. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub action_type: ActionKind,
    pub target: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn new(
        action_type: ActionKind,
        target: String,
        result: Result<(), DeliveryError>,
        attempts: u32,
        latency: Duration,
    ) -> Self {
        let (status, error_kind, error) = match result {
            Ok(()) => (DeliveryStatus::Success, None, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.kind()), Some(e.to_string())),
        };
        Self {
            action_type,
            target,
            status,
            attempts,
            latency_ms: latency.as_millis().min(u64::MAX as u128) as u64,
            error_kind,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// Per-trigger input to `DeliveryManager::dispatch`: the activation plus a
/// read-only copy of the webhook definitions its actions reference.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub activation: Activation,
    pub targets: HashMap<String, WebhookConfig>,
}

pub struct DeliveryManager {
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    capacity: usize,
    webhooks: Arc<dyn WebhookClient>,
    chat: Option<Arc<dyn ChatChannel>>,
    allow_inline_targets: bool,
    templates: Handlebars<'static>,
}

impl DeliveryManager {
    pub fn new(webhooks: Arc<dyn WebhookClient>, max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        let mut templates = Handlebars::new();
        templates.register_escape_fn(handlebars::no_escape);
        Self {
            policy: RetryPolicy::default(),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            webhooks,
            chat: None,
            allow_inline_targets: false,
            templates,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_chat_channel(mut self, chat: Arc<dyn ChatChannel>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Accept webhook targets that are plain URLs with no registered config.
    pub fn with_inline_targets(mut self, allow: bool) -> Self {
        self.allow_inline_targets = allow;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts every action independently and returns one outcome per
    /// action, in action order. Delivery failures never escape as errors.
    pub async fn dispatch(&self, actions: &[Action], ctx: &DispatchContext) -> Vec<DeliveryOutcome> {
        join_all(actions.iter().map(|action| self.deliver(action, ctx))).await
    }

    async fn deliver(&self, action: &Action, ctx: &DispatchContext) -> DeliveryOutcome {
        let started = Instant::now();
        let activation = &ctx.activation;

        let (target, result, attempts) = match action {
            Action::Log => {
                info!(
                    rule_id = %activation.rule_id,
                    rule_name = %activation.rule_name,
                    ticker = %activation.ticker,
                    field = %activation.field,
                    value = activation.value,
                    "Alert recorded"
                );
                ("log".to_string(), Ok(()), 1)
            }
            Action::Webhook {
                target,
                signal_type,
                message,
            } => match self.resolve_webhook(target, &ctx.targets) {
                Err(e) => (target.clone(), Err(e), 0),
                Ok(config) => {
                    let text = self
                        .render_message(message.as_deref(), activation)
                        .unwrap_or_else(|| format!("Alert triggered for {}", activation.ticker));
                    let payload = signal_payload(activation, signal_type.as_deref(), &text);
                    let (result, attempts) = self
                        .with_retry(&activation.rule_id, self.webhooks.name(), target, || {
                            self.webhooks.post_json(&config.url, &config.headers, &payload)
                        })
                        .await;
                    (target.clone(), result, attempts)
                }
            },
            Action::Chat { message } => match &self.chat {
                None => ("chat".to_string(), Err(DeliveryError::ChannelNotConfigured), 0),
                Some(chat) => {
                    let text = self
                        .render_message(message.as_deref(), activation)
                        .unwrap_or_else(|| {
                            format!(
                                "🚨 Alert: {} triggered for {}",
                                activation.rule_name, activation.ticker
                            )
                        });
                    let (result, attempts) = self
                        .with_retry(&activation.rule_id, "chat", chat.channel(), || chat.send_text(&text))
                        .await;
                    (chat.channel().to_string(), result, attempts)
                }
            },
        };

        let outcome = DeliveryOutcome::new(action.kind(), target, result, attempts, started.elapsed());
        match &outcome.error {
            None => info!(
                rule_id = %activation.rule_id,
                action = %outcome.action_type,
                target = %outcome.target,
                attempts = outcome.attempts,
                latency_ms = outcome.latency_ms,
                "Delivery succeeded"
            ),
            Some(error) => warn!(
                rule_id = %activation.rule_id,
                action = %outcome.action_type,
                target = %outcome.target,
                attempts = outcome.attempts,
                error_kind = ?outcome.error_kind,
                error = %error,
                "Delivery failed"
            ),
        }
        outcome
    }

    fn resolve_webhook(
        &self,
        target: &str,
        registered: &HashMap<String, WebhookConfig>,
    ) -> Result<WebhookConfig, DeliveryError> {
        match registered.get(target) {
            Some(config) if config.enabled => Ok(config.clone()),
            Some(_) => Err(DeliveryError::TargetDisabled(target.to_string())),
            None if self.allow_inline_targets && is_http_url(target) => Ok(WebhookConfig::new(target)),
            None => Err(DeliveryError::TargetNotFound(target.to_string())),
        }
    }

    fn render_message(&self, template: Option<&str>, activation: &Activation) -> Option<String> {
        let template = template?;
        let context = serde_json::json!({
            "rule_id": activation.rule_id,
            "rule_name": activation.rule_name,
            "ticker": activation.ticker,
            "field": activation.field,
            "value": activation.value,
            "timestamp": activation.triggered_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        match self.templates.render_template(template, &context) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                warn!(rule_id = %activation.rule_id, error = %e, "Message template failed to render, sending it raw");
                Some(template.to_string())
            }
        }
    }

    async fn with_retry<F, Fut>(
        &self,
        rule_id: &str,
        transport: &str,
        target: &str,
        mut attempt_once: F,
    ) -> (Result<(), DeliveryError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = match self.permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            Err(DeliveryError::Connection("delivery pool closed".to_string())),
                            attempt - 1,
                        )
                    }
                };
                match timeout(self.policy.attempt_timeout, attempt_once()).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.policy.attempt_timeout)),
                }
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            rule_id = %rule_id,
                            transport = %transport,
                            target = %target,
                            attempt = attempt,
                            "Delivery succeeded after retry"
                        );
                    }
                    return (Ok(()), attempt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.backoff_after(attempt);
                    warn!(
                        rule_id = %rule_id,
                        transport = %transport,
                        target = %target,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery attempt failed, will retry"
                    );
                    sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Maps legacy labels onto the names external systems expect.
pub fn normalize_signal_type(label: Option<&str>) -> String {
    match label.map(str::trim) {
        None | Some("") => DEFAULT_SIGNAL_TYPE.to_string(),
        Some("long_signal") => "long".to_string(),
        Some("short_signal") => "short".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Builds the `trading_signal` webhook body.
pub fn signal_payload(activation: &Activation, signal_type: Option<&str>, message: &str) -> serde_json::Value {
    let timestamp = activation.triggered_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    serde_json::json!({
        "timestamp": timestamp,
        "type": SIGNAL_PAYLOAD_TYPE,
        "signal": {
            "rule_id": activation.rule_id,
            "rule_name": activation.rule_name,
            "ticker": activation.ticker,
            "signal_type": normalize_signal_type(signal_type),
            "message": message,
            "timestamp": timestamp,
        }
    })
}
