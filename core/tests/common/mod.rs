#![allow(dead_code)]

use async_trait::async_trait;
use sentix_alert_core::agent::{ChatChannel, WebhookClient};
use sentix_alert_core::condition::{Condition, Field, Operator};
use sentix_alert_core::snapshot::Snapshot;
use sentix_alert_core::{Action, AlertRule, DeliveryError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HOOK: &str = "https://hft.example.com/webhook";

#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(DeliveryError),
    /// Never answers; only a timeout ends the attempt.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub payload: serde_json::Value,
}

/// Webhook double that replays scripted replies per url (default `Ok`) and
/// tracks how many calls are in flight at once.
#[derive(Default)]
pub struct ScriptedWebhooks {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWebhooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.url == url).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookClient for ScriptedWebhooks {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            headers: headers.clone(),
            payload: payload.clone(),
        });

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Ok);

        let _guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match reply {
            Reply::Ok => Ok(()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending::<Result<(), DeliveryError>>().await,
        }
    }
}

/// Decrements the in-flight gauge even when the future is dropped by a
/// timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingChat {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatChannel for RecordingChat {
    fn channel(&self) -> &str {
        "-100200"
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub fn mean(value: f64) -> Snapshot {
    Snapshot::default().with(Field::Mean, value)
}

pub fn mean_above(id: &str, ticker: &str, threshold: f64) -> AlertRule {
    AlertRule::new(id, id.to_uppercase(), ticker)
        .with_condition(Condition::new(Field::Mean, Operator::GreaterThan, threshold))
        .with_action(Action::webhook(HOOK))
}
