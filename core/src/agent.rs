//! Transport seams. Core only knows these traits; concrete HTTP and chat
//! transports live in the agents crate.

use crate::condition::Field;
use crate::error::DeliveryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything a transport needs to know about one trigger.
#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub rule_id: String,
    pub rule_name: String,
    pub ticker: String,
    pub field: Field,
    pub value: f64,
    pub triggered_at: DateTime<Utc>,
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    fn name(&self) -> &str;

    /// Posts a JSON payload once. Retries and timeouts are applied by the
    /// caller.
    async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Identifier of the configured destination (chat id, channel name).
    fn channel(&self) -> &str;

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError>;
}
