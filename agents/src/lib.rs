use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use sentix_alert_core::agent::{ChatChannel, WebhookClient};
use sentix_alert_core::DeliveryError;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// 200, 201 and 202 count as delivered; anything else is a failed attempt.
pub fn classify_status(status: u16) -> Result<(), DeliveryError> {
    match status {
        200 | 201 | 202 => Ok(()),
        other => Err(DeliveryError::Status(other)),
    }
}

fn classify_error(err: reqwest::Error, timeout: Duration) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout(timeout)
    } else if err.is_builder() {
        DeliveryError::Payload(err.to_string())
    } else {
        DeliveryError::Connection(err.to_string())
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .timeout(timeout)
        .build()
}

/// Posts JSON bodies with reqwest. One attempt per call.
pub struct HttpWebhookClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            timeout,
        })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(payload).map_err(|e| DeliveryError::Payload(e.to_string()))?;

        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !headers.keys().any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str())) {
            request = request.header(CONTENT_TYPE, "application/json");
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| classify_error(e, self.timeout))?;
        let status = response.status().as_u16();
        debug!(url = %url, status, "Webhook responded");
        classify_status(status)
    }
}

/// Sends chat messages through the Telegram Bot API.
pub struct TelegramChannel {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    parse_mode: String,
    api_base: String,
    timeout: Duration,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            token: token.into(),
            chat_id: chat_id.into(),
            parse_mode: "HTML".to_string(),
            api_base: TELEGRAM_API_BASE.to_string(),
            timeout,
        })
    }

    pub fn with_parse_mode(mut self, parse_mode: impl Into<String>) -> Self {
        self.parse_mode = parse_mode.into();
        self
    }

    /// Points the channel at another Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }

    pub fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": self.parse_mode,
        })
    }
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    fn channel(&self) -> &str {
        &self.chat_id
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&self.request_body(text))
            .send()
            .await
            // reqwest errors carry the url, which holds the bot token
            .map_err(|e| classify_error(e.without_url(), self.timeout))?;
        let status = response.status().as_u16();
        debug!(chat_id = %self.chat_id, status, "Telegram responded");
        classify_status(status)
    }
}
