use crate::condition::{Condition, Field};
use crate::error::{AlertError, AlertResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Which tickers a rule watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TickerScope {
    /// Every ticker the snapshot provider knows about.
    All,
    Symbol(String),
}

impl TickerScope {
    pub const WILDCARD: &'static str = "*";
}

impl From<String> for TickerScope {
    fn from(value: String) -> Self {
        match value.trim() {
            "*" | "ALL" | "all" => TickerScope::All,
            _ => TickerScope::Symbol(value),
        }
    }
}

impl From<&str> for TickerScope {
    fn from(value: &str) -> Self {
        TickerScope::from(value.to_string())
    }
}

impl From<TickerScope> for String {
    fn from(scope: TickerScope) -> Self {
        match scope {
            TickerScope::All => TickerScope::WILDCARD.to_string(),
            TickerScope::Symbol(s) => s,
        }
    }
}

impl fmt::Display for TickerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickerScope::All => f.write_str(TickerScope::WILDCARD),
            TickerScope::Symbol(s) => f.write_str(s),
        }
    }
}

/// What to do when a rule triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Webhook {
        /// Key of a registered webhook (its URL).
        #[serde(alias = "url")]
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal_type: Option<String>,
        /// Handlebars template for the signal message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(alias = "telegram")]
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Webhook,
    Chat,
    Log,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Webhook => "webhook",
            ActionKind::Chat => "chat",
            ActionKind::Log => "log",
        })
    }
}

impl Action {
    pub fn webhook(target: impl Into<String>) -> Self {
        Action::Webhook {
            target: target.into(),
            signal_type: None,
            message: None,
        }
    }

    pub fn chat(message: Option<String>) -> Self {
        Action::Chat { message }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Webhook { .. } => ActionKind::Webhook,
            Action::Chat { .. } => ActionKind::Chat,
            Action::Log => ActionKind::Log,
        }
    }

    fn validate(&self) -> AlertResult<()> {
        if let Action::Webhook { target, .. } = self {
            if target.trim().is_empty() {
                return Err(AlertError::validation("webhook action has an empty target"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(alias = "rule_id")]
    pub id: String,
    pub name: String,
    pub ticker: TickerScope,
    /// Combined with AND.
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    /// Owned by the engine; ignored on create and update.
    #[serde(default, alias = "last_triggered", deserialize_with = "lenient_timestamp")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// RFC 3339, or an ISO timestamp without offset read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .map_err(serde::de::Error::custom)
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_minutes() -> u64 {
    30
}

impl AlertRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ticker: impl Into<TickerScope>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ticker: ticker.into(),
            conditions: Vec::new(),
            actions: Vec::new(),
            enabled: default_enabled(),
            cooldown_minutes: default_cooldown_minutes(),
            last_triggered_at: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes.min(i64::MAX as u64 / 60_000) as i64)
    }

    /// Fields referenced by any condition, deduplicated.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self.conditions.iter().map(|c| c.field).collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn validate(&self) -> AlertResult<()> {
        if self.id.trim().is_empty() {
            return Err(AlertError::validation("rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(AlertError::validation(format!("rule '{}' has an empty name", self.id)));
        }
        if let TickerScope::Symbol(symbol) = &self.ticker {
            if symbol.trim().is_empty() {
                return Err(AlertError::validation(format!("rule '{}' has an empty ticker", self.id)));
            }
        }
        if self.conditions.is_empty() {
            return Err(AlertError::validation(format!("rule '{}' has no conditions", self.id)));
        }
        if self.actions.is_empty() {
            return Err(AlertError::validation(format!("rule '{}' has no actions", self.id)));
        }
        for condition in &self.conditions {
            condition.validate().map_err(|e| self.scoped(e))?;
        }
        for action in &self.actions {
            action.validate().map_err(|e| self.scoped(e))?;
        }
        Ok(())
    }

    fn scoped(&self, err: AlertError) -> AlertError {
        match err {
            AlertError::Validation(msg) => {
                AlertError::Validation(format!("rule '{}': {}", self.id, msg))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Operator, Threshold};

    fn valid_rule() -> AlertRule {
        AlertRule::new("petr4_bearish", "PETR4 Bearish", "PETR4.SA")
            .with_condition(Condition::new(Field::TimeDecayedMean, Operator::LessThan, -0.3))
            .with_action(Action::webhook("https://hft.example.com/webhook"))
    }

    #[test]
    fn test_valid_rule_passes() {
        let rule = valid_rule();
        assert!(rule.validate().is_ok());
        assert!(rule.enabled);
        assert_eq!(rule.cooldown(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_rule_needs_conditions_and_actions() {
        let mut rule = valid_rule();
        rule.conditions.clear();
        assert!(matches!(rule.validate(), Err(AlertError::Validation(_))));

        let mut rule = valid_rule();
        rule.actions.clear();
        assert!(matches!(rule.validate(), Err(AlertError::Validation(_))));
    }

    #[test]
    fn test_rule_rejects_bad_condition_and_empty_target() {
        let rule = valid_rule().with_condition(Condition {
            field: Field::Mean,
            operator: Operator::Between,
            value: Threshold::Scalar(0.5),
        });
        let err = rule.validate().unwrap_err().to_string();
        assert!(err.contains("petr4_bearish"));

        let rule = valid_rule().with_action(Action::webhook("  "));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_wildcard_ticker_round_trips_as_star() {
        let rule = AlertRule::new("any", "Any ticker", "*")
            .with_condition(Condition::new(Field::Mean, Operator::Outside, (-0.8, 0.8)))
            .with_action(Action::Log);
        assert_eq!(rule.ticker, TickerScope::All);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["ticker"], "*");
    }

    #[test]
    fn test_trigger_time_keeps_its_offset() {
        let mut rule = valid_rule();
        rule.last_triggered_at = Some(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap());
        let json = serde_json::to_string(&rule).unwrap();
        let back: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_triggered_at, rule.last_triggered_at);

        let shifted = json.replace("2026-10-18T09:00:00Z", "2026-10-18T06:00:00-03:00");
        let back: AlertRule = serde_json::from_str(&shifted).unwrap();
        assert_eq!(back.last_triggered_at, rule.last_triggered_at);
    }

    #[test]
    fn test_rule_deserializes_legacy_layout() {
        let json = r#"{
            "rule_id": "ipca_volatility_alert",
            "name": "IPCA High Sentiment + High Volatility",
            "ticker": "IPCA",
            "conditions": [
                {"field": "mean_sent", "operator": ">", "value": 0.7},
                {"field": "volatility", "operator": ">", "value": 0.8}
            ],
            "actions": [
                {"type": "webhook", "url": "https://hft.example.com/webhook",
                 "signal_type": "long_signal", "message": "IPCA bullish"},
                {"type": "telegram", "message": "IPCA alert"},
                {"type": "log"}
            ],
            "cooldown_minutes": 15,
            "last_triggered": "2026-10-17T21:15:03.250000"
        }"#;
        let rule: AlertRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, "ipca_volatility_alert");
        assert!(rule.enabled);
        assert_eq!(rule.cooldown_minutes, 15);
        assert_eq!(
            rule.last_triggered_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 17, 21, 15, 3).unwrap() + chrono::Duration::milliseconds(250))
        );
        assert_eq!(rule.fields(), vec![Field::Mean, Field::Volatility]);
        assert_eq!(
            rule.actions.iter().map(Action::kind).collect::<Vec<_>>(),
            vec![ActionKind::Webhook, ActionKind::Chat, ActionKind::Log]
        );
        assert!(rule.validate().is_ok());
    }
}
