use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Structural errors returned synchronously to CRUD callers.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("rule '{0}' already exists")]
    DuplicateRuleId(String),
    #[error("delivery target '{0}' already exists")]
    DuplicateTarget(String),
    #[error("rule '{0}' not found")]
    RuleNotFound(String),
    #[error("delivery target '{0}' not found")]
    TargetNotFound(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl AlertError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AlertError::Validation(msg.into())
    }
}

pub type AlertResult<T> = std::result::Result<T, AlertError>;

/// Failure of a single delivery attempt. Recovered inside the delivery
/// manager and only ever surfaced as a `DeliveryOutcome`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("target responded with HTTP {0}")]
    Status(u16),
    #[error("delivery target '{0}' not found")]
    TargetNotFound(String),
    #[error("delivery target '{0}' is disabled")]
    TargetDisabled(String),
    #[error("no chat channel configured")]
    ChannelNotConfigured,
    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Classification of the last error seen for a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connection,
    HttpStatus,
    TargetNotFound,
    TargetDisabled,
    ChannelNotConfigured,
    Payload,
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::Timeout(_) => FailureKind::Timeout,
            DeliveryError::Connection(_) => FailureKind::Connection,
            DeliveryError::Status(_) => FailureKind::HttpStatus,
            DeliveryError::TargetNotFound(_) => FailureKind::TargetNotFound,
            DeliveryError::TargetDisabled(_) => FailureKind::TargetDisabled,
            DeliveryError::ChannelNotConfigured => FailureKind::ChannelNotConfigured,
            DeliveryError::Payload(_) => FailureKind::Payload,
        }
    }

    /// Timeouts, connection errors, 5xx and 429 are worth another attempt.
    /// Any other 4xx means the request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Timeout(_) | DeliveryError::Connection(_) => true,
            DeliveryError::Status(code) => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(DeliveryError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(DeliveryError::Connection("refused".into()).is_retryable());
        assert!(DeliveryError::Status(503).is_retryable());
        assert!(DeliveryError::Status(429).is_retryable());
        assert!(!DeliveryError::Status(404).is_retryable());
        assert!(!DeliveryError::TargetNotFound("x".into()).is_retryable());
        assert_eq!(DeliveryError::Status(500).kind(), FailureKind::HttpStatus);
    }
}
