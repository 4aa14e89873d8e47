mod common;

use chrono::Utc;
use common::{RecordingChat, Reply, ScriptedWebhooks, HOOK};
use sentix_alert_core::agent::Activation;
use sentix_alert_core::condition::Field;
use sentix_alert_core::delivery::{DeliveryManager, DeliveryStatus, DispatchContext, RetryPolicy};
use sentix_alert_core::error::FailureKind;
use sentix_alert_core::rule::ActionKind;
use sentix_alert_core::webhook::WebhookConfig;
use sentix_alert_core::{Action, DeliveryError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

fn activation() -> Activation {
    Activation {
        rule_id: "petr4_long".to_string(),
        rule_name: "PETR4 Long".to_string(),
        ticker: "PETR4.SA".to_string(),
        field: Field::Mean,
        value: 0.7,
        triggered_at: Utc::now(),
    }
}

fn context_with(urls: &[&str]) -> DispatchContext {
    DispatchContext {
        activation: activation(),
        targets: urls
            .iter()
            .map(|url| (url.to_string(), WebhookConfig::new(*url)))
            .collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let client = ScriptedWebhooks::new();
    client.script(
        HOOK,
        vec![
            Reply::Fail(DeliveryError::Status(503)),
            Reply::Fail(DeliveryError::Status(503)),
            Reply::Fail(DeliveryError::Status(503)),
            Reply::Ok,
        ],
    );
    let manager = DeliveryManager::new(client.clone(), 10);

    let started = Instant::now();
    let outcomes = manager.dispatch(&[Action::webhook(HOOK)], &context_with(&[HOOK])).await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.error_kind, Some(FailureKind::HttpStatus));
    assert_eq!(client.calls_to(HOOK), 3);
    // 1s then 2s of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_success_on_second_attempt() {
    let client = ScriptedWebhooks::new();
    client.script(HOOK, vec![Reply::Fail(DeliveryError::Connection("reset".into())), Reply::Ok]);
    let manager = DeliveryManager::new(client.clone(), 10);

    let outcomes = manager.dispatch(&[Action::webhook(HOOK)], &context_with(&[HOOK])).await;

    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].attempts, 2);
    assert_eq!(outcomes[0].error_kind, None);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() {
    let client = ScriptedWebhooks::new();
    client.script(HOOK, vec![Reply::Fail(DeliveryError::Status(404))]);
    let manager = DeliveryManager::new(client.clone(), 10);

    let outcomes = manager.dispatch(&[Action::webhook(HOOK)], &context_with(&[HOOK])).await;

    assert_eq!(outcomes[0].attempts, 1);
    assert_eq!(client.calls_to(HOOK), 1);
    assert!(outcomes[0].error.as_deref().unwrap_or_default().contains("404"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_target_times_out_each_attempt() {
    let client = ScriptedWebhooks::new();
    client.script(HOOK, vec![Reply::Hang, Reply::Hang]);
    let policy = RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    };
    let manager = DeliveryManager::new(client.clone(), 10).with_retry_policy(policy);

    let started = Instant::now();
    let outcomes = manager.dispatch(&[Action::webhook(HOOK)], &context_with(&[HOOK])).await;

    assert_eq!(outcomes[0].attempts, 2);
    assert_eq!(outcomes[0].error_kind, Some(FailureKind::Timeout));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(11));
    assert!(elapsed <= manager.policy().worst_case());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_deliveries_never_exceed_capacity() {
    let client = ScriptedWebhooks::with_latency(Duration::from_millis(100));
    let urls: Vec<String> = (0..50).map(|i| format!("https://hook{i}.example.com/")).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let actions: Vec<Action> = urls.iter().map(|u| Action::webhook(u.as_str())).collect();
    let manager = DeliveryManager::new(client.clone(), 10);

    let started = Instant::now();
    let outcomes = manager.dispatch(&actions, &context_with(&url_refs)).await;

    assert_eq!(outcomes.len(), 50);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(client.peak_in_flight(), manager.capacity());
    // five waves of ten
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(
        outcomes.iter().map(|o| o.target.as_str()).collect::<Vec<_>>(),
        url_refs
    );
}

#[tokio::test(start_paused = true)]
async fn test_webhook_payload_shape() {
    let client = ScriptedWebhooks::new();
    let manager = DeliveryManager::new(client.clone(), 10);
    let action = Action::Webhook {
        target: HOOK.to_string(),
        signal_type: Some("long_signal".to_string()),
        message: Some("{{rule_name}}: {{ticker}} at {{value}}".to_string()),
    };
    let ctx = DispatchContext {
        activation: activation(),
        targets: HashMap::from([(
            HOOK.to_string(),
            WebhookConfig::new(HOOK).with_header("Authorization", "Bearer abc"),
        )]),
    };

    manager.dispatch(&[action], &ctx).await;

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
    let payload = &calls[0].payload;
    assert_eq!(payload["type"], "trading_signal");
    assert_eq!(payload["signal"]["rule_id"], "petr4_long");
    assert_eq!(payload["signal"]["ticker"], "PETR4.SA");
    assert_eq!(payload["signal"]["signal_type"], "long");
    assert_eq!(payload["signal"]["message"], "PETR4 Long: PETR4.SA at 0.7");
}

#[tokio::test(start_paused = true)]
async fn test_default_messages() {
    let client = ScriptedWebhooks::new();
    let chat = RecordingChat::new();
    let manager = DeliveryManager::new(client.clone(), 10).with_chat_channel(chat.clone());

    manager
        .dispatch(&[Action::webhook(HOOK), Action::chat(None)], &context_with(&[HOOK]))
        .await;

    assert_eq!(client.calls()[0].payload["signal"]["message"], "Alert triggered for PETR4.SA");
    assert_eq!(client.calls()[0].payload["signal"]["signal_type"], "hold");
    assert_eq!(chat.messages(), vec!["🚨 Alert: PETR4 Long triggered for PETR4.SA".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_actions_fail_without_attempts() {
    let client = ScriptedWebhooks::new();
    let manager = DeliveryManager::new(client.clone(), 10);
    let disabled = "https://disabled.example.com/";
    let ctx = DispatchContext {
        activation: activation(),
        targets: HashMap::from([(disabled.to_string(), WebhookConfig::new(disabled).disabled())]),
    };
    let actions = [
        Action::webhook("https://unknown.example.com/"),
        Action::webhook(disabled),
        Action::chat(Some("hi".into())),
        Action::Log,
    ];

    let outcomes = manager.dispatch(&actions, &ctx).await;

    let kinds: Vec<_> = outcomes.iter().map(|o| o.error_kind).collect();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::TargetNotFound),
            Some(FailureKind::TargetDisabled),
            Some(FailureKind::ChannelNotConfigured),
            None,
        ]
    );
    assert_eq!(outcomes.iter().map(|o| o.attempts).collect::<Vec<_>>(), vec![0, 0, 0, 1]);
    assert_eq!(outcomes[3].action_type, ActionKind::Log);
    assert!(client.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inline_targets_when_allowed() {
    let client = ScriptedWebhooks::new();
    let manager = DeliveryManager::new(client.clone(), 10).with_inline_targets(true);
    let inline = "https://inline.example.com/hook";

    let outcomes = manager
        .dispatch(&[Action::webhook(inline), Action::webhook("not-a-url")], &context_with(&[]))
        .await;

    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[1].error_kind, Some(FailureKind::TargetNotFound));
    assert_eq!(client.calls()[0].headers.get("Content-Type").map(String::as_str), Some("application/json"));
}
