//! Notification fan-out: a hub of independent push providers.
//!
//! Providers are attempted in order; a failing provider never prevents the
//! rest from delivering. The dispatch result is the AND of provider
//! successes, which the alert engine records as `push_sent`.

use async_trait::async_trait;
use dipwatch_alerts::{AlertEvent, AlertPriority, Notifier};
use serde_json::json;

/// Errors from a push provider.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook error: {0}")]
    Webhook(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// One delivery channel.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError>;
    fn name(&self) -> &str;
}

/// Collapse key so later notifications for the same rule replace earlier
/// unread ones on the device.
pub fn collapse_key(event: &AlertEvent) -> String {
    format!("{}_{}", event.rule_id, event.symbol)
}

/// Logs the alert to the process log. Always succeeds; doubles as the
/// delivery channel of last resort.
pub struct ConsoleProvider;

#[async_trait]
impl PushProvider for ConsoleProvider {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        tracing::info!(
            symbol = %event.symbol,
            priority = event.priority.as_str(),
            chips = ?event.chips,
            "[ALERT PUSH] {}",
            event.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Builds the FCM-shaped push payload and posts it to a configured
/// endpoint. Without an endpoint the payload is logged instead, which
/// keeps the wire format exercised in development.
pub struct FcmPushProvider {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl FcmPushProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(event: &AlertEvent) -> serde_json::Value {
        let collapse = collapse_key(event);
        json!({
            "notification": {
                "title": format!("Potential window: {}", event.symbol),
                "body": event.message,
            },
            "data": {
                "symbol": event.symbol,
                "rule_id": event.rule_id,
                "chips": event.chips,
                "priority": event.priority.as_str(),
            },
            "android": {
                "priority": if event.priority == AlertPriority::High { "high" } else { "normal" },
                "collapse_key": collapse,
            },
            "apns": {
                "headers": {
                    "apns-collapse-id": collapse,
                }
            }
        })
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let payload = Self::build_payload(event);

        match &self.endpoint {
            Some(endpoint) => {
                let response = self
                    .client
                    .post(endpoint)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| NotifyError::Webhook(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(NotifyError::Webhook(format!(
                        "push endpoint returned {}",
                        response.status()
                    )));
                }
                Ok(())
            }
            None => {
                tracing::debug!("fcm payload (no endpoint configured): {payload}");
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "fcm"
    }
}

/// The notifier handed to the alert engine: every provider gets a chance,
/// errors are captured per provider.
pub struct NotificationHub {
    providers: Vec<Box<dyn PushProvider>>,
}

impl NotificationHub {
    pub fn new(providers: Vec<Box<dyn PushProvider>>) -> Self {
        if providers.is_empty() {
            tracing::info!("no notification providers configured");
        }
        Self { providers }
    }

    /// Console plus FCM, the default production set.
    pub fn standard(fcm_endpoint: Option<String>) -> Self {
        Self::new(vec![
            Box::new(ConsoleProvider),
            Box::new(FcmPushProvider::new(fcm_endpoint)),
        ])
    }
}

#[async_trait]
impl Notifier for NotificationHub {
    async fn dispatch(&self, event: &AlertEvent) -> bool {
        let mut success = true;
        for provider in &self.providers {
            match provider.send(event).await {
                Ok(()) => tracing::debug!("delivered via {}", provider.name()),
                Err(e) => {
                    tracing::warn!("provider {} failed: {e}", provider.name());
                    success = false;
                }
            }
        }
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(priority: AlertPriority) -> AlertEvent {
        AlertEvent {
            id: "e1".to_string(),
            rule_id: "r1".to_string(),
            symbol: "LARGE".to_string(),
            fired_at: chrono::Utc::now(),
            priority,
            value: 6.0,
            threshold: 5.0,
            message: "Dip reached 6.0% (Threshold: 5%)".to_string(),
            chips: vec!["dip_gt 6.00".to_string()],
            payload: json!({"value": 6.0}),
            push_sent: false,
            digest_batch_id: None,
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl PushProvider for FailingProvider {
        async fn send(&self, _event: &AlertEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Webhook("boom".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct CountingProvider(Arc<AtomicUsize>);

    #[async_trait]
    impl PushProvider for CountingProvider {
        async fn send(&self, _event: &AlertEvent) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn collapse_key_is_rule_and_symbol() {
        assert_eq!(collapse_key(&event(AlertPriority::High)), "r1_LARGE");
    }

    #[test]
    fn fcm_payload_maps_priority_and_collapse_key() {
        let payload = FcmPushProvider::build_payload(&event(AlertPriority::High));
        assert_eq!(payload["android"]["priority"], "high");
        assert_eq!(payload["android"]["collapse_key"], "r1_LARGE");
        assert_eq!(payload["apns"]["headers"]["apns-collapse-id"], "r1_LARGE");

        let payload = FcmPushProvider::build_payload(&event(AlertPriority::Medium));
        assert_eq!(payload["android"]["priority"], "normal");
    }

    #[tokio::test]
    async fn failing_provider_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let hub = NotificationHub::new(vec![
            Box::new(FailingProvider),
            Box::new(CountingProvider(count.clone())),
        ]);

        let success = hub.dispatch(&event(AlertPriority::High)).await;

        assert!(!success); // AND of provider results
        assert_eq!(count.load(Ordering::SeqCst), 1); // second provider still ran
    }

    #[tokio::test]
    async fn all_providers_succeeding_yields_true() {
        let count = Arc::new(AtomicUsize::new(0));
        let hub = NotificationHub::new(vec![
            Box::new(ConsoleProvider),
            Box::new(CountingProvider(count.clone())),
        ]);

        assert!(hub.dispatch(&event(AlertPriority::Low)).await);
    }

    #[tokio::test]
    async fn fcm_without_endpoint_logs_and_succeeds() {
        let provider = FcmPushProvider::new(None);
        assert!(provider.send(&event(AlertPriority::High)).await.is_ok());
    }
}
