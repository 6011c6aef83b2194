//! Notification delivery.
//!
//! The orchestrator emits [`NotificationEvent`]s only at run boundaries
//! (start, per-stage progress, success, failure). Delivery is fire-and-forget:
//! sink failures are logged by the caller and never change a run's outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use claimchain_types::{NotificationEvent, NotificationType};
use claimchain_util::{SUMMARY_LIMIT, redact_sensitive, truncate_for_summary};
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification endpoint returned HTTP {status}")]
    Status { status: u16 },
}

/// Receives run events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let message = redact_sensitive(&event.message);
        match event.notification_type {
            NotificationType::Failure => error!(
                run_id = %event.run_id,
                resource = %event.resource_name,
                stage = %event.stage,
                "{}",
                message
            ),
            _ => info!(
                run_id = %event.run_id,
                resource = %event.resource_name,
                stage = %event.stage,
                kind = event.notification_type.as_str(),
                "{}",
                message
            ),
        }
        Ok(())
    }
}

/// Posts events to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackSink {
    http: Client,
    webhook_url: String,
    channel: Option<String>,
}

impl SlackSink {
    pub fn new(webhook_url: impl Into<String>, channel: Option<String>) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
            channel,
        })
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut payload = json!({ "text": render_text(event) });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| NotifyError::Delivery(redact_sensitive(&error.to_string())))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Delivers every event to each inner sink, reporting the first failure.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(error) = sink.notify(event).await {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, notification_type: NotificationType) -> usize {
        self.events()
            .iter()
            .filter(|event| event.notification_type == notification_type)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

fn render_text(event: &NotificationEvent) -> String {
    let icon = match event.notification_type {
        NotificationType::Starting => ":rocket:",
        NotificationType::Progress => ":hourglass_flowing_sand:",
        NotificationType::Success => ":white_check_mark:",
        NotificationType::Failure => ":x:",
    };
    let mut text = format!(
        "{} *{}* `{}/{}` ({}) by {}: {}",
        icon,
        event.resource_type,
        event.stage,
        event.resource_name,
        event.run_id,
        event.user,
        event.message
    );
    if let Some(state) = &event.execution_state
        && let Some(endpoints) = &state.endpoints
    {
        if let Some(url) = &endpoints.service_url {
            text.push_str(&format!("\nService: {}", url));
        }
        if let Some(url) = &endpoints.repository_url {
            text.push_str(&format!("\nRepository: {}", url));
        }
    }
    truncate_for_summary(&redact_sensitive(&text), SUMMARY_LIMIT)
}

#[cfg(test)]
mod tests {
    use claimchain_types::WorkflowExecutionState;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event(notification_type: NotificationType, message: &str) -> NotificationEvent {
        let state = WorkflowExecutionState::new("run-7", "order-api", "alice");
        NotificationEvent::for_state(&state, "vcluster", notification_type, message)
    }

    #[tokio::test]
    async fn slack_sink_posts_text_and_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/hook"))
            .and(body_partial_json(json!({"channel": "#platform"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = SlackSink::new(format!("{}/services/hook", server.uri()), Some("#platform".into())).unwrap();
        sink.notify(&event(NotificationType::Progress, "vcluster ready")).await.unwrap();
    }

    #[tokio::test]
    async fn slack_sink_reports_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sink = SlackSink::new(server.uri(), None).unwrap();
        let error = sink.notify(&event(NotificationType::Failure, "boom")).await.unwrap_err();
        assert!(matches!(error, NotifyError::Status { status: 404 }));
    }

    #[tokio::test]
    async fn fanout_reaches_every_sink_even_after_a_failure() {
        struct Failing;

        #[async_trait]
        impl NotificationSink for Failing {
            async fn notify(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
                Err(NotifyError::Delivery("offline".into()))
            }
        }

        let recorder = RecordingSink::new();
        let fanout = FanoutSink::new(vec![Arc::new(Failing), Arc::new(recorder.clone())]);
        let result = fanout.notify(&event(NotificationType::Starting, "starting")).await;

        assert!(result.is_err());
        assert_eq!(recorder.count(NotificationType::Starting), 1);
    }

    #[test]
    fn rendered_text_redacts_secrets() {
        let text = render_text(&event(NotificationType::Failure, "request failed: Authorization: Bearer abc"));
        assert!(text.contains("[REDACTED]"));
        assert!(!text.contains("abc"));
        assert!(text.starts_with(":x: *unknown* `vcluster/order-api`"));
    }
}
