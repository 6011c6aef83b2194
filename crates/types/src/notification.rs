//! Notification contract emitted at the orchestrator boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::WorkflowExecutionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Starting,
    Progress,
    Success,
    Failure,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Starting => "starting",
            NotificationType::Progress => "progress",
            NotificationType::Success => "success",
            NotificationType::Failure => "failure",
        }
    }
}

/// A progress, success, or failure event for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub run_id: String,
    pub resource_name: String,
    pub resource_type: String,
    pub user: String,
    pub stage: String,
    pub notification_type: NotificationType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Full state, attached to terminal events for diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<WorkflowExecutionState>,
}

impl NotificationEvent {
    /// Builds an event for `state`, stamping it with the current time.
    pub fn for_state(
        state: &WorkflowExecutionState,
        stage: impl Into<String>,
        notification_type: NotificationType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id: state.run_id.clone(),
            resource_name: state.resource_name.clone(),
            resource_type: state
                .resource_type
                .map(|resource_type| resource_type.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            user: state.requesting_user.clone(),
            stage: stage.into(),
            notification_type,
            message: message.into(),
            timestamp: Utc::now(),
            execution_state: None,
        }
    }

    /// Attaches a snapshot of the execution state.
    pub fn with_state(mut self, state: &WorkflowExecutionState) -> Self {
        self.execution_state = Some(state.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ResourceType;

    #[test]
    fn serializes_notification_contract_fields() {
        let mut state = WorkflowExecutionState::new("run-42", "order-api", "alice");
        state.resource_type = Some(ResourceType::Microservice);

        let event = NotificationEvent::for_state(&state, "vcluster", NotificationType::Progress, "vcluster ready");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["runId"], "run-42");
        assert_eq!(value["resourceType"], "microservice");
        assert_eq!(value["notificationType"], "progress");
        assert!(value.get("executionState").is_none());
    }
}
