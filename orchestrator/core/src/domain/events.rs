// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Bus event types and the topic naming convention.
//!
//! Every payload carried by the event bus is a closed, tagged variant of
//! [`BusEvent`]; subscribers dispatch by exhaustive matching rather than by
//! inspecting untyped maps. The topic names remain the wire contract:
//! `task-manager-<worker>` carries assignments from the task manager to a
//! worker, `<worker>-task-manager` carries reports back, and the fixed
//! topics (`task-update`, `agent-error`, `agent-action`, `agent-message`,
//! `position-update`) fan out to any listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::{TaskId, TaskStatus, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// Routed to the default worker for analysis of the raw instruction.
    Analyze,
    /// Routed to a specialist worker for execution.
    Execute,
}

/// Task manager -> worker, on `task-manager-<worker>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub worker: String,
    pub description: String,
    pub kind: AssignmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

/// Worker -> task manager, on `<worker>-task-manager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub task_id: TaskId,
    pub worker: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Intermediate reasoning text, persisted under `cot:<task id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Set together with [`TaskStatus::Routing`]: the worker that should
    /// own this task instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl WorkerReport {
    pub fn completed(task_id: TaskId, worker: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            task_id,
            worker: worker.into(),
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            tool_results: Vec::new(),
            reasoning: None,
            redirect_to: None,
            reported_at: Utc::now(),
        }
    }

    pub fn failed(task_id: TaskId, worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            worker: worker.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(reason.into()),
            tool_results: Vec::new(),
            reasoning: None,
            redirect_to: None,
            reported_at: Utc::now(),
        }
    }

    /// Decline domain ownership and redirect the task to `target`.
    pub fn redirect(task_id: TaskId, worker: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            task_id,
            worker: worker.into(),
            status: TaskStatus::Routing,
            result: None,
            error: None,
            tool_results: Vec::new(),
            reasoning: None,
            redirect_to: Some(target.into()),
            reported_at: Utc::now(),
        }
    }
}

/// Normalized task state change, on `task-update`, for any listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub source: String,
    pub destination: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Best-effort failure signal, on `agent-error`. Non-critical failures
/// surface here without interrupting the operation that hit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub agent: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub agent: String,
    pub chain: String,
    #[serde(default)]
    pub position: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Unified event type for the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    TaskAssigned(TaskAssignment),
    WorkerReport(WorkerReport),
    TaskUpdate(TaskUpdate),
    AgentError(AgentError),
    AgentAction(AgentAction),
    AgentMessage(AgentMessage),
    PositionUpdate(PositionUpdate),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::TaskAssigned(assignment) => Topic::assignments(&assignment.worker),
            BusEvent::WorkerReport(report) => Topic::reports(&report.worker),
            BusEvent::TaskUpdate(_) => Topic::TaskUpdate,
            BusEvent::AgentError(_) => Topic::AgentError,
            BusEvent::AgentAction(_) => Topic::AgentAction,
            BusEvent::AgentMessage(_) => Topic::AgentMessage,
            BusEvent::PositionUpdate(_) => Topic::PositionUpdate,
        }
    }
}

/// Named destination on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `task-manager-<worker>`
    Assignments(String),
    /// `<worker>-task-manager`
    Reports(String),
    /// `task-update`
    TaskUpdate,
    /// `agent-error`
    AgentError,
    /// `agent-action`
    AgentAction,
    /// `agent-message`
    AgentMessage,
    /// `position-update`
    PositionUpdate,
}

impl Topic {
    pub fn assignments(worker: &str) -> Self {
        Topic::Assignments(worker.to_string())
    }

    pub fn reports(worker: &str) -> Self {
        Topic::Reports(worker.to_string())
    }

    /// The on-the-wire topic name.
    pub fn wire_name(&self) -> String {
        match self {
            Topic::Assignments(worker) => format!("task-manager-{worker}"),
            Topic::Reports(worker) => format!("{worker}-task-manager"),
            Topic::TaskUpdate => "task-update".to_string(),
            Topic::AgentError => "agent-error".to_string(),
            Topic::AgentAction => "agent-action".to_string(),
            Topic::AgentMessage => "agent-message".to_string(),
            Topic::PositionUpdate => "position-update".to_string(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_naming_convention() {
        assert_eq!(
            Topic::assignments("observer").wire_name(),
            "task-manager-observer"
        );
        assert_eq!(Topic::reports("hedera").wire_name(), "hedera-task-manager");
        assert_eq!(Topic::TaskUpdate.wire_name(), "task-update");
        assert_eq!(Topic::AgentError.wire_name(), "agent-error");
    }

    #[test]
    fn events_map_to_their_topics() {
        let report = WorkerReport::completed(TaskId::new(), "observer", json!("done"));
        assert_eq!(
            BusEvent::WorkerReport(report).topic(),
            Topic::reports("observer")
        );

        let update = TaskUpdate {
            task_id: TaskId::new(),
            status: TaskStatus::Completed,
            source: "observer".to_string(),
            destination: "client".to_string(),
            timestamp: Utc::now(),
            result: None,
            error: None,
        };
        assert_eq!(BusEvent::TaskUpdate(update).topic(), Topic::TaskUpdate);
    }

    #[test]
    fn bus_event_is_tagged_on_the_wire() {
        let event = BusEvent::AgentError(AgentError::new("task-manager", "store unreachable"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "agent_error");
        assert_eq!(value["source"], "task-manager");
    }
}
