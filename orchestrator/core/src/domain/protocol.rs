// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Envelope types for the cross-process agent-to-agent (A2A) task protocol.
//!
//! These types are the wire contract of the HTTP surface in
//! `crate::presentation::api` and of the `meridian-sdk` client. Field
//! casing follows the protocol (camelCase) rather than Rust convention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::task::TaskStatus;

/// Capability descriptor for a worker exposed over the protocol layer.
/// Created once at registration; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One typed message part. Exactly one representation per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Html { html: String },
    Form { form: serde_json::Value },
    File { name: String, mime_type: String, uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Caller-supplied task id paired with the instruction message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: String,
    pub message: Message,
}

impl TaskRequest {
    /// Reject malformed requests before any task state is created.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.trim().is_empty() {
            return Err(ProtocolError::MissingId);
        }
        if self.message.parts.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => TaskState::Pending,
            TaskStatus::Routing | TaskStatus::InProgress => TaskState::Running,
            TaskStatus::Completed => TaskState::Completed,
            TaskStatus::Failed => TaskState::Failed,
            TaskStatus::Cancelled => TaskState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aTaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub parts: Vec<Part>,
}

/// Current protocol-level view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: String,
    pub status: A2aTaskStatus,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl TaskResponse {
    pub fn pending(id: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            status: A2aTaskStatus {
                state: TaskState::Pending,
                reason: None,
            },
            history,
            artifacts: Vec::new(),
        }
    }

    pub fn completed(id: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            status: A2aTaskStatus {
                state: TaskState::Completed,
                reason: None,
            },
            history,
            artifacts: Vec::new(),
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: A2aTaskStatus {
                state: TaskState::Failed,
                reason: Some(reason.into()),
            },
            history: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("task request is missing an id")]
    MissingId,

    #[error("task request message has no parts")]
    EmptyMessage,
}
