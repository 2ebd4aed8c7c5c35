// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// Transitional: a worker declined domain ownership and the task is
    /// being redirected to another worker.
    Routing,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Outcome of a single sub-operation performed by a worker on behalf of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied hint naming a target execution domain and, optionally,
/// the worker that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSelection {
    pub chain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("task is already terminal: {0:?}")]
    AlreadyTerminal(TaskStatus),
}

/// The unit of orchestrated work.
///
/// Created by the task manager on submission and mutated only by the task
/// manager in response to worker reports. Tasks are never deleted; a lost
/// in-memory copy is reconstructed from the durable task log or, failing
/// that, recreated as a synthetic record with `recovered` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Creation time, updated on every status change.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_chain: Option<ChainSelection>,
    /// Set when the record was synthesized after both the in-memory copy
    /// and the durable copy were lost.
    #[serde(default)]
    pub recovered: bool,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            status: TaskStatus::Pending,
            assigned_to: None,
            result: None,
            error: None,
            tool_results: Vec::new(),
            timestamp: Utc::now(),
            operation_type: None,
            selected_chain: None,
            recovered: false,
        }
    }

    /// Synthetic placeholder for an id known to have existed but whose
    /// record could not be recovered from the durable store.
    pub fn recovered(id: TaskId) -> Self {
        Self {
            id,
            description: "recovered task (original detail lost)".to_string(),
            status: TaskStatus::Pending,
            assigned_to: None,
            result: None,
            error: None,
            tool_results: Vec::new(),
            timestamp: Utc::now(),
            operation_type: None,
            selected_chain: None,
            recovered: true,
        }
    }

    /// Move the task to `to`, rejecting regressions and moves out of a
    /// terminal state. Transitioning to the current status is a no-op.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        use TaskStatus::*;

        if self.status == to {
            return Ok(());
        }

        let legal = match self.status {
            Pending => matches!(to, InProgress | Cancelled | Failed),
            Routing => matches!(to, InProgress | Cancelled | Failed),
            InProgress => matches!(to, Routing | Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        };

        if !legal {
            return Err(TaskError::IllegalTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.touch();
        Ok(())
    }

    /// Bind the task to a worker and start it.
    pub fn assign(&mut self, worker: &str) -> Result<(), TaskError> {
        self.transition(TaskStatus::InProgress)?;
        self.assigned_to = Some(worker.to_string());
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Cooperative cancellation: marks the stored state only; an in-flight
    /// worker operation is not interrupted.
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal(self.status));
        }
        self.status = TaskStatus::Cancelled;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}
