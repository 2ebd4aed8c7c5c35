// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! The observer: the general-purpose analysis worker unhinted tasks
//! default to. Language understanding is delegated to an [`Analyst`]
//! collaborator; the worker itself only decides whether to answer or to
//! hand the task to a domain specialist.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::domain::events::{TaskAssignment, WorkerReport};
use crate::domain::task::ToolResult;
use crate::domain::worker::{Worker, WorkerError};

/// Result of analyzing a free-form instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    /// Execution domain this instruction belongs to, when the analyst can
    /// tell (e.g. `hedera`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_domain: Option<String>,
    pub reasoning: String,
}

/// Instruction-analysis boundary (a language model in deployments).
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, instruction: &str) -> anyhow::Result<Analysis>;
}

pub struct ObserverWorker {
    analyst: Arc<dyn Analyst>,
    /// Domains this observer may redirect to; anything else it answers
    /// itself.
    specialists: Vec<String>,
}

impl ObserverWorker {
    pub fn new(analyst: Arc<dyn Analyst>) -> Self {
        Self {
            analyst,
            specialists: vec!["hedera".to_string()],
        }
    }

    pub fn with_specialists(mut self, specialists: Vec<String>) -> Self {
        self.specialists = specialists;
        self
    }
}

#[async_trait]
impl Worker for ObserverWorker {
    fn name(&self) -> &str {
        "observer"
    }

    async fn handle(&self, assignment: TaskAssignment) -> Result<WorkerReport, WorkerError> {
        let analysis = self
            .analyst
            .analyze(&assignment.description)
            .await
            .map_err(|err| WorkerError::Collaborator(err.to_string()))?;

        if let Some(domain) = &analysis.owner_domain {
            if self.specialists.iter().any(|s| s == domain) {
                debug!(task_id = %assignment.task_id, domain = %domain, "instruction belongs to a specialist");
                let mut report =
                    WorkerReport::redirect(assignment.task_id, self.name(), domain.clone());
                report.reasoning = Some(analysis.reasoning);
                return Ok(report);
            }
        }

        let mut report = WorkerReport::completed(
            assignment.task_id,
            self.name(),
            json!({ "analysis": analysis.summary }),
        );
        report.reasoning = Some(analysis.reasoning);
        report.tool_results = vec![ToolResult {
            tool: "analyze".to_string(),
            input: json!({ "instruction": assignment.description }),
            output: json!({ "summary": analysis.summary }),
            timestamp: Utc::now(),
        }];
        Ok(report)
    }
}
