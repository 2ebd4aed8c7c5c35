// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! The Hedera specialist. Network operations go through the
//! [`ChainGateway`] collaborator; the worker translates assignments into
//! operations and receipts into reports.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::domain::events::{TaskAssignment, WorkerReport};
use crate::domain::task::ToolResult;
use crate::domain::worker::{Worker, WorkerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOperation {
    /// `balance`, `transfer`, `swap`, ... - the gateway interprets it.
    pub kind: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReceipt {
    pub operation: String,
    pub outcome: serde_json::Value,
    pub consensus_at: chrono::DateTime<Utc>,
}

/// Network boundary: balance queries and transaction submission.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn execute(&self, operation: ChainOperation) -> anyhow::Result<ChainReceipt>;
}

pub struct HederaWorker {
    gateway: Arc<dyn ChainGateway>,
}

impl HederaWorker {
    pub fn new(gateway: Arc<dyn ChainGateway>) -> Self {
        Self { gateway }
    }

    fn operation_for(assignment: &TaskAssignment) -> ChainOperation {
        let kind = assignment
            .operation_type
            .clone()
            .unwrap_or_else(|| "query".to_string());
        ChainOperation {
            kind,
            params: json!({ "instruction": assignment.description }),
        }
    }
}

#[async_trait]
impl Worker for HederaWorker {
    fn name(&self) -> &str {
        "hedera"
    }

    async fn handle(&self, assignment: TaskAssignment) -> Result<WorkerReport, WorkerError> {
        let operation = Self::operation_for(&assignment);
        let operation_kind = operation.kind.clone();

        let receipt = self
            .gateway
            .execute(operation)
            .await
            .map_err(|err| WorkerError::Collaborator(err.to_string()))?;

        let mut report = WorkerReport::completed(
            assignment.task_id,
            self.name(),
            json!({ "receipt": receipt.outcome }),
        );
        report.tool_results = vec![ToolResult {
            tool: operation_kind,
            input: json!({ "instruction": assignment.description }),
            output: receipt.outcome.clone(),
            timestamp: receipt.consensus_at,
        }];
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::AssignmentKind;
    use crate::domain::task::{TaskId, TaskStatus};

    struct StubGateway;

    #[async_trait]
    impl ChainGateway for StubGateway {
        async fn execute(&self, operation: ChainOperation) -> anyhow::Result<ChainReceipt> {
            Ok(ChainReceipt {
                operation: operation.kind.clone(),
                outcome: json!({ "kind": operation.kind, "status": "SUCCESS" }),
                consensus_at: Utc::now(),
            })
        }
    }

    struct DownGateway;

    #[async_trait]
    impl ChainGateway for DownGateway {
        async fn execute(&self, _operation: ChainOperation) -> anyhow::Result<ChainReceipt> {
            anyhow::bail!("mirror node unreachable")
        }
    }

    fn assignment(operation_type: Option<&str>) -> TaskAssignment {
        TaskAssignment {
            task_id: TaskId::new(),
            worker: "hedera".to_string(),
            description: "Hedera balance check".to_string(),
            kind: AssignmentKind::Execute,
            operation_type: operation_type.map(|s| s.to_string()),
            assigned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn executes_operation_and_records_tool_result() {
        let worker = HederaWorker::new(Arc::new(StubGateway));
        let report = worker.handle(assignment(Some("balance"))).await.unwrap();

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.tool_results.len(), 1);
        assert_eq!(report.tool_results[0].tool, "balance");
        assert_eq!(report.result.unwrap()["receipt"]["status"], "SUCCESS");
    }

    #[tokio::test]
    async fn missing_operation_type_defaults_to_query() {
        let worker = HederaWorker::new(Arc::new(StubGateway));
        let report = worker.handle(assignment(None)).await.unwrap();
        assert_eq!(report.tool_results[0].tool, "query");
    }

    #[tokio::test]
    async fn gateway_failure_is_a_collaborator_error() {
        let worker = HederaWorker::new(Arc::new(DownGateway));
        let err = worker.handle(assignment(None)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Collaborator(_)));
    }
}
