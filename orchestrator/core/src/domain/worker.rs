// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::{TaskAssignment, WorkerReport};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error("{worker} cannot handle this assignment: {detail}")]
    Unsupported { worker: String, detail: String },
}

/// A capability-bound unit of the agent network.
///
/// Workers are independent structs implementing this interface; shared
/// behavior (analysis, chain access, licensing) is composed via injected
/// collaborators rather than inherited. A worker receives assignments from
/// its `task-manager-<name>` topic and answers on `<name>-task-manager`;
/// the plumbing lives in `crate::application::workers::attach_worker`.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, assignment: TaskAssignment) -> Result<WorkerReport, WorkerError>;
}
