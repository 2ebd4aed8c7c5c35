// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Cross-process task gateway (A2A).
//!
//! Exposes each registered worker through four operations: capability
//! discovery, task submission, status polling and cancellation. The
//! gateway holds no business logic beyond bookkeeping task responses
//! across that surface; each worker's processor is registered once at
//! startup as a function from request to response.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::task_manager::{TaskManager, TaskOptions};
use crate::domain::events::{BusEvent, Topic};
use crate::domain::protocol::{
    A2aTaskStatus, AgentCard, Message, TaskRequest, TaskResponse, TaskState,
};

/// Worker-side processor: the whole of a worker's protocol behavior.
pub type TaskProcessor =
    Arc<dyn Fn(TaskRequest) -> BoxFuture<'static, Result<TaskResponse, A2aError>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum A2aError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task {id} is already terminal ({state:?})")]
    AlreadyTerminal { id: String, state: TaskState },

    #[error("processor failure: {0}")]
    Processor(String),
}

struct RegisteredAgent {
    card: AgentCard,
    processor: TaskProcessor,
}

/// Outcome of a submission, distinguishing the response modes.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Synchronous: the processor resolved before the call returned.
    Completed(TaskResponse),
    /// Streaming: an initial response; the final result is retrievable
    /// via status polling.
    Accepted(TaskResponse),
}

impl SubmitOutcome {
    pub fn response(&self) -> &TaskResponse {
        match self {
            SubmitOutcome::Completed(response) | SubmitOutcome::Accepted(response) => response,
        }
    }
}

#[derive(Default)]
pub struct A2aGateway {
    agents: DashMap<String, RegisteredAgent>,
    tasks: DashMap<String, TaskResponse>,
}

impl A2aGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker's card and processor. Called once per worker at
    /// startup; a re-registration replaces the previous entry.
    pub fn register_agent(&self, card: AgentCard, processor: TaskProcessor) {
        info!(agent = %card.name, streaming = card.capabilities.streaming, "agent registered");
        if self
            .agents
            .insert(card.name.clone(), RegisteredAgent { card, processor })
            .is_some()
        {
            warn!("agent registration replaced an existing entry");
        }
    }

    pub fn card(&self, name: &str) -> Result<AgentCard, A2aError> {
        self.agents
            .get(name)
            .map(|agent| agent.card.clone())
            .ok_or_else(|| A2aError::UnknownAgent(name.to_string()))
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Submit a task to a worker.
    ///
    /// With `streaming` unset on the worker's card the call blocks until
    /// the processor resolves; otherwise it returns an initial pending
    /// response immediately while processing continues in the background.
    pub async fn submit(
        self: &Arc<Self>,
        name: &str,
        request: TaskRequest,
    ) -> Result<SubmitOutcome, A2aError> {
        let (streaming, processor) = {
            let agent = self
                .agents
                .get(name)
                .ok_or_else(|| A2aError::UnknownAgent(name.to_string()))?;
            (
                agent.card.capabilities.streaming,
                Arc::clone(&agent.processor),
            )
        };

        request
            .validate()
            .map_err(|err| A2aError::InvalidRequest(err.to_string()))?;

        if !streaming {
            let id = request.id.clone();
            let history = vec![request.message.clone()];
            let response = match processor(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(agent = name, task = %id, error = %err, "processor failed");
                    let mut failed = TaskResponse::failed(id.as_str(), err.to_string());
                    failed.history = history;
                    failed
                }
            };
            self.tasks.insert(id.clone(), response.clone());
            return Ok(SubmitOutcome::Completed(response));
        }

        let id = request.id.clone();
        let initial = TaskResponse::pending(id.as_str(), vec![request.message.clone()]);
        self.tasks.insert(id.clone(), initial.clone());

        let gateway = Arc::clone(self);
        let agent = name.to_string();
        tokio::spawn(async move {
            let response = match processor(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(agent = %agent, task = %id, error = %err, "processor failed");
                    TaskResponse::failed(id.as_str(), err.to_string())
                }
            };
            gateway.finish(&id, response);
        });

        Ok(SubmitOutcome::Accepted(initial))
    }

    /// Record a late-resolving response, unless the task was cancelled in
    /// the meantime: cancellation is terminal on this surface.
    fn finish(&self, id: &str, response: TaskResponse) {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                if entry.status.state == TaskState::Cancelled {
                    debug!(task = %id, "discarding result for cancelled task");
                    return;
                }
                *entry = response;
            }
            None => {
                self.tasks.insert(id.to_string(), response);
            }
        }
    }

    pub fn status(&self, id: &str) -> Result<TaskResponse, A2aError> {
        self.tasks
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| A2aError::UnknownTask(id.to_string()))
    }

    /// Cancel a known, non-terminal task.
    pub fn cancel(&self, id: &str) -> Result<TaskResponse, A2aError> {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2aError::UnknownTask(id.to_string()))?;

        if entry.status.state.is_terminal() {
            return Err(A2aError::AlreadyTerminal {
                id: id.to_string(),
                state: entry.status.state,
            });
        }

        entry.status = A2aTaskStatus {
            state: TaskState::Cancelled,
            reason: Some("cancelled by caller".to_string()),
        };
        Ok(entry.value().clone())
    }
}

/// Build a processor that drives a request through the task manager:
/// create, assign, then wait for the terminal `task-update`.
///
/// This is the default bridge between the protocol surface and the
/// orchestration core; workers with bespoke protocol behavior register
/// their own function instead.
pub fn task_manager_processor(
    manager: Arc<TaskManager>,
    worker: &str,
    timeout: std::time::Duration,
) -> TaskProcessor {
    let worker = worker.to_string();
    Arc::new(move |request: TaskRequest| {
        let manager = Arc::clone(&manager);
        let worker = worker.clone();
        Box::pin(async move {
            let mut updates = manager.bus().subscribe(Topic::TaskUpdate);

            let options = TaskOptions {
                assigned_to: Some(worker),
                ..TaskOptions::default()
            };
            let task_id = manager.create_task(request.message.text(), options);
            manager
                .assign_task(task_id)
                .await
                .map_err(|err| A2aError::Processor(err.to_string()))?;

            let deadline = tokio::time::Instant::now() + timeout;
            let final_status = loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return Err(A2aError::Processor(format!(
                        "timed out waiting for task {task_id}"
                    )));
                }
                match tokio::time::timeout(remaining, updates.recv()).await {
                    Ok(Ok(BusEvent::TaskUpdate(update)))
                        if update.task_id == task_id && update.status.is_terminal() =>
                    {
                        break update;
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(crate::infrastructure::event_bus::EventBusError::Lagged(_))) => continue,
                    Ok(Err(_)) => {
                        return Err(A2aError::Processor("event bus closed".to_string()))
                    }
                    Err(_) => {
                        return Err(A2aError::Processor(format!(
                            "timed out waiting for task {task_id}"
                        )))
                    }
                }
            };

            let task = manager.task_by_id(task_id).await;
            let mut history = vec![request.message];
            if let Some(result) = &task.result {
                history.push(Message::agent_text(result.to_string()));
            }
            Ok(TaskResponse {
                id: request.id,
                status: A2aTaskStatus {
                    state: final_status.status.into(),
                    reason: task.error.clone(),
                },
                history,
                artifacts: Vec::new(),
            })
        })
    })
}
