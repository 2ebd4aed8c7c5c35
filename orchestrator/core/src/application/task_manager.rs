// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Task lifecycle ownership: creation, routing, result aggregation and
//! crash recovery.
//!
//! The task manager is the only writer of task state. Workers talk to it
//! exclusively through the event bus: assignments go out on
//! `task-manager-<worker>`, reports come back on `<worker>-task-manager`,
//! and every applied report is republished as a normalized `task-update`
//! for any listener (UI channel, protocol layer, other workers).
//!
//! Storage failures are non-critical here: the operation continues without
//! the durability guarantee and the failure surfaces as a best-effort
//! `agent-error` event. Routing failures and worker exceptions are
//! critical and fail the task.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::{
    AgentError, AssignmentKind, BusEvent, TaskAssignment, TaskUpdate, Topic, WorkerReport,
};
use crate::domain::record::{keys, RecordMetadata, StoreError};
use crate::domain::task::{ChainSelection, Task, TaskId, TaskStatus};
use crate::infrastructure::event_bus::{EventBus, Subscription};
use crate::infrastructure::task_log::TaskLogStore;

/// The general-purpose analysis worker every unhinted task routes to.
pub const DEFAULT_WORKER: &str = "observer";

/// Destination stamped on normalized task updates.
const UPDATE_DESTINATION: &str = "client";

/// Side effect triggered after successful completion (e.g. minting a
/// completion receipt). Hook failures never fail the result-handling path.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completed(&self, task: &Task) -> Result<()>;
}

/// Caller-supplied hints accepted at task creation.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub assigned_to: Option<String>,
    pub operation_type: Option<String>,
    pub selected_chain: Option<ChainSelection>,
}

/// Ordered table of domain markers, checked against task descriptions
/// after the explicit hints and before the default worker.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    markers: Vec<(String, String)>,
    default_worker: String,
}

impl RoutingTable {
    /// The standard deployment: the `hedera` marker routes to the Hedera
    /// specialist, everything else falls through to the observer.
    pub fn standard() -> Self {
        Self::new(DEFAULT_WORKER).with_marker("hedera", "hedera")
    }

    pub fn new(default_worker: impl Into<String>) -> Self {
        Self {
            markers: Vec::new(),
            default_worker: default_worker.into(),
        }
    }

    pub fn with_marker(mut self, keyword: impl Into<String>, worker: impl Into<String>) -> Self {
        self.markers
            .push((keyword.into().to_lowercase(), worker.into()));
        self
    }

    pub fn default_worker(&self) -> &str {
        &self.default_worker
    }

    /// First marker contained in `description`, in table order.
    pub fn match_description(&self, description: &str) -> Option<&str> {
        let description = description.to_lowercase();
        self.markers
            .iter()
            .find(|(keyword, _)| description.contains(keyword))
            .map(|(_, worker)| worker.as_str())
    }

    /// Every worker reachable through this table, default included.
    pub fn workers(&self) -> Vec<String> {
        let mut workers = vec![self.default_worker.clone()];
        for (_, worker) in &self.markers {
            if !workers.contains(worker) {
                workers.push(worker.clone());
            }
        }
        workers
    }
}

pub struct TaskManager {
    tasks: DashMap<TaskId, Task>,
    bus: EventBus,
    store: Arc<TaskLogStore>,
    routing: RoutingTable,
    completion_hook: Option<Arc<dyn CompletionHook>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl TaskManager {
    pub fn new(bus: EventBus, store: Arc<TaskLogStore>, routing: RoutingTable) -> Self {
        Self {
            tasks: DashMap::new(),
            bus,
            store,
            routing,
            completion_hook: None,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.completion_hook = Some(hook);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Subscribe the generic result handler to `<worker>-task-manager`.
    pub fn watch_worker(self: &Arc<Self>, worker: &str) {
        let manager = Arc::clone(self);
        let subscription = self.bus.register(Topic::reports(worker), move |event| {
            let manager = Arc::clone(&manager);
            async move {
                if let BusEvent::WorkerReport(report) = event {
                    manager.handle_report(report).await?;
                }
                Ok(())
            }
        });
        self.subscriptions.lock().push(subscription);
    }

    /// Subscribe the result handler for every worker in the routing table.
    pub fn watch_registered_workers(self: &Arc<Self>) {
        for worker in self.routing.workers() {
            self.watch_worker(&worker);
        }
    }

    /// Allocate a new task in state `pending`. The durable write is
    /// scheduled on a background task, never inline; creation itself
    /// cannot fail.
    pub fn create_task(&self, description: impl Into<String>, options: TaskOptions) -> TaskId {
        let mut task = Task::new(description);
        task.assigned_to = options.assigned_to;
        task.operation_type = options.operation_type;
        task.selected_chain = options.selected_chain;

        let id = task.id;
        self.tasks.insert(id, task.clone());
        debug!(task_id = %id, "task created");
        self.persist_later(task);
        id
    }

    /// Return the task for `id`, always. A cache miss is served from the
    /// durable store; if that also fails, a synthetic placeholder is
    /// created so callers never observe an absence for a known id.
    pub async fn task_by_id(&self, id: TaskId) -> Task {
        if let Some(task) = self.tasks.get(&id) {
            return task.value().clone();
        }

        match self.recover(id).await {
            Ok(task) => {
                info!(task_id = %id, "task recovered from durable store");
                self.tasks.insert(id, task.clone());
                task
            }
            Err(err) => {
                warn!(task_id = %id, error = %err, "task recovery failed; synthesizing placeholder");
                self.emit_error(format!("task recovery failed for {id}: {err}"));
                let task = Task::recovered(id);
                self.tasks.insert(id, task.clone());
                task
            }
        }
    }

    /// Route the task to a worker and publish the assignment.
    ///
    /// Selection is evaluated in strict priority order, short-circuiting
    /// on the first match: explicit assignee, chain hint, description
    /// marker, default worker.
    pub async fn assign_task(&self, id: TaskId) -> Result<String> {
        let mut task = self.task_by_id(id).await;
        let worker = self.select_worker(&task);

        task.assign(&worker)
            .with_context(|| format!("cannot assign task {id}"))?;
        self.tasks.insert(id, task.clone());
        self.persist_task(&task).await;

        let kind = if worker == self.routing.default_worker() {
            AssignmentKind::Analyze
        } else {
            AssignmentKind::Execute
        };
        info!(task_id = %id, worker = %worker, ?kind, "task routed");

        self.bus.emit(BusEvent::TaskAssigned(TaskAssignment {
            task_id: id,
            worker: worker.clone(),
            description: task.description.clone(),
            kind,
            operation_type: task.operation_type.clone(),
            assigned_at: Utc::now(),
        }));
        Ok(worker)
    }

    /// Cooperatively cancel a non-terminal task.
    pub async fn cancel_task(&self, id: TaskId) -> Result<Task> {
        let mut task = self.task_by_id(id).await;
        task.cancel()
            .with_context(|| format!("cannot cancel task {id}"))?;
        self.tasks.insert(id, task.clone());
        self.persist_task(&task).await;
        self.emit_update(&task, "task-manager");
        Ok(task)
    }

    /// Generic result handler, one logical operation for every worker.
    ///
    /// Reports against terminal tasks are dropped: repeated results apply
    /// last-write-wins by arrival only while the task is live.
    pub async fn handle_report(&self, report: WorkerReport) -> Result<()> {
        let mut task = self.task_by_id(report.task_id).await;

        if task.status.is_terminal() {
            warn!(
                task_id = %task.id,
                status = ?task.status,
                worker = %report.worker,
                "dropping report for terminal task"
            );
            return Ok(());
        }

        if report.status == TaskStatus::Routing {
            return self.redirect(task, &report).await;
        }

        task.transition(report.status)
            .with_context(|| format!("report from {} rejected", report.worker))?;
        task.result = report.result.clone();
        task.error = report.error.clone();
        task.tool_results = report.tool_results.clone();
        self.tasks.insert(task.id, task.clone());

        self.persist_task(&task).await;
        if let Some(reasoning) = &report.reasoning {
            self.persist_thought(task.id, &report.worker, reasoning).await;
        }
        self.append_log(&report).await;

        self.emit_update(&task, &report.worker);

        if task.status == TaskStatus::Completed {
            if let Some(hook) = &self.completion_hook {
                let hook = Arc::clone(hook);
                let completed = task.clone();
                tokio::spawn(async move {
                    if let Err(err) = hook.on_completed(&completed).await {
                        warn!(task_id = %completed.id, error = %err, "completion hook failed");
                    }
                });
            }
        }
        Ok(())
    }

    /// A worker declined domain ownership: hand the task to the named
    /// target, leaving the transitional `routing` status observable.
    async fn redirect(&self, mut task: Task, report: &WorkerReport) -> Result<()> {
        let target = report.redirect_to.clone().ok_or_else(|| {
            anyhow!(
                "routing report from {} carries no redirect target",
                report.worker
            )
        })?;

        info!(task_id = %task.id, from = %report.worker, to = %target, "worker declined ownership; redirecting");
        task.transition(TaskStatus::Routing)?;
        task.assigned_to = Some(target);
        self.tasks.insert(task.id, task.clone());
        self.persist_task(&task).await;
        self.emit_update(&task, &report.worker);

        self.assign_task(task.id).await?;
        Ok(())
    }

    fn select_worker(&self, task: &Task) -> String {
        if let Some(worker) = &task.assigned_to {
            return worker.clone();
        }
        if let Some(chain) = &task.selected_chain {
            if let Some(agent) = &chain.agent_id {
                return agent.clone();
            }
        }
        if let Some(worker) = self.routing.match_description(&task.description) {
            return worker.to_string();
        }
        self.routing.default_worker().to_string()
    }

    fn emit_update(&self, task: &Task, source: &str) {
        self.bus.emit(BusEvent::TaskUpdate(TaskUpdate {
            task_id: task.id,
            status: task.status,
            source: source.to_string(),
            destination: UPDATE_DESTINATION.to_string(),
            timestamp: Utc::now(),
            result: task.result.clone(),
            error: task.error.clone(),
        }));
    }

    fn emit_error(&self, message: String) {
        self.bus
            .emit(BusEvent::AgentError(AgentError::new("task-manager", message)));
    }

    fn persist_later(&self, task: Task) {
        let store = Arc::clone(&self.store);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            if let Err(err) = write_task_record(&store, &task).await {
                warn!(task_id = %task.id, error = %err, "task persistence failed");
                bus.emit(BusEvent::AgentError(AgentError::new(
                    "task-manager",
                    format!("task persistence failed: {err}"),
                )));
            }
        });
    }

    async fn persist_task(&self, task: &Task) {
        if let Err(err) = write_task_record(&self.store, task).await {
            warn!(task_id = %task.id, error = %err, "task persistence failed");
            self.emit_error(format!("task persistence failed: {err}"));
        }
    }

    async fn persist_thought(&self, id: TaskId, worker: &str, reasoning: &str) {
        let data = json!({ "worker": worker, "reasoning": reasoning });
        let metadata = RecordMetadata::typed("cot").by_agent(worker).overwriting();
        if let Err(err) = self
            .store
            .store(keys::chain_of_thought(&id), data, metadata)
            .await
        {
            warn!(task_id = %id, error = %err, "chain-of-thought persistence failed");
            self.emit_error(format!("chain-of-thought persistence failed: {err}"));
        }
    }

    async fn append_log(&self, report: &WorkerReport) {
        let data = json!({
            "taskId": report.task_id.to_string(),
            "worker": report.worker,
            "status": report.status,
        });
        let metadata = RecordMetadata::typed("log").by_agent(report.worker.clone());
        if let Err(err) = self
            .store
            .store(keys::log(&Uuid::new_v4().to_string()), data, metadata)
            .await
        {
            warn!(task_id = %report.task_id, error = %err, "task log append failed");
            self.emit_error(format!("task log append failed: {err}"));
        }
    }

    async fn recover(&self, id: TaskId) -> Result<Task, StoreError> {
        let record = self.store.retrieve(&keys::task(&id)).await?;
        Ok(serde_json::from_value(record.data)?)
    }
}

async fn write_task_record(store: &TaskLogStore, task: &Task) -> Result<(), StoreError> {
    let data = serde_json::to_value(task)?;
    let metadata = RecordMetadata::typed("task")
        .by_agent(
            task.assigned_to
                .clone()
                .unwrap_or_else(|| "task-manager".to_string()),
        )
        .overwriting();
    store.store(keys::task(&task.id), data, metadata).await
}
