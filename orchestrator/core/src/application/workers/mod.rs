// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Concrete workers and their bus plumbing.
//!
//! Each worker is an independent struct implementing
//! [`crate::domain::worker::Worker`], composed with injected collaborator
//! traits for the capability it fronts. [`attach_worker`] wires a worker
//! to its assignment topic; everything it produces - success, failure or a
//! redirect - flows back to the task manager as a [`WorkerReport`].

pub mod hedera;
pub mod observer;

pub use hedera::{ChainGateway, ChainOperation, ChainReceipt, HederaWorker};
pub use observer::{Analysis, Analyst, ObserverWorker};

use std::sync::Arc;

use tracing::error;

use crate::domain::events::{BusEvent, Topic, WorkerReport};
use crate::domain::worker::Worker;
use crate::infrastructure::event_bus::{EventBus, Subscription};

/// Subscribe a worker to `task-manager-<name>`. A processing exception is
/// critical: it comes back as a `failed` report so the task manager fails
/// the task with the reason.
pub fn attach_worker(bus: &EventBus, worker: Arc<dyn Worker>) -> Subscription {
    let topic = Topic::assignments(worker.name());
    let emitter = bus.clone();
    bus.register(topic, move |event| {
        let worker = Arc::clone(&worker);
        let emitter = emitter.clone();
        async move {
            let BusEvent::TaskAssigned(assignment) = event else {
                return Ok(());
            };
            let task_id = assignment.task_id;
            let report = match worker.handle(assignment).await {
                Ok(report) => report,
                Err(err) => {
                    error!(worker = worker.name(), task_id = %task_id, error = %err, "worker processing failed");
                    WorkerReport::failed(task_id, worker.name(), err.to_string())
                }
            };
            emitter.emit(BusEvent::WorkerReport(report));
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{AssignmentKind, TaskAssignment};
    use crate::domain::task::TaskId;
    use crate::domain::worker::WorkerError;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Panicky;

    #[async_trait]
    impl Worker for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn handle(&self, _assignment: TaskAssignment) -> Result<WorkerReport, WorkerError> {
            Err(WorkerError::Collaborator("rpc unreachable".to_string()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, assignment: TaskAssignment) -> Result<WorkerReport, WorkerError> {
            Ok(WorkerReport::completed(
                assignment.task_id,
                self.name(),
                json!(assignment.description),
            ))
        }
    }

    fn assignment(worker: &str) -> TaskAssignment {
        TaskAssignment {
            task_id: TaskId::new(),
            worker: worker.to_string(),
            description: "check balances".to_string(),
            kind: AssignmentKind::Execute,
            operation_type: None,
            assigned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn attached_worker_reports_back_on_its_topic() {
        let bus = EventBus::new(16);
        let _sub = attach_worker(&bus, Arc::new(Echo));
        let mut reports = bus.subscribe(Topic::reports("echo"));

        bus.emit(BusEvent::TaskAssigned(assignment("echo")));

        let event = timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            BusEvent::WorkerReport(report) => {
                assert_eq!(report.worker, "echo");
                assert_eq!(report.result, Some(json!("check balances")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn worker_exception_becomes_failed_report() {
        let bus = EventBus::new(16);
        let _sub = attach_worker(&bus, Arc::new(Panicky));
        let mut reports = bus.subscribe(Topic::reports("panicky"));

        bus.emit(BusEvent::TaskAssigned(assignment("panicky")));

        let event = timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            BusEvent::WorkerReport(report) => {
                assert_eq!(report.status, crate::domain::task::TaskStatus::Failed);
                assert!(report.error.as_deref().unwrap().contains("rpc unreachable"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
