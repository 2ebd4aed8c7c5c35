// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};

use meridian_orchestrator_core::domain::protocol::{AgentCard, TaskRequest, TaskResponse};

/// Client for one Meridian protocol endpoint.
pub struct A2aClient {
    base_url: String,
    client: Client,
}

impl A2aClient {
    /// Create a new client against `base_url`
    /// (e.g. `http://localhost:7300`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    /// Fetch a worker's capability card.
    pub async fn discover(&self, agent: &str) -> Result<AgentCard> {
        let url = format!("{}/agent/{}", self.base_url, agent);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("unknown agent: {agent}"));
        }
        let card = response.error_for_status()?.json().await?;

        Ok(card)
    }

    /// Submit a task. Both response modes land here: a synchronous worker
    /// answers with the full result (200), a streaming worker with an
    /// initial pending response (202) to be polled via
    /// [`A2aClient::task_status`].
    pub async fn send_task(&self, agent: &str, request: &TaskRequest) -> Result<TaskResponse> {
        let url = format!("{}/agent/{}/tasks/send", self.base_url, agent);

        let response = self.client.post(&url).json(request).send().await?;
        let response = response.error_for_status()?;
        let task = response.json().await?;

        Ok(task)
    }

    /// Poll the current state of a task.
    pub async fn task_status(&self, agent: &str, task_id: &str) -> Result<TaskResponse> {
        let url = format!("{}/agent/{}/tasks/{}", self.base_url, agent, task_id);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("unknown task: {task_id}"));
        }
        let task = response.error_for_status()?.json().await?;

        Ok(task)
    }

    /// Cancel a non-terminal task.
    pub async fn cancel(&self, agent: &str, task_id: &str) -> Result<TaskResponse> {
        let url = format!("{}/agent/{}/tasks/{}/cancel", self.base_url, agent, task_id);

        let response = self.client.post(&url).send().await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(anyhow!(
                "cancel rejected: {}",
                body["error"].as_str().unwrap_or("task is already terminal")
            ));
        }
        let task = response.error_for_status()?.json().await?;

        Ok(task)
    }
}
