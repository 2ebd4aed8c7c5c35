// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface of the A2A protocol.
//!
//! Per registered worker, addressed by worker name:
//!
//! - `GET  /agent/{name}` - AgentCard
//! - `POST /agent/{name}/tasks/send` - submit (200 synchronous,
//!   202 streaming)
//! - `GET  /agent/{name}/tasks/{id}` - current TaskResponse, 404 unknown
//! - `POST /agent/{name}/tasks/{id}/cancel` - cancel, 400 if terminal
//!
//! Plus `GET /channel`, the duplex WebSocket for a driving UI (see
//! `crate::presentation::channel`).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::application::a2a::{A2aError, A2aGateway, SubmitOutcome};
use crate::application::task_manager::TaskManager;
use crate::domain::protocol::TaskRequest;
use crate::infrastructure::event_bus::EventBus;

pub struct AppState {
    pub gateway: Arc<A2aGateway>,
    pub task_manager: Arc<TaskManager>,
    pub bus: EventBus,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent/{name}", get(agent_card))
        .route("/agent/{name}/tasks/send", post(send_task))
        .route("/agent/{name}/tasks/{id}", get(task_status))
        .route("/agent/{name}/tasks/{id}/cancel", post(cancel_task))
        .route("/channel", get(super::channel::ws_handler))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "meridian protocol layer listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn agent_card(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.gateway.card(&name) {
        Ok(card) => (StatusCode::OK, Json(card)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn send_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Response {
    match state.gateway.submit(&name, request).await {
        Ok(SubmitOutcome::Completed(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(SubmitOutcome::Accepted(response)) => {
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    if let Err(err) = state.gateway.card(&name) {
        return error_response(err);
    }
    match state.gateway.status(&id) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    if let Err(err) = state.gateway.card(&name) {
        return error_response(err);
    }
    match state.gateway.cancel(&id) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: A2aError) -> Response {
    let status = match &err {
        A2aError::UnknownAgent(_) | A2aError::UnknownTask(_) => StatusCode::NOT_FOUND,
        A2aError::InvalidRequest(_) | A2aError::AlreadyTerminal { .. } => StatusCode::BAD_REQUEST,
        A2aError::Processor(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
