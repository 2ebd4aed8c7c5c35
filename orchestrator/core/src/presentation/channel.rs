// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Duplex channel for a driving UI or external controller.
//!
//! Inbound: `command` envelopes. With `useA2A` set the command is
//! forwarded through the protocol gateway to `targetAgent`; otherwise a
//! task is created and immediately assigned. Outbound: `agent-action`,
//! `agent-message`, `position-update` and `task-update` events mirrored
//! from the bus.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::task_manager::TaskOptions;
use crate::domain::events::Topic;
use crate::domain::protocol::{Message, TaskRequest};
use crate::domain::task::ChainSelection;
use crate::infrastructure::event_bus::EventBusError;
use crate::presentation::api::AppState;

/// Inbound command envelope. Field names are the channel's wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    #[serde(default, rename = "useA2A")]
    pub use_a2a: bool,
    #[serde(default, rename = "targetAgent", skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    #[serde(default, rename = "selectedChain", skip_serializing_if = "Option::is_none")]
    pub selected_chain: Option<ChainSelection>,
    #[serde(default, rename = "agentPreference", skip_serializing_if = "Option::is_none")]
    pub agent_preference: Option<String>,
    #[serde(default, rename = "operationType", skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_channel(state, socket))
}

async fn run_channel(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.bus.subscribe_any(vec![
        Topic::TaskUpdate,
        Topic::AgentAction,
        Topic::AgentMessage,
        Topic::PositionUpdate,
    ]);

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(err) = handle_command(&state, text.as_str()).await {
                        warn!(error = %err, "channel command failed");
                        let body = serde_json::json!({ "type": "error", "message": err.to_string() });
                        if sink
                            .send(WsMessage::Text(body.to_string().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "channel socket error");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(body) = serde_json::to_string(&event) else { continue };
                    if sink.send(WsMessage::Text(body.into())).await.is_err() {
                        break;
                    }
                }
                Err(EventBusError::Lagged(n)) => {
                    warn!(lagged = n, "channel subscriber lagged; events were dropped");
                }
                Err(_) => break,
            },
        }
    }
    debug!("channel closed");
}

pub(crate) async fn handle_command(state: &Arc<AppState>, text: &str) -> Result<()> {
    let envelope: CommandEnvelope = serde_json::from_str(text)?;
    if envelope.kind != "command" {
        bail!("unsupported envelope type: {}", envelope.kind);
    }

    if envelope.use_a2a {
        let target = envelope
            .target_agent
            .ok_or_else(|| anyhow!("useA2A requires targetAgent"))?;
        let request = TaskRequest {
            id: Uuid::new_v4().to_string(),
            message: Message::user_text(envelope.command),
        };
        state.gateway.submit(&target, request).await?;
        return Ok(());
    }

    let options = TaskOptions {
        assigned_to: envelope.agent_preference,
        operation_type: envelope.operation_type,
        selected_chain: envelope.selected_chain,
    };
    let task_id = state.task_manager.create_task(envelope.command, options);
    state.task_manager.assign_task(task_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::a2a::{A2aGateway, TaskProcessor};
    use crate::application::task_manager::{RoutingTable, TaskManager};
    use crate::domain::events::{AssignmentKind, BusEvent};
    use crate::domain::protocol::{AgentCapabilities, AgentCard, TaskResponse};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::memory::MemoryRecordStore;
    use crate::infrastructure::task_log::TaskLogStore;
    use std::time::Duration;
    use tokio::time::timeout;

    fn state_with_gateway() -> Arc<AppState> {
        let bus = EventBus::new(64);
        let store = Arc::new(TaskLogStore::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryRecordStore::new()),
        ));
        let task_manager = Arc::new(TaskManager::new(
            bus.clone(),
            store,
            RoutingTable::standard(),
        ));
        let gateway = Arc::new(A2aGateway::new());
        let echo: TaskProcessor = Arc::new(|request| {
            Box::pin(async move { Ok(TaskResponse::completed(request.id, vec![request.message])) })
        });
        gateway.register_agent(
            AgentCard {
                name: "hedera".to_string(),
                description: "hedera worker".to_string(),
                url: "http://localhost:7300/agent/hedera".to_string(),
                version: "0.3.0".to_string(),
                capabilities: AgentCapabilities::default(),
            },
            echo,
        );
        Arc::new(AppState {
            gateway,
            task_manager,
            bus,
        })
    }

    #[test]
    fn envelope_uses_the_wire_field_names() {
        let envelope: CommandEnvelope = serde_json::from_str(
            r#"{
                "type": "command",
                "command": "Hedera balance check",
                "useA2A": true,
                "targetAgent": "hedera",
                "operationType": "balance"
            }"#,
        )
        .unwrap();
        assert_eq!(envelope.kind, "command");
        assert!(envelope.use_a2a);
        assert_eq!(envelope.target_agent.as_deref(), Some("hedera"));
        assert_eq!(envelope.operation_type.as_deref(), Some("balance"));
    }

    #[tokio::test]
    async fn direct_command_creates_and_assigns_a_task() {
        let state = state_with_gateway();
        let mut assignments = state.bus.subscribe(Topic::assignments("observer"));

        handle_command(
            &state,
            r#"{ "type": "command", "command": "Swap 100 USDC for EURc" }"#,
        )
        .await
        .unwrap();

        let event = timeout(Duration::from_secs(1), assignments.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            BusEvent::TaskAssigned(assignment) => {
                assert_eq!(assignment.kind, AssignmentKind::Analyze);
                assert_eq!(assignment.description, "Swap 100 USDC for EURc");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn a2a_command_is_forwarded_to_the_target_agent() {
        let state = state_with_gateway();

        handle_command(
            &state,
            r#"{
                "type": "command",
                "command": "Hedera balance check",
                "useA2A": true,
                "targetAgent": "hedera"
            }"#,
        )
        .await
        .unwrap();

        // The gateway stored exactly one response for the generated id.
        assert!(state.gateway.agent_names().contains(&"hedera".to_string()));
    }

    #[tokio::test]
    async fn a2a_command_without_target_is_rejected() {
        let state = state_with_gateway();
        let err = handle_command(
            &state,
            r#"{ "type": "command", "command": "swap", "useA2A": true }"#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("targetAgent"));
    }

    #[tokio::test]
    async fn non_command_envelopes_are_rejected() {
        let state = state_with_gateway();
        let err = handle_command(&state, r#"{ "type": "ping", "command": "" }"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported envelope type"));
    }
}
