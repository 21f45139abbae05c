//! Introspection endpoints: the registered tools and a live domain-event log.

use crate::SharedState;
use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use blocks_core::event::DomainEvent;
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
    pub count: usize,
}

/// `GET /api/tools`
pub async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .orchestrator
        .registry()
        .definitions()
        .into_iter()
        .map(|d| ToolInfo {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        })
        .collect();

    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

fn event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::TurnStarted { .. } => "turn_started",
        DomainEvent::ToolExecuted { .. } => "tool_executed",
        DomainEvent::TurnPersisted { .. } => "turn_persisted",
        DomainEvent::ErrorOccurred { .. } => "error_occurred",
    }
}

/// `GET /api/events`: SSE stream of domain events. Lagged events are skipped.
pub async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
        .filter_map(|result| async move {
            let Ok(event) = result else {
                return None;
            };
            match serde_json::to_string(event.as_ref()) {
                Ok(data) => Some(Ok::<_, Infallible>(SseEvent::default().event(event_name(&event)).data(data))),
                Err(e) => {
                    warn!(event = event_name(&event), error = %e, "Dropping unserializable domain event");
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
