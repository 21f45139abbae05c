//! `POST /api/chat/{conversation_id}`: send a message, receive the turn as SSE.
//!
//! Every orchestrator event is written as one `data: <json>` frame and the
//! stream always ends with the done sentinel. The turn is committed to the
//! store before `message_complete` reaches the client, so a client that
//! refetches on completion sees the stored rows.

use crate::{ApiError, AuthUser, SharedState};
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::HeaderName;
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use blocks_agent::TurnRecorder;
use blocks_core::event::DomainEvent;
use blocks_core::message::Message;
use blocks_core::stream::{DONE_FRAME, StreamEvent};
use blocks_core::tool::ToolContext;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

type FrameSender = mpsc::Sender<Result<SseEvent, Infallible>>;

const FRAME_BUFFER: usize = 32;

pub async fn chat_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Message is required".into()))?;

    state
        .store
        .get_conversation(&user, &conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".into()))?;

    let mut history: Vec<Message> = state
        .store
        .list_messages(&conversation_id)
        .await?
        .iter()
        .map(|m| m.to_history_message())
        .collect();
    history.push(Message::user(message.clone()));

    info!(conversation_id = %conversation_id, user = %user, history = history.len(), "Chat turn started");
    state.events.publish(DomainEvent::TurnStarted {
        conversation_id: conversation_id.clone(),
        user_id: user.clone(),
        timestamp: chrono::Utc::now(),
    });

    let events = state.orchestrator.run(
        history,
        ToolContext {
            user_id: user,
            conversation_id: conversation_id.clone(),
        },
    );

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    tokio::spawn(relay_turn(state, conversation_id, message, events, tx));

    Ok((
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()),
    ))
}

/// Forward the turn's events to the client and persist the turn.
///
/// Persisting happens on `message_complete` (before that frame is
/// forwarded) or when the event stream ends without one. A client that
/// goes away mid-turn gets nothing persisted.
async fn relay_turn(
    state: SharedState,
    conversation_id: String,
    user_message: String,
    mut events: mpsc::Receiver<StreamEvent>,
    tx: FrameSender,
) {
    let mut recorder = TurnRecorder::new();
    let mut persisted = false;

    loop {
        // A client that leaves mid-turn drops `events`, which cancels the orchestrator
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tx.closed() => {
                debug!(conversation_id = %conversation_id, "Client disconnected, turn discarded");
                return;
            }
        };
        let Some(event) = event else {
            break;
        };
        recorder.observe(&event);

        if matches!(event, StreamEvent::MessageComplete { .. }) && !persisted {
            persisted = true;
            if let Err(message) = persist(&state, &conversation_id, &user_message, &recorder).await
                && send(&tx, &StreamEvent::error(message)).await.is_err()
            {
                return;
            }
        }

        if send(&tx, &event).await.is_err() {
            debug!(conversation_id = %conversation_id, "Client disconnected, turn discarded");
            return;
        }
    }

    if !persisted
        && let Err(message) = persist(&state, &conversation_id, &user_message, &recorder).await
        && send(&tx, &StreamEvent::error(message)).await.is_err()
    {
        return;
    }

    let _ = tx.send(Ok(SseEvent::default().data(DONE_FRAME))).await;
}

async fn send(tx: &FrameSender, event: &StreamEvent) -> Result<(), ()> {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            warn!(event = event.type_name(), error = %e, "Dropping unserializable event");
            return Ok(());
        }
    };
    tx.send(Ok(SseEvent::default().data(data))).await.map_err(|_| ())
}

/// Commit the turn. Returns the client-facing error text on failure.
async fn persist(
    state: &SharedState,
    conversation_id: &str,
    user_message: &str,
    recorder: &TurnRecorder,
) -> Result<(), String> {
    let turn = recorder.record();
    match state.store.commit_turn(conversation_id, user_message, turn).await {
        Ok(stored) => {
            info!(
                conversation_id,
                message_id = %stored.id,
                tools = turn.tools.len(),
                failed = recorder.saw_error(),
                "Turn persisted"
            );
            state.events.publish(DomainEvent::TurnPersisted {
                conversation_id: conversation_id.to_string(),
                message_id: stored.id,
                tool_count: turn.tools.len(),
                timestamp: chrono::Utc::now(),
            });
            Ok(())
        }
        Err(e) => {
            error!(conversation_id, error = %e, "Failed to persist turn");
            state
                .events
                .publish(DomainEvent::error("persist_turn", e.to_string()));
            Err(format!("Failed to save message: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::test_support::*;
    use axum::http::StatusCode;
    use blocks_core::error::ProviderError;
    use blocks_core::message::Role;
    use blocks_core::store::ChatStore;
    use blocks_core::stream::DONE_FRAME;
    use blocks_providers::ScriptedProvider;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn frames(body: &str) -> Vec<String> {
        body.split("\n\n")
            .filter_map(|block| {
                block
                    .lines()
                    .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
                    .map(str::to_string)
            })
            .collect()
    }

    fn events(frames: &[String]) -> Vec<Value> {
        frames
            .iter()
            .filter(|f| f.as_str() != DONE_FRAME)
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn text_turn_is_streamed_and_persisted() {
        let h = harness(ScriptedProvider::new().with_text_round(&["Hel", "lo!"]), &[]);
        let conv = h.store.create_conversation("local", None).await.unwrap();

        let response = build_router(h.state)
            .oneshot(json_request(
                "POST",
                &format!("/api/chat/{}", conv.id),
                json!({"message": "Say hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let frames = frames(&body_text(response).await);
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));

        let events = events(&frames);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["content_delta", "content_delta", "message_complete"]);

        let messages = h.store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Say hello");
        assert_eq!(messages[1].content, "Hello!");
        assert!(messages[1].tool_name.is_none());

        let conv = h.store.get_conversation("local", &conv.id).await.unwrap().unwrap();
        assert_eq!(conv.title, "Say hello");
    }

    #[tokio::test]
    async fn tool_turn_stores_tool_columns() {
        let provider = ScriptedProvider::new()
            .with_tool_call_round(
                "call_1",
                "analyze_data",
                &[r#"{"data":"rent,2400\nfood,850","#, r#""analysisType":"summary","title":"Expenses"}"#],
            )
            .with_completion("<!DOCTYPE html><html><body>Report</body></html>")
            .with_text_round(&["Here is your report."]);
        let h = harness(provider, &[]);
        let conv = h.store.create_conversation("local", None).await.unwrap();

        let response = build_router(h.state)
            .oneshot(json_request(
                "POST",
                &format!("/api/chat/{}", conv.id),
                json!({"message": "My expenses: rent 2400, food 850"}),
            ))
            .await
            .unwrap();
        let events = events(&frames(&body_text(response).await));
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec!["tool_call_started", "tool_call_result", "content_delta", "message_complete"]
        );
        assert_eq!(events[1]["result"]["success"], true);

        let messages = h.store.list_messages(&conv.id).await.unwrap();
        let assistant = &messages[1];
        assert_eq!(assistant.tool_name.as_deref(), Some("analyze_data"));
        assert_eq!(assistant.content, "Here is your report.");
        assert_eq!(
            assistant.preview_html(),
            Some("<!DOCTYPE html><html><body>Report</body></html>")
        );
    }

    #[tokio::test]
    async fn failed_turn_still_ends_with_done() {
        let h = harness(
            ScriptedProvider::new().with_failure(ProviderError::Network("down".into())),
            &[],
        );
        let conv = h.store.create_conversation("local", None).await.unwrap();

        let response = build_router(h.state)
            .oneshot(json_request("POST", &format!("/api/chat/{}", conv.id), json!({"message": "hi"})))
            .await
            .unwrap();
        let frames = frames(&body_text(response).await);
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
        let events = events(&frames);
        assert_eq!(events[0]["type"], "error");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let h = harness(ScriptedProvider::new(), &[]);
        let conv = h.store.create_conversation("local", None).await.unwrap();

        let response = build_router(h.state)
            .oneshot(json_request("POST", &format!("/api/chat/{}", conv.id), json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Message is required");
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let h = harness(ScriptedProvider::new(), &[]);
        let response = build_router(h.state)
            .oneshot(json_request("POST", "/api/chat/ghost", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_conversation_is_not_found() {
        let h = harness(ScriptedProvider::new(), &[("t1", "alice")]);
        let conv = h.store.create_conversation("bob", None).await.unwrap();

        let mut req = json_request("POST", &format!("/api/chat/{}", conv.id), json!({"message": "hi"}));
        req.headers_mut().insert("authorization", "Bearer t1".parse().unwrap());
        let response = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn disconnect_mid_turn_persists_nothing_and_stops_the_model() {
        let provider = ScriptedProvider::new()
            .with_tool_call_round(
                "call_1",
                "analyze_data",
                &[r#"{"data":"rent,2400\nfood,850","analysisType":"summary","title":"Expenses"}"#],
            )
            .with_completion("<!DOCTYPE html><html><body>Report</body></html>")
            .with_stall();
        let h = harness(provider, &[]);
        let conv = h.store.create_conversation("local", None).await.unwrap();

        let response = build_router(h.state)
            .oneshot(json_request("POST", &format!("/api/chat/{}", conv.id), json!({"message": "expenses"})))
            .await
            .unwrap();

        // Read until the tool has answered and the model is streaming the follow-up
        let mut body = response.into_body();
        let mut seen = String::new();
        while !seen.contains("tool_call_result") {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                seen.push_str(&String::from_utf8_lossy(&data));
            }
        }
        eventually(|| h.provider.requests().len() == 3).await;
        drop(body);

        eventually(|| h.provider.released_stalls() == 1).await;
        assert!(h.store.list_messages(&conv.id).await.unwrap().is_empty());
        let conv = h.store.get_conversation("local", &conv.id).await.unwrap().unwrap();
        assert_eq!(conv.title, "New Chat");
    }
}
