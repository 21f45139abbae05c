//! Conversation CRUD.
//!
//! - `GET    /api/conversations`       list the caller's conversations
//! - `POST   /api/conversations`       create one
//! - `GET    /api/conversations/{id}`  one conversation with its messages
//! - `PATCH  /api/conversations/{id}`  rename
//! - `DELETE /api/conversations/{id}`  delete with its messages

use crate::{ApiError, AuthUser, SharedState};
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use blocks_core::store::{ConversationRecord, StoredMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConversationRecord> for ConversationDto {
    fn from(c: ConversationRecord) -> Self {
        Self {
            id: c.id,
            title: c.title,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: ConversationDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationDetailResponse {
    pub conversation: ConversationDto,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    #[serde(default)]
    title: Option<String>,
}

fn not_found() -> ApiError {
    ApiError::NotFound("Conversation not found".into())
}

pub async fn list_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = state.store.list_conversations(&user).await?;
    Ok(Json(ConversationListResponse {
        conversations: conversations.into_iter().map(Into::into).collect(),
    }))
}

/// The body is optional; an absent or empty body creates a "New Chat".
pub async fn create_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<ConversationResponse>), ApiError> {
    let request: CreateRequest = if body.is_empty() {
        CreateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let conversation = state
        .store
        .create_conversation(&user, request.title.as_deref())
        .await?;
    info!(conversation_id = %conversation.id, user = %user, "Conversation created");

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            conversation: conversation.into(),
        }),
    ))
}

pub async fn get_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let conversation = state
        .store
        .get_conversation(&user, &id)
        .await?
        .ok_or_else(not_found)?;
    let messages = state.store.list_messages(&id).await?;

    Ok(Json(ConversationDetailResponse {
        conversation: conversation.into(),
        messages,
    }))
}

pub async fn rename_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ConversationResponse>, ApiError> {
    let title = serde_json::from_slice::<RenameRequest>(&body)
        .ok()
        .and_then(|r| r.title)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Title is required".into()))?;

    let conversation = state
        .store
        .rename_conversation(&user, &id, &title)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(ConversationResponse {
        conversation: conversation.into(),
    }))
}

pub async fn delete_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_conversation(&user, &id).await? {
        return Err(not_found());
    }
    info!(conversation_id = %id, "Conversation deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}
