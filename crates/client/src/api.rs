//! HTTP client for the Blocks gateway.

use crate::error::ClientError;
use crate::event::ChatEvent;
use blocks_core::sse::SseDecoder;
use blocks_core::store::StoredMessage;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    pub conversation: ConversationSummary,
    pub messages: Vec<StoredMessage>,
}

#[derive(Deserialize)]
struct ConversationList {
    conversations: Vec<ConversationSummary>,
}

#[derive(Deserialize)]
struct ConversationEnvelope {
    conversation: ConversationSummary,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// A chat turn in flight.
///
/// Events arrive on `events`; the channel closes after the done sentinel,
/// when the connection drops, or when the turn is aborted.
pub struct ChatStream {
    pub events: mpsc::Receiver<ChatEvent>,
    abort: AbortHandle,
}

impl ChatStream {
    /// A handle that stops reading the response and closes the connection.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}/api{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self.request(reqwest::Method::GET, "/health").send().await?;
        check(response).await.map(|_| ())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let list: ConversationList = json(self.request(reqwest::Method::GET, "/conversations")).await?;
        Ok(list.conversations)
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationSummary, ClientError> {
        let body = match title {
            Some(title) => serde_json::json!({ "title": title }),
            None => serde_json::json!({}),
        };
        let envelope: ConversationEnvelope =
            json(self.request(reqwest::Method::POST, "/conversations").json(&body)).await?;
        Ok(envelope.conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ClientError> {
        json(self.request(reqwest::Method::GET, &format!("/conversations/{id}"))).await
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<ConversationSummary, ClientError> {
        let envelope: ConversationEnvelope = json(
            self.request(reqwest::Method::PATCH, &format!("/conversations/{id}"))
                .json(&serde_json::json!({ "title": title })),
        )
        .await?;
        Ok(envelope.conversation)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/conversations/{id}"))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    /// Send a message and start decoding the SSE response.
    pub async fn stream_chat(&self, conversation_id: &str, message: &str) -> Result<ChatStream, ClientError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/chat/{conversation_id}"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await?;
        let response = check(response).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "Chat stream interrupted");
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    if let Some(event) = ChatEvent::decode(&payload)
                        && tx.send(event).await.is_err()
                    {
                        return;
                    }
                }
            }

            if let Some(event) = decoder.finish().as_deref().and_then(ChatEvent::decode) {
                let _ = tx.send(event).await;
            }
            debug!("Chat stream closed");
        });

        Ok(ChatStream {
            events: rx,
            abort: task.abort_handle(),
        })
    }
}

async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = check(request.send().await?).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

/// Turn a non-success response into [`ClientError::Status`], using the
/// server's `{"error": ...}` body when it has one.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
