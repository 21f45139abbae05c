//! Turn persistence: the ChatStore trait and its records.
//!
//! One chat turn is stored as two rows: the user message and one assistant
//! row that flattens every tool call of the turn into comma-joined names and
//! parallel JSON arrays of inputs and results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::{Message, Role};
use crate::payload::ToolInput;
use crate::tool::ToolResult;

/// Title given to conversations created without one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Characters of the first user message kept in an auto-generated title.
pub const TITLE_MAX_CHARS: usize = 50;

/// Conversations holding at most this many messages get their title
/// regenerated from the user message on commit.
pub const TITLE_MESSAGE_THRESHOLD: i64 = 2;

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Vec<ToolInput>>,
    #[serde(default)]
    pub tool_result: Option<Vec<ToolResult>>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// The row as the model sees it: role and content only.
    pub fn to_history_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Names of the tools invoked in this row, in invocation order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_name
            .as_deref()
            .map(|names| names.split(',').collect())
            .unwrap_or_default()
    }

    /// First renderable HTML document among this row's tool results.
    pub fn preview_html(&self) -> Option<&str> {
        self.tool_result
            .as_deref()?
            .iter()
            .filter_map(|r| r.data.as_ref())
            .find_map(|d| d.preview_html())
    }
}

/// One tool invocation observed during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEventRecord {
    pub name: String,
    pub input: ToolInput,
    pub result: Option<ToolResult>,
}

/// Everything the assistant produced during one turn, across all rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub content: String,
    pub tools: Vec<ToolEventRecord>,
}

impl TurnRecord {
    /// Comma-joined tool names, or `None` when no tool ran.
    pub fn tool_name_column(&self) -> Option<String> {
        if self.tools.is_empty() {
            return None;
        }
        Some(
            self.tools
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn tool_inputs(&self) -> Option<Vec<ToolInput>> {
        if self.tools.is_empty() {
            return None;
        }
        Some(self.tools.iter().map(|t| t.input.clone()).collect())
    }

    /// Results in invocation order. A call that never reported back is
    /// recorded as a failure.
    pub fn tool_results(&self) -> Option<Vec<ToolResult>> {
        if self.tools.is_empty() {
            return None;
        }
        Some(
            self.tools
                .iter()
                .map(|t| {
                    t.result
                        .clone()
                        .unwrap_or_else(|| ToolResult::failure("Tool did not return a result"))
                })
                .collect(),
        )
    }
}

/// A page saved by the page-generation tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub page_type: String,
    pub description: String,
    pub html_content: String,
    pub color_scheme: String,
}

/// Title derived from the first user message.
pub fn conversation_title(user_message: &str) -> String {
    let mut chars = user_message.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// The core ChatStore trait.
///
/// Conversation lookups are scoped to the owning user; a conversation owned
/// by someone else behaves exactly like a missing one.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// A human-readable name for this backend (e.g., "sqlite").
    fn name(&self) -> &str;

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<ConversationRecord, StoreError>;

    /// Conversations of `user_id`, most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError>;

    async fn get_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Delete a conversation and its messages. Returns false if it was not found.
    async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool, StoreError>;

    /// Messages of a conversation in creation order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Atomically append the user message and the assistant row of a turn,
    /// then touch the conversation (applying the title rule).
    ///
    /// Returns the stored assistant row.
    async fn commit_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        turn: &TurnRecord,
    ) -> Result<StoredMessage, StoreError>;

    async fn save_page(&self, page: &PageRecord) -> Result<(), StoreError>;
}
