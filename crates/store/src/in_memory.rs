//! In-memory chat store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use blocks_core::error::StoreError;
use blocks_core::message::Role;
use blocks_core::store::{
    conversation_title, ChatStore, ConversationRecord, PageRecord, StoredMessage, TurnRecord,
    DEFAULT_TITLE, TITLE_MESSAGE_THRESHOLD,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    conversations: Vec<ConversationRecord>,
    messages: Vec<StoredMessage>,
    pages: Vec<PageRecord>,
}

/// A chat store kept entirely in process memory.
///
/// Every operation takes the single lock once, so a committed turn is
/// visible all at once or not at all.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages saved so far.
    pub async fn page_count(&self) -> usize {
        self.state.read().await.pages.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    fn name(&self) -> &str { "in_memory" }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<ConversationRecord, StoreError> {
        let now = Utc::now();
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TITLE).to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.conversations.push(record.clone());
        Ok(record)
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let state = self.state.read().await;
        // Newest insertions first on ties, matching the SQLite rowid tie-break
        let mut owned: Vec<ConversationRecord> = state
            .conversations
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .iter()
            .find(|c| c.id == id && c.user_id == user_id)
            .cloned())
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let mut state = self.state.write().await;
        let Some(conv) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id && c.user_id == user_id)
        else {
            return Ok(None);
        };
        conv.title = title.to_string();
        conv.updated_at = Utc::now();
        Ok(Some(conv.clone()))
    }

    async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.conversations.len();
        state.conversations.retain(|c| !(c.id == id && c.user_id == user_id));
        if state.conversations.len() == before {
            return Ok(false);
        }
        state.messages.retain(|m| m.conversation_id != id);
        Ok(true)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn commit_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        turn: &TurnRecord,
    ) -> Result<StoredMessage, StoreError> {
        let mut state = self.state.write().await;
        if !state.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
        }

        let now = Utc::now();
        state.messages.push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: Role::User,
            content: user_message.to_string(),
            tool_name: None,
            tool_input: None,
            tool_result: None,
            created_at: now,
        });

        let assistant = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: Role::Assistant,
            content: turn.content.clone(),
            tool_name: turn.tool_name_column(),
            tool_input: turn.tool_inputs(),
            tool_result: turn.tool_results(),
            created_at: now,
        };
        state.messages.push(assistant.clone());

        let count = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count() as i64;

        if let Some(conv) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            if count <= TITLE_MESSAGE_THRESHOLD {
                conv.title = conversation_title(user_message);
            }
            conv.updated_at = now;
        }

        Ok(assistant)
    }

    async fn save_page(&self, page: &PageRecord) -> Result<(), StoreError> {
        self.state.write().await.pages.push(page.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_then_list() {
        let store = InMemoryStore::new();
        let conv = store.create_conversation("local", None).await.unwrap();
        store.commit_turn(&conv.id, "Hello there", &TurnRecord {
            content: "Hi!".into(),
            tools: vec![],
        }).await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hi!");

        let conv = store.get_conversation("local", &conv.id).await.unwrap().unwrap();
        assert_eq!(conv.title, "Hello there");
    }

    #[tokio::test]
    async fn most_recently_updated_first() {
        let store = InMemoryStore::new();
        let a = store.create_conversation("local", Some("a")).await.unwrap();
        let b = store.create_conversation("local", Some("b")).await.unwrap();
        store.commit_turn(&a.id, "bump", &TurnRecord::default()).await.unwrap();

        let listed = store.list_conversations("local").await.unwrap();
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[tokio::test]
    async fn delete_cascades_and_respects_owner() {
        let store = InMemoryStore::new();
        let conv = store.create_conversation("alice", None).await.unwrap();
        store.commit_turn(&conv.id, "x", &TurnRecord::default()).await.unwrap();

        assert!(!store.delete_conversation("bob", &conv.id).await.unwrap());
        assert!(store.delete_conversation("alice", &conv.id).await.unwrap());
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_conversation_commit_fails() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.commit_turn("ghost", "x", &TurnRecord::default()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
