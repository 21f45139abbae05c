//! SQLite backend.
//!
//! Uses a single SQLite database file with three tables:
//! - `conversations`: one row per conversation, owned by a user
//! - `messages`: append-only turn rows, cascading on conversation delete
//! - `pages`: pages generated by the page tool
//!
//! A turn is committed in one transaction so an aborted stream never leaves
//! a user message without its assistant row.

use async_trait::async_trait;
use blocks_core::error::StoreError;
use blocks_core::message::Role;
use blocks_core::store::{
    conversation_title, ChatStore, ConversationRecord, PageRecord, StoredMessage, TurnRecord,
    DEFAULT_TITLE, TITLE_MESSAGE_THRESHOLD,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A production SQLite chat store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");

        if !in_memory {
            let file = path.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            if let Some(dir) = Path::new(file).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Storage(format!("Failed to create {}: {e}", dir.display()))
                })?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to ":memory:" is a separate database, so keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite chat store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations: creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL DEFAULT 'New Chat',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL
                                 REFERENCES conversations(id) ON DELETE CASCADE,
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                tool_name        TEXT,
                tool_input       TEXT,
                tool_result      TEXT,
                created_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id            TEXT PRIMARY KEY,
                user_id       TEXT NOT NULL,
                title         TEXT NOT NULL,
                page_type     TEXT NOT NULL,
                description   TEXT,
                html_content  TEXT NOT NULL,
                color_scheme  TEXT NOT NULL DEFAULT 'dark',
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("pages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationRecord, StoreError> {
        Ok(ConversationRecord {
            id: column(row, "id")?,
            user_id: column(row, "user_id")?,
            title: column(row, "title")?,
            created_at: parse_timestamp(&column::<String>(row, "created_at")?)?,
            updated_at: parse_timestamp(&column::<String>(row, "updated_at")?)?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMessage, StoreError> {
        let role: String = column(row, "role")?;
        let role = Role::parse(&role)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role}'")))?;

        Ok(StoredMessage {
            id: column(row, "id")?,
            conversation_id: column(row, "conversation_id")?,
            role,
            content: column(row, "content")?,
            tool_name: column(row, "tool_name")?,
            tool_input: parse_json_column(column(row, "tool_input")?)?,
            tool_result: parse_json_column(column(row, "tool_result")?)?,
            created_at: parse_timestamp(&column::<String>(row, "created_at")?)?,
        })
    }

    async fn fetch_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT conversation failed: {e}")))?;

        row.as_ref().map(Self::row_to_conversation).transpose()
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed-width so text ordering matches time ordering
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
}

fn parse_json_column<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, StoreError> {
    raw.map(|json| {
        serde_json::from_str(&json)
            .map_err(|e| StoreError::QueryFailed(format!("bad JSON column: {e}")))
    })
    .transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("serialize: {e}")))
}

#[async_trait]
impl ChatStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

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

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.title)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT conversation failed: {e}")))?;

        debug!(conversation_id = %record.id, user_id, "Conversation created");
        Ok(record)
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT conversations failed: {e}")))?;

        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        self.fetch_conversation(user_id, id).await
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(title)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE conversation failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_conversation(user_id, id).await
    }

    async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let owned: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("SELECT conversation failed: {e}")))?;
        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE messages failed: {e}")))?;

        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE conversation failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(conversation_id = id, "Conversation deleted");
        Ok(true)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, tool_name, tool_input, tool_result, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT messages failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn commit_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        turn: &TurnRecord,
    ) -> Result<StoredMessage, StoreError> {
        let now = Utc::now();
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
        let tool_input = assistant.tool_input.as_ref().map(to_json).transpose()?;
        let tool_result = assistant.tool_result.as_ref().map(to_json).transpose()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT conversation failed: {e}")))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
        }

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, ?, 'user', ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(user_message)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT user message failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, role, content, tool_name, tool_input, tool_result, created_at)
            VALUES (?, ?, 'assistant', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assistant.id)
        .bind(conversation_id)
        .bind(&assistant.content)
        .bind(&assistant.tool_name)
        .bind(tool_input)
        .bind(tool_result)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT assistant message failed: {e}")))?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT messages failed: {e}")))?;

        let touched = if count <= TITLE_MESSAGE_THRESHOLD {
            sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?")
                .bind(conversation_title(user_message))
                .bind(timestamp(now))
                .bind(conversation_id)
                .execute(&mut *tx)
                .await
        } else {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(timestamp(now))
                .bind(conversation_id)
                .execute(&mut *tx)
                .await
        };
        touched.map_err(|e| StoreError::Storage(format!("UPDATE conversation failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(
            conversation_id,
            message_id = %assistant.id,
            tools = turn.tools.len(),
            "Turn committed"
        );
        Ok(assistant)
    }

    async fn save_page(&self, page: &PageRecord) -> Result<(), StoreError> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO pages
                (id, user_id, title, page_type, description, html_content, color_scheme, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&page.id)
        .bind(&page.user_id)
        .bind(&page.title)
        .bind(&page.page_type)
        .bind(&page.description)
        .bind(&page.html_content)
        .bind(&page.color_scheme)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT page failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks_core::payload::{ToolInput, ToolOutput};
    use blocks_core::store::ToolEventRecord;
    use blocks_core::tool::ToolResult;
    use serde_json::json;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn two_tool_turn() -> TurnRecord {
        TurnRecord {
            content: "Here you go!".into(),
            tools: vec![
                ToolEventRecord {
                    name: "analyze_data".into(),
                    input: ToolInput::Other(json!({"data": "a,b\n1,2"})),
                    result: Some(ToolResult::ok(ToolOutput::Other(json!({"reportHtml": "<html/>"})))),
                },
                ToolEventRecord {
                    name: "create_page".into(),
                    input: ToolInput::Other(json!({"title": "x"})),
                    result: Some(ToolResult::failure("Failed to create page: boom")),
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_and_list_conversations() {
        let store = test_store().await;
        let first = store.create_conversation("alice", None).await.unwrap();
        assert_eq!(first.title, "New Chat");
        store.create_conversation("alice", Some("Budget")).await.unwrap();
        store.create_conversation("bob", None).await.unwrap();

        let listed = store.list_conversations("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "Budget");
    }

    #[tokio::test]
    async fn conversations_are_scoped_to_owner() {
        let store = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();
        assert!(store.get_conversation("bob", &conv.id).await.unwrap().is_none());
        assert!(store.rename_conversation("bob", &conv.id, "x").await.unwrap().is_none());
        assert!(!store.delete_conversation("bob", &conv.id).await.unwrap());
        assert!(store.get_conversation("alice", &conv.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn turn_round_trip_preserves_tool_order() {
        let store = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();
        let saved = store.commit_turn(&conv.id, "Analyze this", &two_tool_turn()).await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Analyze this");
        assert!(messages[0].tool_name.is_none());

        let assistant = &messages[1];
        assert_eq!(assistant.id, saved.id);
        assert_eq!(assistant.tool_name.as_deref(), Some("analyze_data,create_page"));
        let inputs = assistant.tool_input.as_ref().unwrap();
        assert_eq!(inputs[0], ToolInput::Other(json!({"data": "a,b\n1,2"})));
        let results = assistant.tool_result.as_ref().unwrap();
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some("Failed to create page: boom"));
        assert_eq!(assistant.preview_html(), Some("<html/>"));
    }

    #[tokio::test]
    async fn first_turn_sets_title_later_turns_do_not() {
        let store = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();
        let long = "x".repeat(80);

        store.commit_turn(&conv.id, &long, &TurnRecord::default()).await.unwrap();
        let after_first = store.get_conversation("alice", &conv.id).await.unwrap().unwrap();
        assert_eq!(after_first.title, format!("{}...", "x".repeat(50)));

        store.commit_turn(&conv.id, "second question", &TurnRecord::default()).await.unwrap();
        let after_second = store.get_conversation("alice", &conv.id).await.unwrap().unwrap();
        assert_eq!(after_second.title, after_first.title);
        assert!(after_second.updated_at >= after_first.updated_at);
    }

    #[tokio::test]
    async fn commit_to_missing_conversation_writes_nothing() {
        let store = test_store().await;
        let err = store
            .commit_turn("nope", "hello", &TurnRecord::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.list_messages("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_messages() {
        let store = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();
        store.commit_turn(&conv.id, "hi", &TurnRecord::default()).await.unwrap();

        assert!(store.delete_conversation("alice", &conv.id).await.unwrap());
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
        assert!(store.list_conversations("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_updates_title() {
        let store = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();
        let renamed = store
            .rename_conversation("alice", &conv.id, "Quarterly numbers")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.title, "Quarterly numbers");
    }

    #[tokio::test]
    async fn save_page_persists() {
        let store = test_store().await;
        store
            .save_page(&PageRecord {
                id: "p1".into(),
                user_id: "alice".into(),
                title: "Contact".into(),
                page_type: "form".into(),
                description: "A form".into(),
                html_content: "<!DOCTYPE html>".into(),
                color_scheme: "dark".into(),
            })
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE user_id = 'alice'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");
        let path = path.to_str().unwrap();

        let conv_id = {
            let store = SqliteStore::new(path).await.unwrap();
            let conv = store.create_conversation("alice", None).await.unwrap();
            store.commit_turn(&conv.id, "persist me", &TurnRecord::default()).await.unwrap();
            store.pool.close().await;
            conv.id
        };

        let reopened = SqliteStore::new(path).await.unwrap();
        let messages = reopened.list_messages(&conv_id).await.unwrap();
        assert_eq!(messages[0].content, "persist me");
    }
}
