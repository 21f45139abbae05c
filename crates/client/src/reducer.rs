//! The client-side chat state machine: `idle -> streaming -> idle`.
//!
//! Text is accumulated locally while a turn streams, but once the turn ends
//! the authoritative message list is reloaded from the server. The reducer
//! itself does no I/O; it asks for the reload through [`Effect::Refetch`].

use crate::event::ChatEvent;
use blocks_core::message::Role;
use blocks_core::store::StoredMessage;
use blocks_core::stream::StreamEvent;
use chrono::Utc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
}

/// Work the reducer asks its owner to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Reload the conversation. `local_content` is the text accumulated
    /// during the turn, for use when the reload fails.
    Refetch { local_content: String },
}

#[derive(Debug, Default)]
pub struct ChatState {
    pub conversation_id: String,
    pub messages: Vec<StoredMessage>,
    pub phase: Phase,
    /// Assistant text received so far in the current turn.
    pub streaming_content: String,
    /// Tool currently running, for a busy indicator.
    pub active_tool: Option<String>,
    /// Error events seen during the current turn.
    pub errors: Vec<String>,
    local_ids: u64,
}

impl ChatState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Self::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    /// Start a turn: add the user message optimistically and enter `streaming`.
    pub fn begin(&mut self, user_message: &str) {
        self.push_local(Role::User, user_message);
        self.phase = Phase::Streaming;
        self.streaming_content.clear();
        self.active_tool = None;
        self.errors.clear();
    }

    pub fn apply(&mut self, event: &ChatEvent) -> Option<Effect> {
        match event {
            ChatEvent::Stream(StreamEvent::ContentDelta { content }) => {
                self.streaming_content.push_str(content);
                None
            }
            ChatEvent::Stream(StreamEvent::ToolCallStarted { tool, .. }) => {
                self.active_tool = Some(tool.clone());
                None
            }
            ChatEvent::Stream(StreamEvent::ToolCallResult { .. }) => {
                self.active_tool = None;
                None
            }
            // Stays in `streaming`; the done sentinel always follows.
            ChatEvent::Stream(StreamEvent::Error { message }) => {
                self.errors.push(message.clone());
                None
            }
            ChatEvent::Stream(StreamEvent::MessageComplete { .. }) | ChatEvent::Done => self.settle(),
        }
    }

    /// The stream ended without a completion (aborted or disconnected).
    /// Leaves `streaming` and returns whatever text had arrived.
    pub fn interrupt(&mut self) -> String {
        self.phase = Phase::Idle;
        self.active_tool = None;
        std::mem::take(&mut self.streaming_content)
    }

    /// Replace local state with the server's record of the conversation.
    pub fn replace_messages(&mut self, messages: Vec<StoredMessage>) {
        self.messages = messages;
    }

    /// Keep locally accumulated text as an assistant message.
    pub fn push_local_assistant(&mut self, content: &str) {
        if !content.is_empty() {
            self.push_local(Role::Assistant, content);
        }
    }

    /// The latest assistant message, if any.
    pub fn last_assistant(&self) -> Option<&StoredMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    fn settle(&mut self) -> Option<Effect> {
        if !self.is_streaming() {
            return None;
        }
        let local_content = self.interrupt();
        Some(Effect::Refetch { local_content })
    }

    fn push_local(&mut self, role: Role, content: &str) {
        self.local_ids += 1;
        self.messages.push(StoredMessage {
            id: format!("local-{}", self.local_ids),
            conversation_id: self.conversation_id.clone(),
            role,
            content: content.to_string(),
            tool_name: None,
            tool_input: None,
            tool_result: None,
            created_at: Utc::now(),
        });
    }
}
