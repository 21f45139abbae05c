//! Message domain types.
//!
//! A `Message` is one entry of the history fed back into the model on every
//! round: user input, assistant output (optionally carrying tool calls), the
//! system instruction, or a tool result answering one of those calls.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse a stored role column. Unknown values are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the model-facing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content (may be empty for assistant messages that only call tools)
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an assistant message that requested tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<MessageToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as the raw JSON string produced by the model
    pub arguments: String,
}

/// Check that every `tool` message answers a call made by the assistant
/// message directly before it (sibling tool results may sit in between).
pub fn tool_results_are_anchored(history: &[Message]) -> bool {
    let mut open_calls: Option<&[MessageToolCall]> = None;

    for message in history {
        match message.role {
            Role::Assistant => open_calls = Some(&message.tool_calls),
            Role::Tool => {
                let Some(calls) = open_calls else {
                    return false;
                };
                let Some(id) = message.tool_call_id.as_deref() else {
                    return false;
                };
                if !calls.iter().any(|c| c.id == id) {
                    return false;
                }
            }
            Role::User | Role::System => open_calls = None,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "analyze_data".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello!");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn tool_fields_are_omitted_when_empty() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn role_parse_round_trips_column_values() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("robot"), None);
    }

    #[test]
    fn anchored_tool_result_is_accepted() {
        let history = vec![
            Message::user("analyze this"),
            Message::assistant_with_tool_calls("", vec![call("call_1")]),
            Message::tool_result("call_1", "{}"),
        ];
        assert!(tool_results_are_anchored(&history));
    }

    #[test]
    fn tool_result_without_matching_call_is_rejected() {
        let history = vec![
            Message::assistant_with_tool_calls("", vec![call("call_1")]),
            Message::tool_result("call_2", "{}"),
        ];
        assert!(!tool_results_are_anchored(&history));
    }

    #[test]
    fn tool_result_after_user_message_is_rejected() {
        let history = vec![
            Message::assistant_with_tool_calls("", vec![call("call_1")]),
            Message::user("interrupting"),
            Message::tool_result("call_1", "{}"),
        ];
        assert!(!tool_results_are_anchored(&history));
    }
}
