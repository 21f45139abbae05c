//! The chat stream protocol.
//!
//! Every event the orchestrator produces is one [`StreamEvent`]; the gateway
//! writes each as a `data: <json>` SSE frame and closes with [`DONE_FRAME`].

use serde::{Deserialize, Serialize};
use crate::payload::ToolInput;
use crate::tool::ToolResult;

/// JSON payload of the sentinel frame written after the last event.
pub const DONE_FRAME: &str = r#"{"type":"done"}"#;

/// One unit of orchestrator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of assistant text
    ContentDelta { content: String },

    /// A tool is about to run with these arguments
    ToolCallStarted { tool: String, input: ToolInput },

    /// The tool finished (successfully or not)
    ToolCallResult { tool: String, result: ToolResult },

    /// The turn finished normally
    MessageComplete {
        #[serde(rename = "messageId")]
        message_id: String,
    },

    /// Something went wrong; localized or terminal depending on the cause
    Error { message: String },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ContentDelta { .. } => "content_delta",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::MessageComplete { .. } => "message_complete",
            Self::Error { .. } => "error",
        }
    }
}
