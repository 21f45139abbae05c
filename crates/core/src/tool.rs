//! Tool trait: the abstraction over assistant capabilities.
//!
//! Tools let the assistant produce artifacts the user can see: generated
//! pages and data-analysis reports. Executors never fail outward; every
//! error is folded into a [`ToolResult`] so the model can react to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::ToolError;
use crate::payload::{ToolInput, ToolOutput};
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ToolOutput>,

    /// Human-readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: ToolOutput) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Fold an executor outcome into a result, prefixing the failure text.
    pub fn from_outcome(outcome: Result<ToolOutput, ToolError>, prefix: &str) -> Self {
        match outcome {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(format!("{prefix}: {e}")),
        }
    }
}

/// Who a tool runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub user_id: String,
    pub conversation_id: String,
}

/// The core Tool trait.
///
/// Each tool is registered once in the [`ToolRegistry`] at startup and made
/// available to the orchestrator.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "create_page").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool. Always resolves to a result value.
    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolResult;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, in registration order.
///
/// Built once at startup and then shared read-only (usually behind an `Arc`).
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces it in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    pub fn list(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Tool definitions for the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { self.0 }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolResult {
            match input {
                ToolInput::Other(value) => ToolResult::ok(ToolOutput::Other(value)),
                _ => ToolResult::failure("unexpected input"),
            }
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            conversation_id: "c1".into(),
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("zeta")));
        registry.register(Arc::new(EchoTool("alpha")));
        assert_eq!(registry.names(), vec!["zeta", "alpha"]);
        assert_eq!(registry.definitions()[1].name, "alpha");
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("a")));
        registry.register(Arc::new(EchoTool("b")));
        registry.register(Arc::new(EchoTool("a")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn lookup_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("echo")));
        assert!(registry.get("missing").is_none());

        let tool = registry.get("echo").unwrap();
        let result = tool.execute(ToolInput::Other(json!({"text": "hi"})), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.data, Some(ToolOutput::Other(json!({"text": "hi"}))));
    }

    #[test]
    fn failure_result_serializes_without_data() {
        let result = ToolResult::from_outcome(
            Err(ToolError::InvalidArguments("no rows".into())),
            "Analysis failed",
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"success": false, "error": "Analysis failed: Invalid tool arguments: no rows"})
        );
    }
}
