//! Built-in tool implementations for Blocks.
//!
//! Tools let the assistant hand the user something they can see:
//! a generated page or an analysis report, both rendered as live HTML.

pub mod analyze_data;
pub mod create_page;
pub mod html;
pub mod profile;

pub use analyze_data::AnalyzeDataTool;
pub use create_page::CreatePageTool;
pub use html::{HtmlGenerator, clean_html};

use blocks_core::provider::Provider;
use blocks_core::store::ChatStore;
use blocks_core::tool::ToolRegistry;
use std::sync::Arc;

/// Create the registry with both built-in tools, `create_page` first.
///
/// Both tools generate their HTML with `model`, capped at `max_tokens`.
pub fn default_registry(
    provider: Arc<dyn Provider>,
    store: Arc<dyn ChatStore>,
    model: &str,
    max_tokens: u32,
) -> ToolRegistry {
    let generator = HtmlGenerator::new(provider, model).with_max_tokens(max_tokens);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CreatePageTool::new(generator.clone(), store)));
    registry.register(Arc::new(AnalyzeDataTool::new(generator)));
    tracing::debug!(tools = ?registry.names(), "Tool registry ready");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks_providers::ScriptedProvider;
    use blocks_store::InMemoryStore;

    #[test]
    fn registers_both_tools_in_order() {
        let registry = default_registry(
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryStore::new()),
            "gpt-4.1",
            4000,
        );
        assert_eq!(registry.names(), vec!["create_page", "analyze_data"]);
        assert!(registry.get("analyze_data").is_some());
        assert!(registry.get("shell").is_none());
    }

    #[test]
    fn definitions_carry_schemas() {
        let registry = default_registry(
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryStore::new()),
            "gpt-4.1",
            4000,
        );
        let defs = registry.definitions();
        assert_eq!(defs[1].parameters["required"][0], "data");
        assert!(defs[0].description.contains("mini-app"));
    }
}
