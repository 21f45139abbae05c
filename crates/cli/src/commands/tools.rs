//! `blocks tools`: list the tools the assistant can call.

use blocks_core::provider::Provider;
use blocks_core::store::ChatStore;
use blocks_providers::ScriptedProvider;
use blocks_store::InMemoryStore;
use std::sync::Arc;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Only the definitions are read, so an offline provider and store suffice.
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::new());
    let store: Arc<dyn ChatStore> = Arc::new(InMemoryStore::new());
    let registry = blocks_tools::default_registry(provider, store, "offline", 0);

    println!("Registered tools ({}):", registry.len());
    for tool in registry.list() {
        println!();
        println!("  {}", tool.name());
        println!("    {}", tool.description());
        if let Some(required) = tool.parameters_schema()["required"].as_array() {
            let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
            println!("    required: {}", names.join(", "));
        }
    }

    Ok(())
}
