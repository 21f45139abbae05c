//! `blocks serve`: start the HTTP API server.

use blocks_config::AppConfig;
use tracing::info;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(blocks_core::Error::from)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set BLOCKS_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    println!("Blocks Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    println!("   Store:     {}", config.store.path);
    println!(
        "   Auth:      {}",
        if config.gateway.api_tokens.is_empty() {
            "off (single local user)".to_string()
        } else {
            format!("{} token(s)", config.gateway.api_tokens.len())
        }
    );

    info!(
        model = %config.model,
        store = %config.store.path,
        max_rounds = config.agent.max_rounds,
        round_timeout_secs = config.agent.round_timeout_secs,
        "Gateway starting"
    );
    blocks_gateway::start(config).await?;
    info!("Gateway stopped");

    Ok(())
}
