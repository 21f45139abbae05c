//! Blocks CLI: the main entry point.
//!
//! Commands:
//! - `serve`  start the HTTP gateway
//! - `chat`   talk to a running gateway from the terminal
//! - `tools`  list the tools the assistant can call
//! - `init`   write the default config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "blocks",
    about = "Blocks: chat that builds pages and data reports",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with a running gateway
    Chat {
        /// Gateway base URL (defaults to the configured host and port)
        #[arg(long, env = "BLOCKS_SERVER")]
        server: Option<String>,

        /// Bearer token for the gateway
        #[arg(long, env = "BLOCKS_TOKEN")]
        token: Option<String>,

        /// Continue an existing conversation instead of starting a new one
        #[arg(short, long)]
        conversation: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the registered tools
    Tools,

    /// Write the default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            server,
            token,
            conversation,
            message,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                server,
                token,
                conversation,
                message,
            })
            .await?
        }
        Commands::Tools => commands::tools::run()?,
        Commands::Init => commands::init::run()?,
    }

    Ok(())
}
