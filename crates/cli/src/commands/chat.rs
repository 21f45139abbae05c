//! `blocks chat`: interactive or single-message terminal client.
//!
//! Streams the answer as it arrives. When the answer carries a rendered
//! page or report, the HTML is written next to the working directory and
//! its path printed.

use blocks_client::{ApiClient, ChatEvent, ChatSession, TurnOutcome};
use blocks_config::AppConfig;
use blocks_core::stream::StreamEvent;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub struct ChatArgs {
    pub server: Option<String>,
    pub token: Option<String>,
    pub conversation: Option<String>,
    pub message: Option<String>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = match args.server {
        Some(server) => server,
        None => {
            let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
            format!("http://{}:{}", config.gateway.host, config.gateway.port)
        }
    };

    let mut api = ApiClient::new(server);
    if let Some(token) = args.token {
        api = api.with_token(token);
    }
    api.health()
        .await
        .map_err(|e| format!("Gateway at {} is not reachable: {e}", api.base_url()))?;

    let conversation_id = match args.conversation {
        Some(id) => id,
        None => api.create_conversation(None).await?.id,
    };
    let mut session = ChatSession::open(api, conversation_id).await?;
    info!(
        conversation_id = %session.conversation_id(),
        messages = session.state().messages.len(),
        "Chat session opened"
    );

    // Ctrl+C cancels the turn in flight (the server keeps nothing from it),
    // or quits when no turn is running.
    let aborter = session.aborter();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !aborter.abort() {
                std::process::exit(130);
            }
        }
    });

    if let Some(message) = args.message {
        send(&mut session, &message).await?;
        return Ok(());
    }

    println!();
    println!("  Blocks chat, conversation {}", session.conversation_id());
    println!("  Type your message and press Enter. Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        if let Err(e) = send(&mut session, line).await {
            eprintln!("  [Error] {e}");
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

async fn send(session: &mut ChatSession, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    print!("\n  Assistant > ");
    std::io::stdout().flush()?;

    let outcome = session
        .send(message, |event, _state| match event {
            ChatEvent::Stream(StreamEvent::ContentDelta { content }) => {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            ChatEvent::Stream(StreamEvent::ToolCallStarted { tool, .. }) => {
                eprint!("\n  [running {tool}...]");
            }
            ChatEvent::Stream(StreamEvent::ToolCallResult { tool, result }) => match &result.error {
                None => eprintln!("\r  [{tool} done]      "),
                Some(error) => eprintln!("\r  [{tool} failed: {error}]"),
            },
            ChatEvent::Stream(StreamEvent::Error { message }) => eprintln!("\n  [Error] {message}"),
            ChatEvent::Stream(StreamEvent::MessageComplete { .. }) | ChatEvent::Done => {}
        })
        .await?;
    println!("\n");

    if outcome == TurnOutcome::Interrupted {
        debug!(conversation_id = %session.conversation_id(), "Turn interrupted");
        eprintln!("  [Interrupted]");
        return Ok(());
    }

    if let Some(path) = write_preview(session)? {
        println!("  Preview written to {}\n", path.display());
    }
    Ok(())
}

/// Write the latest answer's HTML preview, if it has one.
fn write_preview(session: &ChatSession) -> std::io::Result<Option<PathBuf>> {
    let Some(message) = session.state().last_assistant() else {
        return Ok(None);
    };
    let Some(html) = message.preview_html() else {
        return Ok(None);
    };
    let path = PathBuf::from(format!("blocks-preview-{}.html", message.id));
    std::fs::write(&path, html)?;
    debug!(path = %path.display(), bytes = html.len(), "Preview written");
    Ok(Some(path))
}
