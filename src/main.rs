//! careline CLI
//!
//! Drives the chat engine from a terminal: watch a conversation, send a
//! message, upload an attachment, or fetch one for opening.

use anyhow::Context;
use careline::api::HttpChatApi;
use careline::config::Config;
use careline::messages::Message;
use careline::platform::{TerminalDelivery, TerminalRouter};
use careline::retrieve::RetrievalPipeline;
use careline::sync::{ConversationSession, PollOutcome, SyncEngine, SyncState};
use careline::upload::UploadPipeline;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Careline - clinic chat client
#[derive(Parser)]
#[command(name = "careline")]
#[command(about = "Patient-clinic chat sync and attachment delivery")]
struct Cli {
    /// Base address of the clinic API (overrides CARELINE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (overrides CARELINE_TOKEN)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a conversation and print messages as they arrive
    Watch {
        /// Conversation id
        conversation: String,
    },

    /// Send a text message
    Send {
        /// Conversation id
        conversation: String,

        /// Message text
        text: String,
    },

    /// Upload an attachment
    Upload {
        /// Conversation id
        conversation: String,

        /// Local file to upload
        file: PathBuf,

        /// Mime type of the file
        #[arg(long)]
        mime: String,
    },

    /// Download an attachment and open/share it
    Open {
        /// Stored attachment URL (absolute or conversation-relative)
        url: String,

        /// Original filename
        #[arg(long)]
        name: String,

        /// Mime type of the attachment
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,

        /// Keep the local copy instead of sharing it
        #[arg(long)]
        keep: bool,

        /// How many times to try before giving up
        #[arg(long, default_value = "3")]
        attempts: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::default();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(token) = cli.token {
        config.auth_token = Some(token);
    }

    match cli.command {
        Commands::Watch { conversation } => cmd_watch(&config, &conversation).await,
        Commands::Send { conversation, text } => cmd_send(&config, &conversation, &text).await,
        Commands::Upload {
            conversation,
            file,
            mime,
        } => cmd_upload(&config, &conversation, &file, &mime).await,
        Commands::Open {
            url,
            name,
            mime,
            keep,
            attempts,
        } => cmd_open(&config, &url, &name, &mime, keep, attempts).await,
    }
}

fn build_engine(
    config: &Config,
) -> anyhow::Result<SyncEngine<HttpChatApi, TerminalDelivery, TerminalRouter>> {
    let api = HttpChatApi::new(config).context("building API client")?;
    Ok(SyncEngine::new(api, TerminalDelivery, TerminalRouter))
}

fn print_message(message: &Message) {
    let who = if message.is_from_counterparty() {
        "clinic"
    } else {
        "you"
    };
    match &message.attachment {
        Some(attachment) => println!(
            "[{}] {}: {} <{} {} bytes>",
            message.created_at.format("%H:%M:%S"),
            who,
            message.body,
            attachment.name,
            attachment.size_bytes
        ),
        None => println!(
            "[{}] {}: {}",
            message.created_at.format("%H:%M:%S"),
            who,
            message.body
        ),
    }
}

async fn cmd_watch(config: &Config, conversation: &str) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let mut session = ConversationSession::new(conversation);

    info!(conversation, "watching conversation");

    let mut printed = 0;
    let mut last_state = SyncState::Idle;
    loop {
        // polls are strictly sequential; the next tick waits for this one
        match engine.poll(&mut session).await {
            PollOutcome::Replaced { .. } => {
                let messages = session.messages();
                if printed > messages.len() {
                    // server rewrote history; reprint the whole view
                    printed = 0;
                }
                for message in &messages[printed..] {
                    print_message(message);
                }
                printed = messages.len();
            }
            PollOutcome::Locked => {
                if last_state != SyncState::Locked {
                    warn!("chat is awaiting clinic approval");
                }
            }
            PollOutcome::Unauthorized => {
                if last_state != SyncState::Unauthorized {
                    warn!("session is no longer authorized");
                }
            }
            PollOutcome::Failed => {}
        }
        last_state = session.state();

        tokio::time::sleep(config.poll_interval).await;
    }
}

async fn cmd_send(config: &Config, conversation: &str, text: &str) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let mut session = ConversationSession::new(conversation);

    // load the current view first so the post-send refresh has a baseline
    engine.poll(&mut session).await;
    engine
        .send_text(&mut session, text)
        .await
        .context("sending message")?;

    println!("sent ({} messages in conversation)", session.messages().len());
    Ok(())
}

async fn cmd_upload(
    config: &Config,
    conversation: &str,
    file: &std::path::Path,
    mime: &str,
) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let uploader = UploadPipeline::new(config).context("building upload pipeline")?;
    let mut session = ConversationSession::new(conversation);

    engine.poll(&mut session).await;
    match engine
        .upload(&mut session, &uploader, file, Some(mime))
        .await
    {
        Ok(_) => {
            println!("uploaded {}", file.display());
            Ok(())
        }
        Err(err) => Err(anyhow::anyhow!("{err}")),
    }
}

async fn cmd_open(
    config: &Config,
    url: &str,
    name: &str,
    mime: &str,
    keep: bool,
    attempts: u32,
) -> anyhow::Result<()> {
    let pipeline =
        RetrievalPipeline::new(config, TerminalDelivery).context("building retrieval pipeline")?;

    let path = pipeline
        .download(url, name, attempts)
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;

    if keep {
        println!("{}", path.display());
    } else {
        pipeline.share(&path, mime).context("sharing attachment")?;
    }
    Ok(())
}
