//! Main module for the memchat CLI.
//!
//! Handles command parsing, configuration loading, and wiring the session
//! loop to its collaborators (archive, similarity index, model backend).
//!
//! # Examples
//!
//! ```sh
//! memchat chat
//! memchat chat claude-3.5
//! memchat saved
//! memchat saved -c 2
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::error::Error;
use tracing::debug;

use memchat::api::{Endpoint, LlmBackend};
use memchat::chat_store::ChatArchive;
use memchat::commands::{Cli, Commands};
use memchat::config::{MemchatConfig, ensure_config_exists, load_config};
use memchat::embeddings::MiniLmEmbedder;
use memchat::models::{self, resolve};
use memchat::session::SessionController;
use memchat::vector_store::VectorStore;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = memchat::config_file()?;

    match cli.command {
        Commands::Init => {
            if ensure_config_exists(&config_path)? {
                println!("Wrote {}", config_path.display());
            } else {
                println!("Config already exists at {}", config_path.display());
            }
            Ok(())
        }
        Commands::Models => {
            println!("{}", models::list_supported());
            Ok(())
        }
        Commands::Chat { model } => {
            ensure_config_exists(&config_path)?;
            let config = load_config(&config_path)?;
            let name = model.unwrap_or_else(|| config.default_model.clone());
            chat(config, &name).await
        }
        Commands::Saved { continue_chat } => {
            ensure_config_exists(&config_path)?;
            let config = load_config(&config_path)?;
            saved(config, continue_chat).await
        }
    }
}

/// Start a fresh conversation on `name`.
async fn chat(config: MemchatConfig, name: &str) -> Result<(), Box<dyn Error>> {
    let info = resolve(name)?;
    // validate the credential before loading the embedding model
    Endpoint::for_model(info, &config)?;

    debug!(model = info.alias, "starting chat session");
    let (archive, index) = open_stores()?;
    let backend = LlmBackend::new(config.clone());
    let mut session = SessionController::new(archive, index, backend, config, info);
    session.run().await?;
    Ok(())
}

/// List saved conversations, or continue the n-th one.
async fn saved(config: MemchatConfig, continue_chat: Option<usize>) -> Result<(), Box<dyn Error>> {
    let archive = ChatArchive::open(memchat::chats_dir()?)?;
    let favorites = archive.favorites()?;

    let Some(position) = continue_chat else {
        if favorites.is_empty() {
            println!("No saved conversations yet. Use \\save inside a chat to keep one.");
        }
        for (i, record) in favorites.iter().enumerate() {
            println!(
                "{:>3}. {} ({}, {} messages, updated {})",
                i + 1,
                record.title,
                record.model,
                record.messages.len(),
                record.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    };

    let record = position
        .checked_sub(1)
        .and_then(|i| favorites.get(i))
        .cloned()
        .ok_or_else(|| format!("no saved conversation number {position}"))?;
    let info = resolve(&record.model)?;
    Endpoint::for_model(info, &config)?;

    debug!(id = %record.id, "continuing saved conversation");
    let (archive, index) = open_stores()?;
    let backend = LlmBackend::new(config.clone());
    let mut session = SessionController::resume(archive, index, backend, config, record)?;
    session.run().await?;
    Ok(())
}

fn open_stores() -> Result<(ChatArchive, VectorStore), Box<dyn Error>> {
    let archive = ChatArchive::open(memchat::chats_dir()?)?;
    println!("Loading embedding model...");
    let embedder = MiniLmEmbedder::load()?;
    let index = VectorStore::open(memchat::vector_store_base()?, Box::new(embedder))?;
    Ok((archive, index))
}
