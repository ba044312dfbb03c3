//! # memchat (library root)
//!
//! Core plumbing for the **memchat** CLI, a conversational assistant that
//! augments every turn with semantically relevant history retrieved from
//! prior conversations:
//! - Backend selection and completion calls (`api`).
//! - Conversation persistence (`chat_store`) and the similarity index over
//!   every message ever exchanged (`vector_store`, `embeddings`).
//! - Per-turn context assembly joining the two (`context`).
//! - The interactive session state machine (`session`).
//! - CLI parsing (`commands`), configuration (`config`), and the supported
//!   model table (`models`).
//!
//! All state lives under the per-platform config directory resolved by
//! [`config_dir`]: `config.yaml`, a `chats/` directory with one JSON file per
//! conversation, and a `vector_store.{vectors,json}` file pair for the index.

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod api;
pub mod chat_store;
pub mod commands;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod models;
pub mod session;
pub mod vector_store;

/// Per-platform configuration directory for memchat.
///
/// Uses [`directories::ProjectDirs`] with the application triple
/// `("com", "memchat", "memchat")`. The directory is not created here;
/// callers that need it should `fs::create_dir_all` it.
///
/// # Errors
/// Fails if the platform configuration directory cannot be determined.
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "memchat", "memchat")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Path of the YAML config file.
pub fn config_file() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("config.yaml"))
}

/// Directory holding one JSON file per conversation.
pub fn chats_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("chats"))
}

/// Base path of the similarity index file pair.
pub fn vector_store_base() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("vector_store"))
}
