//! # Session loop
//!
//! The interactive state machine that owns one active conversation. Input is
//! either a backslash command or a chat turn; a turn runs the full
//! retrieve, complete, persist, index sequence against the open record.
//!
//! ## States
//!
//! `ActiveEmpty` (no messages yet, model switchable) moves to
//! `ActiveWithHistory` after the first completed turn, which locks the model
//! for the life of the record. `Terminated` ends the loop. Clearing returns
//! to `ActiveEmpty` with a brand-new record identity, so index entries keyed
//! to the old identifier stay valid forever.
//!
//! Failure policy: command mistakes, missing attachment files, and backend
//! errors are all recoverable and keep the loop running. A backend error is
//! captured as the assistant's message text so the turn still persists.
//! Archive or index write failures abort the current turn only.

use crossterm::{
    ExecutableCommand,
    style::{Color, SetForegroundColor},
};
use std::io::{BufRead, Write, stdin, stdout};
use std::path::PathBuf;
use tracing::{error, warn};

use crate::api::{Endpoint, ModelBackend, generate_title};
use crate::chat_store::{ChatArchive, ConversationRecord, Message, PLACEHOLDER_TITLE};
use crate::config::MemchatConfig;
use crate::context::ContextAssembler;
use crate::models::{ModelInfo, UnsupportedModel, resolve};
use crate::vector_store::VectorStore;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Conversation open with no messages; the model may still be switched.
    ActiveEmpty,
    /// Conversation has messages; the model is locked.
    ActiveWithHistory,
    Terminated,
}

/// Outcome of handling one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Continue,
    Quit,
}

/// Parsed form of a backslash command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlashCommand {
    Save,
    Clear,
    Switch(String),
    Image(String),
    Saved,
    Open(String),
    Help,
    Quit,
    Unknown(String),
}

impl SlashCommand {
    /// Parse a line that starts with `\`. The command word is matched case
    /// insensitively; the argument keeps its original form.
    fn parse(line: &str) -> Self {
        let body = line.trim_start_matches('\\').trim();
        let (word, arg) = match body.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (body, ""),
        };

        match word.to_lowercase().as_str() {
            "save" => SlashCommand::Save,
            "clear" => SlashCommand::Clear,
            "switch" => SlashCommand::Switch(arg.to_string()),
            "image" => SlashCommand::Image(arg.to_string()),
            "saved" => SlashCommand::Saved,
            "open" => SlashCommand::Open(arg.to_string()),
            "help" => SlashCommand::Help,
            "quit" | "q" => SlashCommand::Quit,
            other => SlashCommand::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "\
Commands:
  \\save            mark this conversation as saved (favorite)
  \\clear           start a fresh conversation
  \\switch <model>  switch model (only before the first message)
  \\image <path>    attach an image to your next message
  \\saved           list saved conversations
  \\open <n>        reopen the n-th saved conversation
  \\help            show this help
  \\quit            save and exit";

/// Drives one interactive conversation against a model backend.
pub struct SessionController<B: ModelBackend> {
    archive: ChatArchive,
    index: VectorStore,
    backend: B,
    config: MemchatConfig,
    assembler: ContextAssembler,
    record: ConversationRecord,
    model: &'static ModelInfo,
    state: SessionState,
    title_assigned: bool,
    pending_attachment: Option<PathBuf>,
}

impl<B: ModelBackend> SessionController<B> {
    /// Open a session on a brand-new conversation bound to `model`.
    pub fn new(
        archive: ChatArchive,
        index: VectorStore,
        backend: B,
        config: MemchatConfig,
        model: &'static ModelInfo,
    ) -> Self {
        let record = archive.create(model.alias);
        let assembler = ContextAssembler::new(config.min_similarity);
        Self {
            archive,
            index,
            backend,
            config,
            assembler,
            record,
            model,
            state: SessionState::ActiveEmpty,
            title_assigned: false,
            pending_attachment: None,
        }
    }

    /// Open a session on an existing record, resolving its bound model.
    pub fn resume(
        archive: ChatArchive,
        index: VectorStore,
        backend: B,
        config: MemchatConfig,
        record: ConversationRecord,
    ) -> Result<Self, UnsupportedModel> {
        let model = resolve(&record.model)?;
        let mut session = Self::new(archive, index, backend, config, model);
        session.state = if record.messages.is_empty() {
            SessionState::ActiveEmpty
        } else {
            SessionState::ActiveWithHistory
        };
        session.title_assigned = record.title != PLACEHOLDER_TITLE;
        session.record = record;
        Ok(session)
    }

    /// Run the interactive loop until quit or end of input.
    pub async fn run(&mut self) -> std::io::Result<()> {
        println!(
            "Chatting with {}. Type \\help for commands.\n",
            self.model.display_name
        );
        if !self.record.messages.is_empty() {
            self.print_history();
        }

        let stdin = stdin();
        let mut line = String::new();
        loop {
            self.prompt()?;
            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                // end of input behaves like \quit
                self.handle_command(SlashCommand::Quit).await;
                break;
            }
            if self.handle_line(line.trim()).await == Turn::Quit {
                break;
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Turn {
        if line.is_empty() {
            return Turn::Continue;
        }
        if line.starts_with('\\') {
            return self.handle_command(SlashCommand::parse(line)).await;
        }
        self.run_turn(line).await;
        Turn::Continue
    }

    /// One chat turn: append, retrieve, complete, index, title, persist.
    async fn run_turn(&mut self, input: &str) {
        // attachment buffer is consumed exactly once
        let image = self.pending_attachment.take();
        self.record.messages.push(Message::User {
            content: input.to_string(),
            context: None,
            image,
        });

        let context = self.assembler.assemble(input, &self.index, &self.archive);
        if !context.is_empty() {
            // attach to the last user message, wherever it sits
            if let Some(Message::User { context: slot, .. }) =
                self.record.messages.iter_mut().rev().find(|m| m.is_user())
            {
                *slot = Some(context);
            }
        }

        let reply = match self
            .backend
            .complete(self.model, &self.record.messages)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                error!("model call failed: {err}");
                format!("[error: {err}]")
            }
        };
        self.record.messages.push(Message::assistant(reply));
        self.state = SessionState::ActiveWithHistory;

        // one stable identifier per message for its lifetime
        let count = self.record.messages.len();
        for position in [count - 2, count - 1] {
            let external_id = format!("{}:{position}", self.record.id);
            let text = self.record.messages[position].content().to_string();
            if let Err(err) = self.index.add(&external_id, &text) {
                warn!(id = %external_id, "could not index message: {err}");
            }
        }

        if count == 2 && !self.title_assigned {
            self.assign_title().await;
        }

        self.record.touch();
        if let Err(err) = self.archive.save(&self.record) {
            error!("could not save conversation: {err}");
            println!("Warning: this conversation could not be saved ({err}).");
        }
    }

    /// Title the first exchange, falling back to the opening user message
    /// when the generated title fails the sanity check.
    async fn assign_title(&mut self) {
        let title = match generate_title(&self.backend, self.model, &self.record.messages).await {
            Ok(title) if acceptable_title(&title) => title,
            Ok(_) | Err(_) => self
                .record
                .messages
                .iter()
                .find(|m| m.is_user())
                .map(|m| m.content().to_string())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
        };
        self.record.title = title;
        self.title_assigned = true;
    }

    async fn handle_command(&mut self, command: SlashCommand) -> Turn {
        match command {
            SlashCommand::Save => {
                self.record.favorite = true;
                self.record.touch();
                match self.archive.save(&self.record) {
                    Ok(()) => println!("Conversation saved."),
                    Err(err) => println!("Could not save: {err}"),
                }
                Turn::Continue
            }
            SlashCommand::Clear => {
                self.record = self.archive.create(self.model.alias);
                self.state = SessionState::ActiveEmpty;
                self.title_assigned = false;
                self.pending_attachment = None;
                println!("Started a fresh conversation.");
                Turn::Continue
            }
            SlashCommand::Switch(name) => {
                self.switch_model(&name);
                Turn::Continue
            }
            SlashCommand::Image(path) => {
                let path = PathBuf::from(path);
                if path.is_file() {
                    println!("Attached {}. It will go out with your next message.", path.display());
                    self.pending_attachment = Some(path);
                } else {
                    println!("No such file: {}", path.display());
                }
                Turn::Continue
            }
            SlashCommand::Saved => {
                self.list_saved();
                Turn::Continue
            }
            SlashCommand::Open(arg) => {
                self.open_saved(&arg);
                Turn::Continue
            }
            SlashCommand::Help => {
                println!("{HELP}");
                Turn::Continue
            }
            SlashCommand::Quit => {
                // an untouched empty conversation leaves no file behind
                if !self.record.messages.is_empty() {
                    self.record.touch();
                    if let Err(err) = self.archive.save(&self.record) {
                        error!("could not save conversation on quit: {err}");
                    }
                }
                self.state = SessionState::Terminated;
                Turn::Quit
            }
            SlashCommand::Unknown(word) => {
                println!("Unknown command \\{word}. Type \\help for the list.");
                Turn::Continue
            }
        }
    }

    /// Switch the bound model. Only legal before the first message; the
    /// session model and the record's `model` field change together or not
    /// at all.
    fn switch_model(&mut self, name: &str) {
        if self.state == SessionState::ActiveWithHistory {
            println!("Cannot switch models mid-conversation. Use \\clear to start fresh.");
            return;
        }
        if name.is_empty() {
            println!("Usage: \\switch <model>");
            return;
        }

        let info = match resolve(name) {
            Ok(info) => info,
            Err(err) => {
                println!("{err}");
                println!("{}", crate::models::list_supported());
                return;
            }
        };
        if let Err(err) = Endpoint::for_model(info, &self.config) {
            println!("{err}");
            return;
        }

        self.model = info;
        self.record.model = info.alias.to_string();
        println!("Switched to {}.", info.display_name);
    }

    fn list_saved(&self) {
        match self.archive.favorites() {
            Ok(favorites) if favorites.is_empty() => {
                println!("No saved conversations yet. Use \\save to keep one.");
            }
            Ok(favorites) => {
                for (i, record) in favorites.iter().enumerate() {
                    println!(
                        "{:>3}. {} ({}, {} messages)",
                        i + 1,
                        record.title,
                        record.model,
                        record.messages.len()
                    );
                }
            }
            Err(err) => println!("Could not list saved conversations: {err}"),
        }
    }

    fn open_saved(&mut self, arg: &str) {
        let Ok(position) = arg.parse::<usize>() else {
            println!("Usage: \\open <n>  (see \\saved for numbers)");
            return;
        };
        let favorites = match self.archive.favorites() {
            Ok(favorites) => favorites,
            Err(err) => {
                println!("Could not list saved conversations: {err}");
                return;
            }
        };
        let Some(record) = position.checked_sub(1).and_then(|i| favorites.get(i)) else {
            println!("No saved conversation number {position}.");
            return;
        };

        let model = match resolve(&record.model) {
            Ok(model) => model,
            Err(err) => {
                println!("Cannot reopen '{}': {err}", record.title);
                return;
            }
        };

        self.record = record.clone();
        self.model = model;
        self.state = if self.record.messages.is_empty() {
            SessionState::ActiveEmpty
        } else {
            SessionState::ActiveWithHistory
        };
        self.title_assigned = self.record.title != PLACEHOLDER_TITLE;
        self.pending_attachment = None;

        println!("Reopened '{}' ({}).\n", self.record.title, model.display_name);
        self.print_history();
    }

    fn print_history(&self) {
        let mut stdout = stdout();
        for message in &self.record.messages {
            let color = if message.is_user() {
                Color::Green
            } else {
                Color::Blue
            };
            let _ = stdout.execute(SetForegroundColor(color));
            let _ = write!(stdout, "{}: ", if message.is_user() { "You" } else { "Assistant" });
            let _ = stdout.execute(SetForegroundColor(Color::Reset));
            let _ = writeln!(stdout, "{}", message.content());
        }
        let _ = writeln!(stdout);
    }

    fn prompt(&self) -> std::io::Result<()> {
        let mut stdout = stdout();
        stdout.execute(SetForegroundColor(Color::Green))?;
        write!(stdout, "You: ")?;
        stdout.execute(SetForegroundColor(Color::Reset))?;
        stdout.flush()
    }
}

/// A generated title is accepted when it is 2 to 5 words and unquoted.
fn acceptable_title(title: &str) -> bool {
    let words = title.split_whitespace().count();
    (2..=5).contains(&words) && !title.contains('"') && !title.contains('\'')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BackendError;
    use crate::embeddings::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    /// Backend returning canned text, recording nothing.
    struct FixedBackend {
        reply: String,
        title: String,
    }

    impl FixedBackend {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                title: "Sensible Short Title".to_string(),
            }
        }
    }

    impl ModelBackend for FixedBackend {
        async fn complete(
            &self,
            _model: &ModelInfo,
            _messages: &[Message],
        ) -> Result<String, BackendError> {
            Ok(self.reply.clone())
        }

        async fn complete_quiet(
            &self,
            _model: &ModelInfo,
            _messages: &[Message],
        ) -> Result<String, BackendError> {
            Ok(self.title.clone())
        }
    }

    struct FailingBackend;

    impl ModelBackend for FailingBackend {
        async fn complete(
            &self,
            _model: &ModelInfo,
            _messages: &[Message],
        ) -> Result<String, BackendError> {
            Err(BackendError::Api("connection refused".into()))
        }

        async fn complete_quiet(
            &self,
            _model: &ModelInfo,
            _messages: &[Message],
        ) -> Result<String, BackendError> {
            Err(BackendError::Api("connection refused".into()))
        }
    }

    fn session_in<B: ModelBackend>(dir: &TempDir, backend: B) -> SessionController<B> {
        let archive = ChatArchive::open(dir.path().join("chats")).unwrap();
        let index = VectorStore::open(
            dir.path().join("vector_store"),
            Box::new(HashEmbedder::new()),
        )
        .unwrap();
        let mut config = MemchatConfig::default();
        config.min_similarity = 0.0;
        let model = resolve("gpt-4o-mini").unwrap();
        SessionController::new(archive, index, backend, config, model)
    }

    #[tokio::test]
    async fn first_turn_persists_indexes_and_titles() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));
        let id = session.record.id.clone();

        session.run_turn("hello").await;

        assert_eq!(session.record.messages.len(), 2);
        assert_eq!(session.record.messages[0].content(), "hello");
        assert_eq!(session.record.messages[1].content(), "hi");
        assert!(session.title_assigned);
        assert_eq!(session.record.title, "Sensible Short Title");
        assert_eq!(session.state, SessionState::ActiveWithHistory);

        // both turns are retrievable, the user turn at distance zero
        let hits = session.index.search("hello", 5).unwrap();
        assert_eq!(hits[0].external_id, format!("{id}:0"));
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.iter().any(|h| h.external_id == format!("{id}:1")));

        let saved = session.archive.load(&id).unwrap().unwrap();
        assert_eq!(saved.messages, session.record.messages);
    }

    #[tokio::test]
    async fn switch_is_allowed_before_first_turn_and_locked_after() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        // local model, no credential needed
        session.switch_model("gemma3");
        assert_eq!(session.model.alias, "gemma3");
        assert_eq!(session.record.model, "gemma3");

        session.run_turn("hello").await;
        session.switch_model("llama-3.3");
        assert_eq!(session.model.alias, "gemma3");
        assert_eq!(session.record.model, "gemma3");
    }

    #[tokio::test]
    async fn switch_to_unknown_or_keyless_model_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.switch_model("gpt-9000");
        assert_eq!(session.model.alias, "gpt-4o-mini");

        // hosted model with no key configured
        session.switch_model("claude-3.5");
        assert_eq!(session.model.alias, "gpt-4o-mini");
        assert_eq!(session.record.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn backend_failure_is_captured_as_assistant_text() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FailingBackend);

        session.run_turn("hello").await;

        assert_eq!(session.record.messages.len(), 2);
        let reply = session.record.messages[1].content();
        assert!(reply.contains("connection refused"), "got: {reply}");

        // the failed turn still persisted, titled by the fallback
        let saved = session.archive.load(&session.record.id).unwrap().unwrap();
        assert_eq!(saved.messages.len(), 2);
        assert_eq!(saved.title, "hello");
    }

    #[tokio::test]
    async fn attachment_is_consumed_by_exactly_one_turn() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cat.jpg");
        fs::write(&image, b"jpeg").unwrap();

        let mut session = session_in(&dir, FixedBackend::new("nice cat"));
        session
            .handle_command(SlashCommand::Image(image.display().to_string()))
            .await;
        assert!(session.pending_attachment.is_some());

        session.run_turn("look at this").await;
        let Message::User { image: attached, .. } = &session.record.messages[0] else {
            panic!("expected a user message");
        };
        assert_eq!(attached.as_deref(), Some(image.as_path()));

        session.run_turn("and now?").await;
        let Message::User { image: attached, .. } = &session.record.messages[2] else {
            panic!("expected a user message");
        };
        assert!(attached.is_none());
    }

    #[tokio::test]
    async fn missing_attachment_file_is_rejected_without_state_change() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session
            .handle_command(SlashCommand::Image("/no/such/file.png".into()))
            .await;
        assert!(session.pending_attachment.is_none());
    }

    #[tokio::test]
    async fn quit_on_empty_session_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));
        let id = session.record.id.clone();

        let turn = session.handle_command(SlashCommand::Quit).await;
        assert_eq!(turn, Turn::Quit);
        assert_eq!(session.state, SessionState::Terminated);
        assert!(session.archive.load(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn quit_after_messages_saves_once_more() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("hello").await;
        let before = session.archive.load(&session.record.id).unwrap().unwrap();

        session.handle_command(SlashCommand::Quit).await;
        let after = session.archive.load(&session.record.id).unwrap().unwrap();
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn clear_starts_a_fresh_identity() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("hello").await;
        let old_id = session.record.id.clone();

        session.handle_command(SlashCommand::Clear).await;
        assert_ne!(session.record.id, old_id);
        assert_eq!(session.state, SessionState::ActiveEmpty);
        assert!(session.record.messages.is_empty());
        assert!(!session.title_assigned);

        // the old record and its index entries survive the clear
        assert!(session.archive.load(&old_id).unwrap().is_some());
        let hits = session.index.search("hello", 5).unwrap();
        assert_eq!(hits[0].external_id, format!("{old_id}:0"));
    }

    #[tokio::test]
    async fn save_marks_favorite_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("hello").await;
        session.handle_command(SlashCommand::Save).await;
        session.handle_command(SlashCommand::Save).await;

        let favorites = session.archive.favorites().unwrap();
        assert_eq!(favorites.len(), 1);
        assert!(favorites[0].favorite);
    }

    #[tokio::test]
    async fn open_restores_a_saved_conversation() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("hello").await;
        session.handle_command(SlashCommand::Save).await;
        let saved_id = session.record.id.clone();

        session.handle_command(SlashCommand::Clear).await;
        session.open_saved("1");

        assert_eq!(session.record.id, saved_id);
        assert_eq!(session.state, SessionState::ActiveWithHistory);
        assert!(session.title_assigned);
    }

    #[tokio::test]
    async fn unhelpful_generated_title_falls_back_to_first_message() {
        let dir = TempDir::new().unwrap();
        let backend = FixedBackend {
            reply: "hi".into(),
            title: "Sure! Here is a title you could use for this chat".into(),
        };
        let mut session = session_in(&dir, backend);

        session.run_turn("how do lifetimes work").await;
        assert_eq!(session.record.title, "how do lifetimes work");
    }

    #[tokio::test]
    async fn second_exchange_does_not_retitle() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("hello").await;
        session.record.title = "Pinned Title".into();
        session.run_turn("more").await;
        assert_eq!(session.record.title, "Pinned Title");
    }

    #[tokio::test]
    async fn context_from_earlier_chats_is_attached_to_the_user_turn() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir, FixedBackend::new("hi"));

        session.run_turn("tell me about lifetimes").await;
        session.handle_command(SlashCommand::Clear).await;
        session.run_turn("tell me about lifetimes").await;

        let Message::User { context, .. } = &session.record.messages[0] else {
            panic!("expected a user message");
        };
        let context = context.as_deref().unwrap_or_default();
        assert!(context.contains("tell me about lifetimes"), "got: {context}");
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(SlashCommand::parse("\\save"), SlashCommand::Save);
        assert_eq!(
            SlashCommand::parse("\\switch claude-3.5"),
            SlashCommand::Switch("claude-3.5".into())
        );
        assert_eq!(
            SlashCommand::parse("\\image /tmp/My Cat.jpg"),
            SlashCommand::Image("/tmp/My Cat.jpg".into())
        );
        assert_eq!(SlashCommand::parse("\\OPEN 3"), SlashCommand::Open("3".into()));
        assert_eq!(
            SlashCommand::parse("\\frobnicate"),
            SlashCommand::Unknown("frobnicate".into())
        );
    }

    #[test]
    fn title_sanity_check_bounds_word_count_and_quoting() {
        assert!(acceptable_title("Rust Lifetime Questions"));
        assert!(!acceptable_title("Title"));
        assert!(!acceptable_title("one two three four five six"));
        assert!(!acceptable_title("\"Quoted Title Here\""));
        assert!(!acceptable_title(""));
    }
}
