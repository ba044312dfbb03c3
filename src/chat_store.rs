//! # ChatArchive
//!
//! Durable, file-per-conversation storage with recency ordering.
//!
//! Each conversation is one pretty-printed JSON file named `<id>.json` inside
//! the archive directory. Records are addressable by identifier, listed in
//! `updated_at`-descending order, and overwritten in place on save (via a
//! write-then-rename so a crash never corrupts a previously written record).
//!
//! This module also owns the conversation data model: [`ConversationRecord`]
//! and the tagged [`Message`] enum. A message is either a user turn, which may
//! carry retrieved context and an image attachment, or an assistant turn,
//! which is plain text. Every consumer matches on the variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Title given to every conversation until the first exchange earns a real one.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// Errors raised by the archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persisted record failed to parse.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One turn in a conversation.
///
/// Serialised with a `role` tag, so the on-disk shape is
/// `{"role": "user", "content": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
        /// Retrieved context attached at turn time, at most once.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        /// Image attached by the immediately preceding `\image` command.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<PathBuf>,
    },
    Assistant {
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            context: None,
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User { content, .. } => content,
            Message::Assistant { content } => content,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One conversation: identity, metadata, and its ordered messages.
///
/// `updated_at` defaults to the Unix epoch when absent on disk, which makes
/// records without a timestamp sort last in recency listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Opaque unique identifier, assigned at creation, immutable.
    pub id: String,
    pub title: String,
    /// Model bound to this conversation; mutable only while `messages` is empty.
    pub model: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "unix_epoch")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    /// Refresh `updated_at`. Call before every persisted mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// File-per-conversation store rooted at one directory.
pub struct ChatArchive {
    dir: PathBuf,
}

impl ChatArchive {
    /// Open (and create if needed) the archive directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Build a fresh record bound to `model`: new UUID, placeholder title,
    /// both timestamps set to now, not a favorite, no messages.
    ///
    /// Nothing is written to disk until [`save`](Self::save) is called, so an
    /// abandoned empty conversation leaves no file behind.
    pub fn create(&self, model: &str) -> ConversationRecord {
        let now = Utc::now();
        ConversationRecord {
            id: Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            model: model.to_string(),
            created_at: now,
            updated_at: now,
            favorite: false,
            messages: Vec::new(),
        }
    }

    /// Load a record by identifier. Absence is a normal outcome (`Ok(None)`),
    /// not an error; callers hitting stale index references rely on that.
    pub fn load(&self, id: &str) -> Result<Option<ConversationRecord>, ArchiveError> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist the full record, overwriting any prior version.
    ///
    /// The write goes to a temp file in the archive directory first and is
    /// renamed into place, so a failed save leaves the previous version
    /// intact. Saving an unchanged record produces byte-identical output.
    pub fn save(&self, record: &ConversationRecord) -> Result<(), ArchiveError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(self.record_path(&record.id))
            .map_err(|e| ArchiveError::Io(e.error))?;
        Ok(())
    }

    /// Every persisted record, most recently updated first.
    ///
    /// Files that fail to parse are skipped with a warning; one bad record
    /// must never take down the whole listing.
    pub fn list_all(&self) -> Result<Vec<ConversationRecord>, ArchiveError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).map_err(ArchiveError::from).and_then(|content| {
                serde_json::from_str::<ConversationRecord>(&content).map_err(ArchiveError::from)
            }) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), "skipping unreadable chat record: {err}");
                }
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// Records marked as favorites, most recently updated first.
    pub fn favorites(&self) -> Result<Vec<ConversationRecord>, ArchiveError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|record| record.favorite)
            .collect())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn archive(dir: &TempDir) -> ChatArchive {
        ChatArchive::open(dir.path()).unwrap()
    }

    #[test]
    fn create_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        let record = archive.create("gpt-4o-mini");

        assert_eq!(record.title, PLACEHOLDER_TITLE);
        assert!(!record.favorite);
        assert!(record.messages.is_empty());
        assert!(archive.load(&record.id).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        let mut record = archive.create("gpt-4o-mini");
        record.messages.push(Message::user("hello"));
        record.messages.push(Message::assistant("hi"));
        archive.save(&record).unwrap();

        let loaded = archive.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn load_of_unknown_id_is_none() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        assert!(archive.load("no-such-record").unwrap().is_none());
    }

    #[test]
    fn repeated_save_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        let record = archive.create("gpt-4o-mini");

        archive.save(&record).unwrap();
        let first = fs::read(dir.path().join(format!("{}.json", record.id))).unwrap();
        archive.save(&record).unwrap();
        let second = fs::read(dir.path().join(format!("{}.json", record.id))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn list_all_orders_by_recency() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);

        for (i, day) in [1, 3, 2].iter().enumerate() {
            let mut record = archive.create("gpt-4o-mini");
            record.title = format!("chat {i}");
            record.updated_at = Utc.with_ymd_and_hms(2025, 6, *day, 0, 0, 0).unwrap();
            archive.save(&record).unwrap();
        }

        let listed = archive.list_all().unwrap();
        let days: Vec<u32> = listed
            .iter()
            .map(|r| chrono::Datelike::day(&r.updated_at))
            .collect();
        assert_eq!(days, vec![3, 2, 1]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        let record = archive.create("gpt-4o-mini");
        archive.save(&record).unwrap();

        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let listed = archive.list_all().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, record.id);
    }

    #[test]
    fn favorites_filters_unmarked_records() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);

        let plain = archive.create("gpt-4o-mini");
        archive.save(&plain).unwrap();

        let mut starred = archive.create("gpt-4o-mini");
        starred.favorite = true;
        archive.save(&starred).unwrap();

        let favorites = archive.favorites().unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, starred.id);
    }

    #[test]
    fn message_round_trips_through_role_tag() {
        let message = Message::User {
            content: "look at this".into(),
            context: Some("From chat 'Earlier' (user): related".into()),
            image: Some(PathBuf::from("/tmp/cat.jpg")),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""role":"user""#));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);

        let assistant: Message = serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(assistant, Message::assistant("hi"));
    }
}
