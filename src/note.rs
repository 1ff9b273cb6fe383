//! Core data structures for the purenote library.
//!
//! This module contains the `Note` record as it is persisted, plus the clock
//! and id collaborators used to stamp new notes.
use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Title used when a note is saved with an empty title
pub const UNTITLED_TITLE: &str = "Untitled Note";

/// Title given to notes created without an explicit title
pub const NEW_NOTE_TITLE: &str = "New Note";

/// Id of the bootstrap note seeded into empty storage
pub const WELCOME_NOTE_ID: &str = "welcome-note";

/// Title of the bootstrap note
pub const WELCOME_NOTE_TITLE: &str = "Welcome to Pure Notepad";

/// Content of the bootstrap note
pub const WELCOME_NOTE_CONTENT: &str = "# Welcome to Pure Notepad! 🎉

This is your first note. Here's what you can do:

## ✨ Features
• **Write and edit** with live auto-save
• **Multiple notes** - Create, switch, and organize
• **Search** through all your notes instantly
• **Export** to .txt or .md files
• **Markdown support** for **bold** and *italic* text
• **Drag & resize** - Position anywhere on screen

## 🔒 Privacy First
Everything is stored locally. No data ever leaves your device!

Start writing your thoughts, ideas, or todo lists. This notepad will always be here when you need it.

Happy writing! ✍️";

/// Represents a single note in our system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier for the note
    pub id: String,
    /// Note title
    pub title: String,
    /// Note content in Markdown format
    pub content: String,
    /// When the note was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last modification time
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Creates a new note with the given id, title and content, stamped at `now`
    pub fn new(id: String, title: &str, content: String, now: DateTime<Utc>) -> Self {
        Note {
            id,
            title: normalize_title(title),
            content,
            created_at: now,
            updated_at: now,
        }
    }

    /// The note seeded into empty storage
    pub fn welcome(now: DateTime<Utc>) -> Self {
        Self::new(
            WELCOME_NOTE_ID.to_string(),
            WELCOME_NOTE_TITLE,
            WELCOME_NOTE_CONTENT.to_string(),
            now,
        )
    }

    /// Bumps `updated_at` so it is strictly later than its previous value
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }

    /// Case-insensitive match against title or content.
    /// `needle` must already be lowercase.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.content.to_lowercase().contains(needle)
    }
}

/// Coerces an empty title to the placeholder
pub fn normalize_title(title: &str) -> String {
    if title.is_empty() {
        UNTITLED_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

/// Source of fresh note ids
pub trait IdGenerator: Send + Sync {
    fn new_id(&self, now: DateTime<Utc>) -> String;
}

/// Generates `note_<millis>_<scope>_<seq>` ids.
///
/// The millisecond timestamp keeps ids readable and roughly sortable; the
/// scope (normally the instance id) and the per-generator sequence keep two
/// notes created in the same millisecond apart.
#[derive(Debug)]
pub struct TimestampIdGenerator {
    scope: String,
    seq: AtomicU64,
}

impl TimestampIdGenerator {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            seq: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for TimestampIdGenerator {
    fn new_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("note_{}_{}_{}", now.timestamp_millis(), self.scope, seq)
    }
}
