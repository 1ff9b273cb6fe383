//! Shared types for the purenote library.
//!
//! Storage keys, origin-tagged change events, operation outcomes and the CLI
//! subcommands.
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use crate::{Note, PadError, Settings};

/// A specialized Result type for purenote operations.
pub type Result<T> = std::result::Result<T, PadError>;

/// The three top-level keys of the persisted layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Notes,
    CurrentNoteId,
    Settings,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::Notes,
        StorageKey::CurrentNoteId,
        StorageKey::Settings,
    ];

    /// Name of the key in the persisted document
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Notes => "notes",
            StorageKey::CurrentNoteId => "currentNoteId",
            StorageKey::Settings => "settings",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        StorageKey::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values read from or written to a store, by key
pub type StoreMap = HashMap<StorageKey, Value>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Identifies one running repository instance (a tab, a window, a process)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh id, unique within this process and distinct across processes
    pub fn generate() -> Self {
        let seq = NEXT_INSTANCE.fetch_add(1, Ordering::SeqCst);
        Self(format!("{}x{}", std::process::id(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who caused a store change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A write made through a repository instance
    Instance(InstanceId),
    /// A change observed on the backing medium with no known writer
    External,
}

/// One key changed in the store
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: StorageKey,
    pub new_value: Value,
    pub origin: ChangeOrigin,
}

/// Result of committing an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Title or content differed; the note was updated and persisted
    Changed,
    /// Nothing differed; no write happened
    Unchanged,
    /// No note has the given id
    Unresolved,
}

/// What the presentation layer must refresh after a remote change
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEffect {
    /// The note list was replaced; re-render it
    NotesReplaced,
    /// The active note changed; reload the editor with this note
    ActiveNoteChanged(Note),
    /// Settings were replaced; re-apply theme and appearance
    SettingsReplaced(Settings),
    /// The change was a local echo or could not be applied
    Ignored,
}

/// Export file flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Plain text, content only
    Txt,
    /// Markdown with the title as a heading
    Md,
}

/// Available subcommands for the purenote application
#[derive(Subcommand)]
pub enum Commands {
    /// List all notes in creation order
    List {
        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Show a note (the active one by default)
    Show {
        /// ID of the note to show
        id: Option<String>,

        /// Format output as raw JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Create a new note and make it active
    Create {
        /// Title of the note
        #[clap(short = 'T', long)]
        title: Option<String>,

        /// Content of the note
        #[clap(short, long)]
        content: Option<String>,
    },

    /// Commit a new title and/or content for a note
    Edit {
        /// ID of the note to edit
        id: String,

        /// New title for the note
        #[clap(short = 'T', long)]
        title: Option<String>,

        /// New content for the note
        #[clap(short, long)]
        content: Option<String>,

        /// Path to a file containing the new note content
        #[clap(short, long)]
        file: Option<PathBuf>,

        /// Append lines read from standard input, autosaving as they arrive
        #[clap(long, conflicts_with_all = ["content", "file"])]
        stdin: bool,
    },

    /// Make another note the active one
    Switch {
        /// ID of the note to activate
        id: String,
    },

    /// Delete a note by ID
    Delete {
        /// ID of the note to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },

    /// Search notes by title or content
    Search {
        /// Search query text
        query: String,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Show or change widget settings
    Settings {
        /// Theme: auto, light or dark
        #[clap(long)]
        theme: Option<String>,

        /// Editor font size (clamped to 10..=24)
        #[clap(long)]
        font_size: Option<i64>,

        /// Widget opacity (clamped to 0.5..=1.0)
        #[clap(long)]
        opacity: Option<f64>,

        /// Enable or disable autosave
        #[clap(long)]
        auto_save: Option<bool>,
    },

    /// Export a note (the active one by default) to a file
    Export {
        /// ID of the note to export
        id: Option<String>,

        /// Directory where the exported file will be saved
        #[clap(short, long)]
        output: PathBuf,

        /// Format to export to
        #[clap(short, long, value_enum, default_value_t = ExportFormat::Txt)]
        format: ExportFormat,
    },

    /// Follow changes made to the store by other instances until Ctrl-C
    Watch,
}
