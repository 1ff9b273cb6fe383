//! Error types for the purenote library.
//!
//! Storage failures are recovered inside the repository and only logged; the
//! variants exist so store implementations and the CLI can report them.

use std::io;

use thiserror::Error;

/// The main error type for the purenote library.
#[derive(Error, Debug)]
pub enum PadError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistent store could not be read.
    #[error("Storage read failed: {message}")]
    StorageRead { message: String },

    /// The persistent store rejected a write.
    #[error("Storage write failed: {message}")]
    StorageWrite { message: String },

    /// Refused to delete the only remaining note.
    #[error("Cannot delete the last note: {id}")]
    LastNote { id: String },

    /// A note id did not match any note in the collection.
    #[error("Note not found: {id}")]
    UnresolvedNote { id: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// The widget could not be activated within the retry budget.
    #[error("Activation failed after {attempts} attempts: {message}")]
    ActivationFailed { attempts: u32, message: String },

    /// The page cannot host the widget at all.
    #[error("Activation refused for {url}")]
    ActivationRefused { url: String },

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}
