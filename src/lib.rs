//! Pure Notepad note repository library
//!
//! This library keeps a small collection of notes, the active-note pointer
//! and widget settings in memory, mirrors them to a shared key-value store,
//! and applies changes made by other running instances of the notepad.

mod activation;
mod autosave;
mod cli;
mod config;
mod errors;
mod helper;
mod note;
mod repository;
mod settings;
mod storage;
mod types;

// Re-export key components
pub use activation::*;
pub use autosave::*;
pub use cli::*;
pub use config::*;
pub use errors::*;
pub use helper::*;
pub use note::*;
pub use repository::*;
pub use settings::*;
pub use storage::*;
pub use types::*;
