use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use log::{debug, error, info, trace, warn};
use notify::EventKind;
use serde_json::{Map, Value};
use tokio::{
    sync::{broadcast, mpsc, Mutex as TokioMutex},
    task::JoinHandle,
};

use crate::{
    storage::read_document, ChangeOrigin, ExportFormat, KeyValueStore, Note, NoteRepository,
    RemoteEffect, StorageChange, StorageKey,
};

/// Handles a file system event for the store file by diffing the document
/// on disk against the last known snapshot and broadcasting changed keys
pub fn handle_store_file_event(
    event: notify::Event,
    store_path: &Path,
    snapshot: &Arc<Mutex<Map<String, Value>>>,
    changes: &broadcast::Sender<StorageChange>,
) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            if !event.paths.iter().any(|path| same_file(path, store_path)) {
                return;
            }

            let document = match read_document(store_path) {
                Ok(document) => document,
                Err(e) => {
                    // Half-written or foreign content; the next event retries
                    warn!("Failed to reload store file {}: {}", store_path.display(), e);
                    return;
                }
            };

            let Ok(mut known) = snapshot.lock() else {
                error!("Failed to acquire lock on store snapshot");
                return;
            };

            for key in StorageKey::ALL {
                let Some(value) = document.get(key.as_str()) else {
                    continue;
                };
                if known.get(key.as_str()) != Some(value) {
                    debug!("External change to '{}' in {}", key, store_path.display());
                    let _ = changes.send(StorageChange {
                        key,
                        new_value: value.clone(),
                        origin: ChangeOrigin::External,
                    });
                }
            }
            *known = document;
        }
        _ => {
            // Ignore other events
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    // Watchers may report canonical paths
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.file_name().is_some() && a.file_name() == b.file_name(),
    }
}

/// Spawns a task feeding store change events into the repository.
///
/// Echoes of the repository's own writes are dropped by
/// [`NoteRepository::handle_storage_change`]; every other effect is sent to
/// `effects` so the presentation layer can re-render. When the listener falls
/// behind and events are dropped, the whole store is re-read through
/// [`NoteRepository::resync`]. The task ends when the store's change channel
/// closes.
pub fn spawn_change_listener<S>(
    repository: Arc<TokioMutex<NoteRepository<S>>>,
    mut receiver: broadcast::Receiver<StorageChange>,
    effects: Option<mpsc::Sender<RemoteEffect>>,
) -> JoinHandle<()>
where
    S: KeyValueStore + 'static,
{
    tokio::spawn(async move {
        'listen: loop {
            let applied = match receiver.recv().await {
                Ok(change) => {
                    trace!("Received change of '{}' from {:?}", change.key, change.origin);
                    vec![repository.lock().await.handle_storage_change(change)]
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change listener lagged, skipped {} events", skipped);
                    repository.lock().await.resync()
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Store change channel closed, listener exiting");
                    break;
                }
            };

            for effect in applied {
                if effect == RemoteEffect::Ignored {
                    continue;
                }
                if let Some(effects) = &effects {
                    if effects.send(effect).await.is_err() {
                        info!("Effect receiver dropped, listener exiting");
                        break 'listen;
                    }
                }
            }
        }
    })
}

/// A note rendered for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedNote {
    pub file_name: String,
    pub mime_type: &'static str,
    pub body: String,
}

/// Renders a note as plain text or markdown
pub fn export_note(note: &Note, format: ExportFormat) -> ExportedNote {
    match format {
        ExportFormat::Txt => ExportedNote {
            file_name: format!("{}.txt", note.title),
            mime_type: "text/plain",
            body: note.content.clone(),
        },
        ExportFormat::Md => ExportedNote {
            file_name: format!("{}.md", note.title),
            mime_type: "text/markdown",
            body: format!("# {}\n\n{}", note.title, note.content),
        },
    }
}

/// Word and character counts shown under the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteStats {
    pub words: usize,
    pub characters: usize,
}

impl NoteStats {
    pub fn from_content(content: &str) -> Self {
        Self {
            words: content.split_whitespace().count(),
            characters: content.chars().count(),
        }
    }
}
