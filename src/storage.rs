use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use crate::{handle_store_file_event, ChangeOrigin, PadError, Result, StorageChange, StorageKey, StoreMap};

/// Capacity of the change broadcast channel. Slow subscribers past this lag.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Persistent key-value storage shared by every repository instance.
///
/// Writes emit one [`StorageChange`] per key whose value actually changed,
/// tagged with the writer's origin so subscribers can drop their own echoes.
pub trait KeyValueStore: Send + Sync {
    /// Reads the given keys. Absent keys are missing from the returned map.
    fn read(&self, keys: &[StorageKey]) -> Result<StoreMap>;

    /// Writes every entry as a single update
    fn write(&self, origin: &ChangeOrigin, entries: StoreMap) -> Result<()>;

    /// Subscribes to change events from all writers
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn read(&self, keys: &[StorageKey]) -> Result<StoreMap> {
        (**self).read(keys)
    }

    fn write(&self, origin: &ChangeOrigin, entries: StoreMap) -> Result<()> {
        (**self).write(origin, entries)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        (**self).subscribe()
    }
}

/// Broadcasts one event per changed key
fn emit_changes(
    sender: &broadcast::Sender<StorageChange>,
    origin: &ChangeOrigin,
    changed: Vec<(StorageKey, Value)>,
) {
    for (key, new_value) in changed {
        trace!("Broadcasting change of '{}' from {:?}", key, origin);
        // No receivers is fine
        let _ = sender.send(StorageChange {
            key,
            new_value,
            origin: origin.clone(),
        });
    }
}

/// In-process store shared between repository instances.
///
/// Clones share the same values and change channel, the way every tab of a
/// browser profile sees the same local storage area.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    values: Mutex<StoreMap>,
    changes: broadcast::Sender<StorageChange>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                values: Mutex::new(StoreMap::new()),
                changes,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes subsequent reads fail, simulating an unavailable store
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail, simulating a full or revoked store
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful write calls so far
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Current raw value of a key
    pub fn get(&self, key: StorageKey) -> Option<Value> {
        self.inner
            .values
            .lock()
            .ok()
            .and_then(|values| values.get(&key).cloned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, keys: &[StorageKey]) -> Result<StoreMap> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(PadError::StorageRead {
                message: "memory store is unavailable".to_string(),
            });
        }

        let values = self.inner.values.lock().map_err(|e| PadError::StorageRead {
            message: format!("Failed to acquire lock on memory store: {}", e),
        })?;

        Ok(keys
            .iter()
            .filter_map(|key| values.get(key).map(|value| (*key, value.clone())))
            .collect())
    }

    fn write(&self, origin: &ChangeOrigin, entries: StoreMap) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(PadError::StorageWrite {
                message: "memory store rejected the write".to_string(),
            });
        }

        let changed = {
            let mut values = self.inner.values.lock().map_err(|e| PadError::StorageWrite {
                message: format!("Failed to acquire lock on memory store: {}", e),
            })?;

            let mut changed = Vec::new();
            for (key, value) in entries {
                if values.get(&key) != Some(&value) {
                    changed.push((key, value.clone()));
                }
                values.insert(key, value);
            }
            changed
        };

        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        emit_changes(&self.inner.changes, origin, changed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.changes.subscribe()
    }
}

/// Store backed by a single JSON document on disk.
///
/// The document holds the three top-level keys of the persisted layout.
/// Several processes may share one file; [`FileStore::watch`] turns changes
/// made by the others into `External` change events.
pub struct FileStore {
    path: PathBuf,

    /// Last document this store wrote or observed
    snapshot: Arc<Mutex<Map<String, Value>>>,

    changes: broadcast::Sender<StorageChange>,

    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        info!("Opening file store at {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating store directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }

        let snapshot = match read_document(&path) {
            Ok(document) => document,
            Err(e) => {
                warn!("Store file {} is unreadable, starting empty: {}", path.display(), e);
                Map::new()
            }
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            snapshot: Arc::new(Mutex::new(snapshot)),
            changes,
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts watching the store file for changes made by other processes
    pub fn watch(&self) -> Result<()> {
        let mut slot = self.watcher.lock().map_err(|e| PadError::ApplicationError {
            message: format!("Failed to acquire lock on watcher slot: {}", e),
        })?;
        if slot.is_some() {
            debug!("File store watcher already running");
            return Ok(());
        }

        let path = self.path.clone();
        let snapshot = Arc::clone(&self.snapshot);
        let changes = self.changes.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => handle_store_file_event(event, &path, &snapshot, &changes),
                Err(e) => error!("File watcher error: {}", e),
            }
        })
        .map_err(|e| PadError::ApplicationError {
            message: format!("Failed to create file watcher: {}", e),
        })?;

        // Atomic replacement swaps the inode, so watch the directory
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| PadError::ApplicationError {
                message: format!("Failed to watch {}: {}", dir.display(), e),
            })?;

        info!("Watching {} for external changes", self.path.display());
        *slot = Some(watcher);
        Ok(())
    }

    /// Stops the watcher, if running
    pub fn unwatch(&self) {
        if let Ok(mut slot) = self.watcher.lock() {
            if slot.take().is_some() {
                info!("Stopped watching {}", self.path.display());
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, keys: &[StorageKey]) -> Result<StoreMap> {
        let document = read_document(&self.path).map_err(|e| PadError::StorageRead {
            message: format!("{}: {}", self.path.display(), e),
        })?;

        Ok(keys
            .iter()
            .filter_map(|key| document.get(key.as_str()).map(|v| (*key, v.clone())))
            .collect())
    }

    fn write(&self, origin: &ChangeOrigin, entries: StoreMap) -> Result<()> {
        let mut snapshot = self.snapshot.lock().map_err(|e| PadError::StorageWrite {
            message: format!("Failed to acquire lock on store snapshot: {}", e),
        })?;

        // Merge into what is on disk now so keys written by others survive
        let mut document = match read_document(&self.path) {
            Ok(document) => document,
            Err(e) => {
                warn!("Could not re-read {} before writing: {}", self.path.display(), e);
                snapshot.clone()
            }
        };

        let mut changed = Vec::new();
        for (key, value) in entries {
            if document.get(key.as_str()) != Some(&value) {
                changed.push((key, value.clone()));
            }
            document.insert(key.as_str().to_string(), value);
        }

        write_document(&self.path, &document).map_err(|e| {
            error!("Failed to write store file {}: {}", self.path.display(), e);
            PadError::StorageWrite {
                message: e.to_string(),
            }
        })?;

        *snapshot = document;
        drop(snapshot);

        emit_changes(&self.changes, origin, changed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Reads the store document. A missing file is an empty document.
pub(crate) fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(PadError::Io(e)),
    };

    if text.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        other => Err(PadError::StorageRead {
            message: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

/// Writes the document through a temporary file and an atomic rename
fn write_document(path: &Path, document: &Map<String, Value>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let json = serde_json::to_string_pretty(document)?;
    temp_file.write_all(json.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(path).map_err(|e| PadError::Io(e.error))?;

    trace!("Store file {} written", path.display());
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
