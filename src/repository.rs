//! The note repository: in-memory notes, active pointer and settings,
//! mirrored to a [`KeyValueStore`] under the `notes`, `currentNoteId` and
//! `settings` keys.
//!
//! Every operation leaves the repository renderable. Store failures are
//! logged and absorbed; the in-memory state stays authoritative for the
//! session and the next persisting operation writes it again.
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    normalize_title, ChangeOrigin, Clock, CommitOutcome, IdGenerator, InstanceId, KeyValueStore,
    Note, PadError, RemoteEffect, Result, Settings, SettingsPatch, StorageChange, StorageKey,
    StoreMap, SystemClock, TimestampIdGenerator, NEW_NOTE_TITLE,
};

/// Owns the note collection of one running instance
pub struct NoteRepository<S: KeyValueStore> {
    store: S,
    instance_id: InstanceId,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,

    /// Never empty
    notes: Vec<Note>,
    /// Always resolves to a member of `notes` after `resolve_active`
    active_note_id: String,
    settings: Settings,

    /// Id of a note whose title was renamed but not yet persisted
    unsaved_rename: Option<String>,
}

impl<S: KeyValueStore> NoteRepository<S> {
    /// Creates a repository using the wall clock and timestamp ids.
    ///
    /// The repository starts with the bootstrap note in memory; call
    /// [`load`](Self::load) to pick up the stored state.
    pub fn new(store: S, instance_id: InstanceId) -> Self {
        let ids = TimestampIdGenerator::new(instance_id.as_str());
        Self::with_environment(store, instance_id, Arc::new(SystemClock), Arc::new(ids))
    }

    /// Creates a repository with explicit clock and id collaborators
    pub fn with_environment(
        store: S,
        instance_id: InstanceId,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let welcome = Note::welcome(clock.now());
        Self {
            store,
            instance_id,
            clock,
            ids,
            active_note_id: welcome.id.clone(),
            notes: vec![welcome],
            settings: Settings::default(),
            unsaved_rename: None,
        }
    }

    /// Loads notes, active pointer and settings from the store.
    ///
    /// Falls back to the bootstrap note and default settings, persisted
    /// immediately, when the store cannot be read or holds no notes.
    pub fn load(&mut self) {
        info!("Loading notes for instance {}", self.instance_id);

        let stored = match self.store.read(&StorageKey::ALL) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to read store, falling back to defaults: {}", e);
                self.seed();
                return;
            }
        };

        let notes = stored
            .get(&StorageKey::Notes)
            .and_then(|value| decode::<Vec<Note>>(StorageKey::Notes, value))
            .filter(|notes| !notes.is_empty());

        let Some(notes) = notes else {
            info!("No stored notes, seeding the welcome note");
            self.seed();
            return;
        };

        self.notes = notes;
        self.settings = stored
            .get(&StorageKey::Settings)
            .and_then(|value| decode::<Settings>(StorageKey::Settings, value))
            .map(|mut settings| {
                settings.sanitize();
                settings
            })
            .unwrap_or_default();
        self.active_note_id = stored
            .get(&StorageKey::CurrentNoteId)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.unsaved_rename = None;
        self.resolve_active();

        info!(
            "Loaded {} notes, active note: {}",
            self.notes.len(),
            self.active_note_id
        );
    }

    /// Creates a note, makes it active and persists.
    ///
    /// Title defaults to "New Note" and content to the empty string.
    pub fn create(&mut self, title: Option<&str>, content: Option<&str>) -> Note {
        let now = self.clock.now();
        let note = Note::new(
            self.ids.new_id(now),
            title.unwrap_or(NEW_NOTE_TITLE),
            content.unwrap_or_default().to_string(),
            now,
        );
        info!("Creating note: {}", note.id);

        self.notes.push(note.clone());
        self.active_note_id = note.id.clone();
        self.persist();
        note
    }

    /// Makes `note_id` the active note.
    ///
    /// `pending` is the editor's current (title, content) for the note being
    /// left; it is committed before switching so nothing typed is lost.
    /// Returns false and changes nothing when `note_id` is unknown.
    pub fn switch_active(&mut self, note_id: &str, pending: Option<(&str, &str)>) -> bool {
        if self.position(note_id).is_none() {
            debug!("Cannot switch to unknown note {}", note_id);
            return false;
        }

        if let Some((title, content)) = pending {
            let current = self.active_note_id.clone();
            self.commit_edit(&current, title, content);
        }

        if self.active_note_id != note_id {
            info!("Switching active note to {}", note_id);
            self.active_note_id = note_id.to_string();
            self.persist();
        }
        true
    }

    /// Commits the editor's title and content for a note.
    ///
    /// Writes only when something differs from the stored note (or the title
    /// was renamed since the last write), so idle autosave ticks cause no
    /// storage traffic.
    pub fn commit_edit(&mut self, note_id: &str, title: &str, content: &str) -> CommitOutcome {
        let Some(index) = self.position(note_id) else {
            debug!("Commit for unknown note {} ignored", note_id);
            return CommitOutcome::Unresolved;
        };

        let title = normalize_title(title);
        let renamed = self.unsaved_rename.as_deref() == Some(note_id);
        let now = self.clock.now();

        let note = &mut self.notes[index];
        if note.title == title && note.content == content && !renamed {
            trace!("Note {} unchanged, skipping write", note_id);
            return CommitOutcome::Unchanged;
        }

        note.title = title;
        note.content = content.to_string();
        note.touch(now);
        debug!("Committed edit to note {} at {}", note_id, note.updated_at);

        self.unsaved_rename = None;
        self.persist();
        CommitOutcome::Changed
    }

    /// Live title edit of the active note, kept in memory until the next
    /// commit
    pub fn rename_active_title(&mut self, title: &str) {
        let index = self.active_index();
        let title = normalize_title(title);
        let note = &mut self.notes[index];
        if note.title != title {
            trace!("Renaming note {} to '{}'", note.id, title);
            note.title = title;
            self.unsaved_rename = Some(note.id.clone());
        }
    }

    /// Deletes a note.
    ///
    /// Refuses with [`PadError::LastNote`] when only one note is left.
    /// Returns `Ok(false)` when no note has the id.
    pub fn delete(&mut self, note_id: &str) -> Result<bool> {
        if self.notes.len() == 1 {
            warn!("Refusing to delete the last note {}", note_id);
            return Err(PadError::LastNote {
                id: note_id.to_string(),
            });
        }

        let Some(index) = self.position(note_id) else {
            debug!("Delete of unknown note {} ignored", note_id);
            return Ok(false);
        };

        info!("Deleting note: {}", note_id);
        self.notes.remove(index);
        if self.unsaved_rename.as_deref() == Some(note_id) {
            self.unsaved_rename = None;
        }
        if self.active_note_id == note_id {
            self.active_note_id = self.notes[0].id.clone();
            debug!("Active note moved to {}", self.active_note_id);
        }

        self.persist();
        Ok(true)
    }

    /// Notes whose title or content contains `query`, ignoring case, in
    /// collection order. A blank query returns every note.
    pub fn search(&self, query: &str) -> Vec<Note> {
        if query.trim().is_empty() {
            return self.notes.clone();
        }

        let needle = query.to_lowercase();
        let results: Vec<Note> = self
            .notes
            .iter()
            .filter(|note| note.matches(&needle))
            .cloned()
            .collect();

        debug!("Search '{}' matched {} notes", query, results.len());
        results
    }

    /// Merges `patch` into the settings, clamping out-of-range values, and
    /// persists
    pub fn update_settings(&mut self, patch: SettingsPatch) -> &Settings {
        self.settings.merge(patch);
        info!("Settings updated: {:?}", self.settings);
        self.persist();
        &self.settings
    }

    /// Applies a change another instance made to the store.
    ///
    /// Replacement is wholesale and last-writer-wins: an edit not yet
    /// committed here can be overwritten. Never writes back to the store.
    pub fn apply_remote_change(&mut self, key: StorageKey, new_value: Value) -> RemoteEffect {
        match key {
            StorageKey::Notes => {
                let Some(notes) = decode::<Vec<Note>>(key, &new_value) else {
                    return RemoteEffect::Ignored;
                };
                if notes.is_empty() {
                    warn!("Ignoring remote change that empties the note list");
                    return RemoteEffect::Ignored;
                }

                debug!("Replacing notes with {} remote notes", notes.len());
                self.notes = notes;
                self.unsaved_rename = None;
                self.resolve_active();
                RemoteEffect::NotesReplaced
            }
            StorageKey::CurrentNoteId => {
                let Some(note_id) = new_value.as_str() else {
                    warn!("Ignoring non-string remote currentNoteId: {}", new_value);
                    return RemoteEffect::Ignored;
                };

                debug!("Adopting remote active note {}", note_id);
                self.active_note_id = note_id.to_string();
                self.resolve_active();
                RemoteEffect::ActiveNoteChanged(self.current_note().clone())
            }
            StorageKey::Settings => {
                let Some(mut settings) = decode::<Settings>(key, &new_value) else {
                    return RemoteEffect::Ignored;
                };

                settings.sanitize();
                debug!("Adopting remote settings: {:?}", settings);
                self.settings = settings;
                RemoteEffect::SettingsReplaced(self.settings.clone())
            }
        }
    }

    /// Routes a store change event: echoes of this instance's own writes are
    /// dropped, everything else is applied as a remote change
    pub fn handle_storage_change(&mut self, change: StorageChange) -> RemoteEffect {
        if self.is_own(&change.origin) {
            trace!("Ignoring echo of own write to '{}'", change.key);
            return RemoteEffect::Ignored;
        }
        self.apply_remote_change(change.key, change.new_value)
    }

    /// Re-reads every key from the store and applies each as a remote
    /// change. Recovers state after change events were missed. Never writes
    /// back to the store.
    pub fn resync(&mut self) -> Vec<RemoteEffect> {
        let mut values = match self.store.read(&StorageKey::ALL) {
            Ok(values) => values,
            Err(e) => {
                warn!("Failed to re-read store after missed changes: {}", e);
                return Vec::new();
            }
        };

        info!("Resynchronizing with the store");
        StorageKey::ALL
            .into_iter()
            .filter_map(|key| values.remove(&key).map(|value| (key, value)))
            .map(|(key, value)| self.apply_remote_change(key, value))
            .filter(|effect| *effect != RemoteEffect::Ignored)
            .collect()
    }

    /// Persists the current state, reporting a store failure to the caller
    pub fn flush(&mut self) -> Result<()> {
        let entries = self.snapshot()?;
        self.store.write(&self.origin(), entries)?;
        self.unsaved_rename = None;
        Ok(())
    }

    /// The note bound to the editor
    pub fn current_note(&self) -> &Note {
        &self.notes[self.active_index()]
    }

    pub fn active_note_id(&self) -> &str {
        &self.active_note_id
    }

    /// Every note in creation order
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn get_note(&self, note_id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == note_id)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn origin(&self) -> ChangeOrigin {
        ChangeOrigin::Instance(self.instance_id.clone())
    }

    fn is_own(&self, origin: &ChangeOrigin) -> bool {
        matches!(origin, ChangeOrigin::Instance(id) if *id == self.instance_id)
    }

    fn position(&self, note_id: &str) -> Option<usize> {
        self.notes.iter().position(|note| note.id == note_id)
    }

    fn active_index(&self) -> usize {
        self.position(&self.active_note_id).unwrap_or(0)
    }

    /// Points `active_note_id` at the first note if it no longer resolves
    fn resolve_active(&mut self) {
        if self.position(&self.active_note_id).is_none() {
            let first = self.notes[0].id.clone();
            debug!(
                "Active note '{}' not found, falling back to {}",
                self.active_note_id, first
            );
            self.active_note_id = first;
        }
    }

    /// Resets to the bootstrap note and default settings and persists them
    fn seed(&mut self) {
        let welcome = Note::welcome(self.clock.now());
        self.active_note_id = welcome.id.clone();
        self.notes = vec![welcome];
        self.settings = Settings::default();
        self.unsaved_rename = None;
        self.persist();
    }

    fn snapshot(&self) -> Result<StoreMap> {
        let mut entries = StoreMap::new();
        entries.insert(StorageKey::Notes, serde_json::to_value(&self.notes)?);
        entries.insert(
            StorageKey::CurrentNoteId,
            Value::String(self.active_note_id.clone()),
        );
        entries.insert(StorageKey::Settings, serde_json::to_value(&self.settings)?);
        Ok(entries)
    }

    /// Writes all three keys. Failures are logged and otherwise ignored; the
    /// next persisting operation writes the full state again.
    fn persist(&mut self) {
        if let Err(e) = self.flush() {
            error!("Failed to persist notes: {}", e);
        }
    }
}

/// Decodes a stored value, logging and discarding malformed payloads
fn decode<T: DeserializeOwned>(key: StorageKey, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Discarding malformed '{}' value: {}", key, e);
            None
        }
    }
}
