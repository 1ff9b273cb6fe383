//! Debounced and periodic autosave of editor contents
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

use crate::{CommitOutcome, KeyValueStore, NoteRepository, PadError, Result};

#[derive(Debug, Clone, Default)]
pub struct AutosaveStatus {
    /// Whether the autosave task is running
    pub is_running: bool,
    /// When an edit was last written
    pub last_commit_time: Option<DateTime<Utc>>,
    /// Number of commits that changed a note
    pub commits: u64,
}

#[derive(Debug, Clone)]
pub enum AutosaveCommand {
    /// The editor content changed; restarts the quiet period
    Edit {
        note_id: String,
        title: String,
        content: String,
    },
    /// Commit the pending edit now
    Flush,
    /// Commit the pending edit and stop
    Stop,
}

/// Editor state received since the last commit
struct PendingEdit {
    note_id: String,
    title: String,
    content: String,
}

/// Drives `commit_edit` from editor activity.
///
/// An edit is committed once the editor has been quiet for the debounce
/// period, and a periodic tick commits whatever is pending in case the
/// debounce never fires. Both paths go through
/// [`NoteRepository::commit_edit`], so an unchanged editor never writes.
///
/// A pending edit is dropped once committed. An idle autosaver therefore
/// never writes its last buffer over a newer edit from another instance.
pub struct Autosaver<S: KeyValueStore> {
    debounce: Duration,
    interval: Duration,

    /// Channel to send commands to the autosave task
    command_tx: Option<mpsc::Sender<AutosaveCommand>>,

    /// Handle to the autosave task
    task: Option<JoinHandle<()>>,

    status: Arc<Mutex<AutosaveStatus>>,

    /// Weak reference to the repository
    repository: Weak<TokioMutex<NoteRepository<S>>>,
}

impl<S: KeyValueStore + 'static> Autosaver<S> {
    pub fn new(
        repository: &Arc<TokioMutex<NoteRepository<S>>>,
        debounce: Duration,
        interval: Duration,
    ) -> Self {
        info!(
            "Initializing autosave with debounce {:?} and interval {:?}",
            debounce, interval
        );
        Self {
            debounce,
            interval,
            command_tx: None,
            task: None,
            status: Arc::new(Mutex::new(AutosaveStatus::default())),
            repository: Arc::downgrade(repository),
        }
    }

    /// Starts the autosave task
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            debug!("Autosave already running");
            return Ok(());
        }

        let repository = self.repository.upgrade().ok_or_else(|| {
            error!("Failed to start autosave - repository is gone");
            PadError::ApplicationError {
                message: "NoteRepository reference is no longer valid.".to_string(),
            }
        })?;

        let (command_tx, mut command_rx) = mpsc::channel(32);
        self.command_tx = Some(command_tx);

        let debounce = self.debounce;
        let period = self.interval;
        let status = Arc::clone(&self.status);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.tick().await; // Initial tick

            let mut pending: Option<PendingEdit> = None;
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = wait_until(deadline) => {
                        deadline = None;
                        commit_pending(&repository, &mut pending, &status).await;
                    }
                    _ = interval.tick() => {
                        trace!("Periodic autosave tick");
                        commit_pending(&repository, &mut pending, &status).await;
                    }
                    command = command_rx.recv() => match command {
                        Some(AutosaveCommand::Edit { note_id, title, content }) => {
                            pending = Some(PendingEdit { note_id, title, content });
                            if repository.lock().await.settings().auto_save {
                                deadline = Some(Instant::now() + debounce);
                            }
                        }
                        Some(AutosaveCommand::Flush) => {
                            deadline = None;
                            commit_pending(&repository, &mut pending, &status).await;
                        }
                        Some(AutosaveCommand::Stop) | None => {
                            commit_pending(&repository, &mut pending, &status).await;
                            info!("Autosave stopping...");
                            break;
                        }
                    }
                }
            }
        });

        self.task = Some(task);
        self.set_running(true);
        Ok(())
    }

    /// Reports an editor change. Restarts the quiet period.
    pub async fn edit(&self, note_id: &str, title: &str, content: &str) -> Result<()> {
        self.send(AutosaveCommand::Edit {
            note_id: note_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        })
        .await
    }

    /// Commits the pending edit without waiting for the quiet period
    pub async fn flush(&self) -> Result<()> {
        self.send(AutosaveCommand::Flush).await
    }

    /// Commits the pending edit and stops the task
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            if let Some(tx) = self.command_tx.take() {
                if let Err(e) = tx.send(AutosaveCommand::Stop).await {
                    error!("Failed to send stop command to autosave: {}", e);
                }
            }

            if let Err(e) = task.await {
                let message = format!("Failed to stop autosave: {}", e);
                error!("{}", message);
                return Err(PadError::ApplicationError { message });
            }

            self.set_running(false);
            info!("Autosave stopped");
        } else {
            debug!("Autosave is not running");
        }
        Ok(())
    }

    pub fn get_status(&self) -> AutosaveStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    async fn send(&self, command: AutosaveCommand) -> Result<()> {
        let tx = self.command_tx.as_ref().ok_or_else(|| PadError::ApplicationError {
            message: "Autosave is not running".to_string(),
        })?;

        tx.send(command)
            .await
            .map_err(|e| PadError::ApplicationError {
                message: format!("Failed to send autosave command: {}", e),
            })
    }

    fn set_running(&self, running: bool) {
        if let Ok(mut status) = self.status.lock() {
            status.is_running = running;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn commit_pending<S: KeyValueStore>(
    repository: &Arc<TokioMutex<NoteRepository<S>>>,
    pending: &mut Option<PendingEdit>,
    status: &Arc<Mutex<AutosaveStatus>>,
) {
    let Some(edit) = pending.take() else {
        return;
    };

    let outcome = repository
        .lock()
        .await
        .commit_edit(&edit.note_id, &edit.title, &edit.content);

    match outcome {
        CommitOutcome::Changed => {
            debug!("Autosaved note {}", edit.note_id);
            if let Ok(mut status) = status.lock() {
                status.commits += 1;
                status.last_commit_time = Some(Utc::now());
            }
        }
        CommitOutcome::Unchanged => trace!("Note {} already up to date", edit.note_id),
        CommitOutcome::Unresolved => {
            debug!("Dropping pending edit for missing note {}", edit.note_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceId, MemoryStore, SettingsPatch};

    async fn setup() -> (Arc<TokioMutex<NoteRepository<MemoryStore>>>, MemoryStore, String) {
        let store = MemoryStore::new();
        let mut repo = NoteRepository::new(store.clone(), InstanceId::new("tab-a"));
        repo.load();
        let id = repo.create(Some("Draft"), None).id;
        (Arc::new(TokioMutex::new(repo)), store, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_commit() {
        let (repo, store, id) = setup().await;
        let writes = store.write_count();
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        autosaver.start().unwrap();

        for text in ["h", "he", "hel", "hell", "hello"] {
            autosaver.edit(&id, "Draft", text).await.unwrap();
            time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(store.write_count(), writes);

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.write_count(), writes + 1);
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "hello");
        assert_eq!(autosaver.get_status().commits, 1);

        autosaver.stop().await.unwrap();
        assert!(!autosaver.get_status().is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_do_not_write() {
        let (repo, store, id) = setup().await;
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        autosaver.start().unwrap();

        autosaver.edit(&id, "Draft", "saved once").await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        let writes = store.write_count();

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.write_count(), writes);

        autosaver.stop().await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_commits_when_debounce_disabled() {
        let (repo, _store, id) = setup().await;
        repo.lock().await.update_settings(SettingsPatch {
            auto_save: Some(false),
            ..Default::default()
        });
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        autosaver.start().unwrap();

        autosaver.edit(&id, "Draft", "typed").await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "");

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "typed");

        autosaver.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_commits_pending_edit() {
        let (repo, _store, id) = setup().await;
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        autosaver.start().unwrap();

        autosaver.edit(&id, "Renamed", "last words").await.unwrap();
        autosaver.stop().await.unwrap();

        let repo = repo.lock().await;
        let note = repo.get_note(&id).unwrap();
        assert_eq!(note.title, "Renamed");
        assert_eq!(note.content, "last words");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_commits_before_the_debounce_deadline() {
        let (repo, store, id) = setup().await;
        let writes = store.write_count();
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(10), Duration::from_secs(60));
        autosaver.start().unwrap();

        autosaver.edit(&id, "Draft", "flushed early").await.unwrap();
        autosaver.flush().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.write_count(), writes + 1);
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "flushed early");

        // Nothing new to commit
        autosaver.flush().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.write_count(), writes + 1);

        // The cancelled debounce deadline does not fire later
        time::sleep(Duration::from_secs(15)).await;
        assert_eq!(store.write_count(), writes + 1);
        assert_eq!(autosaver.get_status().commits, 1);

        autosaver.stop().await.unwrap();
        assert_eq!(store.write_count(), writes + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_edit_is_not_replayed_over_newer_content() {
        let (repo, store, id) = setup().await;
        let mut autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        autosaver.start().unwrap();

        autosaver.edit(&id, "Draft", "old buffer").await.unwrap();
        time::sleep(Duration::from_secs(2)).await;

        // Newer content arrives without going through this autosaver
        repo.lock().await.commit_edit(&id, "Draft", "newer");
        let writes = store.write_count();

        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(store.write_count(), writes);
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "newer");

        autosaver.stop().await.unwrap();
        assert_eq!(repo.lock().await.get_note(&id).unwrap().content, "newer");
    }

    #[tokio::test]
    async fn test_commands_fail_when_not_running() {
        let (repo, _store, id) = setup().await;
        let autosaver = Autosaver::new(&repo, Duration::from_secs(1), Duration::from_secs(5));
        assert!(autosaver.edit(&id, "t", "c").await.is_err());
        assert!(autosaver.flush().await.is_err());
    }
}
