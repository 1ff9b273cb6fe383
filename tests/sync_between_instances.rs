use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Duration};

use purenote::{
    spawn_change_listener, Autosaver, ChangeOrigin, CommitOutcome, FileStore, InstanceId, KeyValueStore,
    ManualClock, MemoryStore, Note, NoteRepository, RemoteEffect, SettingsPatch, StorageKey, Theme,
    TimestampIdGenerator,
};

fn instance<S: KeyValueStore>(store: S, name: &str, clock: &ManualClock) -> NoteRepository<S> {
    let mut repo = NoteRepository::with_environment(
        store,
        InstanceId::new(name),
        Arc::new(clock.clone()),
        Arc::new(TimestampIdGenerator::new(name)),
    );
    repo.load();
    repo
}

async fn next_effect(rx: &mut mpsc::Receiver<RemoteEffect>) -> RemoteEffect {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no effect delivered")
        .expect("listener stopped")
}

#[tokio::test]
async fn test_commit_in_one_instance_reaches_the_other() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_700_000_000_000);

    let mut tab_a = instance(store.clone(), "tab-a", &clock);
    let note = tab_a.create(Some("Shared"), Some("v1"));

    let tab_b = Arc::new(Mutex::new(instance(store.clone(), "tab-b", &clock)));
    let (effects_tx, mut effects_rx) = mpsc::channel(16);
    let listener = spawn_change_listener(Arc::clone(&tab_b), store.subscribe(), Some(effects_tx));

    clock.advance(1_000);
    assert_eq!(tab_a.commit_edit(&note.id, "Shared", "v2"), CommitOutcome::Changed);

    assert_eq!(next_effect(&mut effects_rx).await, RemoteEffect::NotesReplaced);
    {
        let tab_b = tab_b.lock().await;
        let seen = tab_b.get_note(&note.id).unwrap();
        assert_eq!(seen, tab_a.get_note(&note.id).unwrap());
        assert_eq!(seen.content, "v2");
    }

    listener.abort();
}

#[tokio::test]
async fn test_own_writes_are_not_echoed_back() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(0);

    let tab_a = Arc::new(Mutex::new(instance(store.clone(), "tab-a", &clock)));
    let (effects_tx, mut effects_rx) = mpsc::channel(16);
    let listener = spawn_change_listener(Arc::clone(&tab_a), store.subscribe(), Some(effects_tx));

    let writes_before = store.write_count();
    {
        let mut repo = tab_a.lock().await;
        repo.create(Some("Mine"), None);
        repo.update_settings(SettingsPatch {
            theme: Some(Theme::Dark),
            ..Default::default()
        });
    }

    // An external change afterwards is the first effect delivered
    store
        .write(
            &ChangeOrigin::Instance(InstanceId::new("tab-b")),
            [(StorageKey::Settings, json!({ "theme": "light" }))]
                .into_iter()
                .collect(),
        )
        .unwrap();

    match next_effect(&mut effects_rx).await {
        RemoteEffect::SettingsReplaced(settings) => assert_eq!(settings.theme, Theme::Light),
        other => panic!("unexpected effect {:?}", other),
    }
    // Applying the remote change did not write back
    assert_eq!(store.write_count(), writes_before + 3);

    listener.abort();
}

#[tokio::test]
async fn test_latest_write_wins_deterministically() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(0);

    let mut tab_a = instance(store.clone(), "tab-a", &clock);
    let note = tab_a.create(Some("Contested"), None);
    let mut tab_b = instance(store.clone(), "tab-b", &clock);
    let mut tab_c = instance(store.clone(), "tab-c", &clock);
    let mut observer = store.subscribe();

    clock.advance(10);
    tab_a.commit_edit(&note.id, "Contested", "from a");
    clock.advance(10);
    tab_b.commit_edit(&note.id, "Contested", "from b");

    // Deliver every notes change to tab_c in order
    while let Ok(change) = observer.try_recv() {
        tab_c.handle_storage_change(change);
    }
    assert_eq!(tab_c.get_note(&note.id).unwrap().content, "from b");

    // tab_a still holds its own edit until it sees b's write
    assert_eq!(tab_a.get_note(&note.id).unwrap().content, "from a");
    let latest = store.get(StorageKey::Notes).unwrap();
    tab_a.apply_remote_change(StorageKey::Notes, latest);
    assert_eq!(tab_a.get_note(&note.id).unwrap().content, "from b");
}

#[tokio::test]
async fn test_remote_active_pointer_is_adopted() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(0);

    let mut tab_a = instance(store.clone(), "tab-a", &clock);
    let first = tab_a.create(Some("First"), Some("one"));
    tab_a.create(Some("Second"), Some("two"));

    let tab_b = Arc::new(Mutex::new(instance(store.clone(), "tab-b", &clock)));
    let (effects_tx, mut effects_rx) = mpsc::channel(16);
    let listener = spawn_change_listener(Arc::clone(&tab_b), store.subscribe(), Some(effects_tx));

    assert!(tab_a.switch_active(&first.id, None));

    match next_effect(&mut effects_rx).await {
        RemoteEffect::ActiveNoteChanged(note) => assert_eq!(note.content, "one"),
        other => panic!("unexpected effect {:?}", other),
    }
    assert_eq!(tab_b.lock().await.active_note_id(), first.id);

    listener.abort();
}

fn stored_content(store: &MemoryStore, note_id: &str) -> String {
    let notes: Vec<Note> = serde_json::from_value(store.get(StorageKey::Notes).unwrap()).unwrap();
    notes.into_iter().find(|note| note.id == note_id).unwrap().content
}

#[tokio::test(start_paused = true)]
async fn test_idle_autosaver_keeps_remote_edit() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_000);
    let note = instance(store.clone(), "setup", &clock).create(Some("Shared"), None);

    let tab_a = Arc::new(Mutex::new(instance(store.clone(), "tab-a", &clock)));
    let tab_b = Arc::new(Mutex::new(instance(store.clone(), "tab-b", &clock)));
    let (a_tx, mut a_effects) = mpsc::channel(16);
    let listener_a = spawn_change_listener(Arc::clone(&tab_a), store.subscribe(), Some(a_tx));
    let listener_b = spawn_change_listener(Arc::clone(&tab_b), store.subscribe(), None);

    let mut autosaver = Autosaver::new(&tab_a, Duration::from_secs(1), Duration::from_secs(5));
    autosaver.start().unwrap();
    autosaver.edit(&note.id, "Shared", "typed in a").await.unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(stored_content(&store, &note.id), "typed in a");

    clock.advance(1_000);
    assert_eq!(
        tab_b.lock().await.commit_edit(&note.id, "Shared", "edited in b"),
        CommitOutcome::Changed
    );
    assert_eq!(next_effect(&mut a_effects).await, RemoteEffect::NotesReplaced);
    assert_eq!(tab_a.lock().await.get_note(&note.id).unwrap().content, "edited in b");

    // Several periodic ticks pass with no typing in tab-a
    let writes = store.write_count();
    sleep(Duration::from_secs(16)).await;
    assert_eq!(store.write_count(), writes);
    assert_eq!(stored_content(&store, &note.id), "edited in b");

    autosaver.stop().await.unwrap();
    assert_eq!(store.write_count(), writes);
    assert_eq!(tab_a.lock().await.get_note(&note.id).unwrap().content, "edited in b");

    listener_a.abort();
    listener_b.abort();
}

#[tokio::test]
async fn test_lagging_listener_recovers_dropped_changes() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(0);

    let mut tab_a = instance(store.clone(), "tab-a", &clock);
    let note = tab_a.create(Some("Busy"), None);
    let tab_b = Arc::new(Mutex::new(instance(store.clone(), "tab-b", &clock)));
    let receiver = store.subscribe();

    // The settings event is the oldest and falls out of the channel
    tab_a.update_settings(SettingsPatch {
        theme: Some(Theme::Dark),
        ..Default::default()
    });
    for i in 0..100 {
        clock.advance(1);
        tab_a.commit_edit(&note.id, "Busy", &format!("revision {}", i));
    }
    let writes = store.write_count();

    let (effects_tx, mut effects_rx) = mpsc::channel(16);
    let listener = spawn_change_listener(Arc::clone(&tab_b), receiver, Some(effects_tx));

    loop {
        if let RemoteEffect::SettingsReplaced(settings) = next_effect(&mut effects_rx).await {
            assert_eq!(settings.theme, Theme::Dark);
            break;
        }
    }
    assert_eq!(tab_b.lock().await.settings().theme, Theme::Dark);
    assert_eq!(store.write_count(), writes);

    listener.abort();
}

#[test]
fn test_file_store_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes").join("store.json");
    let clock = ManualClock::new(1_000);

    let created = {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let mut repo = instance(store, "proc-1", &clock);
        let note = repo.create(Some("Persisted"), Some("on disk"));
        repo.update_settings(SettingsPatch {
            font_size: Some(999),
            ..Default::default()
        });
        note
    };

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["currentNoteId"], json!(created.id));
    assert_eq!(raw["settings"]["fontSize"], json!(24));
    assert_eq!(raw["notes"][1]["createdAt"], json!(1_000));

    let store = Arc::new(FileStore::open(&path).unwrap());
    let repo = instance(store, "proc-2", &clock);
    assert_eq!(repo.notes().len(), 2);
    assert_eq!(repo.current_note(), &created);
    assert_eq!(repo.settings().font_size, 24);
}

#[test]
fn test_existing_install_state_is_read_as_is() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(
        &path,
        r#"{
            "notes": [
                {"id": "welcome-note", "title": "Welcome", "content": "hi",
                 "createdAt": 1700000000000, "updatedAt": 1700000000000},
                {"id": "note_1700000001000", "title": "Todo", "content": "- milk",
                 "createdAt": 1700000001000, "updatedAt": 1700000002000}
            ],
            "currentNoteId": "note_1700000001000",
            "settings": {"theme": "dark", "fontSize": 16, "opacity": 0.9, "autoSave": true}
        }"#,
    )
    .unwrap();

    let store = FileStore::open(&path).unwrap();
    let clock = ManualClock::new(0);
    let repo = instance(store, "proc-1", &clock);

    let current: &Note = repo.current_note();
    assert_eq!(current.title, "Todo");
    assert_eq!(current.updated_at.timestamp_millis(), 1_700_000_002_000);
    assert_eq!(repo.settings().theme, Theme::Dark);
    assert_eq!(repo.settings().font_size, 16);
    assert_eq!(repo.settings().size.width, 450.0);
}
