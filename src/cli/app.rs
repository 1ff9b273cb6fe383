//! CLI module for the purenote application
//!
//! Plays the part of the editor surface: every command goes through the
//! note repository, which owns all reads and writes of the store file.
use std::{
    fs,
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, Mutex},
};

use crate::{
    export_note, spawn_change_listener, Autosaver, Commands, Config, ExportFormat, FileStore,
    KeyValueStore, Note, NoteRepository, NoteStats, PadError, RemoteEffect, Result, SettingsPatch,
    Theme,
};

type Repository = NoteRepository<Arc<FileStore>>;

/// CLI Application handler - processes CLI commands against the repository
pub struct App {
    /// The note repository
    repository: Arc<Mutex<Repository>>,

    /// Application configuration
    config: Config,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Create a new CLI application around a loaded repository
    pub fn new(repository: Repository, config: Config, verbose: bool) -> Self {
        Self {
            repository: Arc::new(Mutex::new(repository)),
            config,
            verbose,
        }
    }

    /// Run the CLI application with the given command
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::List { json } => self.list_notes(json).await?,

            Commands::Show { id, json } => self.show_note(id, json).await?,

            Commands::Create { title, content } => {
                let note = self
                    .repository
                    .lock()
                    .await
                    .create(title.as_deref(), content.as_deref());
                self.sync().await?;
                println!("Note created with ID: {}", note.id);
            }

            Commands::Edit {
                id,
                title,
                content,
                file,
                stdin,
            } => self.handle_edit(id, title, content, file, stdin).await?,

            Commands::Switch { id } => {
                if !self.repository.lock().await.switch_active(&id, None) {
                    return Err(PadError::UnresolvedNote { id });
                }
                self.sync().await?;
                println!("Active note is now {}", id);
            }

            Commands::Delete { id, force } => self.handle_delete(id, force).await?,

            Commands::Search { query, json } => self.handle_search(query, json).await?,

            Commands::Settings {
                theme,
                font_size,
                opacity,
                auto_save,
            } => self.handle_settings(theme, font_size, opacity, auto_save).await?,

            Commands::Export { id, output, format } => self.handle_export(id, output, format).await?,

            Commands::Watch => self.watch().await?,
        }

        Ok(())
    }

    /// Surfaces a store failure that the repository only logged
    async fn sync(&self) -> Result<()> {
        self.repository.lock().await.flush()
    }

    async fn list_notes(&self, json: bool) -> Result<()> {
        let repository = self.repository.lock().await;
        self.display_notes(repository.notes(), repository.active_note_id(), json)
    }

    async fn show_note(&self, id: Option<String>, json: bool) -> Result<()> {
        let note = self.resolve_note(id).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&note)?);
            return Ok(());
        }

        let stats = NoteStats::from_content(&note.content);
        println!("ID: {}", note.id);
        println!("Title: {}", console::style(&note.title).bold());
        println!(
            "Updated: {} | {} words | {} characters",
            note.updated_at.format("%Y-%m-%d %H:%M:%S"),
            stats.words,
            stats.characters
        );
        println!("\n{}", note.content);
        Ok(())
    }

    /// The note with `id`, or the active note
    async fn resolve_note(&self, id: Option<String>) -> Result<Note> {
        let repository = self.repository.lock().await;
        match id {
            Some(id) => repository
                .get_note(&id)
                .cloned()
                .ok_or(PadError::UnresolvedNote { id }),
            None => Ok(repository.current_note().clone()),
        }
    }

    /// Display notes in the requested format
    fn display_notes(&self, notes: &[Note], active_id: &str, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(notes)?);
            return Ok(());
        }

        if notes.is_empty() {
            println!("No notes found matching the criteria.");
            return Ok(());
        }

        // Use terminal width for formatting if available
        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, note) in notes.iter().enumerate() {
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }

            let marker = if note.id == active_id { "*" } else { " " };
            println!(
                "{} {} | Updated: {}",
                marker,
                note.id,
                note.updated_at.format("%Y-%m-%d %H:%M")
            );
            println!("  {}", console::style(&note.title).bold());

            let preview = content_preview(&note.content, 80);
            if !preview.is_empty() {
                println!("  {}", console::style(preview).dim());
            }
        }

        println!(
            "\n{} note{}",
            notes.len(),
            if notes.len() == 1 { "" } else { "s" }
        );
        Ok(())
    }

    async fn handle_search(&self, query: String, json: bool) -> Result<()> {
        let repository = self.repository.lock().await;
        let results = repository.search(&query);

        if results.is_empty() && !json {
            println!("No notes found matching query: \"{}\"", query);
            return Ok(());
        }
        self.display_notes(&results, repository.active_note_id(), json)
    }

    /// Commits an edit through the autosaver, the way the editor would.
    /// With `stdin` every line read is appended and reported as a keystroke
    /// batch, so slow input is saved on the configured debounce and interval.
    async fn handle_edit(
        &self,
        id: String,
        title: Option<String>,
        content: Option<String>,
        file: Option<PathBuf>,
        stdin: bool,
    ) -> Result<()> {
        if content.is_some() && file.is_some() {
            return Err(PadError::ApplicationError {
                message: "Cannot specify both --content and --file options".to_string(),
            });
        }

        let existing = self.resolve_note(Some(id.clone())).await?;
        let title = title.unwrap_or_else(|| existing.title.clone());

        let mut autosaver = Autosaver::new(
            &self.repository,
            self.config.autosave_debounce(),
            self.config.autosave_interval(),
        );
        autosaver.start()?;

        if stdin {
            let mut content = existing.content;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(&line);
                autosaver.edit(&id, &title, &content).await?;
            }
        } else {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => read_content_file(&path)?,
                (None, None) => existing.content,
            };
            autosaver.edit(&id, &title, &content).await?;
        }
        autosaver.stop().await?;

        let commits = autosaver.get_status().commits;
        if commits > 0 {
            self.sync().await?;
            debug!("Edit of {} took {} commit(s)", id, commits);
            println!("Note {} updated", id);
        } else {
            println!("Note {} unchanged", id);
        }
        Ok(())
    }

    async fn handle_delete(&self, id: String, force: bool) -> Result<()> {
        let note = self.resolve_note(Some(id.clone())).await?;

        if !force {
            println!("You are about to delete the following note:");
            println!("ID:     {}", note.id);
            println!("Title:  {}", note.title);
            println!("Created: {}", note.created_at.format("%Y-%m-%d %H:%M:%S"));

            print!("\nAre you sure you want to delete this note? [y/N]: ");
            stdout().flush()?;

            let mut input = String::new();
            stdin().read_line(&mut input)?;

            let input = input.trim().to_lowercase();
            if input != "y" && input != "yes" {
                println!("Deletion cancelled.");
                return Ok(());
            }
        }

        if !self.repository.lock().await.delete(&id)? {
            return Err(PadError::UnresolvedNote { id });
        }
        self.sync().await?;

        println!("Note '{}' ({}) has been deleted.", note.title, note.id);
        Ok(())
    }

    async fn handle_settings(
        &self,
        theme: Option<String>,
        font_size: Option<i64>,
        opacity: Option<f64>,
        auto_save: Option<bool>,
    ) -> Result<()> {
        let theme = theme
            .map(|t| t.parse::<Theme>())
            .transpose()
            .map_err(|message| PadError::ApplicationError { message })?;

        let patch = SettingsPatch {
            theme,
            font_size,
            opacity,
            auto_save,
            ..Default::default()
        };

        let settings = if patch == SettingsPatch::default() {
            self.repository.lock().await.settings().clone()
        } else {
            let settings = self.repository.lock().await.update_settings(patch).clone();
            self.sync().await?;
            settings
        };

        println!("{}", serde_json::to_string_pretty(&settings)?);
        Ok(())
    }

    async fn handle_export(
        &self,
        id: Option<String>,
        output: PathBuf,
        format: ExportFormat,
    ) -> Result<()> {
        let note = self.resolve_note(id).await?;
        let exported = export_note(&note, format);

        if !output.exists() {
            debug!("Creating export directory: {}", output.display());
            fs::create_dir_all(&output)?;
        }

        let path = output.join(sanitize_file_name(&exported.file_name));
        fs::write(&path, exported.body)?;

        info!("Exported note {} as {}", note.id, exported.mime_type);
        println!("Exported '{}' to {}", note.title, path.display());
        Ok(())
    }

    /// Prints changes other instances make to the store until Ctrl-C
    async fn watch(&self) -> Result<()> {
        let (store, receiver) = {
            let repository = self.repository.lock().await;
            let store = Arc::clone(repository.store());
            let receiver = store.subscribe();
            (store, receiver)
        };
        store.watch()?;

        let (effects_tx, mut effects_rx) = mpsc::channel(16);
        let listener = spawn_change_listener(Arc::clone(&self.repository), receiver, Some(effects_tx));

        println!(
            "Watching {} for changes (Ctrl-C to stop)",
            self.config.store_path.display()
        );

        loop {
            tokio::select! {
                effect = effects_rx.recv() => match effect {
                    Some(effect) => self.print_effect(effect),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping watch");
                    break;
                }
            }
        }

        store.unwatch();
        listener.abort();
        Ok(())
    }

    fn print_effect(&self, effect: RemoteEffect) {
        match effect {
            RemoteEffect::NotesReplaced => println!("{}", console::style("notes changed").cyan()),
            RemoteEffect::ActiveNoteChanged(note) => {
                println!("{} {}", console::style("active note:").cyan(), note.title)
            }
            RemoteEffect::SettingsReplaced(settings) => {
                if self.verbose {
                    println!("{} {:?}", console::style("settings:").cyan(), settings);
                } else {
                    println!("{}", console::style("settings changed").cyan());
                }
            }
            RemoteEffect::Ignored => {}
        }
    }
}

fn read_content_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PadError::ApplicationError {
            message: format!("File not found: {}", path.display()),
        });
    }
    Ok(fs::read_to_string(path)?)
}

/// First non-empty line, cut to `max_chars` characters
fn content_preview(content: &str, max_chars: usize) -> String {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Replaces characters that are not allowed in file names
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preview() {
        assert_eq!(content_preview("\n\n  first line\nsecond", 80), "  first line");
        assert_eq!(content_preview("ééééé", 3), "ééé...");
        assert_eq!(content_preview("", 10), "");
    }

    #[test]
    fn test_edit_stdin_excludes_other_content_sources() {
        use clap::Parser;

        assert!(crate::Cli::try_parse_from(["purenote", "edit", "n1", "--stdin", "-c", "x"]).is_err());
        let cli = crate::Cli::try_parse_from(["purenote", "edit", "n1", "--stdin"]).unwrap();
        assert!(matches!(cli.command, Commands::Edit { stdin: true, .. }));
    }

    #[tokio::test]
    async fn test_edit_commits_through_the_autosaver_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            store_path: dir.path().join("store.json"),
            autosave_debounce_ms: 50,
            ..Default::default()
        };
        let store = Arc::new(FileStore::open(&config.store_path).unwrap());
        let mut repository = NoteRepository::new(store, crate::InstanceId::new("cli"));
        repository.load();
        let id = repository.current_note().id.clone();
        let app = App::new(repository, config.clone(), false);

        let edit = |content: &str| Commands::Edit {
            id: id.clone(),
            title: Some("From CLI".to_string()),
            content: Some(content.to_string()),
            file: None,
            stdin: false,
        };
        app.run(edit("saved")).await.unwrap();
        app.run(edit("saved")).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config.store_path).unwrap()).unwrap();
        assert_eq!(raw["notes"][0]["title"], "From CLI");
        assert_eq!(raw["notes"][0]["content"], "saved");
        assert_eq!(app.repository.lock().await.current_note().content, "saved");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b: c?.md"), "a_b_ c_.md");
    }
}
