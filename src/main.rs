mod app;
mod config;
mod document;
mod github;
mod selection;
mod tree;
mod ui;

use crate::app::{App, BackendEvent, BackendTask, ModalState, PaneFocus, estimate_tokens};
use crate::config::AppConfig;
use crate::github::{ContentClient, GithubClient};
use crate::tree::{Node, NodeKind, TreeEntry};
use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Parser)]
#[command(
    name = "git-collector",
    version,
    about = "Collect GitHub repository files into a single Markdown document"
)]
struct Cli {
    /// Destination document, or a directory to scan with --update
    destination: PathBuf,

    /// Re-fetch the files of existing documents instead of opening the picker
    #[arg(long)]
    update: bool,

    /// With --update, rewrite documents even when no content changed
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client: Arc<dyn ContentClient> = Arc::new(GithubClient::default());

    if cli.update {
        let destination = cli.destination.clone();
        let force = cli.force;
        // the blocking HTTP client must stay off the async runtime threads
        return tokio::task::spawn_blocking(move || {
            run_update(client.as_ref(), &destination, force)
        })
        .await
        .context("update task failed")?;
    }

    let config = match AppConfig::load_or_default() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load config, using defaults: {err:#}");
            AppConfig::default()
        }
    };

    let destination = cli.destination.clone();
    let (repo_url, prior_paths) = if destination.exists() {
        let text = fs::read_to_string(&destination)
            .with_context(|| format!("failed to read {}", destination.display()))?;
        let parsed = document::parse(&text)
            .with_context(|| format!("cannot load {}", destination.display()))?;
        (parsed.repo_url, parsed.paths)
    } else {
        (prompt_repo_url()?, Vec::new())
    };

    let (doc_title, scope) = resolve_title_and_scope(&repo_url)?;

    let fetch_client = client.clone();
    let fetch_url = repo_url.clone();
    let entries = tokio::task::spawn_blocking(move || fetch_client.fetch_tree(&fetch_url, None))
        .await
        .context("tree fetch task failed")?
        .with_context(|| format!("failed to fetch the tree of {repo_url}"))?;
    let entries = scope_entries(entries, &scope);

    let mut root = tree::build_tree(&entries);
    tree::sort_tree(&mut root);
    expand_path_chain(&mut root, &scope);
    tree::merge_phantoms(&mut root, &prior_paths);

    let app = App::new(config, repo_url, doc_title, destination, root, &prior_paths);

    setup_terminal()?;
    let mut terminal =
        Terminal::new(CrosstermBackend::new(io::stdout())).context("failed to create terminal")?;

    let run_result = run_app(&mut terminal, app, client).await;

    restore_terminal(&mut terminal)?;
    if let Err(err) = run_result {
        eprintln!("{err:#}");
        std::process::exit(1);
    }

    Ok(())
}

fn prompt_repo_url() -> Result<String> {
    print!("Enter GitHub repository URL: ");
    io::stdout().flush().context("failed to flush stdout")?;

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read repository URL")?;
    let url = line.trim().to_string();
    if url.is_empty() {
        bail!("no repository URL given");
    }
    Ok(url)
}

fn resolve_title_and_scope(repo_url: &str) -> Result<(String, Vec<String>)> {
    if let Some(name) = github::fixture_name(repo_url) {
        return Ok((name.to_string(), Vec::new()));
    }
    let location = github::parse_repo_url(repo_url)?;
    Ok((location.title(), location.initial_path_parts))
}

// entry paths stay repo-rooted; scoping only filters what is visible
fn scope_entries(entries: Vec<TreeEntry>, scope: &[String]) -> Vec<TreeEntry> {
    if scope.is_empty() {
        return entries;
    }
    let scope_path = scope.join("/");
    let prefix = format!("{scope_path}/");
    entries
        .into_iter()
        .filter(|entry| entry.path == scope_path || entry.path.starts_with(&prefix))
        .collect()
}

fn expand_path_chain(root: &mut Node, scope: &[String]) {
    let mut prefix = String::new();
    for part in scope {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if let Some(node) = tree::node_at_mut(root, &prefix) {
            node.is_expanded = true;
        }
    }
}

fn setup_terminal() -> Result<()> {
    enable_raw_mode().context("failed to enable raw mode")?;
    execute!(io::stdout(), EnterAlternateScreen).context("failed to enter alternate screen")?;
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to restore cursor")?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    client: Arc<dyn ContentClient>,
) -> Result<()> {
    let (task_tx, task_rx) = mpsc::unbounded_channel::<BackendTask>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BackendEvent>();

    tokio::spawn(worker_loop(client, task_rx, event_tx));

    request_token_counts(&mut app, &task_tx)?;

    while !app.should_quit {
        while let Ok(event) = event_rx.try_recv() {
            handle_backend_event(&mut app, event);
        }

        terminal.draw(|frame| ui::draw(frame, &mut app))?;

        if event::poll(Duration::from_millis(100)).context("event poll failed")?
            && let Event::Key(key) = event::read().context("event read failed")?
            && key.kind == KeyEventKind::Press
        {
            handle_key_event(&mut app, key, &task_tx)?;
        }
    }

    if let Err(err) = app.config.save() {
        eprintln!("failed to save config: {err:#}");
    }

    Ok(())
}

async fn worker_loop(
    client: Arc<dyn ContentClient>,
    mut task_rx: UnboundedReceiver<BackendTask>,
    event_tx: UnboundedSender<BackendEvent>,
) {
    while let Some(task) = task_rx.recv().await {
        let event = match task {
            BackendTask::LoadPreview {
                repo_url,
                path,
                seq,
            } => {
                let c = client.clone();
                let task_path = path.clone();
                let result =
                    tokio::task::spawn_blocking(move || c.fetch_content(&repo_url, &task_path))
                        .await;
                match result {
                    Ok(fetched) => BackendEvent::PreviewLoaded {
                        path,
                        seq,
                        result: fetched.map_err(|err| err.to_string()),
                    },
                    Err(err) => BackendEvent::Error {
                        context: "preview".to_string(),
                        message: format!("join error: {err}"),
                    },
                }
            }
            BackendTask::FetchSelected { repo_url, paths } => {
                let c = client.clone();
                let result = tokio::task::spawn_blocking(move || {
                    paths
                        .into_iter()
                        .map(|path| {
                            let fetched = c
                                .fetch_content(&repo_url, &path)
                                .map_err(|err| err.to_string());
                            (path, fetched)
                        })
                        .collect::<Vec<_>>()
                })
                .await;
                match result {
                    Ok(files) => BackendEvent::SelectionFetched { files },
                    Err(err) => BackendEvent::Error {
                        context: "save".to_string(),
                        message: format!("join error: {err}"),
                    },
                }
            }
            BackendTask::CountTokens { repo_url, paths } => {
                let c = client.clone();
                let result = tokio::task::spawn_blocking(move || {
                    paths
                        .into_iter()
                        .filter_map(|path| {
                            c.fetch_content(&repo_url, &path)
                                .ok()
                                .map(|content| (path, estimate_tokens(&content)))
                        })
                        .collect::<Vec<_>>()
                })
                .await;
                match result {
                    Ok(counts) => BackendEvent::TokenCounts { counts },
                    Err(err) => BackendEvent::Error {
                        context: "tokens".to_string(),
                        message: format!("join error: {err}"),
                    },
                }
            }
        };

        if event_tx.send(event).is_err() {
            break;
        }
    }
}

fn handle_backend_event(app: &mut App, event: BackendEvent) {
    match event {
        BackendEvent::PreviewLoaded { path, seq, result } => {
            app.apply_preview_loaded(&path, seq, result);
            app.busy = false;
        }
        BackendEvent::SelectionFetched { files } => {
            app.busy = false;
            finish_save(app, files);
        }
        BackendEvent::TokenCounts { counts } => {
            app.record_token_counts(counts);
        }
        BackendEvent::Error { context, message } => {
            app.busy = false;
            app.set_status(format!("error[{context}]: {message}"));
        }
    }
}

fn finish_save(app: &mut App, files: Vec<(String, Result<String, String>)>) {
    let mut errors = 0usize;
    let mut token_counts = Vec::new();
    let mut contents = BTreeMap::new();
    for (path, fetched) in files {
        match fetched {
            Ok(content) => {
                token_counts.push((path.clone(), estimate_tokens(&content)));
                contents.insert(path, content);
            }
            Err(message) => {
                // the record stays in the document with a placeholder body
                errors += 1;
                contents.insert(path, document::error_placeholder(&message));
            }
        }
    }
    app.record_token_counts(token_counts);

    let text = document::serialize(
        &app.repo_url,
        Some(&app.doc_title),
        &contents,
        &document::local_timestamp(),
    );
    match document::write_atomic(&app.destination, &text) {
        Ok(()) => {
            app.mark_saved();
            let mut message = format!(
                "Saved {} file(s) to {}",
                contents.len(),
                app.destination.display()
            );
            if errors > 0 {
                message.push_str(&format!(" ({errors} failed to fetch)"));
            }
            app.set_status(message);
            if app.quit_after_save {
                app.should_quit = true;
            }
        }
        Err(err) => {
            app.quit_after_save = false;
            app.set_status(format!(
                "Failed to write {}: {err}",
                app.destination.display()
            ));
        }
    }
}

fn send_task(
    app: &mut App,
    task_tx: &UnboundedSender<BackendTask>,
    task: BackendTask,
) -> Result<()> {
    app.busy = true;
    task_tx
        .send(task)
        .map_err(|err| anyhow::anyhow!("failed to dispatch task: {err}"))
}

// token counting never flips the busy flag
fn request_token_counts(app: &mut App, task_tx: &UnboundedSender<BackendTask>) -> Result<()> {
    if !app.config.show_token_count {
        return Ok(());
    }
    let paths = app.missing_token_paths();
    if paths.is_empty() {
        return Ok(());
    }
    task_tx
        .send(BackendTask::CountTokens {
            repo_url: app.repo_url.clone(),
            paths,
        })
        .map_err(|err| anyhow::anyhow!("failed to dispatch task: {err}"))
}

fn start_save(app: &mut App, task_tx: &UnboundedSender<BackendTask>, quit_after: bool) -> Result<()> {
    let paths = app.eligible_selected();
    if paths.is_empty() {
        app.set_status("Nothing to save: no selectable files are selected");
        return Ok(());
    }
    app.quit_after_save = quit_after;
    app.set_status(format!("Fetching {} file(s)...", paths.len()));
    send_task(
        app,
        task_tx,
        BackendTask::FetchSelected {
            repo_url: app.repo_url.clone(),
            paths,
        },
    )
}

fn request_quit(app: &mut App) {
    if app.selection_dirty() {
        app.modal = ModalState::ConfirmQuit;
    } else {
        app.should_quit = true;
    }
}

fn handle_key_event(
    app: &mut App,
    key: KeyEvent,
    task_tx: &UnboundedSender<BackendTask>,
) -> Result<()> {
    if key.modifiers == KeyModifiers::CONTROL && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return Ok(());
    }

    match app.modal {
        ModalState::Help => {
            handle_help_key(app, key);
            Ok(())
        }
        ModalState::ConfirmQuit => handle_confirm_quit_key(app, key, task_tx),
        ModalState::None => match key.code {
            KeyCode::Char('q') if key.modifiers.is_empty() => {
                request_quit(app);
                Ok(())
            }
            KeyCode::Char('?') => {
                app.modal = ModalState::Help;
                Ok(())
            }
            KeyCode::Tab => {
                app.toggle_focus();
                Ok(())
            }
            KeyCode::Char('s') if key.modifiers.is_empty() => start_save(app, task_tx, false),
            KeyCode::Char('S') => start_save(app, task_tx, true),
            KeyCode::Char('w') if key.modifiers.is_empty() => {
                app.config.wrap_lines = !app.config.wrap_lines;
                Ok(())
            }
            _ => match app.focus {
                PaneFocus::Tree => handle_tree_key(app, key, task_tx),
                PaneFocus::Preview => {
                    handle_preview_key(app, key);
                    Ok(())
                }
            },
        },
    }
}

fn handle_help_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Enter | KeyCode::Char('?') | KeyCode::Char('q') => {
            app.modal = ModalState::None;
        }
        _ => {}
    }
}

fn handle_confirm_quit_key(
    app: &mut App,
    key: KeyEvent,
    task_tx: &UnboundedSender<BackendTask>,
) -> Result<()> {
    match key.code {
        KeyCode::Enter => {
            app.modal = ModalState::None;
            app.should_quit = true;
        }
        KeyCode::Char('s') => {
            app.modal = ModalState::None;
            start_save(app, task_tx, true)?;
        }
        KeyCode::Char('c') | KeyCode::Esc => app.modal = ModalState::None,
        _ => {}
    }
    Ok(())
}

fn handle_tree_key(
    app: &mut App,
    key: KeyEvent,
    task_tx: &UnboundedSender<BackendTask>,
) -> Result<()> {
    let fast = App::fast_step(app.tree_rows);
    let page = app.tree_rows.max(1);

    match key.code {
        KeyCode::Char('j') | KeyCode::Char('J') | KeyCode::Down => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                fast
            } else {
                1
            };
            app.move_cursor(step as isize);
        }
        KeyCode::Char('k') | KeyCode::Char('K') | KeyCode::Up => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                fast
            } else {
                1
            };
            app.move_cursor(-(step as isize));
        }
        KeyCode::PageDown => app.move_cursor(page as isize),
        KeyCode::PageUp => app.move_cursor(-(page as isize)),
        KeyCode::Char('d') if key.modifiers == KeyModifiers::CONTROL => {
            app.move_cursor(page as isize);
        }
        KeyCode::Char('u') if key.modifiers == KeyModifiers::CONTROL => {
            app.move_cursor(-(page as isize));
        }
        KeyCode::Char('l') | KeyCode::Right => {
            app.expand_at_cursor();
        }
        KeyCode::Char('h') | KeyCode::Left => {
            app.collapse_at_cursor_or_parent();
        }
        KeyCode::Char(' ') => {
            if app.toggle_select_at_cursor() {
                request_token_counts(app, task_tx)?;
            }
        }
        KeyCode::Enter => handle_tree_enter(app, task_tx)?,
        _ => {}
    }

    Ok(())
}

fn handle_tree_enter(app: &mut App, task_tx: &UnboundedSender<BackendTask>) -> Result<()> {
    let Some(entry) = app.cursor_entry().cloned() else {
        return Ok(());
    };
    match entry.kind {
        NodeKind::Directory => {
            app.toggle_expand_at_cursor();
        }
        NodeKind::File => {
            if !entry.is_selectable_file() {
                app.set_status("Missing and binary files have no preview");
                return Ok(());
            }
            let seq = app.begin_preview(&entry.path);
            send_task(
                app,
                task_tx,
                BackendTask::LoadPreview {
                    repo_url: app.repo_url.clone(),
                    path: entry.path,
                    seq,
                },
            )?;
        }
    }
    Ok(())
}

fn handle_preview_key(app: &mut App, key: KeyEvent) {
    let v_fast = App::fast_step(app.preview_line_count());
    let h_fast = App::fast_step(app.preview_longest_line());
    let page = app.preview_rows.max(1);

    match key.code {
        KeyCode::Char('j') | KeyCode::Char('J') | KeyCode::Down => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                v_fast
            } else {
                1
            };
            app.scroll_preview_down(step);
        }
        KeyCode::Char('k') | KeyCode::Char('K') | KeyCode::Up => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                v_fast
            } else {
                1
            };
            app.scroll_preview_up(step);
        }
        KeyCode::Char('l') | KeyCode::Char('L') | KeyCode::Right => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                h_fast
            } else {
                1
            };
            app.scroll_preview_right(step);
        }
        KeyCode::Char('h') | KeyCode::Char('H') | KeyCode::Left => {
            let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                h_fast
            } else {
                1
            };
            app.scroll_preview_left(step);
        }
        KeyCode::PageDown => app.scroll_preview_down(page),
        KeyCode::PageUp => app.scroll_preview_up(page),
        KeyCode::Char('d') if key.modifiers == KeyModifiers::CONTROL => {
            app.scroll_preview_down(page);
        }
        KeyCode::Char('u') if key.modifiers == KeyModifiers::CONTROL => {
            app.scroll_preview_up(page);
        }
        KeyCode::Home | KeyCode::Char('0') => app.preview_jump_line_start(),
        KeyCode::End | KeyCode::Char('$') => app.preview_jump_line_end(),
        _ => {}
    }
}

fn run_update(client: &dyn ContentClient, destination: &Path, force: bool) -> Result<()> {
    if destination.is_dir() {
        return run_update_dir(client, destination, force);
    }

    let text = fs::read_to_string(destination)
        .with_context(|| format!("failed to read {}", destination.display()))?;
    let outcome = document::update_document(client, &text, force, &document::local_timestamp())
        .with_context(|| format!("cannot update {}", destination.display()))?;
    apply_update_outcome(destination, &outcome)
}

fn run_update_dir(client: &dyn ContentClient, dir: &Path, force: bool) -> Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut scanned = 0usize;
    for path in files {
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        if !document::is_collector_document(&text) {
            continue;
        }
        scanned += 1;

        match document::update_document(client, &text, force, &document::local_timestamp()) {
            Ok(outcome) => apply_update_outcome(&path, &outcome)?,
            Err(err) => {
                // one broken document must not stop the batch
                eprintln!("warning: {}: {err}, skipped", path.display());
            }
        }
    }

    if scanned == 0 {
        println!("No collector documents found in {}", dir.display());
    }
    Ok(())
}

fn apply_update_outcome(destination: &Path, outcome: &document::UpdateOutcome) -> Result<()> {
    match &outcome.new_text {
        Some(new_text) => {
            document::write_atomic(destination, new_text)
                .with_context(|| format!("failed to write {}", destination.display()))?;
            println!(
                "Updated {}: Total: {}, Updated: {}, Removed: {}",
                destination.display(),
                outcome.total,
                outcome.updated,
                outcome.removed
            );
        }
        None => println!("No changes in {}, skipping update.", destination.display()),
    }
    Ok(())
}
