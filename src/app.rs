use crate::config::AppConfig;
use crate::selection::{self, SelectionState};
use crate::tree::{self, FlatEntry, Node, NodeKind};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

const PREVIEW_MAX_BYTES: usize = 64 * 1024;
const PREVIEW_BINARY_SAMPLE_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneFocus {
    Tree,
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalState {
    None,
    Help,
    ConfirmQuit,
}

#[derive(Debug, Clone)]
pub enum BackendTask {
    LoadPreview {
        repo_url: String,
        path: String,
        seq: u64,
    },
    FetchSelected {
        repo_url: String,
        paths: Vec<String>,
    },
    CountTokens {
        repo_url: String,
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub enum BackendEvent {
    PreviewLoaded {
        path: String,
        seq: u64,
        result: Result<String, String>,
    },
    SelectionFetched {
        files: Vec<(String, Result<String, String>)>,
    },
    TokenCounts {
        counts: Vec<(String, usize)>,
    },
    Error {
        context: String,
        message: String,
    },
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

pub struct App {
    pub config: AppConfig,
    pub repo_url: String,
    pub doc_title: String,
    pub destination: PathBuf,
    pub root: Node,
    pub flat: Vec<FlatEntry>,
    pub cursor: usize,
    tree_offset: usize,
    pub focus: PaneFocus,
    pub modal: ModalState,
    pub selected: BTreeSet<String>,
    saved_selection: BTreeSet<String>,
    pub preview_path: Option<String>,
    pub preview_text: String,
    preview_loaded: bool,
    preview_line_count: usize,
    preview_longest_line: usize,
    preview_v: usize,
    preview_h: usize,
    preview_seq: u64,
    token_counts: HashMap<String, usize>,
    pub status: String,
    pub busy: bool,
    pub should_quit: bool,
    pub quit_after_save: bool,
    pub tree_rows: usize,
    pub preview_rows: usize,
    pub preview_cols: usize,
}

impl App {
    pub fn new(
        config: AppConfig,
        repo_url: String,
        doc_title: String,
        destination: PathBuf,
        root: Node,
        prior_paths: &[String],
    ) -> Self {
        let selected: BTreeSet<String> = prior_paths.iter().cloned().collect();
        let flat = tree::flatten(&root);
        Self {
            config,
            repo_url,
            doc_title,
            destination,
            root,
            flat,
            cursor: 0,
            tree_offset: 0,
            focus: PaneFocus::Tree,
            modal: ModalState::None,
            saved_selection: selected.clone(),
            selected,
            preview_path: None,
            preview_text: String::new(),
            preview_loaded: false,
            preview_line_count: 0,
            preview_longest_line: 0,
            preview_v: 0,
            preview_h: 0,
            preview_seq: 0,
            token_counts: HashMap::new(),
            status: "Press ? for help".to_string(),
            busy: false,
            should_quit: false,
            quit_after_save: false,
            tree_rows: 0,
            preview_rows: 0,
            preview_cols: 0,
        }
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    pub fn cursor_entry(&self) -> Option<&FlatEntry> {
        self.flat.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.flat.len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        self.cursor = if delta < 0 {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            (self.cursor + delta as usize).min(len - 1)
        };
    }

    pub fn fast_step(extent: usize) -> usize {
        (extent / 10).max(1)
    }

    pub fn tree_offset(&self) -> usize {
        self.tree_offset
    }

    pub fn sync_tree_offset(&mut self, viewport_rows: usize) {
        let len = self.flat.len();
        if len == 0 {
            self.tree_offset = 0;
            return;
        }

        let rows = viewport_rows.max(1);
        if self.cursor < self.tree_offset {
            self.tree_offset = self.cursor;
        } else if self.cursor >= self.tree_offset + rows {
            self.tree_offset = self.cursor + 1 - rows;
        }

        let max_offset = len.saturating_sub(rows);
        if self.tree_offset > max_offset {
            self.tree_offset = max_offset;
        }
    }

    fn sync_cursor_bounds(&mut self) {
        let len = self.flat.len();
        if len == 0 {
            self.cursor = 0;
            self.tree_offset = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
    }

    pub fn rebuild_flat(&mut self) {
        let current = self.cursor_entry().map(|entry| entry.path.clone());
        self.flat = tree::flatten(&self.root);
        if let Some(path) = current
            && let Some(idx) = self.flat.iter().position(|entry| entry.path == path)
        {
            self.cursor = idx;
        }
        self.sync_cursor_bounds();
    }

    fn rebuild_flat_keeping(&mut self, preferred: &str) {
        self.flat = tree::flatten(&self.root);
        if let Some(idx) = self.flat.iter().position(|entry| entry.path == preferred) {
            self.cursor = idx;
        }
        self.sync_cursor_bounds();
    }

    pub fn toggle_expand_at_cursor(&mut self) -> bool {
        let Some(entry) = self.cursor_entry().cloned() else {
            return false;
        };
        if entry.kind != NodeKind::Directory {
            return false;
        }
        if let Some(node) = tree::node_at_mut(&mut self.root, &entry.path) {
            node.is_expanded = !node.is_expanded;
            self.rebuild_flat_keeping(&entry.path);
            return true;
        }
        false
    }

    pub fn expand_at_cursor(&mut self) -> bool {
        let Some(entry) = self.cursor_entry().cloned() else {
            return false;
        };
        if entry.kind != NodeKind::Directory || entry.is_expanded {
            return false;
        }
        self.toggle_expand_at_cursor()
    }

    pub fn collapse_at_cursor_or_parent(&mut self) -> bool {
        let Some(entry) = self.cursor_entry().cloned() else {
            return false;
        };
        if entry.kind == NodeKind::Directory && entry.is_expanded {
            return self.toggle_expand_at_cursor();
        }

        let Some((parent_path, _)) = entry.path.rsplit_once('/') else {
            return false;
        };
        let parent_path = parent_path.to_string();
        if let Some(node) = tree::node_at_mut(&mut self.root, &parent_path) {
            node.is_expanded = false;
            self.rebuild_flat_keeping(&parent_path);
            return true;
        }
        false
    }

    pub fn toggle_select_at_cursor(&mut self) -> bool {
        let Some(entry) = self.cursor_entry().cloned() else {
            return false;
        };
        if entry.is_missing || entry.is_binary {
            self.set_status("Missing and binary entries cannot be selected");
            return false;
        }
        let Some(node) = tree::node_at(&self.root, &entry.path) else {
            return false;
        };
        let next = selection::toggle(&self.selected, node);
        let changed = next != self.selected;
        self.selected = next;
        changed
    }

    pub fn directory_state_at(&self, path: &str) -> SelectionState {
        match tree::node_at(&self.root, path) {
            Some(node) => selection::directory_state(&self.selected, node),
            None => SelectionState::Empty,
        }
    }

    /// Selected paths that are present and selectable in the live tree;
    /// phantom and binary paths never reach a saved document.
    pub fn eligible_selected(&self) -> Vec<String> {
        tree::descendant_paths(&self.root)
            .into_iter()
            .filter(|path| self.selected.contains(path))
            .collect()
    }

    pub fn selection_dirty(&self) -> bool {
        self.selected != self.saved_selection
    }

    pub fn mark_saved(&mut self) {
        self.saved_selection = self.selected.clone();
    }

    /// The returned sequence number travels with the backend task; responses
    /// carrying an older number are discarded.
    pub fn begin_preview(&mut self, path: &str) -> u64 {
        self.preview_seq += 1;
        self.preview_path = Some(path.to_string());
        self.preview_loaded = false;
        self.preview_text.clear();
        self.preview_line_count = 0;
        self.preview_longest_line = 0;
        self.preview_v = 0;
        self.preview_h = 0;
        self.preview_seq
    }

    pub fn apply_preview_loaded(&mut self, path: &str, seq: u64, result: Result<String, String>) {
        if seq != self.preview_seq || self.preview_path.as_deref() != Some(path) {
            // superseded by a newer request
            return;
        }
        match result {
            Ok(content) => {
                if looks_binary(&content) {
                    if let Some(node) = tree::node_at_mut(&mut self.root, path) {
                        node.is_binary = true;
                    }
                    self.selected.remove(path);
                    self.rebuild_flat();
                    self.set_preview_metrics(
                        "This is a binary file. Preview and selection are unavailable."
                            .to_string(),
                    );
                } else {
                    self.set_preview_metrics(truncate_preview(content));
                }
            }
            Err(message) => {
                self.set_preview_metrics(format!("Error loading preview: {message}"));
            }
        }
    }

    fn set_preview_metrics(&mut self, text: String) {
        self.preview_line_count = text.lines().count();
        self.preview_longest_line = text
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        self.preview_text = text;
        self.preview_loaded = true;
        self.preview_v = 0;
        self.preview_h = 0;
    }

    pub fn preview_scroll(&self) -> (usize, usize) {
        (self.preview_v, self.preview_h)
    }

    pub fn preview_line_count(&self) -> usize {
        self.preview_line_count
    }

    pub fn preview_longest_line(&self) -> usize {
        self.preview_longest_line
    }

    fn preview_max_v(&self) -> usize {
        self.preview_line_count.saturating_sub(self.preview_rows)
    }

    fn preview_max_h(&self) -> usize {
        self.preview_longest_line.saturating_sub(self.preview_cols)
    }

    pub fn scroll_preview_down(&mut self, lines: usize) {
        if self.preview_rows == 0 {
            return;
        }
        self.preview_v = (self.preview_v + lines).min(self.preview_max_v());
    }

    pub fn scroll_preview_up(&mut self, lines: usize) {
        self.preview_v = self.preview_v.saturating_sub(lines);
    }

    pub fn scroll_preview_right(&mut self, cols: usize) {
        if self.preview_cols == 0 || self.config.wrap_lines {
            return;
        }
        self.preview_h = (self.preview_h + cols).min(self.preview_max_h());
    }

    pub fn scroll_preview_left(&mut self, cols: usize) {
        self.preview_h = self.preview_h.saturating_sub(cols);
    }

    pub fn preview_jump_line_start(&mut self) {
        self.preview_h = 0;
    }

    pub fn preview_jump_line_end(&mut self) {
        if self.preview_cols == 0 || self.config.wrap_lines {
            return;
        }
        self.preview_h = self.preview_max_h();
    }

    pub fn clamp_preview(&mut self) {
        self.preview_v = self.preview_v.min(self.preview_max_v());
        self.preview_h = self.preview_h.min(self.preview_max_h());
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            PaneFocus::Tree if self.preview_loaded && !self.preview_text.is_empty() => {
                PaneFocus::Preview
            }
            PaneFocus::Tree => PaneFocus::Tree,
            PaneFocus::Preview => PaneFocus::Tree,
        };
    }

    pub fn record_token_counts(&mut self, counts: Vec<(String, usize)>) {
        for (path, count) in counts {
            self.token_counts.insert(path, count);
        }
    }

    pub fn token_total(&self) -> usize {
        self.selected
            .iter()
            .filter_map(|path| self.token_counts.get(path))
            .sum()
    }

    pub fn missing_token_paths(&self) -> Vec<String> {
        let eligible: HashSet<String> = tree::descendant_paths(&self.root).into_iter().collect();
        self.selected
            .iter()
            .filter(|path| eligible.contains(*path) && !self.token_counts.contains_key(*path))
            .cloned()
            .collect()
    }
}

fn looks_binary(content: &str) -> bool {
    let bytes = content.as_bytes();
    let sample = &bytes[..bytes.len().min(PREVIEW_BINARY_SAMPLE_BYTES)];
    sample.contains(&0)
}

fn truncate_preview(content: String) -> String {
    if content.len() <= PREVIEW_MAX_BYTES {
        return content;
    }
    let mut end = PREVIEW_MAX_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n(preview truncated)", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TreeEntry, build_tree, sort_tree};

    fn sample_app() -> App {
        let mut root = build_tree(&[
            TreeEntry {
                path: "dir1/a.txt".to_string(),
                kind: NodeKind::File,
            },
            TreeEntry {
                path: "dir1/b.txt".to_string(),
                kind: NodeKind::File,
            },
            TreeEntry {
                path: "top.txt".to_string(),
                kind: NodeKind::File,
            },
        ]);
        sort_tree(&mut root);
        App::new(
            AppConfig::default(),
            "https://github.com/owner/repo".to_string(),
            "owner/repo".to_string(),
            PathBuf::from("out.md"),
            root,
            &[],
        )
    }

    #[test]
    fn cursor_is_clamped_to_flat_bounds() {
        let mut app = sample_app();
        assert_eq!(app.flat.len(), 2);

        app.move_cursor(-5);
        assert_eq!(app.cursor, 0);
        app.move_cursor(50);
        assert_eq!(app.cursor, 1);
    }

    #[test]
    fn cursor_movement_on_empty_tree_is_a_noop() {
        let mut app = App::new(
            AppConfig::default(),
            "https://github.com/owner/repo".to_string(),
            "owner/repo".to_string(),
            PathBuf::from("out.md"),
            Node::root(),
            &[],
        );
        app.move_cursor(1);
        app.move_cursor(-1);
        assert_eq!(app.cursor, 0);
        assert!(app.cursor_entry().is_none());
    }

    #[test]
    fn tree_offset_follows_cursor() {
        let mut app = sample_app();
        app.toggle_expand_at_cursor();
        assert_eq!(app.flat.len(), 4);

        app.cursor = 3;
        app.sync_tree_offset(2);
        assert_eq!(app.tree_offset(), 2);

        app.cursor = 0;
        app.sync_tree_offset(2);
        assert_eq!(app.tree_offset(), 0);
    }

    #[test]
    fn fast_step_is_a_tenth_with_a_floor_of_one() {
        assert_eq!(App::fast_step(50), 5);
        assert_eq!(App::fast_step(5), 1);
        assert_eq!(App::fast_step(0), 1);
    }

    #[test]
    fn expand_keeps_cursor_on_the_directory() {
        let mut app = sample_app();
        assert_eq!(app.cursor_entry().map(|e| e.path.clone()).as_deref(), Some("dir1"));

        assert!(app.toggle_expand_at_cursor());
        assert_eq!(app.cursor_entry().map(|e| e.path.clone()).as_deref(), Some("dir1"));
        assert_eq!(app.flat.len(), 4);
    }

    #[test]
    fn collapse_from_child_lands_on_the_parent() {
        let mut app = sample_app();
        app.toggle_expand_at_cursor();
        app.cursor = 1; // dir1/a.txt

        assert!(app.collapse_at_cursor_or_parent());
        assert_eq!(app.cursor_entry().map(|e| e.path.clone()).as_deref(), Some("dir1"));
        assert_eq!(app.flat.len(), 2);
    }

    #[test]
    fn collapse_on_a_top_level_file_is_a_noop() {
        let mut app = sample_app();
        app.cursor = 1; // top.txt
        assert!(!app.collapse_at_cursor_or_parent());
    }

    #[test]
    fn space_on_a_directory_toggles_all_descendants() {
        let mut app = sample_app();
        assert!(app.toggle_select_at_cursor());
        assert!(app.selected.contains("dir1/a.txt"));
        assert!(app.selected.contains("dir1/b.txt"));

        assert!(app.toggle_select_at_cursor());
        assert!(app.selected.is_empty());
    }

    #[test]
    fn phantom_entries_cannot_be_selected() {
        let mut app = sample_app();
        tree::merge_phantoms(&mut app.root, &["gone/lost.txt".to_string()]);
        app.rebuild_flat();

        let idx = app
            .flat
            .iter()
            .position(|e| e.path == "gone/lost.txt")
            .expect("phantom visible");
        app.cursor = idx;
        assert!(!app.toggle_select_at_cursor());
        assert!(app.selected.is_empty());
    }

    #[test]
    fn eligible_selected_drops_phantom_paths() {
        let mut app = sample_app();
        app.selected.insert("dir1/a.txt".to_string());
        app.selected.insert("gone/lost.txt".to_string());
        tree::merge_phantoms(&mut app.root, &["gone/lost.txt".to_string()]);
        app.rebuild_flat();

        assert_eq!(app.eligible_selected(), vec!["dir1/a.txt".to_string()]);
    }

    #[test]
    fn focus_enters_preview_only_with_loaded_content() {
        let mut app = sample_app();
        app.toggle_focus();
        assert_eq!(app.focus, PaneFocus::Tree);

        app.begin_preview("top.txt");
        app.toggle_focus();
        assert_eq!(app.focus, PaneFocus::Tree);

        app.apply_preview_loaded("top.txt", app.preview_seq, Ok("hello\nworld".to_string()));
        app.toggle_focus();
        assert_eq!(app.focus, PaneFocus::Preview);
        app.toggle_focus();
        assert_eq!(app.focus, PaneFocus::Tree);
    }

    #[test]
    fn stale_preview_responses_are_discarded() {
        let mut app = sample_app();
        let first = app.begin_preview("dir1/a.txt");
        let second = app.begin_preview("dir1/b.txt");
        assert!(second > first);

        app.apply_preview_loaded("dir1/a.txt", first, Ok("old".to_string()));
        assert!(app.preview_text.is_empty());

        app.apply_preview_loaded("dir1/b.txt", second, Ok("new".to_string()));
        assert_eq!(app.preview_text, "new");
    }

    #[test]
    fn preview_failure_becomes_inline_error_text() {
        let mut app = sample_app();
        let seq = app.begin_preview("top.txt");
        app.apply_preview_loaded("top.txt", seq, Err("status 500".to_string()));
        assert!(app.preview_text.contains("Error loading preview"));
        assert!(app.preview_text.contains("status 500"));
    }

    #[test]
    fn binary_preview_marks_node_and_drops_selection() {
        let mut app = sample_app();
        app.selected.insert("top.txt".to_string());
        let seq = app.begin_preview("top.txt");
        app.apply_preview_loaded("top.txt", seq, Ok("ab\0cd".to_string()));

        assert!(app.preview_text.contains("binary file"));
        assert!(!app.selected.contains("top.txt"));
        let entry = app.flat.iter().find(|e| e.path == "top.txt").expect("entry");
        assert!(entry.is_binary);
    }

    #[test]
    fn preview_scroll_is_bounded_by_content_and_viewport() {
        let mut app = sample_app();
        let seq = app.begin_preview("top.txt");
        let content = (0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        app.apply_preview_loaded("top.txt", seq, Ok(content));
        app.preview_rows = 10;
        app.preview_cols = 4;

        app.scroll_preview_down(100);
        assert_eq!(app.preview_scroll().0, 20);
        app.scroll_preview_up(100);
        assert_eq!(app.preview_scroll().0, 0);

        // longest line is "line 29" = 7 chars, viewport 4 wide
        app.scroll_preview_right(100);
        assert_eq!(app.preview_scroll().1, 3);
        app.preview_jump_line_start();
        assert_eq!(app.preview_scroll().1, 0);
        app.preview_jump_line_end();
        assert_eq!(app.preview_scroll().1, 3);
    }

    #[test]
    fn preview_scroll_with_zero_viewport_is_a_noop() {
        let mut app = sample_app();
        let seq = app.begin_preview("top.txt");
        app.apply_preview_loaded("top.txt", seq, Ok("a\nb\nc".to_string()));
        app.preview_rows = 0;
        app.preview_cols = 0;

        app.scroll_preview_down(5);
        app.scroll_preview_right(5);
        assert_eq!(app.preview_scroll(), (0, 0));
    }

    #[test]
    fn horizontal_scroll_is_disabled_while_wrapping() {
        let mut app = sample_app();
        app.config.wrap_lines = true;
        let seq = app.begin_preview("top.txt");
        app.apply_preview_loaded("top.txt", seq, Ok("a long unwrapped line".to_string()));
        app.preview_rows = 10;
        app.preview_cols = 5;

        app.scroll_preview_right(3);
        assert_eq!(app.preview_scroll().1, 0);
    }

    #[test]
    fn selection_dirty_tracks_saved_snapshot() {
        let mut app = sample_app();
        assert!(!app.selection_dirty());

        app.cursor = 1; // top.txt
        app.toggle_select_at_cursor();
        assert!(app.selection_dirty());

        app.mark_saved();
        assert!(!app.selection_dirty());
    }

    #[test]
    fn token_total_covers_only_selected_paths() {
        let mut app = sample_app();
        app.selected.insert("dir1/a.txt".to_string());
        app.record_token_counts(vec![
            ("dir1/a.txt".to_string(), 12),
            ("dir1/b.txt".to_string(), 99),
        ]);
        assert_eq!(app.token_total(), 12);

        assert_eq!(app.missing_token_paths(), Vec::<String>::new());
        app.selected.insert("top.txt".to_string());
        assert_eq!(app.missing_token_paths(), vec!["top.txt".to_string()]);
    }

    #[test]
    fn large_previews_are_truncated() {
        let long = "a".repeat(PREVIEW_MAX_BYTES + 100);
        let got = truncate_preview(long);
        assert!(got.ends_with("(preview truncated)"));
        assert!(got.len() < PREVIEW_MAX_BYTES + 64);
    }

    #[test]
    fn token_estimate_counts_code_points() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 8 multi-byte code points still estimate as 2
        assert_eq!(estimate_tokens("ありがとう御座います"), 2);
    }
}
