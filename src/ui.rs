use crate::app::{App, ModalState, PaneFocus};
use crate::selection::SelectionState;
use crate::tree::{FlatEntry, NodeKind};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::{Alignment, Color, Line, Modifier, Span, Style};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use std::path::Path;

pub fn draw(frame: &mut Frame, app: &mut App) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(frame.area());

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(outer[0]);

    draw_tree(frame, app, main[0]);
    draw_preview(frame, app, main[1]);
    draw_status_bar(frame, app, outer[1]);
    draw_modal(frame, app);
}

fn draw_tree(frame: &mut Frame, app: &mut App, area: Rect) {
    let rows = area.height.saturating_sub(2) as usize;
    app.tree_rows = rows;
    app.sync_tree_offset(rows);

    let border_style = if app.focus == PaneFocus::Tree {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let app_view: &App = app;
    let offset = app_view.tree_offset();
    let items: Vec<ListItem> = app_view
        .flat
        .iter()
        .skip(offset)
        .take(rows)
        .map(|entry| tree_item(app_view, entry))
        .collect();

    let mut title = format!(
        " {}: {} selected",
        app_view.doc_title,
        app_view.selected.len()
    );
    if app_view.config.show_token_count {
        title.push_str(&format!(" (~{} tokens)", app_view.token_total()));
    }
    title.push(' ');

    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border_style),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::LightGreen)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let mut state = ListState::default();
    if !app_view.flat.is_empty() && app_view.cursor >= offset {
        state.select(Some(app_view.cursor - offset));
    }

    frame.render_stateful_widget(list, area, &mut state);
}

fn tree_item(app: &App, entry: &FlatEntry) -> ListItem<'static> {
    let indent = "  ".repeat(entry.depth.saturating_sub(1));
    let mark = match entry.kind {
        NodeKind::File => {
            if app.selected.contains(&entry.path) {
                "[x]"
            } else {
                "[ ]"
            }
        }
        NodeKind::Directory => match app.directory_state_at(&entry.path) {
            SelectionState::Full => "[x]",
            SelectionState::Partial => "[~]",
            SelectionState::Empty => "[ ]",
        },
    };
    let arrow = match entry.kind {
        NodeKind::Directory if entry.is_expanded => "▾ ",
        NodeKind::Directory => "▸ ",
        NodeKind::File => "  ",
    };

    let mut label = format!("{indent}{mark} {arrow}{}", entry.name);
    if entry.kind == NodeKind::Directory {
        label.push('/');
    }

    let style = if entry.is_missing {
        label.push_str(" (missing)");
        Style::default().fg(Color::Red).add_modifier(Modifier::DIM)
    } else if entry.is_binary {
        label.push_str(" (binary)");
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };

    ListItem::new(Span::styled(label, style))
}

fn draw_preview(frame: &mut Frame, app: &mut App, area: Rect) {
    let rows = area.height.saturating_sub(2) as usize;
    let cols = area.width.saturating_sub(2) as usize;
    app.preview_rows = rows;
    app.preview_cols = cols;
    app.clamp_preview();

    let border_style = if app.focus == PaneFocus::Preview {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let title = match &app.preview_path {
        Some(path) => format!(" Preview: {path} "),
        None => " Preview ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style);

    let (v, h) = app.preview_scroll();
    let language = detect_language(app.preview_path.as_deref());

    if app.preview_text.is_empty() {
        let hint = vec![
            Line::from("No file previewed yet."),
            Line::from("Enter on a file loads its contents; tab switches panes."),
        ];
        frame.render_widget(Paragraph::new(hint).block(block), area);
    } else if app.config.wrap_lines {
        let lines: Vec<Line> = app
            .preview_text
            .lines()
            .map(|line| highlight_line(line, language))
            .collect();
        let paragraph = Paragraph::new(lines)
            .block(block)
            .scroll((v.min(u16::MAX as usize) as u16, 0))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    } else {
        let lines: Vec<Line> = app
            .preview_text
            .lines()
            .skip(v)
            .take(rows)
            .map(|line| highlight_line(&clip_line(line, h, cols), language))
            .collect();
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let busy = if app.busy { "BUSY" } else { "IDLE" };
    let hints = match app.focus {
        PaneFocus::Tree => "space select | enter preview | s save | S save+quit | q quit | ? help",
        PaneFocus::Preview => "j/k scroll | h/l pan | Home/End line | w wrap | tab back | ? help",
    };

    let text = Line::from(vec![
        Span::styled(
            format!(" {} ", busy),
            if app.busy {
                Style::default().bg(Color::Yellow).fg(Color::Black)
            } else {
                Style::default().bg(Color::DarkGray).fg(Color::White)
            },
        ),
        Span::raw(" "),
        Span::raw(app.status.clone()),
        Span::raw("  "),
        Span::styled(hints, Style::default().fg(Color::Gray)),
    ]);

    let paragraph = Paragraph::new(text).alignment(Alignment::Left);
    frame.render_widget(paragraph, area);
}

fn draw_modal(frame: &mut Frame, app: &App) {
    match app.modal {
        ModalState::None => {}
        ModalState::Help => {
            let area = centered_rect(60, 70, frame.area());
            frame.render_widget(Clear, area);

            let lines = vec![
                Line::from(Span::styled(
                    "Tree pane",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from("  j/k, arrows     move (Shift: fast, ~10% of pane)"),
                Line::from("  PgUp/PgDn       page (also Ctrl+u / Ctrl+d)"),
                Line::from("  l / h           expand / collapse directory"),
                Line::from("  space           select file or whole directory"),
                Line::from("  enter           preview file, toggle directory"),
                Line::from(""),
                Line::from(Span::styled(
                    "Preview pane",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from("  j/k, arrows     scroll (Shift: fast)"),
                Line::from("  h/l             pan horizontally (wrap off)"),
                Line::from("  Home / End      jump to line start / end"),
                Line::from("  w               toggle line wrapping"),
                Line::from(""),
                Line::from(Span::styled(
                    "Global",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from("  tab             switch pane"),
                Line::from("  s / S           save / save and quit"),
                Line::from("  q               quit (asks when unsaved)"),
                Line::from("  ?               this help"),
            ];

            let paragraph = Paragraph::new(lines).block(
                Block::default()
                    .title(" Help ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(paragraph, area);
        }
        ModalState::ConfirmQuit => {
            let area = centered_rect(60, 25, frame.area());
            frame.render_widget(Clear, area);

            let lines = vec![
                Line::from("The selection has unsaved changes."),
                Line::from(""),
                Line::from("Enter: quit without saving"),
                Line::from("s:     save and quit"),
                Line::from("c/Esc: keep working"),
            ];

            let paragraph = Paragraph::new(lines).block(
                Block::default()
                    .title(" Unsaved Changes ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::LightRed)),
            );
            frame.render_widget(paragraph, area);
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn clip_line(line: &str, from: usize, width: usize) -> String {
    line.chars().skip(from).take(width).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Rust,
    Shell,
    Python,
    JsTs,
    Json,
    Toml,
    Yaml,
    Plain,
}

fn detect_language(path: Option<&str>) -> Language {
    let ext = path
        .map(Path::new)
        .and_then(|p| p.extension().and_then(|e| e.to_str()))
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("rs") => Language::Rust,
        Some("sh") | Some("bash") | Some("zsh") => Language::Shell,
        Some("py") => Language::Python,
        Some("js") | Some("mjs") | Some("cjs") | Some("ts") | Some("tsx") | Some("jsx") => {
            Language::JsTs
        }
        Some("json") => Language::Json,
        Some("toml") => Language::Toml,
        Some("yaml") | Some("yml") => Language::Yaml,
        _ => Language::Plain,
    }
}

fn highlight_line(text: &str, language: Language) -> Line<'static> {
    if language == Language::Plain {
        return Line::from(text.to_string());
    }

    let (code, comment) = split_at_comment(text, language);
    let mut spans = tokenize(code, language);
    if let Some(comment) = comment {
        spans.push(Span::styled(
            comment.to_string(),
            Style::default().fg(Color::DarkGray),
        ));
    }

    if spans.is_empty() {
        Line::from(String::new())
    } else {
        Line::from(spans)
    }
}

fn split_at_comment(line: &str, language: Language) -> (&str, Option<&str>) {
    let marker = match language {
        Language::Rust | Language::JsTs => "//",
        Language::Shell | Language::Python | Language::Toml | Language::Yaml => "#",
        Language::Json | Language::Plain => return (line, None),
    };
    match line.find(marker) {
        Some(idx) => (&line[..idx], Some(&line[idx..])),
        None => (line, None),
    }
}

fn tokenize(code: &str, language: Language) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut rest = code;

    while !rest.is_empty() {
        let ch = rest.chars().next().expect("non-empty rest");
        let taken = if ch == '"' || ch == '\'' {
            let len = string_token_len(rest, ch);
            spans.push(Span::styled(
                rest[..len].to_string(),
                Style::default().fg(Color::Yellow),
            ));
            len
        } else if ch.is_ascii_digit() {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'))
                .unwrap_or(rest.len());
            spans.push(Span::styled(
                rest[..len].to_string(),
                Style::default().fg(Color::Magenta),
            ));
            len
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            if keywords(language).contains(&word) {
                spans.push(Span::styled(
                    word.to_string(),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ));
            } else {
                spans.push(Span::from(word.to_string()));
            }
            len
        } else {
            let len = rest
                .find(|c: char| {
                    c == '"' || c == '\'' || c.is_ascii_alphanumeric() || c == '_'
                })
                .unwrap_or(rest.len());
            spans.push(Span::from(rest[..len].to_string()));
            len
        };
        rest = &rest[taken..];
    }

    spans
}

fn string_token_len(rest: &str, quote: char) -> usize {
    let mut escaped = false;
    for (idx, ch) in rest.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            c if c == quote => return idx + c.len_utf8(),
            _ => {}
        }
    }
    rest.len()
}

fn keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            "fn", "let", "mut", "pub", "struct", "enum", "impl", "use", "mod", "match", "if",
            "else", "for", "while", "loop", "return", "async", "await", "trait", "where", "self",
            "Self",
        ],
        Language::Shell => &[
            "if", "then", "else", "fi", "for", "in", "do", "done", "case", "esac", "function",
            "export", "local",
        ],
        Language::Python => &[
            "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally",
            "return", "import", "from", "as", "with", "lambda",
        ],
        Language::JsTs => &[
            "function", "const", "let", "var", "if", "else", "for", "while", "return", "import",
            "from", "export", "class", "extends", "async", "await", "type", "interface",
        ],
        Language::Json => &["true", "false", "null"],
        Language::Toml => &["true", "false"],
        Language::Yaml => &["true", "false", "null"],
        Language::Plain => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_line_slices_by_chars() {
        assert_eq!(clip_line("hello world", 6, 3), "wor");
        assert_eq!(clip_line("hello", 10, 5), "");
        // multi-byte chars are panned whole, never split
        assert_eq!(clip_line("日本語のテキスト", 2, 3), "語のテ");
    }

    #[test]
    fn string_tokens_respect_escapes() {
        assert_eq!(string_token_len(r#""a\"b" rest"#, '"'), 6);
        assert_eq!(string_token_len(r#""unterminated"#, '"'), 13);
    }

    #[test]
    fn language_is_detected_from_the_path() {
        assert_eq!(detect_language(Some("src/main.rs")), Language::Rust);
        assert_eq!(detect_language(Some("docs/README")), Language::Plain);
        assert_eq!(detect_language(None), Language::Plain);
    }
}
