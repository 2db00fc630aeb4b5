use crate::github::{ContentClient, FetchError};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const LEGACY_HEADER: &str = "# Git Collector Data";
pub const V2_MARKER: &str = "[git-collector-data]";
const DELIMITER_PREFIX: &str = "=== File: ";
const DELIMITER_SUFFIX: &str = " ===";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed document: no URL header line found")]
    MissingUrl,
    #[error("unusable repository URL: {0}")]
    BadUrl(String),
}

/// Header pieces and path list recovered from an existing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub repo_url: String,
    pub paths: Vec<String>,
    /// Title line of a v2 document; `None` for the legacy generation.
    pub title: Option<String>,
}

pub fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn error_placeholder(message: &str) -> String {
    format!("// Error loading file: {message}")
}

fn delimiter_line(path: &str) -> String {
    format!("{DELIMITER_PREFIX}{path}{DELIMITER_SUFFIX}")
}

fn path_from_delimiter(line: &str) -> Option<&str> {
    let line = line.trim_end();
    line.strip_prefix(DELIMITER_PREFIX)?
        .strip_suffix(DELIMITER_SUFFIX)
        .map(str::trim)
}

/// Serialize file records into a collector document. Paths are emitted in
/// sorted order (the map is ordered). A `title` selects the v2 header with
/// the `[git-collector-data]` marker; `None` writes the legacy header.
pub fn serialize(
    repo_url: &str,
    title: Option<&str>,
    files: &BTreeMap<String, String>,
    timestamp: &str,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    match title {
        Some(title) => {
            lines.push(format!("# {title}"));
            lines.push(String::new());
            lines.push(V2_MARKER.to_string());
            lines.push(String::new());
            // two trailing spaces force markdown line breaks
            lines.push(format!("**URL:** {repo_url}  "));
            lines.push(format!("**Date:** {timestamp}  "));
            lines.push(format!("**Files:** {}  ", files.len()));
        }
        None => {
            lines.push(LEGACY_HEADER.to_string());
            lines.push(format!("URL: {repo_url}"));
            lines.push(format!("Date: {timestamp}"));
            lines.push(format!("Files: {}", files.len()));
        }
    }
    lines.push(String::new());

    for (path, body) in files {
        lines.push(delimiter_line(path));
        lines.push(body.clone());
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Parse a document of either generation: the URL comes from a legacy
/// `URL:` line or a v2 `**URL:**` line, paths from the delimiter lines in
/// document order.
pub fn parse(text: &str) -> Result<ParsedDocument, DocumentError> {
    let mut repo_url = None;
    let mut paths = Vec::new();
    let mut has_marker = false;
    let mut first_heading = None;

    for line in text.lines() {
        if repo_url.is_none() {
            if let Some(rest) = line.strip_prefix("URL:") {
                repo_url = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("**URL:**") {
                repo_url = Some(rest.trim().to_string());
            }
        }
        if line.trim() == V2_MARKER {
            has_marker = true;
        }
        if first_heading.is_none()
            && let Some(rest) = line.strip_prefix("# ")
        {
            first_heading = Some(rest.trim().to_string());
        }
        if let Some(path) = path_from_delimiter(line) {
            paths.push(path.to_string());
        }
    }

    let repo_url = repo_url.ok_or(DocumentError::MissingUrl)?;
    let title = if has_marker { first_heading } else { None };
    Ok(ParsedDocument {
        repo_url,
        paths,
        title,
    })
}

/// Recover per-path bodies by re-splitting on delimiter lines.
pub fn split_contents(text: &str) -> BTreeMap<String, String> {
    let mut contents = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(path) = path_from_delimiter(line) {
            if let Some(prev) = current.take() {
                contents.insert(prev, buffer.join("\n"));
            }
            current = Some(path.to_string());
            buffer.clear();
        } else if current.is_some() {
            buffer.push(line);
        }
    }
    if let Some(prev) = current {
        contents.insert(prev, buffer.join("\n"));
    }
    contents
}

/// Trailing-whitespace and CRLF insensitive comparison form.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// True when a file looks like a collector document of either generation.
pub fn is_collector_document(text: &str) -> bool {
    let first_line = text.lines().next().unwrap_or("").trim();
    first_line == LEGACY_HEADER || text.lines().any(|line| line.trim() == V2_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub total: usize,
    pub updated: usize,
    pub removed: usize,
    /// Replacement document text; `None` means nothing changed and the
    /// existing file must be left untouched.
    pub new_text: Option<String>,
}

/// Re-fetch every path of an existing document and classify each as updated
/// (normalized content differs) or removed (fetch failed, dropped from the
/// output). With no changes and `force` unset the document is not rewritten.
/// The existing header generation is preserved.
pub fn update_document(
    client: &dyn ContentClient,
    existing_text: &str,
    force: bool,
    timestamp: &str,
) -> Result<UpdateOutcome, DocumentError> {
    let parsed = parse(existing_text)?;
    let old_contents = split_contents(existing_text);

    let mut new_contents = BTreeMap::new();
    let mut updated = 0;
    let mut removed = 0;
    for path in &parsed.paths {
        match client.fetch_content(&parsed.repo_url, path) {
            Ok(content) => {
                let old = old_contents.get(path).map(String::as_str).unwrap_or("");
                if normalize(old) != normalize(&content) {
                    updated += 1;
                }
                new_contents.insert(path.clone(), content);
            }
            Err(err @ (FetchError::InvalidUrl(_) | FetchError::UnsupportedHost(_))) => {
                // a bad URL fails every path identically; surface it once
                return Err(DocumentError::BadUrl(err.to_string()));
            }
            Err(_) => removed += 1,
        }
    }

    let new_text = if updated == 0 && removed == 0 && !force {
        None
    } else {
        Some(serialize(
            &parsed.repo_url,
            parsed.title.as_deref(),
            &new_contents,
            timestamp,
        ))
    };

    Ok(UpdateOutcome {
        total: parsed.paths.len(),
        updated,
        removed,
        new_text,
    })
}

/// All-or-nothing write: the new text lands in a sibling temp file and is
/// renamed over the destination.
pub fn write_atomic(path: &Path, text: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let tmp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
    std::fs::write(&tmp, text)?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct StubClient {
        files: HashMap<String, String>,
    }

    impl StubClient {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl ContentClient for StubClient {
        fn fetch_tree(
            &self,
            _repo_url: &str,
            _ref_override: Option<&str>,
        ) -> Result<Vec<crate::tree::TreeEntry>, FetchError> {
            Ok(Vec::new())
        }

        fn fetch_content(&self, _repo_url: &str, file_path: &str) -> Result<String, FetchError> {
            self.files
                .get(file_path)
                .cloned()
                .ok_or(FetchError::Fetch {
                    status: 404,
                    resource: file_path.to_string(),
                })
        }
    }

    fn sample_files() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("src/a.rs".to_string(), "fn a() {}".to_string()),
            ("src/b.rs".to_string(), "fn b() {}".to_string()),
        ])
    }

    #[test]
    fn legacy_roundtrip_recovers_url_and_paths() {
        let url = "https://github.com/owner/repo";
        let text = serialize(url, None, &sample_files(), "2026-01-01 10:00:00");
        assert!(text.starts_with(LEGACY_HEADER));

        let parsed = parse(&text).expect("parse");
        assert_eq!(parsed.repo_url, url);
        assert_eq!(parsed.paths, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(parsed.title, None);
    }

    #[test]
    fn v2_roundtrip_recovers_url_paths_and_title() {
        let url = "https://github.com/owner/repo";
        let text = serialize(url, Some("owner/repo"), &sample_files(), "2026-01-01 10:00:00");
        assert!(text.starts_with("# owner/repo"));
        assert!(text.contains(V2_MARKER));
        assert!(text.contains("**Files:** 2  "));

        let parsed = parse(&text).expect("parse");
        assert_eq!(parsed.repo_url, url);
        assert_eq!(parsed.paths, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(parsed.title.as_deref(), Some("owner/repo"));
    }

    #[test]
    fn parse_without_url_line_is_malformed() {
        let text = "# Notes\n\nJust some markdown.\n";
        assert!(matches!(parse(text), Err(DocumentError::MissingUrl)));
    }

    #[test]
    fn split_contents_recovers_bodies() {
        let text = serialize(
            "https://github.com/owner/repo",
            None,
            &sample_files(),
            "2026-01-01 10:00:00",
        );
        let contents = split_contents(&text);
        assert_eq!(contents.get("src/a.rs").map(|s| s.trim()), Some("fn a() {}"));
        assert_eq!(contents.get("src/b.rs").map(|s| s.trim()), Some("fn b() {}"));
    }

    #[test]
    fn delimiter_paths_may_contain_spaces() {
        let files = BTreeMap::from([("docs/read me.txt".to_string(), "hi".to_string())]);
        let text = serialize("https://github.com/o/r", None, &files, "ts");
        let parsed = parse(&text).expect("parse");
        assert_eq!(parsed.paths, vec!["docs/read me.txt"]);
    }

    #[test]
    fn update_is_a_noop_when_nothing_changed() {
        let client = StubClient::new(&[("src/a.rs", "fn a() {}"), ("src/b.rs", "fn b() {}")]);
        let existing = serialize(
            "https://github.com/owner/repo",
            None,
            &sample_files(),
            "2026-01-01 10:00:00",
        );

        let outcome = update_document(&client, &existing, false, "2026-02-02 10:00:00")
            .expect("update");
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.new_text, None);
    }

    #[test]
    fn update_ignores_crlf_and_trailing_whitespace() {
        let client = StubClient::new(&[("src/a.rs", "fn a() {}\r\n"), ("src/b.rs", "fn b() {}\n\n")]);
        let existing = serialize(
            "https://github.com/owner/repo",
            None,
            &sample_files(),
            "2026-01-01 10:00:00",
        );

        let outcome = update_document(&client, &existing, false, "ts").expect("update");
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.new_text, None);
    }

    #[test]
    fn update_rewrites_on_force_even_without_changes() {
        let client = StubClient::new(&[("src/a.rs", "fn a() {}"), ("src/b.rs", "fn b() {}")]);
        let existing = serialize(
            "https://github.com/owner/repo",
            None,
            &sample_files(),
            "2026-01-01 10:00:00",
        );

        let outcome = update_document(&client, &existing, true, "2026-02-02 10:00:00")
            .expect("update");
        let text = outcome.new_text.expect("forced rewrite");
        assert!(text.contains("Date: 2026-02-02 10:00:00"));
    }

    #[test]
    fn update_classifies_changed_and_missing_paths() {
        let client = StubClient::new(&[("src/a.rs", "fn a() { changed }")]);
        let existing = serialize(
            "https://github.com/owner/repo",
            None,
            &sample_files(),
            "2026-01-01 10:00:00",
        );

        let outcome = update_document(&client, &existing, false, "ts").expect("update");
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.removed, 1);

        let text = outcome.new_text.expect("rewrite");
        assert!(text.contains("=== File: src/a.rs ==="));
        assert!(!text.contains("=== File: src/b.rs ==="));
        assert!(text.contains("Files: 1"));
    }

    #[test]
    fn update_preserves_the_v2_generation() {
        let client = StubClient::new(&[("src/a.rs", "new"), ("src/b.rs", "fn b() {}")]);
        let existing = serialize(
            "https://github.com/owner/repo",
            Some("owner/repo"),
            &sample_files(),
            "2026-01-01 10:00:00",
        );

        let outcome = update_document(&client, &existing, false, "ts").expect("update");
        let text = outcome.new_text.expect("rewrite");
        assert!(text.starts_with("# owner/repo"));
        assert!(text.contains(V2_MARKER));
    }

    #[test]
    fn collector_documents_are_recognized_by_either_generation() {
        let legacy = serialize("https://github.com/o/r", None, &sample_files(), "ts");
        let v2 = serialize("https://github.com/o/r", Some("o/r"), &sample_files(), "ts");
        assert!(is_collector_document(&legacy));
        assert!(is_collector_document(&v2));
        assert!(!is_collector_document("# Some other markdown\n"));
    }

    #[test]
    fn write_atomic_replaces_destination() {
        let dir = std::env::temp_dir().join(format!(
            "git_collector_doc_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create dir");
        let dest = dir.join("data.md");
        std::fs::write(&dest, "old").expect("seed");

        write_atomic(&dest, "new").expect("write");
        assert_eq!(std::fs::read_to_string(&dest).expect("read"), "new");
        // no temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }
}
