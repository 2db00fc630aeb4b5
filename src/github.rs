use crate::tree::{NodeKind, TreeEntry};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;

const SUPPORTED_HOST: &str = "github.com";
const FIXTURE_SCHEME: &str = "fixture://";
const USER_AGENT: &str = "git-collector-cli";
const DEFAULT_REF: &str = "HEAD";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported host {0:?}: only github.com URLs are supported")]
    UnsupportedHost(String),
    #[error("fetch failed with status {status}: {resource}")]
    Fetch { status: u16, resource: String },
    #[error("fetch failed: {0}")]
    Io(String),
}

/// Parsed pieces of a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    pub owner: String,
    pub repo: String,
    pub ref_name: Option<String>,
    pub initial_path_parts: Vec<String>,
}

impl RepoLocation {
    pub fn title(&self) -> String {
        let mut title = format!("{}/{}", self.owner, self.repo);
        if !self.initial_path_parts.is_empty() {
            title.push('/');
            title.push_str(&self.initial_path_parts.join("/"));
        }
        title
    }

    pub fn effective_ref(&self, ref_override: Option<&str>) -> String {
        ref_override
            .map(str::to_string)
            .or_else(|| self.ref_name.clone())
            .unwrap_or_else(|| DEFAULT_REF.to_string())
    }
}

/// The fixture name of a `fixture://name` URL, or `None` for remote URLs.
pub fn fixture_name(repo_url: &str) -> Option<&str> {
    repo_url.strip_prefix(FIXTURE_SCHEME)
}

/// Parse a `https://github.com/owner/repo[/tree/ref[/sub/path]]` URL.
pub fn parse_repo_url(raw: &str) -> Result<RepoLocation, FetchError> {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .ok_or_else(|| FetchError::InvalidUrl(raw.to_string()))?;

    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let host = segments
        .next()
        .ok_or_else(|| FetchError::InvalidUrl(raw.to_string()))?;
    if host != SUPPORTED_HOST {
        return Err(FetchError::UnsupportedHost(host.to_string()));
    }

    let owner = segments.next().unwrap_or("").to_string();
    let repo = segments
        .next()
        .unwrap_or("")
        .trim_end_matches(".git")
        .to_string();

    let tail: Vec<&str> = segments.collect();
    let mut ref_name = None;
    let mut initial_path_parts = Vec::new();
    if tail.first() == Some(&"tree") && tail.len() >= 2 {
        ref_name = Some(tail[1].to_string());
        initial_path_parts = tail[2..].iter().map(|s| s.to_string()).collect();
    }

    Ok(RepoLocation {
        owner,
        repo,
        ref_name,
        initial_path_parts,
    })
}

/// Remote content source. Implementations are blocking and are driven from
/// `spawn_blocking` by the worker loop.
pub trait ContentClient: Send + Sync {
    fn fetch_tree(
        &self,
        repo_url: &str,
        ref_override: Option<&str>,
    ) -> Result<Vec<TreeEntry>, FetchError>;
    fn fetch_content(&self, repo_url: &str, file_path: &str) -> Result<String, FetchError>;
}

pub struct GithubClient {
    token: Option<String>,
    fixture_root: PathBuf,
    http: OnceLock<reqwest::blocking::Client>,
    tree_cache: Mutex<HashMap<String, Vec<TreeEntry>>>,
    content_cache: Mutex<HashMap<String, String>>,
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::with_token(resolve_token())
    }
}

impl GithubClient {
    pub fn with_token(token: Option<String>) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            token,
            fixture_root: working_dir.join("fixtures"),
            http: OnceLock::new(),
            tree_cache: Mutex::new(HashMap::new()),
            content_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fixture_root(mut self, root: PathBuf) -> Self {
        self.fixture_root = root;
        self
    }

    fn http(&self) -> Result<&reqwest::blocking::Client, FetchError> {
        if self.http.get().is_none() {
            let client = reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(HTTP_TIMEOUT)
                .build()
                .map_err(|err| FetchError::Io(err.to_string()))?;
            let _ = self.http.set(client);
        }
        Ok(self.http.get().expect("http client initialized"))
    }

    fn authorized_get(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let mut request = self.http()?.get(url);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        request.send().map_err(|err| FetchError::Io(err.to_string()))
    }

    fn transport_tree(
        &self,
        repo_url: &str,
        effective_ref: &str,
        location: Option<&RepoLocation>,
    ) -> Result<Vec<TreeEntry>, FetchError> {
        if let Some(name) = fixture_name(repo_url) {
            let tree_file = self.fixture_root.join(name).join("tree.json");
            return read_fixture_tree(&tree_file);
        }

        let location = location.expect("parsed location for remote fetch");
        let api_url = format!(
            "https://api.github.com/repos/{}/{}/git/trees/{}?recursive=1",
            location.owner, location.repo, effective_ref
        );
        let response = self.authorized_get(&api_url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Fetch {
                status: status.as_u16(),
                resource: api_url,
            });
        }
        let payload: TreeResponse = response
            .json()
            .map_err(|err| FetchError::Io(err.to_string()))?;
        Ok(payload
            .tree
            .into_iter()
            .filter_map(|raw| raw.into_entry())
            .collect())
    }

    fn transport_content(
        &self,
        repo_url: &str,
        file_path: &str,
    ) -> Result<String, FetchError> {
        if let Some(name) = fixture_name(repo_url) {
            let file = self.fixture_root.join(name).join("files").join(file_path);
            return std::fs::read_to_string(&file).map_err(|err| {
                FetchError::Io(format!("fixture file {}: {err}", file.display()))
            });
        }

        let location = parse_repo_url(repo_url)?;
        if location.owner.is_empty() || location.repo.is_empty() {
            return Err(FetchError::InvalidUrl(repo_url.to_string()));
        }

        // raw endpoint first (no auth, no base64), contents API as fallback
        let branch = location.effective_ref(None);
        let raw_url = format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            location.owner, location.repo, branch, file_path
        );
        if let Ok(response) = self.http()?.get(&raw_url).send()
            && response.status().is_success()
        {
            return response
                .text()
                .map_err(|err| FetchError::Io(err.to_string()));
        }

        let mut api_url = format!(
            "https://api.github.com/repos/{}/{}/contents/{}",
            location.owner, location.repo, file_path
        );
        if let Some(ref_name) = &location.ref_name {
            api_url.push_str("?ref=");
            api_url.push_str(ref_name);
        }
        let response = self.authorized_get(&api_url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Fetch {
                status: status.as_u16(),
                resource: api_url,
            });
        }
        let payload: ContentResponse = response
            .json()
            .map_err(|err| FetchError::Io(err.to_string()))?;
        decode_content_payload(&payload)
    }
}

impl ContentClient for GithubClient {
    fn fetch_tree(
        &self,
        repo_url: &str,
        ref_override: Option<&str>,
    ) -> Result<Vec<TreeEntry>, FetchError> {
        let (cache_key, effective_ref, location) =
            if fixture_name(repo_url).is_some() {
                (repo_url.to_string(), DEFAULT_REF.to_string(), None)
            } else {
                let location = parse_repo_url(repo_url)?;
                if location.owner.is_empty() || location.repo.is_empty() {
                    return Err(FetchError::InvalidUrl(repo_url.to_string()));
                }
                let effective_ref = location.effective_ref(ref_override);
                let key = format!("{}/{}@{}", location.owner, location.repo, effective_ref);
                (key, effective_ref, Some(location))
            };

        if let Some(cached) = self
            .tree_cache
            .lock()
            .expect("tree cache lock")
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        let entries = self.transport_tree(repo_url, &effective_ref, location.as_ref())?;
        self.tree_cache
            .lock()
            .expect("tree cache lock")
            .insert(cache_key, entries.clone());
        Ok(entries)
    }

    fn fetch_content(&self, repo_url: &str, file_path: &str) -> Result<String, FetchError> {
        let cache_key = format!("{repo_url}|{file_path}");
        if let Some(cached) = self
            .content_cache
            .lock()
            .expect("content cache lock")
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        let content = self.transport_content(repo_url, file_path)?;
        self.content_cache
            .lock()
            .expect("content cache lock")
            .insert(cache_key, content.clone());
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<RawTreeEntry>,
}

#[derive(Debug, Deserialize)]
struct RawTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl RawTreeEntry {
    fn into_entry(self) -> Option<TreeEntry> {
        let kind = match self.kind.as_str() {
            "blob" => NodeKind::File,
            "tree" => NodeKind::Directory,
            // submodule commits and the like are not browsable
            _ => return None,
        };
        Some(TreeEntry {
            path: self.path,
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: Option<String>,
    encoding: Option<String>,
}

fn read_fixture_tree(tree_file: &Path) -> Result<Vec<TreeEntry>, FetchError> {
    let raw = std::fs::read_to_string(tree_file)
        .map_err(|err| FetchError::Io(format!("fixture tree {}: {err}", tree_file.display())))?;
    let entries: Vec<RawTreeEntry> = serde_json::from_str(&raw)
        .map_err(|err| FetchError::Io(format!("fixture tree {}: {err}", tree_file.display())))?;
    Ok(entries
        .into_iter()
        .filter_map(|raw| raw.into_entry())
        .collect())
}

fn decode_content_payload(payload: &ContentResponse) -> Result<String, FetchError> {
    match (payload.encoding.as_deref(), payload.content.as_deref()) {
        (Some("base64"), Some(content)) => {
            // the API wraps base64 payloads in newlines
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = BASE64
                .decode(compact.as_bytes())
                .map_err(|err| FetchError::Io(format!("base64 decode: {err}")))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
        (_, Some(content)) => Ok(content.to_string()),
        (_, None) => Ok(String::new()),
    }
}

/// Token lookup order: GITHUB_TOKEN / GH_TOKEN, then `gh auth token`, then
/// the first oauth_token under github.com in ~/.config/gh/hosts.yml. Missing
/// tokens are not an error; unauthenticated calls just rate-limit sooner.
pub fn resolve_token() -> Option<String> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    if let Ok(output) = Command::new("gh").args(["auth", "token"]).output()
        && output.status.success()
    {
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !token.is_empty() {
            return Some(token);
        }
    }

    let hosts_file = dirs::home_dir()?.join(".config").join("gh").join("hosts.yml");
    let content = std::fs::read_to_string(hosts_file).ok()?;
    token_from_hosts_file(&content)
}

fn token_from_hosts_file(content: &str) -> Option<String> {
    let mut in_host = false;
    for line in content.lines() {
        if line.starts_with("github.com:") {
            in_host = true;
            continue;
        }
        if in_host {
            if !line.starts_with(' ') && !line.starts_with('\t') {
                // a new top-level key ends the github.com block
                if !line.trim().is_empty() {
                    in_host = false;
                }
                continue;
            }
            if let Some(rest) = line.trim_start().strip_prefix("oauth_token:") {
                let token = rest.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}
