//! Repository snapshots handed to the agents.
//!
//! A [`RepoData`] is fetched once per submission and shared read-only by that
//! submission's agent tasks. It is the ground truth the evidence validator
//! checks agent citations against.
//!
//! [`ContextProvider`] is the seam to whatever produces snapshots (a clone
//! service, a CI artifact store, ...). [`LocalContextProvider`] builds them
//! from a directory that is already checked out.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::error::ContextError;

/// Directories never included in a snapshot.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

/// Maximum number of file excerpts carried in a snapshot.
const MAX_EXCERPTS: usize = 24;

/// Maximum bytes kept per excerpt.
const MAX_EXCERPT_BYTES: usize = 4_000;

/// Lines of CI output kept in the summary.
const CI_SUMMARY_LINES: usize = 40;

/// Commits read from the reflog.
const MAX_COMMITS: usize = 50;

/// One commit in the submission's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub author: String,
    pub message: String,
    /// Unix timestamp of the commit.
    pub timestamp: i64,
}

/// Immutable snapshot of a submission's repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    pub repo_url: String,
    /// Repository-relative paths, `/`-separated.
    pub files: BTreeSet<String>,
    /// Line count per file in `files`.
    pub line_counts: BTreeMap<String, usize>,
    pub commits: Vec<CommitSummary>,
    pub ci_summary: Option<String>,
    /// Leading content of selected source files.
    #[serde(default)]
    pub excerpts: BTreeMap<String, String>,
}

impl RepoData {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            ..Self::default()
        }
    }

    /// Add a file with its line count.
    pub fn with_file(mut self, path: impl Into<String>, lines: usize) -> Self {
        let path = path.into();
        self.line_counts.insert(path.clone(), lines);
        self.files.insert(path);
        self
    }

    pub fn with_commit(mut self, commit: CommitSummary) -> Self {
        self.commits.push(commit);
        self
    }

    pub fn with_ci_summary(mut self, summary: impl Into<String>) -> Self {
        self.ci_summary = Some(summary.into());
        self
    }

    pub fn with_excerpt(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.excerpts.insert(path.into(), content.into());
        self
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    pub fn line_count(&self, path: &str) -> Option<usize> {
        self.line_counts.get(path).copied()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Total lines across all files.
    pub fn total_lines(&self) -> usize {
        self.line_counts.values().sum()
    }
}

/// Source of repository snapshots.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Fetch a snapshot of `repo_url`, optionally with CI output for `ci_ref`.
    async fn fetch(&self, repo_url: &str, ci_ref: Option<&str>) -> Result<RepoData, ContextError>;
}

/// Snapshots repositories that are already checked out on local disk.
///
/// `repo_url` may be an absolute path, a `file://` URL, or a path relative to
/// the provider's base directory. `ci_ref`, when given, names a CI log file
/// inside the repository whose tail becomes the CI summary. A log that is
/// missing, unreadable or outside the repository is left out.
#[derive(Debug, Clone)]
pub struct LocalContextProvider {
    base_dir: PathBuf,
}

impl LocalContextProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, repo_url: &str) -> PathBuf {
        let raw = repo_url.strip_prefix("file://").unwrap_or(repo_url);
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ContextProvider for LocalContextProvider {
    #[instrument(skip(self), fields(base = %self.base_dir.display()))]
    async fn fetch(&self, repo_url: &str, ci_ref: Option<&str>) -> Result<RepoData, ContextError> {
        let root = self.resolve(repo_url);
        let url = repo_url.to_string();
        let ci_ref = ci_ref.map(str::to_string);

        let snapshot = tokio::task::spawn_blocking(move || {
            snapshot_directory(&root, &url, ci_ref.as_deref())
        })
        .await
        .map_err(|e| ContextError::unavailable(repo_url, format!("snapshot task failed: {}", e)))??;

        debug!(
            files = snapshot.file_count(),
            lines = snapshot.total_lines(),
            commits = snapshot.commits.len(),
            "Repository snapshot built"
        );
        Ok(snapshot)
    }
}

fn snapshot_directory(
    root: &Path,
    repo_url: &str,
    ci_ref: Option<&str>,
) -> Result<RepoData, ContextError> {
    if !root.is_dir() {
        return Err(ContextError::unavailable(
            repo_url,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut data = RepoData::new(repo_url);

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| ContextError::unavailable(repo_url, e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let bytes = std::fs::read(entry.path()).map_err(|source| ContextError::Io {
            path: relative.clone(),
            source,
        })?;

        data.line_counts.insert(relative.clone(), count_lines(&bytes));
        if data.excerpts.len() < MAX_EXCERPTS && !looks_binary(&bytes) {
            data.excerpts
                .insert(relative.clone(), excerpt(&bytes, MAX_EXCERPT_BYTES));
        }
        data.files.insert(relative);
    }

    data.commits = read_reflog(&root.join(".git/logs/HEAD"));

    data.ci_summary = ci_ref
        .and_then(|ci_ref| read_ci_log(root, ci_ref))
        .map(|log| tail_lines(&log, CI_SUMMARY_LINES));

    Ok(data)
}

/// Read a CI log that resolves to a file under `root`.
fn read_ci_log(root: &Path, ci_ref: &str) -> Option<String> {
    let contained = root.canonicalize().and_then(|root| {
        let log = root.join(ci_ref).canonicalize()?;
        Ok(log.starts_with(&root).then_some(log))
    });
    let log = match contained {
        Ok(Some(log)) => log,
        Ok(None) => {
            warn!(ci_ref, "CI log is outside the repository; ignored");
            return None;
        }
        Err(err) => {
            warn!(ci_ref, error = %err, "CI log not found; continuing without it");
            return None;
        }
    };
    match std::fs::read_to_string(&log) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(ci_ref, error = %err, "CI log unreadable; continuing without it");
            None
        }
    }
}

/// Number of lines, counting a final line without a trailing newline.
fn count_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    if bytes.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

fn excerpt(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...", &text[..end])
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Parse `.git/logs/HEAD` into commit summaries, newest first.
///
/// Reflog lines look like
/// `<old> <new> <name> <<email>> <unix-ts> <tz>\tcommit: <message>`.
/// Anything that is not a commit entry is ignored; a missing reflog is not an
/// error.
fn read_reflog(path: &Path) -> Vec<CommitSummary> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut commits: Vec<CommitSummary> = content.lines().filter_map(parse_reflog_line).collect();
    commits.reverse();
    commits.truncate(MAX_COMMITS);
    commits
}

fn parse_reflog_line(line: &str) -> Option<CommitSummary> {
    let (header, action) = line.split_once('\t')?;
    let message = action
        .strip_prefix("commit (initial): ")
        .or_else(|| action.strip_prefix("commit (amend): "))
        .or_else(|| action.strip_prefix("commit: "))?;

    let mut parts = header.splitn(3, ' ');
    let _old = parts.next()?;
    let sha = parts.next()?;
    let rest = parts.next()?;

    let email_end = rest.rfind('>')?;
    let author = rest[..email_end]
        .rsplit_once('<')
        .map(|(name, _)| name.trim())?;
    let timestamp = rest[email_end + 1..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;

    Some(CommitSummary {
        sha: sha.to_string(),
        author: author.to_string(),
        message: message.trim().to_string(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one"), 1);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo"), 2);
        assert_eq!(count_lines(b"one\ntwo\n\n"), 3);
    }

    #[test]
    fn test_parse_reflog_line() {
        let line = "0000000000000000000000000000000000000000 1a2b3c Ada Lovelace <ada@example.com> 1700000000 +0000\tcommit (initial): Add engine";
        let commit = parse_reflog_line(line).expect("parses");
        assert_eq!(commit.sha, "1a2b3c");
        assert_eq!(commit.author, "Ada Lovelace");
        assert_eq!(commit.message, "Add engine");
        assert_eq!(commit.timestamp, 1_700_000_000);

        assert!(parse_reflog_line("a b c <d> 1 +0000\tcheckout: moving from main to dev").is_none());
    }

    #[test]
    fn test_repo_data_builders() {
        let data = RepoData::new("https://example.com/r")
            .with_file("src/main.rs", 120)
            .with_file("README.md", 10);
        assert!(data.contains_file("src/main.rs"));
        assert_eq!(data.line_count("README.md"), Some(10));
        assert_eq!(data.total_lines(), 130);
        assert!(data.line_count("missing.rs").is_none());
    }

    #[tokio::test]
    async fn test_local_snapshot_skips_build_dirs() {
        let tmp = TempDir::new().expect("tempdir");
        let repo = tmp.path().join("team-7");
        write(&repo, "src/lib.rs", "fn a() {}\nfn b() {}\n");
        write(&repo, "README.md", "# Team 7");
        write(&repo, "target/debug/junk.rs", "ignored\n");
        write(&repo, "node_modules/pkg/index.js", "ignored\n");
        write(
            &repo,
            ".git/logs/HEAD",
            "0000 abc1 Grace <g@example.com> 1700000000 +0000\tcommit (initial): init\n\
             abc1 def2 Grace <g@example.com> 1700000100 +0000\tcommit: add parser\n",
        );
        write(&repo, "ci/build.log", "step 1\nstep 2\nFAILED: test_x\n");

        let provider = LocalContextProvider::new(tmp.path());
        let data = provider
            .fetch("team-7", Some("ci/build.log"))
            .await
            .expect("snapshot");

        assert!(data.contains_file("src/lib.rs"));
        assert!(data.contains_file("README.md"));
        assert!(!data.files.iter().any(|f| f.starts_with("target/")));
        assert!(!data.files.iter().any(|f| f.starts_with("node_modules/")));
        assert!(!data.files.iter().any(|f| f.starts_with(".git/")));
        assert_eq!(data.line_count("src/lib.rs"), Some(2));
        assert_eq!(data.commits.len(), 2);
        assert_eq!(data.commits[0].message, "add parser");
        assert!(data
            .ci_summary
            .as_deref()
            .is_some_and(|s| s.ends_with("FAILED: test_x")));
    }

    #[tokio::test]
    async fn test_missing_ci_log_is_omitted() {
        let tmp = TempDir::new().expect("tempdir");
        write(&tmp.path().join("team-3"), "src/main.rs", "fn main() {}
");

        let data = LocalContextProvider::new(tmp.path())
            .fetch("team-3", Some("ci/never-ran.log"))
            .await
            .expect("snapshot without ci log");

        assert!(data.contains_file("src/main.rs"));
        assert!(data.ci_summary.is_none());
    }

    #[tokio::test]
    async fn test_ci_log_outside_repository_is_ignored() {
        let tmp = TempDir::new().expect("tempdir");
        write(&tmp.path().join("team-4"), "src/main.rs", "fn main() {}
");
        write(tmp.path(), "secrets.txt", "token=hunter2
");
        let absolute = tmp.path().join("secrets.txt");
        let provider = LocalContextProvider::new(tmp.path());

        for ci_ref in ["../secrets.txt", absolute.to_str().expect("utf-8 path")] {
            let data = provider
                .fetch("team-4", Some(ci_ref))
                .await
                .expect("snapshot");
            assert!(data.ci_summary.is_none(), "{ci_ref} leaked into the snapshot");
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let tmp = TempDir::new().expect("tempdir");
        let provider = LocalContextProvider::new(tmp.path());
        let err = provider
            .fetch("does-not-exist", None)
            .await
            .expect_err("missing repo");
        assert!(matches!(err, ContextError::RepoUnavailable { .. }));
    }
}
