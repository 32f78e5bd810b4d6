//! Per-repository webhook URL, stored as `hooks/webhook.txt`.
//!
//! Read from disk on every access; nothing is cached between the API and
//! hook runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::repo::hook::write_executable;
use crate::repo::Repository;

const WEBHOOK_FILE: &str = "webhook.txt";

fn webhook_path(repo: &Repository) -> PathBuf {
    repo.hooks_dir().join(WEBHOOK_FILE)
}

/// The configured delivery URL, if any.
///
/// A missing file, an unreadable file and a blank file all mean "no
/// webhook".
#[instrument(fields(repo_id = %repo.id))]
pub async fn get(repo: &Repository) -> Option<String> {
    let contents = tokio::fs::read_to_string(webhook_path(repo)).await.ok()?;
    let url = contents.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// Replace the configured delivery URL.  An empty `url` removes it.
#[instrument(fields(repo_id = %repo.id))]
pub async fn set(repo: &Repository, url: &str) -> Result<()> {
    let path = webhook_path(repo);
    let url = url.trim();

    if url.is_empty() {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to clear webhook: {}", path.display()));
            }
        }
        debug!("webhook cleared");
        return Ok(());
    }

    write_executable(&path, url.as_bytes())
        .await
        .with_context(|| format!("failed to write webhook: {}", path.display()))?;
    debug!(%url, "webhook set");
    Ok(())
}

/// Accepts an empty string (clear) or an absolute `http`/`https` URL.
pub fn validate_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(());
    }
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid webhook url: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported webhook url scheme: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_in(tmp: &tempfile::TempDir) -> Repository {
        let repo = Repository {
            root: tmp.path().to_path_buf(),
            id: "abc123".into(),
            name: "demo".into(),
        };
        std::fs::create_dir_all(repo.hooks_dir()).unwrap();
        repo
    }

    #[tokio::test]
    async fn absent_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);
        assert_eq!(get(&repo).await, None);
        // Reads are stable without an intervening set.
        assert_eq!(get(&repo).await, None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);

        set(&repo, "http://example.com/hook").await.unwrap();
        assert_eq!(get(&repo).await.as_deref(), Some("http://example.com/hook"));
        assert_eq!(get(&repo).await.as_deref(), Some("http://example.com/hook"));
    }

    #[tokio::test]
    async fn second_set_replaces_first() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);

        set(&repo, "http://example.com/a-much-longer-first-hook").await.unwrap();
        set(&repo, "http://example.com/b").await.unwrap();
        assert_eq!(get(&repo).await.as_deref(), Some("http://example.com/b"));
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_trimmed() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);

        std::fs::write(webhook_path(&repo), "  http://example.com/hook\n").unwrap();
        assert_eq!(get(&repo).await.as_deref(), Some("http://example.com/hook"));
    }

    #[tokio::test]
    async fn empty_set_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);

        set(&repo, "http://example.com/hook").await.unwrap();
        set(&repo, "").await.unwrap();
        assert_eq!(get(&repo).await, None);
        assert!(!webhook_path(&repo).exists());

        // Clearing twice is fine.
        set(&repo, "   ").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_mode_matches_hooks() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo_in(&tmp);

        set(&repo, "http://example.com/hook").await.unwrap();
        let mode = std::fs::metadata(webhook_path(&repo))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("").is_ok());
        assert!(validate_url("http://example.com/hook").is_ok());
        assert!(validate_url("https://example.com:8443/x?y=1").is_ok());
        assert!(validate_url("ftp://example.com/hook").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("/relative/path").is_err());
    }
}
