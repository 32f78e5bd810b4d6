//! Bare repository creation and removal.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Initialise a new bare repository at `path` with `branch` as its primary
/// branch.
///
/// `git init` creates any missing parent directories itself.
#[instrument(skip(git), fields(path = %path.display()))]
pub async fn init_bare_repo(git: &Path, path: &Path, branch: &str) -> Result<()> {
    let output = Command::new(git)
        .arg("init")
        .arg("--bare")
        .arg("--initial-branch")
        .arg(branch)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to spawn git init --bare")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git init --bare failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    debug!("bare repo initialised");
    Ok(())
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

/// Recursively remove the directory at `path`.  Missing paths are a no-op.
#[instrument(fields(path = %path.display()))]
pub async fn remove_dir(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!("directory removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("path does not exist; nothing to remove");
            Ok(())
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove directory: {}", path.display()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::git_available;

    #[tokio::test]
    async fn remove_nonexistent_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir(&tmp.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a");
        std::fs::create_dir_all(dir.join("b")).unwrap();
        std::fs::write(dir.join("b/c.txt"), "x").unwrap();

        remove_dir(&dir).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn init_creates_bare_repo_with_branch() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abc").join("demo.git");

        init_bare_repo(Path::new("git"), &path, "trunk").await.unwrap();

        assert!(path.join("HEAD").is_file());
        assert!(path.join("hooks").is_dir());
        let head = std::fs::read_to_string(path.join("HEAD")).unwrap();
        assert_eq!(head.trim(), "ref: refs/heads/trunk");
    }

    #[tokio::test]
    async fn init_with_missing_binary_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = init_bare_repo(
            Path::new("/nonexistent/git-binary"),
            &tmp.path().join("x.git"),
            "main",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
