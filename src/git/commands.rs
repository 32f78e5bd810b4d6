//! Git commands run against an existing repository.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// rev-parse
// ---------------------------------------------------------------------------

/// Resolve the commit `HEAD` currently points at in `repo_path`.
///
/// Fails when `HEAD` names an unborn branch or does not peel to a commit.
#[instrument(skip(git), fields(repo = %repo_path.display()))]
pub async fn rev_parse_head(git: &Path, repo_path: &Path) -> Result<String> {
    let output = Command::new(git)
        .arg("-C")
        .arg(repo_path)
        .arg("rev-parse")
        .arg("--verify")
        .arg("--quiet")
        .arg("HEAD^{commit}")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to spawn git rev-parse")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git rev-parse HEAD failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !is_object_id(&hash) {
        bail!("git rev-parse HEAD returned a non-hash: {hash:?}");
    }
    debug!(%hash, "resolved HEAD");
    Ok(hash)
}

/// Full SHA-1 (40) or SHA-256 (64) object id in lowercase hex.
fn is_object_id(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ---------------------------------------------------------------------------
// http-backend
// ---------------------------------------------------------------------------

/// Build (but do not spawn) a `git http-backend` CGI process serving every
/// repository under `project_root`.
///
/// The request-specific CGI variables are added by the caller.  Pushes are
/// attributed to the fixed `git` service account, which also enables
/// `receive-pack` in http-backend.
pub fn http_backend_command(git: &Path, project_root: &Path) -> Command {
    let mut cmd = Command::new(git);
    cmd.arg("http-backend")
        .env("GIT_PROJECT_ROOT", project_root)
        .env("GIT_HTTP_EXPORT_ALL", "")
        .env("REMOTE_USER", "git")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    cmd
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{commit_empty_tree, git_available, init_bare_repo};

    #[tokio::test]
    async fn rev_parse_on_empty_repo_fails() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.git");
        init_bare_repo(Path::new("git"), &path, "main").await.unwrap();

        // An unborn branch has no commit to resolve.
        assert!(rev_parse_head(Path::new("git"), &path).await.is_err());
    }

    #[tokio::test]
    async fn rev_parse_resolves_tip_commit() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("demo.git");
        init_bare_repo(Path::new("git"), &path, "main").await.unwrap();
        let commit = commit_empty_tree(&path, "main");

        let hash = rev_parse_head(Path::new("git"), &path).await.unwrap();
        assert_eq!(hash, commit);
    }

    #[tokio::test]
    async fn rev_parse_fails_when_only_other_branches_exist() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("demo.git");
        init_bare_repo(Path::new("git"), &path, "main").await.unwrap();
        commit_empty_tree(&path, "feature");

        // HEAD still points at the unborn `main`.
        assert!(rev_parse_head(Path::new("git"), &path).await.is_err());
    }

    #[test]
    fn object_id_shape() {
        assert!(is_object_id(&"a".repeat(40)));
        assert!(is_object_id(&"0".repeat(64)));
        assert!(!is_object_id("HEAD"));
        assert!(!is_object_id(&"A".repeat(40)));
        assert!(!is_object_id(&"a".repeat(41)));
        assert!(!is_object_id(""));
    }

    #[tokio::test]
    async fn rev_parse_outside_repo_fails() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        assert!(rev_parse_head(Path::new("git"), &tmp.path().join("nope.git"))
            .await
            .is_err());
    }

    #[test]
    fn http_backend_env_wiring() {
        let cmd = http_backend_command(Path::new("/usr/bin/git"), Path::new("/srv/git"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/usr/bin/git");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["http-backend"]);

        let envs: Vec<(String, String)> = std_cmd
            .get_envs()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.map(|v| v.to_string_lossy().into_owned()).unwrap_or_default(),
                )
            })
            .collect();
        assert!(envs.contains(&("GIT_PROJECT_ROOT".into(), "/srv/git".into())));
        assert!(envs.contains(&("GIT_HTTP_EXPORT_ALL".into(), String::new())));
        assert!(envs.contains(&("REMOTE_USER".into(), "git".into())));
    }
}
