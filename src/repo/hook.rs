//! Post-receive hook installation.
//!
//! After git has accepted a push and updated refs it runs
//! `hooks/post-receive` synchronously in the repository directory and only
//! then answers the client.  We install a tiny shell shim there that execs
//! this binary with the `hook` subcommand, so the same executable serves the
//! API and fires webhooks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use super::Repository;

pub const HOOK_NAME: &str = "post-receive";

/// How git should re-invoke us from inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    /// Absolute path of the gitto executable.
    pub exe: PathBuf,
    /// Config file forwarded with `--config`, if the server was given one.
    pub config: Option<PathBuf>,
}

impl HookCommand {
    /// The command for the currently running executable.
    pub fn current(config: Option<PathBuf>) -> Result<Self> {
        let exe = std::env::current_exe().context("unable to locate the running executable")?;
        Ok(Self { exe, config })
    }

    /// Contents of the `post-receive` shim.
    pub fn script(&self) -> String {
        let mut line = format!("exec {}", shell_quote(&self.exe));
        if let Some(config) = &self.config {
            line.push_str(" --config ");
            line.push_str(&shell_quote(config));
        }
        line.push_str(" hook");
        format!("#!/bin/sh\n{line}\n")
    }
}

/// Write the post-receive shim into `repo`'s hooks directory.
///
/// An existing hook is replaced.
#[instrument(skip(command), fields(repo_id = %repo.id))]
pub async fn install(repo: &Repository, command: &HookCommand) -> Result<()> {
    let hooks_dir = repo.hooks_dir();
    tokio::fs::create_dir_all(&hooks_dir)
        .await
        .with_context(|| format!("failed to create hooks directory: {}", hooks_dir.display()))?;

    let hook_path = hooks_dir.join(HOOK_NAME);
    write_executable(&hook_path, command.script().as_bytes())
        .await
        .with_context(|| format!("failed to install post-receive hook: {}", hook_path.display()))?;

    debug!(path = %hook_path.display(), "post-receive hook installed");
    Ok(())
}

/// Write `contents` to `path`, truncating, with mode 0755.
pub(crate) async fn write_executable(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

/// Single-quote `path` for `/bin/sh`.
fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}
