//! Creation and lookup of hosted repositories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::hook::{self, HookCommand};
use super::{is_valid_id, new_repo_id, validate_name, Repository, REPO_SUFFIX};
use crate::config::Config;
use crate::git;

/// Filesystem-backed repository registry rooted at one directory.
///
/// Holds no state beyond its settings; every lookup reads the disk.
#[derive(Debug, Clone)]
pub struct RepoStore {
    root: PathBuf,
    git: PathBuf,
    default_branch: String,
    hook: HookCommand,
}

impl RepoStore {
    pub fn new(config: &Config, hook: HookCommand) -> Self {
        Self {
            root: config.root.clone(),
            git: config.git.binary.clone(),
            default_branch: config.git.default_branch.clone(),
            hook,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_binary(&self) -> &Path {
        &self.git
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create a new bare repository called `name` under a fresh id and wire
    /// its post-receive hook.
    ///
    /// On failure the `{root}/{id}` directory is removed again so no
    /// half-initialised repository is left behind.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<Repository> {
        validate_name(name)?;

        let repo = Repository {
            root: self.root.clone(),
            id: new_repo_id(),
            name: name.to_string(),
        };

        if let Err(err) = self.init_and_wire(&repo).await {
            let id_dir = self.root.join(&repo.id);
            if let Err(cleanup) = git::remove_dir(&id_dir).await {
                warn!(
                    repo_id = %repo.id,
                    error = %cleanup,
                    "failed to clean up after repository creation failure"
                );
            }
            return Err(err.context(format!("failed to create repository {}", repo.id)));
        }

        info!(repo_id = %repo.id, path = %repo.path().display(), "created new repo");
        Ok(repo)
    }

    async fn init_and_wire(&self, repo: &Repository) -> Result<()> {
        git::init_bare_repo(&self.git, &repo.path(), &self.default_branch)
            .await
            .context("repository initialization failed")?;
        hook::install(repo, &self.hook)
            .await
            .context("hook installation failed")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resolve
    // -----------------------------------------------------------------------

    /// Look up the repository stored under `id`.
    ///
    /// `None` when the id is malformed, `{root}/{id}` is not a readable
    /// directory, or it does not hold exactly one `*.git` entry.
    #[instrument(skip(self))]
    pub async fn resolve_by_id(&self, id: &str) -> Result<Option<Repository>> {
        if !is_valid_id(id) {
            debug!("rejecting malformed repository id");
            return Ok(None);
        }

        let dir = self.root.join(id);
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!("repository directory not found");
            return Ok(None);
        }

        let mut names = match scan_repo_names(&dir).await {
            Ok(names) => names,
            Err(e) => {
                warn!(repo_id = %id, error = %e, "failed to list repository directory");
                return Ok(None);
            }
        };

        match names.len() {
            1 => Ok(Some(Repository {
                root: self.root.clone(),
                id: id.to_string(),
                name: names.remove(0),
            })),
            0 => {
                debug!("no repository under id directory");
                Ok(None)
            }
            n => {
                warn!(repo_id = %id, count = n, "ambiguous repository directory");
                Ok(None)
            }
        }
    }
}

/// Stems of every `*.git` entry in `dir`.
async fn scan_repo_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(REPO_SUFFIX)) else {
            continue;
        };
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
