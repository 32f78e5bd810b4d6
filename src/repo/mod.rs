//! Repository identity and on-disk layout.
//!
//! Every hosted repository lives at `{root}/{id}/{name}.git`.  The filesystem
//! is the only registry: nothing here caches, and a [`Repository`] is just
//! the three path components plus helpers to rebuild its location.

pub mod hook;
pub mod store;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use store::RepoStore;

/// Suffix every bare repository directory carries.
pub const REPO_SUFFIX: &str = ".git";

const MAX_NAME_LEN: usize = 100;

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub root: PathBuf,
    pub id: String,
    pub name: String,
}

impl Repository {
    /// `{root}/{id}/{name}.git`
    pub fn path(&self) -> PathBuf {
        self.root
            .join(&self.id)
            .join(format!("{}{REPO_SUFFIX}", self.name))
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.path().join("hooks")
    }

    /// Recover a repository from its own directory.
    ///
    /// Hook runs start with the bare repository as working directory, which
    /// is how they learn which repository was pushed to.  Returns `None` when
    /// `path` does not end in `.git` or lacks an id/root above it.
    pub fn from_repo_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let name = file_name.strip_suffix(REPO_SUFFIX)?;
        if name.is_empty() {
            return None;
        }
        let parent = path.parent()?;
        let id = parent.file_name()?.to_str()?;
        let root = parent.parent()?;

        Some(Self {
            root: root.to_path_buf(),
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    /// Clone URL as seen by a client that reached us through `host`.
    pub fn git_url(&self, host: &str) -> String {
        let scheme = if is_loopback_host(host) { "http" } else { "https" };
        format!("{scheme}://{host}/{}/{}{REPO_SUFFIX}", self.id, self.name)
    }
}

/// Wire representation returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RepoView {
    pub id: String,
    pub name: String,
    pub git_url: String,
}

impl RepoView {
    pub fn new(repo: &Repository, host: &str) -> Self {
        Self {
            id: repo.id.clone(),
            name: repo.name.clone(),
            git_url: repo.git_url(host),
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers and names
// ---------------------------------------------------------------------------

/// Fresh random id: 128 bits as 32 lowercase hex characters.
pub fn new_repo_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Ids are lowercase hex and nothing else, so an id is always a single safe
/// path component.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("repository name must not be empty")]
    Empty,
    #[error("repository name must be at most {MAX_NAME_LEN} characters")]
    TooLong,
    #[error("repository name may only contain letters, digits, '.', '-' and '_'")]
    InvalidCharacter,
    #[error("repository name must not start with '.'")]
    LeadingDot,
    #[error("repository name must not end with '.git'")]
    GitSuffix,
}

/// Check that `name` can be used as the `{name}.git` path component.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(NameError::InvalidCharacter);
    }
    if name.starts_with('.') {
        return Err(NameError::LeadingDot);
    }
    if name.ends_with(REPO_SUFFIX) {
        return Err(NameError::GitSuffix);
    }
    Ok(())
}

fn is_loopback_host(host: &str) -> bool {
    let hostname = if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':').map_or(host, |(h, _)| h)
    };
    hostname.eq_ignore_ascii_case("localhost")
        || hostname
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
