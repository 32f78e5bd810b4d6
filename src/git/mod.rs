//! Wrappers around the `git` executable.
//!
//! Object storage, ref updates and the smart-HTTP protocol are all left to
//! git itself; this module only knows how to start it.  Every function takes
//! the configured binary path so tests and deployments can point elsewhere.

pub mod bare_repo;
pub mod commands;

pub use bare_repo::{init_bare_repo, remove_dir};
pub use commands::{http_backend_command, rev_parse_head};

/// Whether a `git` executable is on `PATH`.  Tests that need real
/// repositories return early without it.
#[cfg(test)]
pub(crate) fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Commit the empty tree onto `refs/heads/{branch}` of the bare repository
/// at `repo`, as a push would, and return the new commit id.
#[cfg(test)]
pub(crate) fn commit_empty_tree(repo: &std::path::Path, branch: &str) -> String {
    fn git(repo: &std::path::Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_AUTHOR_NAME", "gitto")
            .env("GIT_AUTHOR_EMAIL", "gitto@example.com")
            .env("GIT_COMMITTER_NAME", "gitto")
            .env("GIT_COMMITTER_EMAIL", "gitto@example.com")
            .stdin(std::process::Stdio::null())
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    let tree = git(repo, &["mktree"]);
    let commit = git(repo, &["commit-tree", &tree, "-m", "initial"]);
    git(repo, &["update-ref", &format!("refs/heads/{branch}"), &commit]);
    commit
}
