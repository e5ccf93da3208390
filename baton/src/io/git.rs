//! Version-control adapter for the workspace.
//!
//! The coordinator only needs four things from version control: make sure a
//! repository exists, read recent history, commit everything, and push. They sit
//! behind [`VersionControl`] so sessions can be driven without a real repo.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::CommitOutcome;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);
const GIT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Operations the session protocol performs against version control.
pub trait VersionControl {
    /// Create the repository if it does not exist yet.
    fn ensure_repo(&self) -> Result<()>;

    /// One-line summaries of the most recent commits, newest first.
    /// No repository or no commits yet is an empty list.
    fn recent_commits(&self, limit: usize) -> Result<Vec<String>>;

    /// Stage everything and record one commit.
    fn commit_all(&self, message: &str) -> Result<CommitOutcome>;

    /// Push `branch` to `remote`.
    fn push(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if `workdir` is the root of its own repository.
    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!out.stdout_lossy().trim().is_empty())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(output.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.describe_failure()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, GIT_TIMEOUT, GIT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn ensure_repo(&self) -> Result<()> {
        if self.is_repo() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.workdir)
            .with_context(|| format!("create workspace {}", self.workdir.display()))?;
        self.run_checked(&["init"])?;
        info!("initialized workspace repository");
        Ok(())
    }

    fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
        if limit == 0 || !self.is_repo() {
            return Ok(Vec::new());
        }
        let arg = format!("-{limit}");
        let out = self.run(&["log", "--oneline", "--no-decorate", &arg])?;
        if !out.success() {
            // A fresh repository has no HEAD yet.
            debug!(reason = %out.describe_failure(), "git log unavailable");
            return Ok(Vec::new());
        }
        Ok(out
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<CommitOutcome> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, recording an empty commit");
        }
        let out = self.run(&["commit", "--allow-empty", "-m", message])?;
        if out.success() {
            match self.run_capture(&["rev-parse", "--short", "HEAD"]) {
                Ok(head) => debug!(head = %head.trim(), "committed"),
                Err(err) => debug!(err = %format!("{err:#}"), "committed, head unavailable"),
            }
            return Ok(CommitOutcome::Committed);
        }
        let reason = out.describe_failure();
        warn!(reason = %reason, "commit failed");
        Ok(CommitOutcome::Failed { reason })
    }

    #[instrument(skip_all, fields(remote = %remote, branch = %branch))]
    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", remote, branch])?;
        debug!("pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::configure_git_identity;

    #[test]
    fn recent_commits_without_repo_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path().join("workspace"));
        assert!(git.recent_commits(10).expect("log").is_empty());
    }

    #[test]
    fn ensure_repo_then_commit_and_read_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path().join("workspace"));

        git.ensure_repo().expect("init");
        assert!(git.is_repo());
        configure_git_identity(git.workdir());
        assert!(git.recent_commits(10).expect("log").is_empty());

        std::fs::write(git.workdir().join("a.txt"), "a").expect("write");
        assert_eq!(git.commit_all("first").expect("commit"), CommitOutcome::Committed);
        assert_eq!(git.commit_all("second").expect("commit"), CommitOutcome::Committed);

        let log = git.recent_commits(10).expect("log");
        assert_eq!(log.len(), 2);
        assert!(log[0].ends_with("second"));
        assert!(log[1].ends_with("first"));
        assert_eq!(git.recent_commits(1).expect("log").len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn commit_counts_even_when_head_cannot_be_read_back() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.ensure_repo().expect("init");
        configure_git_identity(git.workdir());
        let hook = temp.path().join(".git/hooks/post-commit");
        std::fs::create_dir_all(hook.parent().expect("hooks dir")).expect("create hooks dir");
        std::fs::write(&hook, "#!/bin/sh
rm -f .git/refs/heads/*
").expect("write hook");
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755))
            .expect("chmod hook");

        assert_eq!(git.commit_all("only").expect("commit"), CommitOutcome::Committed);
    }

    #[test]
    fn push_without_remote_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.ensure_repo().expect("init");
        configure_git_identity(git.workdir());
        git.commit_all("only").expect("commit");

        let err = git.push("origin", "main").unwrap_err();
        assert!(err.to_string().contains("git push origin main failed"));
    }
}
