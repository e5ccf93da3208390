//! Test-only fakes for the coordinator's collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};

use crate::core::types::{CommitOutcome, FeatureRecord, Verification};
use crate::io::git::{Git, VersionControl};
use crate::io::paths::ProjectPaths;
use crate::io::provider::{CompletionRequest, ModelProvider};
use crate::io::store::{FsStore, StateStore};
use crate::io::verify::{Verifier, VerifyReport, VerifyRequest};

/// Feature record with one deterministic step.
pub fn feature(category: &str, description: &str, passes: bool) -> FeatureRecord {
    FeatureRecord {
        category: category.to_string(),
        description: description.to_string(),
        steps: vec![format!("run {description}")],
        passes,
    }
}

/// A `file=` fenced block as the agent would emit it.
pub fn fenced(path: &str, body: &str) -> String {
    format!("```text file={path}\n{body}\n```\n")
}

/// Set a local commit identity so commits work without global git config.
pub fn configure_git_identity(workdir: &Path) {
    for (key, value) in [("user.email", "baton@example.com"), ("user.name", "baton")] {
        let status = Command::new("git")
            .args(["config", key, value])
            .current_dir(workdir)
            .status()
            .expect("run git config");
        assert!(status.success(), "git config {key} failed");
    }
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemStore {
    files: RefCell<BTreeMap<PathBuf, String>>,
    executables: RefCell<BTreeSet<PathBuf>>,
}

impl MemStore {
    pub fn insert(&self, rel: &Path, contents: &str) {
        self.files
            .borrow_mut()
            .insert(rel.to_path_buf(), contents.to_string());
    }

    pub fn get(&self, rel: &Path) -> Option<String> {
        self.files.borrow().get(rel).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, String> {
        self.files.borrow().clone()
    }

    pub fn is_executable(&self, rel: &Path) -> bool {
        self.executables.borrow().contains(rel)
    }
}

impl StateStore for MemStore {
    fn read(&self, rel: &Path) -> Result<Option<String>> {
        Ok(self.get(rel))
    }

    fn read_bytes(&self, rel: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.get(rel).map(String::into_bytes))
    }

    fn append(&self, rel: &Path, text: &str) -> Result<()> {
        self.files
            .borrow_mut()
            .entry(rel.to_path_buf())
            .or_default()
            .push_str(text);
        Ok(())
    }

    fn replace(&self, rel: &Path, contents: &str) -> Result<()> {
        self.insert(rel, contents);
        Ok(())
    }

    fn set_executable(&self, rel: &Path) -> Result<()> {
        if !self.files.borrow().contains_key(rel) {
            return Err(anyhow!("no such file {}", rel.display()));
        }
        self.executables.borrow_mut().insert(rel.to_path_buf());
        Ok(())
    }

    fn list_files(&self, rel_dir: &Path) -> Result<Vec<String>> {
        let names = self
            .files
            .borrow()
            .keys()
            .filter(|path| path.parent() == Some(rel_dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.starts_with('.'))
            .collect();
        Ok(names)
    }
}

/// [`VersionControl`] that records commit messages, newest first.
#[derive(Debug, Default)]
pub struct FakeVcs {
    commits: RefCell<Vec<String>>,
    fail_commits: bool,
    fail_push: bool,
    pushes: Cell<usize>,
}

impl FakeVcs {
    pub fn with_commits(commits: &[&str]) -> Self {
        Self {
            commits: RefCell::new(commits.iter().map(|c| c.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn failing_commits(mut self) -> Self {
        self.fail_commits = true;
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.get()
    }
}

impl VersionControl for FakeVcs {
    fn ensure_repo(&self) -> Result<()> {
        Ok(())
    }

    fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self.commits.borrow().iter().take(limit).cloned().collect())
    }

    fn commit_all(&self, message: &str) -> Result<CommitOutcome> {
        if self.fail_commits {
            return Ok(CommitOutcome::Failed {
                reason: "exit code 1: nothing to commit".to_string(),
            });
        }
        self.commits.borrow_mut().insert(0, message.to_string());
        Ok(CommitOutcome::Committed)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.pushes.set(self.pushes.get() + 1);
        if self.fail_push {
            return Err(anyhow!("git push {remote} {branch} failed"));
        }
        Ok(())
    }
}

/// Provider that replays scripted responses in order; the last one repeats.
#[derive(Debug)]
pub struct ScriptedProvider {
    responses: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self::sequence(vec![response.into()])
    }

    pub fn sequence(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "script needs at least one response");
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }
}

impl ModelProvider for ScriptedProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let mut responses = self.responses.borrow_mut();
        if responses.len() > 1 {
            return Ok(responses.pop_front().unwrap_or_default());
        }
        Ok(responses.front().cloned().unwrap_or_default())
    }
}

/// Provider whose every call fails like a dropped connection.
#[derive(Debug)]
pub struct FailingProvider {
    message: String,
}

impl FailingProvider {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl ModelProvider for FailingProvider {
    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(anyhow!("{}", self.message))
    }
}

/// Verifier with a fixed verdict.
#[derive(Debug)]
pub struct FakeVerifier {
    verdict: Verification,
    calls: Cell<usize>,
}

impl FakeVerifier {
    pub fn new(verdict: Verification) -> Self {
        Self {
            verdict,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Verifier for FakeVerifier {
    fn run(&self, _request: &VerifyRequest) -> Result<VerifyReport> {
        self.calls.set(self.calls.get() + 1);
        Ok(VerifyReport {
            verification: self.verdict,
            log: format!("fake verdict: {:?}", self.verdict),
        })
    }
}

/// A project root in a temp dir with an initialized, identity-configured workspace repo.
pub struct TestProject {
    pub temp: tempfile::TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let git = Git::new(&paths.workspace_dir);
        git.ensure_repo().expect("init workspace repo");
        configure_git_identity(&paths.workspace_dir);
        Self { temp, paths }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn store(&self) -> FsStore {
        FsStore::new(self.root())
    }

    pub fn git(&self) -> Git {
        Git::new(&self.paths.workspace_dir)
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(rel)).ok()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write");
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
