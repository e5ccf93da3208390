//! Canonical project layout.

use std::path::{Path, PathBuf};

use crate::core::extract::{LEDGER_FILE, PROGRESS_FILE, STARTUP_SCRIPT_FILE};

/// Version-controlled working tree, relative to the project root.
pub const WORKSPACE_DIR: &str = "workspace";
/// Coordinator-private state, relative to the project root.
pub const BATON_DIR: &str = ".baton";

/// All canonical paths for a project root.
///
/// The `*_rel` paths are what a [`crate::io::store::StateStore`] is addressed with;
/// the absolute ones are for collaborators that need real paths (git, lock, verify).
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub workspace_dir: PathBuf,
    pub baton_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub progress_rel: PathBuf,
    pub ledger_rel: PathBuf,
    pub startup_script_rel: PathBuf,
    pub workspace_rel: PathBuf,
    pub malformed_ledger_rel: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let baton_dir = root.join(BATON_DIR);
        Self {
            workspace_dir: root.join(WORKSPACE_DIR),
            sessions_dir: baton_dir.join("sessions"),
            config_path: baton_dir.join("config.toml"),
            lock_path: baton_dir.join("session.lock"),
            baton_dir,
            progress_rel: PathBuf::from(PROGRESS_FILE),
            ledger_rel: PathBuf::from(LEDGER_FILE),
            startup_script_rel: PathBuf::from(STARTUP_SCRIPT_FILE),
            workspace_rel: PathBuf::from(WORKSPACE_DIR),
            malformed_ledger_rel: Path::new(BATON_DIR).join("feature_list.malformed.json"),
            root,
        }
    }

    /// Store-relative path for a file inside the workspace.
    pub fn workspace_file_rel(&self, rel: &str) -> PathBuf {
        self.workspace_rel.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_project() {
        let paths = ProjectPaths::new("/proj");
        assert_eq!(paths.workspace_dir, Path::new("/proj/workspace"));
        assert_eq!(paths.lock_path, Path::new("/proj/.baton/session.lock"));
        assert_eq!(paths.config_path, Path::new("/proj/.baton/config.toml"));
        assert_eq!(paths.ledger_rel, Path::new("feature_list.json"));
        assert_eq!(paths.progress_rel, Path::new("claude-progress.txt"));
        assert_eq!(
            paths.workspace_file_rel("src/app.py"),
            Path::new("workspace/src/app.py")
        );
    }
}
