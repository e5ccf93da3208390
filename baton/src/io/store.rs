//! State-store abstraction over the project's durable artifacts.
//!
//! The coordinator never touches ambient paths directly; every read and write of
//! the progress log, ledger, startup script and workspace files goes through a
//! [`StateStore`] addressed with project-relative paths. Tests drive the
//! coordinator with an in-memory store.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Read/append/atomic-replace access to project files.
pub trait StateStore {
    /// Read a UTF-8 file. A missing file is `Ok(None)`.
    fn read(&self, rel: &Path) -> Result<Option<String>>;

    /// Read a file's raw bytes. A missing file is `Ok(None)`.
    fn read_bytes(&self, rel: &Path) -> Result<Option<Vec<u8>>>;

    /// Append `text` to a file, creating it (and its parents) if needed.
    fn append(&self, rel: &Path, text: &str) -> Result<()>;

    /// Replace a file's contents so readers see either the old or the new document.
    fn replace(&self, rel: &Path, contents: &str) -> Result<()>;

    /// Mark a file as executable.
    fn set_executable(&self, rel: &Path) -> Result<()>;

    /// Names of the non-hidden regular files directly under `rel_dir`, sorted.
    /// A missing directory is an empty list.
    fn list_files(&self, rel_dir: &Path) -> Result<Vec<String>>;
}

/// [`StateStore`] backed by the real filesystem under `root`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &Path) -> Result<PathBuf> {
        if rel.is_absolute() {
            return Err(anyhow!("store path must be relative: {}", rel.display()));
        }
        Ok(self.root.join(rel))
    }
}

impl StateStore for FsStore {
    fn read(&self, rel: &Path) -> Result<Option<String>> {
        let path = self.resolve(rel)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Some(contents))
    }

    fn read_bytes(&self, rel: &Path) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(rel)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn append(&self, rel: &Path, text: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {} for append", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync {}", path.display()))?;
        Ok(())
    }

    fn replace(&self, rel: &Path, contents: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        write_atomic(&path, contents)
    }

    fn set_executable(&self, rel: &Path) -> Result<()> {
        let path = self.resolve(rel)?;
        make_executable(&path)
    }

    fn list_files(&self, rel_dir: &Path) -> Result<Vec<String>> {
        let dir = self.resolve(rel_dir)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))? {
            let entry = entry.with_context(|| format!("list {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry
                .file_type()
                .with_context(|| format!("stat {}", entry.path().display()))?
                .is_file()
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Atomically write `contents` to `path` (temp file in the same directory + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
    debug!(path = %path.display(), bytes = contents.len(), "atomic replace");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_file_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        assert_eq!(store.read(Path::new("nope.txt")).expect("read"), None);
    }

    #[test]
    fn append_creates_and_extends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        let rel = Path::new("logs/progress.txt");

        store.append(rel, "one\n").expect("append");
        store.append(rel, "two\n").expect("append");

        assert_eq!(
            store.read(rel).expect("read").as_deref(),
            Some("one\ntwo\n")
        );
    }

    #[test]
    fn replace_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        let rel = Path::new("feature_list.json");

        store.replace(rel, "[]\n").expect("replace");
        store.replace(rel, "[ ]\n").expect("replace");

        assert_eq!(store.read(rel).expect("read").as_deref(), Some("[ ]\n"));
        assert!(!temp.path().join(".feature_list.json.tmp").exists());
    }

    #[test]
    fn list_files_skips_hidden_entries_and_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("workspace");
        fs::create_dir_all(dir.join("src")).expect("mkdir");
        fs::create_dir_all(dir.join(".git")).expect("mkdir");
        fs::write(dir.join("b.txt"), "b").expect("write");
        fs::write(dir.join("a.txt"), "a").expect("write");
        fs::write(dir.join(".env"), "secret").expect("write");

        let store = FsStore::new(temp.path());
        let files = store.list_files(Path::new("workspace")).expect("list");
        assert_eq!(files, vec!["a.txt", "b.txt"]);
        assert!(store.list_files(Path::new("missing")).expect("list").is_empty());
    }

    #[test]
    fn rejects_absolute_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        assert!(store.read(Path::new("/etc/hostname")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn set_executable_adds_exec_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        store.replace(Path::new("init.sh"), "#!/bin/sh\n").expect("write");
        store.set_executable(Path::new("init.sh")).expect("chmod");

        let mode = fs::metadata(temp.path().join("init.sh"))
            .expect("stat")
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
