//! Artifact sets and the all-or-nothing writer.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Suffix of the hidden staging files used while committing.
const STAGING_SUFFIX: &str = ".assetflow-tmp";
/// Suffix of the previous outputs while the new ones are renamed in.
const BACKUP_SUFFIX: &str = ".assetflow-bak";

/// One file on its way into place.
struct Staged {
    staging: PathBuf,
    target: PathBuf,
    backup: Option<PathBuf>,
}

/// One output file, addressed relative to the task's destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Ordered output of a successful task run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact. A later artifact with the same path replaces the earlier one.
    pub fn push(&mut self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        let path = path.into();
        if let Some(existing) = self.artifacts.iter_mut().find(|a| a.path == path) {
            existing.contents = contents;
        } else {
            self.artifacts.push(Artifact { path, contents });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn get(&self, path: &Path) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Write every artifact below `dest`, or none of them.
    ///
    /// All files are staged next to their final location first. Existing
    /// outputs are then moved aside to backups, and the staged files renamed
    /// into place. If any step fails, new files are removed, backups restored
    /// and staging files deleted, so the previous outputs stay untouched.
    pub fn commit(&self, dest: &Path) -> io::Result<Vec<PathBuf>> {
        for artifact in &self.artifacts {
            check_relative(&artifact.path)?;
            let target = dest.join(&artifact.path);
            if target.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' is a directory", target.display()),
                ));
            }
        }

        fs::create_dir_all(dest)?;

        let mut staged: Vec<Staged> = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            let target = dest.join(&artifact.path);
            let staging = sibling(&target, STAGING_SUFFIX);
            let written = target
                .parent()
                .map_or(Ok(()), |p| fs::create_dir_all(p))
                .and_then(|_| fs::write(&staging, &artifact.contents));
            if let Err(e) = written {
                let _ = fs::remove_file(&staging);
                rollback(&staged, 0, 0);
                return Err(e);
            }
            let backup = target.exists().then(|| sibling(&target, BACKUP_SUFFIX));
            staged.push(Staged { staging, target, backup });
        }

        for (i, entry) in staged.iter().enumerate() {
            if let Some(backup) = &entry.backup {
                if let Err(e) = fs::rename(&entry.target, backup) {
                    rollback(&staged, i, 0);
                    return Err(e);
                }
            }
        }

        for (i, entry) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(&entry.staging, &entry.target) {
                rollback(&staged, staged.len(), i);
                return Err(e);
            }
        }

        for entry in &staged {
            if let Some(backup) = &entry.backup {
                if let Err(e) = fs::remove_file(backup) {
                    tracing::warn!("could not remove backup {}: {}", backup.display(), e);
                }
            }
        }

        Ok(staged.into_iter().map(|entry| entry.target).collect())
    }
}

impl IntoIterator for ArtifactSet {
    type Item = Artifact;
    type IntoIter = std::vec::IntoIter<Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.into_iter()
    }
}

/// Reject absolute paths and `..` so a task cannot write outside its destination.
fn check_relative(path: &Path) -> io::Result<()> {
    let escapes = path.as_os_str().is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("artifact path '{}' escapes the destination", path.display()),
        ));
    }
    Ok(())
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    target.with_file_name(format!(".{}{}", name, suffix))
}

/// Undo a failed commit.
///
/// `backed_up` entries had their old output moved to the backup and
/// `placed` entries already had the new file renamed in.
fn rollback(staged: &[Staged], backed_up: usize, placed: usize) {
    for entry in &staged[..placed] {
        let _ = fs::remove_file(&entry.target);
    }
    for entry in &staged[..backed_up] {
        if let Some(backup) = &entry.backup {
            if let Err(e) = fs::rename(backup, &entry.target) {
                tracing::error!("could not restore {}: {}", entry.target.display(), e);
            }
        }
    }
    for entry in staged {
        let _ = fs::remove_file(&entry.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_push_replaces_same_path() {
        let mut set = ArtifactSet::new();
        set.push("app.js", b"one".to_vec());
        set.push("app.js", b"two".to_vec());
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(Path::new("app.js")).unwrap().contents, b"two");
    }

    #[test]
    fn test_commit_writes_nested_paths() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("img");

        let mut set = ArtifactSet::new();
        set.push("logo.png", vec![1, 2, 3]);
        set.push("icons/menu.png", vec![4, 5]);

        let outputs = set.commit(&dest).unwrap();
        assert_eq!(outputs, vec![dest.join("logo.png"), dest.join("icons/menu.png")]);
        assert_eq!(fs::read(dest.join("icons/menu.png")).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_commit_leaves_no_staging_files() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("css");

        let mut set = ArtifactSet::new();
        set.push("main.css", b"a{color:red}".to_vec());
        set.commit(&dest).unwrap();

        let names: Vec<_> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.css"]);
    }

    #[test]
    fn test_commit_rejects_escaping_paths_before_writing() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("js");

        let mut set = ArtifactSet::new();
        set.push("ok.js", b"1".to_vec());
        set.push("../css/evil.css", b"2".to_vec());

        let err = set.commit(&dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!dest.join("ok.js").exists());
        assert!(!temp.path().join("css/evil.css").exists());
    }

    #[test]
    fn test_commit_failure_keeps_previous_output() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("js");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("app.js"), b"old").unwrap();
        // A plain file where a directory is needed makes the second write fail
        fs::write(dest.join("blocked"), b"").unwrap();

        let mut set = ArtifactSet::new();
        set.push("app.js", b"new".to_vec());
        set.push("blocked/inner.js", b"x".to_vec());

        assert!(set.commit(&dest).is_err());
        assert_eq!(fs::read(dest.join("app.js")).unwrap(), b"old");
        assert!(!dest.join(".app.js.assetflow-tmp").exists());
    }

    #[test]
    fn test_commit_rejects_directory_target_before_writing() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("js");
        fs::create_dir_all(dest.join("b.js")).unwrap();
        fs::write(dest.join("b.js/keep.txt"), b"keep").unwrap();
        fs::write(dest.join("a.js"), b"old").unwrap();

        let mut set = ArtifactSet::new();
        set.push("a.js", b"new".to_vec());
        set.push("b.js", b"new".to_vec());

        assert!(set.commit(&dest).is_err());
        assert_eq!(fs::read(dest.join("a.js")).unwrap(), b"old");
        assert_eq!(fs::read(dest.join("b.js/keep.txt")).unwrap(), b"keep");
    }

    #[test]
    fn test_rollback_restores_outputs_already_replaced() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("js");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.js"), b"old").unwrap();
        fs::write(dest.join(".a.js.assetflow-tmp"), b"new").unwrap();
        fs::write(dest.join(".b.js.assetflow-tmp"), b"new").unwrap();

        let staged = vec![
            Staged {
                staging: dest.join(".a.js.assetflow-tmp"),
                target: dest.join("a.js"),
                backup: Some(dest.join(".a.js.assetflow-bak")),
            },
            Staged { staging: dest.join(".b.js.assetflow-tmp"), target: dest.join("b.js"), backup: None },
        ];
        // a.js was moved aside and replaced, then b.js failed to rename
        fs::rename(dest.join("a.js"), dest.join(".a.js.assetflow-bak")).unwrap();
        fs::rename(dest.join(".a.js.assetflow-tmp"), dest.join("a.js")).unwrap();

        rollback(&staged, 2, 1);

        assert_eq!(fs::read(dest.join("a.js")).unwrap(), b"old");
        assert!(!dest.join("b.js").exists());
        let mut names: Vec<_> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.js"]);
    }

    #[test]
    fn test_commit_replaces_existing_outputs_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("css");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("main.css"), b"old").unwrap();

        let mut set = ArtifactSet::new();
        set.push("main.css", b"new".to_vec());
        set.commit(&dest).unwrap();

        assert_eq!(fs::read(dest.join("main.css")).unwrap(), b"new");
        assert!(!dest.join(".main.css.assetflow-bak").exists());
    }
}
