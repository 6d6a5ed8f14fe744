//! Flat copy of vendor files.

use super::read_source;
use crate::build::{ArtifactSet, SourceSet, Task, TaskError, TaskSpec};
use std::path::PathBuf;

/// Copies every source to `dest/<file name>`.
pub struct CopyTask {
    spec: TaskSpec,
}

impl CopyTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self { spec }
    }
}

impl Task for CopyTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        let mut artifacts = ArtifactSet::new();
        for file in sources.iter() {
            let Some(file_name) = file.path.file_name() else {
                continue;
            };
            let target = PathBuf::from(file_name);
            if artifacts.get(&target).is_some() {
                tracing::warn!("'{}': {} overwrites an earlier file of the same name", self.spec.name, file.path.display());
            }
            artifacts.push(target, read_source(&self.spec.name, &file.path)?);
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{SourceFile, TaskErrorKind};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_copies_flat() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("node_modules/jquery/dist/jquery.min.js");
        let b = temp.path().join("node_modules/swiper/swiper-bundle.min.js");
        for p in [&a, &b] {
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, p.file_name().unwrap().to_string_lossy().as_bytes()).unwrap();
        }
        let set = SourceSet::new(vec![
            SourceFile::new(&a, "jquery.min.js"),
            SourceFile::new(&b, "swiper-bundle.min.js"),
        ]);

        let artifacts = CopyTask::new(TaskSpec::new("vendor", vec![], "vendor/js")).run(&set).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts.get(Path::new("jquery.min.js")).unwrap().contents, b"jquery.min.js");
    }

    #[test]
    fn test_unreadable_source_is_io_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone.js");
        let set = SourceSet::new(vec![SourceFile::new(&missing, "gone.js")]);

        let err = CopyTask::new(TaskSpec::new("vendor", vec![], "vendor")).run(&set).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Io);
        assert!(err.message.contains("gone.js"));
    }
}
