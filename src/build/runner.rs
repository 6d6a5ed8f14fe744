//! Single-task execution: resolve sources, run, commit.

use crate::build::{normalize, resolve_sources, DiscoveryError, Task, TaskError, TaskErrorKind};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Runs one task against the project root.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    root: PathBuf,
}

impl TaskRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the task's sources, run it and commit its artifacts.
    ///
    /// A panic inside the task becomes a [`TaskErrorKind::Panicked`] error.
    /// On failure nothing below the task's destination changes.
    pub fn execute(&self, task: &dyn Task) -> Result<Vec<PathBuf>, TaskError> {
        let name = task.name();

        let sources = resolve_sources(&self.root, &task.spec().sources).map_err(|e| match e {
            DiscoveryError::MissingFile(path) => TaskError::io(
                name,
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            ),
            other => TaskError::new(name, TaskErrorKind::Io, other.to_string()).with_cause(other),
        })?;
        tracing::debug!("'{}': {} source file(s)", name, sources.len());

        let artifacts = panic::catch_unwind(AssertUnwindSafe(|| task.run(&sources)))
            .map_err(|payload| TaskError::panicked(name, panic_message(payload.as_ref())))??;

        let dest = self.root.join(normalize(task.dest()));
        artifacts.commit(&dest).map_err(|e| TaskError::io(name, &dest, e))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::testing::NoopTask;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_execute_commits_artifacts() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("assets/js")).unwrap();
        fs::write(temp.path().join("assets/js/app.js"), "x").unwrap();

        let task = NoopTask::new("js", "js").with_sources(&["assets/js/*.js"]);
        let outputs = TaskRunner::new(temp.path()).execute(&task).unwrap();

        assert_eq!(outputs, vec![temp.path().join("js/js.txt")]);
        assert_eq!(fs::read_to_string(&outputs[0]).unwrap(), "app.js");
    }

    #[test]
    fn test_missing_literal_source_is_io_error() {
        let temp = TempDir::new().unwrap();
        let task = NoopTask::new("vendor", "vendor").with_sources(&["node_modules/jquery/dist/jquery.min.js"]);

        let err = TaskRunner::new(temp.path()).execute(&task).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Io);
        assert!(err.message.contains("jquery.min.js"));
        assert_eq!(task.run_count(), 0);
    }

    #[test]
    fn test_failure_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let task = NoopTask::failing("css", "css");

        let err = TaskRunner::new(temp.path()).execute(&task).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Compile);
        assert!(!temp.path().join("css").exists());
    }

    #[test]
    fn test_panic_becomes_task_error() {
        let temp = TempDir::new().unwrap();
        let task = NoopTask::panicking("js", "js");

        let err = TaskRunner::new(temp.path()).execute(&task).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Panicked);
        assert_eq!(err.message, "js exploded");
    }
}
