//! Task definitions.
//!
//! A task is a named build step: it reads an immutable [`SourceSet`] and
//! produces an [`ArtifactSet`] destined for its own `dest` directory.

use crate::build::{ArtifactSet, SourceSet};
use std::path::{Path, PathBuf};

/// Declared inputs and outputs of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Unique name within the registry
    pub name: String,
    /// Glob patterns, relative to the project root
    pub sources: Vec<String>,
    /// Destination directory, relative to the project root
    pub dest: PathBuf,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, sources: Vec<String>, dest: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), sources, dest: dest.into() }
    }
}

/// A unit of work in the pipeline.
///
/// Implementations must be stateless between runs: identical sources yield
/// byte-identical artifacts. A task only reads its sources; writing the
/// artifacts is the runner's job.
pub trait Task: Send + Sync {
    /// Declared name, sources and destination.
    fn spec(&self) -> &TaskSpec;

    /// Produce the artifacts for the given sources.
    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError>;

    fn name(&self) -> &str {
        &self.spec().name
    }

    fn dest(&self) -> &Path {
        &self.spec().dest
    }
}

/// Category of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskErrorKind {
    /// The external tool rejected its input
    Compile,
    /// Filesystem read or write failure
    Io,
    /// A remote service (e.g. image compression) failed
    Service,
    /// The task panicked
    Panicked,
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskErrorKind::Compile => write!(f, "compile error"),
            TaskErrorKind::Io => write!(f, "io error"),
            TaskErrorKind::Service => write!(f, "service error"),
            TaskErrorKind::Panicked => write!(f, "panic"),
        }
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failed task run.
///
/// `message` carries the underlying tool's output verbatim.
#[derive(Debug, thiserror::Error)]
#[error("'{task}' failed ({kind}): {message}")]
pub struct TaskError {
    /// Name of the failing task
    pub task: String,
    /// Failure category
    pub kind: TaskErrorKind,
    /// Human-readable message
    pub message: String,
    /// Underlying error, when there is one
    #[source]
    pub cause: Option<Cause>,
}

impl TaskError {
    pub fn new(task: impl Into<String>, kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self { task: task.into(), kind, message: message.into(), cause: None }
    }

    /// The external tool rejected the input.
    pub fn compile(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(task, TaskErrorKind::Compile, message)
    }

    /// A filesystem operation on `path` failed.
    pub fn io(task: impl Into<String>, path: &Path, err: std::io::Error) -> Self {
        Self {
            task: task.into(),
            kind: TaskErrorKind::Io,
            message: format!("{}: {}", path.display(), err),
            cause: Some(Box::new(err)),
        }
    }

    /// A remote service failed.
    pub fn service(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(task, TaskErrorKind::Service, message)
    }

    /// The task panicked while running.
    pub fn panicked(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(task, TaskErrorKind::Panicked, message)
    }

    /// Attach the underlying error.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_task_error_display_includes_task_and_message() {
        let err = TaskError::compile("css", "Error: expected \";\".\n  ╷\n3 │ a { b: c }");
        let text = err.to_string();
        assert!(text.starts_with("'css' failed (compile error)"));
        assert!(text.contains("expected \";\""));
    }

    #[test]
    fn test_task_error_io_keeps_cause() {
        let err = TaskError::io(
            "vendor",
            Path::new("node_modules/jquery/dist/jquery.min.js"),
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(err.kind, TaskErrorKind::Io);
        assert!(err.message.contains("jquery.min.js"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_task_spec_new() {
        let spec = TaskSpec::new("js", vec!["assets/js/*.js".to_string()], "js");
        assert_eq!(spec.name, "js");
        assert_eq!(spec.dest, PathBuf::from("js"));
    }
}
