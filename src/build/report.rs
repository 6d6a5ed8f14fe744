//! Error reporting at the task boundary.

use crate::build::{TaskError, TaskErrorKind};
use std::sync::Mutex;

/// Receives every task failure as it happens.
///
/// Reporting never cancels sibling tasks and must not panic.
pub trait Reporter: Send + Sync {
    fn report(&self, error: &TaskError);
}

/// Logs failures through `tracing` with the tool's output verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, error: &TaskError) {
        match error.kind {
            TaskErrorKind::Panicked => {
                tracing::error!(task = %error.task, "'{}' panicked: {}", error.task, error.message)
            }
            _ => tracing::error!(task = %error.task, kind = %error.kind, "'{}' failed:\n{}", error.task, error.message),
        }
    }
}

/// Keeps reported errors in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    errors: Mutex<Vec<(String, TaskErrorKind, String)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(task, kind, message)` for every report so far.
    pub fn reported(&self) -> Vec<(String, TaskErrorKind, String)> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Names of tasks that failed, in report order.
    pub fn failed_tasks(&self) -> Vec<String> {
        self.reported().into_iter().map(|(task, _, _)| task).collect()
    }

    pub fn clear(&self) {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, error: &TaskError) {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).push((
            error.task.clone(),
            error.kind,
            error.message.clone(),
        ));
    }
}
