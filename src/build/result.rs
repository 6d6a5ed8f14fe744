//! Run result types.
//!
//! Contains types for representing the outcome of an entry-point run.

use crate::build::TaskError;
use std::path::PathBuf;
use std::time::Duration;

/// Format a duration for log output.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Status of a single task within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task ran and its artifacts were committed
    Success,
    /// Task never started because an earlier sibling in a series failed
    Skipped,
    /// Task failed with error
    Failed(String),
}

impl TaskStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed(_))
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Skipped => write!(f, "skipped"),
            TaskStatus::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task name
    pub task: String,
    pub status: TaskStatus,
    /// Files written below the task's destination
    pub outputs: Vec<PathBuf>,
    pub duration: Duration,
}

impl TaskResult {
    /// Create a successful result.
    pub fn success(task: impl Into<String>, outputs: Vec<PathBuf>, duration: Duration) -> Self {
        Self { task: task.into(), status: TaskStatus::Success, outputs, duration }
    }

    /// Create a skipped result.
    pub fn skipped(task: impl Into<String>) -> Self {
        Self { task: task.into(), status: TaskStatus::Skipped, outputs: vec![], duration: Duration::ZERO }
    }

    /// Create a failed result.
    pub fn failed(task: impl Into<String>, error: &TaskError, duration: Duration) -> Self {
        Self {
            task: task.into(),
            status: TaskStatus::Failed(error.message.clone()),
            outputs: vec![],
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of running an entry point (or a single task).
#[derive(Debug, Default)]
pub struct RunReport {
    /// Results in completion order within each group
    pub tasks: Vec<TaskResult>,
    /// Every failure, in the order it was reported
    pub errors: Vec<TaskError>,
    /// Total run duration
    pub total_duration: Duration,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: TaskResult) {
        self.tasks.push(result);
    }

    pub fn add_error(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    /// Append another report's results and errors.
    pub fn merge(&mut self, other: RunReport) {
        self.tasks.extend(other.tasks);
        self.errors.extend(other.errors);
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    pub fn success_count(&self) -> usize {
        self.tasks.iter().filter(|r| matches!(r.status, TaskStatus::Success)).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.tasks.iter().filter(|r| matches!(r.status, TaskStatus::Skipped)).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tasks.iter().filter(|r| r.status.is_failure()).count()
    }

    /// No task failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Result for a task by name (the first, if it ran more than once).
    pub fn get(&self, task: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|r| r.task == task)
    }

    pub fn all_outputs(&self) -> Vec<&PathBuf> {
        self.tasks.iter().flat_map(|r| r.outputs.iter()).collect()
    }

    pub fn failures(&self) -> Vec<&TaskResult> {
        self.tasks.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// `Ok(())` when every task succeeded, otherwise all collected errors.
    pub fn into_result(self) -> Result<(), Vec<TaskError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Format a summary of the run.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let skipped = self.skipped_count();
        let failed = self.failed_count();
        let total = self.tasks.len();

        if failed > 0 {
            lines.push(format!(
                "Run failed: {} succeeded, {} skipped, {} failed ({} total)",
                success, skipped, failed, total
            ));
            for task in self.failures() {
                let first_line = match &task.status {
                    TaskStatus::Failed(msg) => msg.lines().next().unwrap_or_default().to_string(),
                    other => other.to_string(),
                };
                lines.push(format!("  - {}: {}", task.task, first_line));
            }
        } else {
            lines.push(format!(
                "Run succeeded: {} tasks, {} outputs in {:?}",
                success,
                self.all_outputs().len(),
                self.total_duration
            ));
        }

        lines.join("\n")
    }
}
