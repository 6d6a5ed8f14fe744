//! Entry-point execution.
//!
//! Evaluates an entry point's tree depth-first:
//!
//! - **Sequential** children run strictly in order. A failure stops the rest
//!   of that group; the tasks it would have run are recorded as skipped.
//! - **Parallel** children run concurrently on scoped threads. The group
//!   waits for every child and collects every failure.
//! - **Entry references** are evaluated in place.
//!
//! Every failure is handed to the [`Reporter`] at the task boundary, as soon
//! as it happens, and never cancels sibling tasks.

use crate::build::{
    format_duration, Node, Reporter, RunReport, TaskError, TaskGraph, TaskRegistry, TaskResult,
    TaskRunner,
};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

/// Error selecting what to run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown entry point '{0}'")]
    UnknownEntryPoint(String),
    #[error("Unknown task or entry point '{0}'")]
    UnknownTarget(String),
}

/// Runs entry points and single tasks.
pub struct Scheduler<'a> {
    registry: &'a TaskRegistry,
    graph: &'a TaskGraph,
    runner: TaskRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        registry: &'a TaskRegistry,
        graph: &'a TaskGraph,
        root: impl Into<PathBuf>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self { registry, graph, runner: TaskRunner::new(root), reporter }
    }

    /// Run an entry point to completion.
    pub fn run_entry_point(&self, name: &str) -> Result<RunReport, SchedulerError> {
        let node = self.graph.get(name).ok_or_else(|| SchedulerError::UnknownEntryPoint(name.to_string()))?;
        let start = Instant::now();
        let report = self.eval(node);
        Ok(report.with_duration(start.elapsed()))
    }

    /// Run one task by name.
    pub fn run_task(&self, name: &str) -> Result<RunReport, SchedulerError> {
        if !self.registry.contains(name) {
            return Err(SchedulerError::UnknownTarget(name.to_string()));
        }
        let start = Instant::now();
        let report = self.eval(&Node::Task(name.to_string()));
        Ok(report.with_duration(start.elapsed()))
    }

    /// Run several entry points or tasks in order, stopping at the first failure.
    ///
    /// Entry point names win over task names.
    pub fn run_targets(&self, names: &[String]) -> Result<RunReport, SchedulerError> {
        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            if self.graph.contains(name) {
                nodes.push(Node::EntryRef(name.clone()));
            } else if self.registry.contains(name) {
                nodes.push(Node::Task(name.clone()));
            } else {
                return Err(SchedulerError::UnknownTarget(name.clone()));
            }
        }
        let start = Instant::now();
        let report = self.eval(&Node::Sequential(nodes));
        Ok(report.with_duration(start.elapsed()))
    }

    fn eval(&self, node: &Node) -> RunReport {
        match node {
            Node::Task(name) => self.run_one(name),
            Node::EntryRef(entry) => match self.graph.get(entry) {
                Some(node) => self.eval(node),
                None => RunReport::new(),
            },
            Node::Sequential(children) => self.eval_sequential(children),
            Node::Parallel(children) => self.eval_parallel(children),
        }
    }

    fn eval_sequential(&self, children: &[Node]) -> RunReport {
        let mut report = RunReport::new();
        let mut iter = children.iter();

        for child in iter.by_ref() {
            let child_report = self.eval(child);
            let failed = !child_report.is_success();
            report.merge(child_report);
            if failed {
                break;
            }
        }

        for skipped in iter {
            for task in self.graph.node_tasks(skipped) {
                tracing::debug!("Skipping '{}'", task);
                report.add_result(TaskResult::skipped(task));
            }
        }

        report
    }

    fn eval_parallel(&self, children: &[Node]) -> RunReport {
        if children.len() == 1 {
            return self.eval(&children[0]);
        }

        let reports: Vec<RunReport> = thread::scope(|s| {
            let handles: Vec<_> = children.iter().map(|child| s.spawn(move || self.eval(child))).collect();
            handles
                .into_iter()
                .zip(children)
                .map(|(handle, child)| {
                    // Tasks are already unwind-guarded; this only catches scheduler bugs
                    handle.join().unwrap_or_else(|_| {
                        let mut report = RunReport::new();
                        for task in self.graph.node_tasks(child) {
                            let error = TaskError::panicked(&task, "worker thread panicked");
                            self.reporter.report(&error);
                            report.add_result(TaskResult::failed(&task, &error, Default::default()));
                            report.add_error(error);
                        }
                        report
                    })
                })
                .collect()
        });

        let mut report = RunReport::new();
        for child_report in reports {
            report.merge(child_report);
        }
        report
    }

    fn run_one(&self, name: &str) -> RunReport {
        let mut report = RunReport::new();
        let Some(task) = self.registry.get(name) else {
            // Graph validation makes this unreachable for entry points
            let error = TaskError::new(name, crate::build::TaskErrorKind::Io, "task is not registered");
            self.reporter.report(&error);
            report.add_result(TaskResult::failed(name, &error, Default::default()));
            report.add_error(error);
            return report;
        };

        tracing::info!("Starting '{}'...", name);
        let start = Instant::now();
        match self.runner.execute(task.as_ref()) {
            Ok(outputs) => {
                let duration = start.elapsed();
                tracing::info!("Finished '{}' after {}", name, format_duration(duration));
                report.add_result(TaskResult::success(name, outputs, duration));
            }
            Err(error) => {
                let duration = start.elapsed();
                self.reporter.report(&error);
                report.add_result(TaskResult::failed(name, &error, duration));
                report.add_error(error);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::testing::NoopTask;
    use crate::build::{CollectingReporter, TaskErrorKind, TaskStatus};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        registry: TaskRegistry,
        graph: TaskGraph,
        reporter: CollectingReporter,
    }

    impl Fixture {
        fn new(tasks: Vec<NoopTask>, entries: Vec<(&str, Node)>) -> Self {
            let mut registry = TaskRegistry::new();
            for task in tasks {
                registry.register(Arc::new(task)).unwrap();
            }
            let entries: BTreeMap<String, Node> = entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
            let graph = TaskGraph::new(entries, &registry).unwrap();
            Self { temp: TempDir::new().unwrap(), registry, graph, reporter: CollectingReporter::new() }
        }

        fn scheduler(&self) -> Scheduler<'_> {
            Scheduler::new(&self.registry, &self.graph, self.temp.path(), &self.reporter)
        }
    }

    fn task(name: &str) -> Node {
        Node::Task(name.to_string())
    }

    #[test]
    fn test_parallel_failure_does_not_cancel_sibling() {
        let fx = Fixture::new(
            vec![NoopTask::failing("css", "css"), NoopTask::new("js", "js").with_delay(Duration::from_millis(30))],
            vec![("default", Node::Parallel(vec![task("css"), task("js")]))],
        );

        let report = fx.scheduler().run_entry_point("default").unwrap();

        assert!(fx.temp.path().join("js/js.txt").exists());
        assert_eq!(report.get("js").unwrap().status, TaskStatus::Success);
        assert_eq!(fx.reporter.failed_tasks(), vec!["css"]);
        let errors = report.into_result().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].task, "css");
    }

    #[test]
    fn test_parallel_collects_every_failure() {
        let fx = Fixture::new(
            vec![NoopTask::failing("css", "css"), NoopTask::failing("js", "js"), NoopTask::new("vendor", "vendor")],
            vec![("default", Node::Parallel(vec![task("css"), task("js"), task("vendor")]))],
        );
        let report = fx.scheduler().run_entry_point("default").unwrap();
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.success_count(), 1);
    }

    #[test]
    fn test_sequential_failure_skips_remaining_siblings() {
        let fx = Fixture::new(
            vec![NoopTask::failing("css", "css"), NoopTask::new("js", "js"), NoopTask::new("vendor", "vendor")],
            vec![("default", Node::Sequential(vec![task("css"), Node::Parallel(vec![task("js"), task("vendor")])]))],
        );

        let report = fx.scheduler().run_entry_point("default").unwrap();

        assert_eq!(report.get("js").unwrap().status, TaskStatus::Skipped);
        assert_eq!(report.get("vendor").unwrap().status, TaskStatus::Skipped);
        assert!(!fx.temp.path().join("js").exists());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_sequential_failure_only_aborts_its_own_group() {
        let fx = Fixture::new(
            vec![NoopTask::failing("css", "css"), NoopTask::new("js", "js"), NoopTask::new("images", "img")],
            vec![(
                "build",
                Node::Parallel(vec![Node::Sequential(vec![task("css"), task("js")]), task("images")]),
            )],
        );

        let report = fx.scheduler().run_entry_point("build").unwrap();
        assert_eq!(report.get("js").unwrap().status, TaskStatus::Skipped);
        assert_eq!(report.get("images").unwrap().status, TaskStatus::Success);
    }

    #[test]
    fn test_sequential_order() {
        let fx = Fixture::new(
            vec![NoopTask::new("a", "a").with_delay(Duration::from_millis(20)), NoopTask::new("b", "b")],
            vec![("default", Node::Sequential(vec![task("a"), task("b")]))],
        );
        let report = fx.scheduler().run_entry_point("default").unwrap();
        let order: Vec<_> = report.tasks.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_entry_ref_is_evaluated_inline() {
        let fx = Fixture::new(
            vec![NoopTask::new("css", "css"), NoopTask::new("images", "img")],
            vec![
                ("default", task("css")),
                ("build", Node::Parallel(vec![Node::EntryRef("default".into()), task("images")])),
            ],
        );
        let report = fx.scheduler().run_entry_point("build").unwrap();
        assert_eq!(report.success_count(), 2);
        assert!(fx.temp.path().join("css/css.txt").exists());
    }

    #[test]
    fn test_panicking_task_is_reported() {
        let fx = Fixture::new(
            vec![NoopTask::panicking("js", "js"), NoopTask::new("css", "css")],
            vec![("default", Node::Parallel(vec![task("js"), task("css")]))],
        );
        let report = fx.scheduler().run_entry_point("default").unwrap();
        assert_eq!(report.errors[0].kind, TaskErrorKind::Panicked);
        assert_eq!(report.get("css").unwrap().status, TaskStatus::Success);
    }

    #[test]
    fn test_unknown_entry_point() {
        let fx = Fixture::new(vec![], vec![]);
        assert_eq!(
            fx.scheduler().run_entry_point("deploy").unwrap_err(),
            SchedulerError::UnknownEntryPoint("deploy".into())
        );
    }

    #[test]
    fn test_run_targets_mixes_entries_and_tasks() {
        let fx = Fixture::new(
            vec![NoopTask::new("css", "css"), NoopTask::new("js", "js")],
            vec![("styles", task("css"))],
        );
        let report = fx.scheduler().run_targets(&["styles".to_string(), "js".to_string()]).unwrap();
        assert_eq!(report.success_count(), 2);

        let err = fx.scheduler().run_targets(&["nope".to_string()]).unwrap_err();
        assert_eq!(err, SchedulerError::UnknownTarget("nope".into()));
    }

    #[test]
    fn test_run_task() {
        let fx = Fixture::new(vec![NoopTask::new("css", "css")], vec![]);
        let report = fx.scheduler().run_task("css").unwrap();
        assert!(report.is_success());
        assert!(fx.scheduler().run_task("js").is_err());
    }
}
