//! Test doubles shared by the build module's unit tests.

use crate::build::{ArtifactSet, SourceSet, Task, TaskError, TaskSpec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Writes one `<name>.txt` artifact listing its sources, or fails on demand.
pub struct NoopTask {
    spec: TaskSpec,
    fail: bool,
    panic: bool,
    delay: Duration,
    pub runs: AtomicUsize,
}

impl NoopTask {
    pub fn new(name: &str, dest: &str) -> Self {
        Self {
            spec: TaskSpec::new(name, vec![], dest),
            fail: false,
            panic: false,
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, dest: &str) -> Self {
        Self { fail: true, ..Self::new(name, dest) }
    }

    pub fn panicking(name: &str, dest: &str) -> Self {
        Self { panic: true, ..Self::new(name, dest) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_sources(mut self, sources: &[&str]) -> Self {
        self.spec.sources = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Task for NoopTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if self.panic {
            panic!("{} exploded", self.spec.name);
        }
        if self.fail {
            return Err(TaskError::compile(&self.spec.name, format!("{} is broken", self.spec.name)));
        }
        let listing: Vec<String> =
            sources.iter().map(|f| f.relative.to_string_lossy().into_owned()).collect();
        let mut artifacts = ArtifactSet::new();
        artifacts.push(format!("{}.txt", self.spec.name), listing.join("\n").into_bytes());
        Ok(artifacts)
    }
}
