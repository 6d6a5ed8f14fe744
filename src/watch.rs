//! Watch mode for automatic task re-runs on file changes
//!
//! Watches the glob bases of every binding with a debounced `notify` watcher.
//! A changed path that matches a task's binding re-runs only that task; a
//! path that matches an owner-less binding only triggers a browser reload.
//!
//! Runs are coalesced per task: at most one run is in flight, and any number
//! of changes arriving during that run cause exactly one trailing run.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::build::{
    format_duration, glob_base, normalize, BuildContext, DiscoveryError, PatternSet, Reporter, TaskError,
};
use crate::config::FlowConfig;

/// How often the event loop checks for a stop request.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error during watch mode
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch {}: {1}", .0.display())]
    WatchPath(PathBuf, notify::Error),
    /// A binding contains an invalid glob
    #[error(transparent)]
    Pattern(#[from] DiscoveryError),
    /// A binding names a task that does not exist
    #[error("Watch binding references unknown task '{0}'")]
    UnknownTask(String),
}

/// Globs whose changes re-run a task, or only reload the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBinding {
    pub globs: Vec<String>,
    /// Task to re-run; `None` only signals a reload
    pub owner: Option<String>,
}

impl WatchBinding {
    pub fn task(owner: impl Into<String>, globs: Vec<String>) -> Self {
        Self { globs, owner: Some(owner.into()) }
    }

    pub fn reload(globs: Vec<String>) -> Self {
        Self { globs, owner: None }
    }
}

/// Bindings declared in `[watch]`.
///
/// Without explicit `[watch.bindings]`, every task is bound to its own sources.
pub fn bindings_from_config(config: &FlowConfig) -> Vec<WatchBinding> {
    let declared: BTreeMap<&String, &Vec<String>> = if config.watch.bindings.is_empty() {
        config.tasks.iter().map(|(name, task)| (name, &task.sources)).collect()
    } else {
        config.watch.bindings.iter().collect()
    };

    let mut bindings: Vec<WatchBinding> =
        declared.into_iter().map(|(name, globs)| WatchBinding::task(name.clone(), globs.clone())).collect();
    if !config.watch.reload.is_empty() {
        bindings.push(WatchBinding::reload(config.watch.reload.clone()));
    }
    bindings
}

/// Runs a task on behalf of the watcher.
pub trait TaskExecutor: Send + Sync {
    /// Run a task to completion.
    fn execute(&self, task: &str) -> Result<(), Vec<TaskError>>;

    /// Destination to signal after a successful run; `None` for unknown tasks.
    fn dest(&self, task: &str) -> Option<PathBuf>;
}

/// Executes tasks through a [`BuildContext`]'s scheduler.
pub struct ContextExecutor {
    context: Arc<BuildContext>,
    reporter: Arc<dyn Reporter>,
}

impl ContextExecutor {
    pub fn new(context: Arc<BuildContext>, reporter: Arc<dyn Reporter>) -> Self {
        Self { context, reporter }
    }
}

impl TaskExecutor for ContextExecutor {
    fn execute(&self, task: &str) -> Result<(), Vec<TaskError>> {
        let scheduler = self.context.scheduler(self.reporter.as_ref());
        match scheduler.run_task(task) {
            Ok(report) => report.into_result(),
            Err(e) => Err(vec![TaskError::new(task, crate::build::TaskErrorKind::Io, e.to_string())]),
        }
    }

    fn dest(&self, task: &str) -> Option<PathBuf> {
        self.context.registry().get(task).map(|t| t.dest().to_path_buf())
    }
}

/// Receives reload signals.
pub trait ReloadNotifier: Send + Sync {
    /// `path` is project-relative: a changed page, or a task's destination.
    fn reload(&self, path: &Path);
}

/// Discards reload signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReload;

impl ReloadNotifier for NoReload {
    fn reload(&self, _path: &Path) {}
}

/// Tracks failing tasks across runs for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    failing: HashSet<String>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run outcome; returns true when a previously failing task succeeded.
    pub fn update(&mut self, task: &str, success: bool) -> bool {
        if success {
            self.failing.remove(task)
        } else {
            self.failing.insert(task.to_string());
            false
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.failing.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.failing.len()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunState {
    running: bool,
    pending: bool,
}

/// Per-task "one in flight, one pending" bookkeeping.
#[derive(Debug, Default)]
pub struct Coalescer {
    state: Mutex<HashMap<String, RunState>>,
    idle: Condvar,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a run. Returns true if the caller should start one; otherwise
    /// a run is already in flight and a trailing run has been queued.
    pub fn request(&self, task: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entry(task.to_string()).or_default();
        if entry.running {
            entry.pending = true;
            false
        } else {
            entry.running = true;
            true
        }
    }

    /// Mark a run finished. Returns true if a trailing run should start now.
    pub fn finish(&self, task: &str, allow_trailing: bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entry(task.to_string()).or_default();
        if entry.pending && allow_trailing {
            entry.pending = false;
            true
        } else {
            *entry = RunState::default();
            self.idle.notify_all();
            false
        }
    }

    pub fn is_running(&self, task: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.get(task).is_some_and(|s| s.running)
    }

    /// Block until no task is running.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.values().any(|s| s.running) {
            state = self.idle.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }
}

struct CompiledBinding {
    patterns: PatternSet,
    owner: Option<String>,
}

/// Routes changed paths to task runs and reload signals.
///
/// Shared between the event thread and the per-task worker threads.
pub struct Dispatcher {
    bindings: Vec<CompiledBinding>,
    /// Destinations of bound tasks; changes there never trigger a run
    outputs: Vec<PathBuf>,
    executor: Arc<dyn TaskExecutor>,
    notifier: Arc<dyn ReloadNotifier>,
    coalescer: Coalescer,
    tracker: Mutex<ErrorTracker>,
    stopping: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        bindings: &[WatchBinding],
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn ReloadNotifier>,
    ) -> Result<Arc<Self>, WatchError> {
        let mut compiled = Vec::with_capacity(bindings.len());
        let mut outputs = Vec::new();
        for binding in bindings {
            if let Some(owner) = &binding.owner {
                let Some(dest) = executor.dest(owner) else {
                    return Err(WatchError::UnknownTask(owner.clone()));
                };
                outputs.push(normalize(&dest));
            }
            compiled.push(CompiledBinding { patterns: PatternSet::new(&binding.globs)?, owner: binding.owner.clone() });
        }

        Ok(Arc::new(Self {
            bindings: compiled,
            outputs,
            executor,
            notifier,
            coalescer: Coalescer::new(),
            tracker: Mutex::new(ErrorTracker::new()),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }))
    }

    /// Handle a batch of changed project-relative paths.
    pub fn on_change(self: &Arc<Self>, paths: &[PathBuf]) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        let mut tasks: Vec<&str> = Vec::new();
        for path in paths {
            let is_output = self.outputs.iter().any(|dest| path.starts_with(dest));
            for binding in self.bindings.iter().filter(|b| b.patterns.matches(path)) {
                match &binding.owner {
                    Some(_) if is_output => {
                        tracing::debug!("Ignoring task output: {}", path.display());
                    }
                    Some(task) => {
                        tracing::info!("Changed: {}", path.display());
                        if !tasks.contains(&task.as_str()) {
                            tasks.push(task);
                        }
                    }
                    None => {
                        tracing::info!("Reloading: {}", path.display());
                        self.notifier.reload(path);
                    }
                }
            }
        }

        for task in tasks {
            self.trigger(task);
        }
    }

    /// Request a run of `task`, coalescing with any run in flight.
    pub fn trigger(self: &Arc<Self>, task: &str) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        if !self.coalescer.request(task) {
            tracing::debug!("'{}' is running; queued one more run", task);
            return;
        }

        let this = Arc::clone(self);
        let task = task.to_string();
        let handle = thread::spawn(move || loop {
            this.run_once(&task);
            let allow_trailing = !this.stopping.load(Ordering::SeqCst);
            if !this.coalescer.finish(&task, allow_trailing) {
                break;
            }
        });

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }

    fn run_once(&self, task: &str) {
        let start = Instant::now();
        let result = self.executor.execute(task);
        let success = result.is_ok();

        let fixed = self.tracker.lock().unwrap_or_else(|e| e.into_inner()).update(task, success);
        if fixed {
            tracing::info!("Fixed: '{}'", task);
        }

        if success {
            tracing::info!("Rebuilt '{}' in {}", task, format_duration(start.elapsed()));
            if let Some(dest) = self.executor.dest(task) {
                self.notifier.reload(&dest);
            }
        }
    }

    /// Stop scheduling new runs and wait for in-flight runs to finish.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.coalescer.wait_idle();
        let workers: Vec<_> = self.workers.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }

    pub fn has_errors(&self) -> bool {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner()).has_errors()
    }
}

/// A directory to watch and whether to watch below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub dir: PathBuf,
    pub recursive: bool,
}

/// Directories to watch for a set of bindings.
///
/// Each glob is watched from its base; recursively when the rest of the
/// pattern spans directories. Missing directories are skipped.
pub fn watch_targets(root: &Path, bindings: &[WatchBinding]) -> Vec<WatchTarget> {
    let mut targets: BTreeMap<PathBuf, bool> = BTreeMap::new();
    for glob in bindings.iter().flat_map(|b| b.globs.iter()).filter(|g| !g.starts_with('!')) {
        let glob = glob.trim_start_matches("./");
        let base = glob_base(glob);
        let rest = glob.strip_prefix(&*base.to_string_lossy()).unwrap_or(glob).trim_start_matches('/');
        let recursive = rest.contains('/') || rest.contains("**");
        let dir = root.join(&base);
        if !dir.is_dir() {
            tracing::warn!("not watching {}: directory does not exist", dir.display());
            continue;
        }
        let entry = targets.entry(dir).or_insert(false);
        *entry |= recursive;
    }
    targets.into_iter().map(|(dir, recursive)| WatchTarget { dir, recursive }).collect()
}

/// A running watcher.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    dispatcher: Arc<Dispatcher>,
}

impl WatchHandle {
    /// Stop accepting events, then wait for in-flight runs without aborting them.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.dispatcher.stop();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

/// File watcher bound to a project root.
pub struct Watcher {
    root: PathBuf,
    bindings: Vec<WatchBinding>,
    debounce: Duration,
}

impl Watcher {
    pub fn new(root: impl Into<PathBuf>, bindings: Vec<WatchBinding>, debounce: Duration) -> Self {
        Self { root: root.into(), bindings, debounce }
    }

    /// Start watching on a background thread.
    pub fn start(
        self,
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn ReloadNotifier>,
    ) -> Result<WatchHandle, WatchError> {
        let dispatcher = Dispatcher::new(&self.bindings, executor, notifier)?;

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(self.debounce, tx).map_err(WatchError::WatcherInit)?;
        for target in watch_targets(&self.root, &self.bindings) {
            let mode = if target.recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
            debouncer.watcher().watch(&target.dir, mode).map_err(|e| WatchError::WatchPath(target.dir.clone(), e))?;
            tracing::debug!("watching {} ({:?})", target.dir.display(), mode);
        }

        // Events arrive with absolute, possibly canonicalized, paths
        let roots: Vec<PathBuf> = {
            let mut roots = vec![self.root.clone()];
            if let Ok(canonical) = self.root.canonicalize() {
                if canonical != self.root {
                    roots.push(canonical);
                }
            }
            roots
        };

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let _debouncer = debouncer;
                while !stop.load(Ordering::SeqCst) {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(events)) => {
                            let paths: Vec<PathBuf> = events
                                .iter()
                                .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                                .filter_map(|e| relative_to(&roots, &e.path))
                                .collect();
                            if !paths.is_empty() && !stop.load(Ordering::SeqCst) {
                                dispatcher.on_change(&paths);
                            }
                        }
                        Ok(Err(error)) => {
                            // Non-fatal, keep watching
                            tracing::warn!("watch error: {:?}", error);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        tracing::info!("Watching {} for changes...", self.root.display());
        Ok(WatchHandle { stop, thread: Some(thread), dispatcher })
    }
}

fn relative_to(roots: &[PathBuf], path: &Path) -> Option<PathBuf> {
    roots.iter().find_map(|root| path.strip_prefix(root).ok()).map(Path::to_path_buf)
}
