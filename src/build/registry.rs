//! Task registry.
//!
//! Maps task names to task implementations. Registration rejects duplicate
//! names and destinations that overlap another task's destination, so no
//! two concurrently running tasks can write to the same files.

use crate::build::discovery::normalize;
use crate::build::Task;
use crate::config::{Environment, FlowConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error raised while registering tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Task '{0}' is already registered")]
    DuplicateName(String),
    #[error(
        "Task '{task}' writes to '{}', which overlaps '{}' owned by task '{other}'",
        .dest.display(),
        .other_dest.display()
    )]
    OverlappingDest { task: String, dest: PathBuf, other: String, other_dest: PathBuf },
    #[error("Task '{0}' has an invalid destination: {1}")]
    InvalidDest(String, String),
}

/// Registered tasks by name.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").field("tasks", &self.tasks.keys().collect::<Vec<_>>()).finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every task declared in `[tasks]`.
    ///
    /// Credentials are taken from `env`; tasks whose credentials are unset
    /// fail when run, so check [`Environment::require`] before running them.
    pub fn from_config(config: &FlowConfig, root: &Path, env: &Environment) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (name, task_config) in &config.tasks {
            registry.register(crate::tasks::create_task(name, task_config, root, env))?;
        }
        Ok(registry)
    }

    /// Register a task.
    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<(), RegistryError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let dest = normalize(task.dest());
        if dest.as_os_str().is_empty() || dest.is_absolute() || dest.starts_with("..") {
            return Err(RegistryError::InvalidDest(
                name,
                format!("'{}' must be a directory inside the project", task.dest().display()),
            ));
        }

        for (other, existing) in &self.tasks {
            let other_dest = normalize(existing.dest());
            if dest.starts_with(&other_dest) || other_dest.starts_with(&dest) {
                return Err(RegistryError::OverlappingDest {
                    task: name,
                    dest: task.dest().to_path_buf(),
                    other: other.clone(),
                    other_dest: existing.dest().to_path_buf(),
                });
            }
        }

        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Task>)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
