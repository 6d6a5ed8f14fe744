//! Entry-point graphs.
//!
//! An entry point is a tree of task names composed with parallel and
//! sequential groups. Trees may reference other entry points with `@name`.
//! The whole graph is validated once, at construction: unknown names,
//! reference cycles and a task appearing in two branches of one parallel
//! group are all rejected before anything runs.

use crate::build::TaskRegistry;
use crate::config::{FlowConfig, NodeConfig};
use std::collections::{BTreeMap, HashSet};

/// A node of an entry-point tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Run a single task
    Task(String),
    /// Run all children concurrently
    Parallel(Vec<Node>),
    /// Run children strictly in order
    Sequential(Vec<Node>),
    /// Evaluate another entry point's tree in place
    EntryRef(String),
}

impl Node {
    /// Convert a configuration node. Names starting with `@` are entry references.
    pub fn from_config(config: &NodeConfig) -> Self {
        match config {
            NodeConfig::Name(name) => match name.strip_prefix('@') {
                Some(entry) => Node::EntryRef(entry.to_string()),
                None => Node::Task(name.clone()),
            },
            NodeConfig::Parallel { parallel } => {
                Node::Parallel(parallel.iter().map(Node::from_config).collect())
            }
            NodeConfig::Series { series } => {
                Node::Sequential(series.iter().map(Node::from_config).collect())
            }
        }
    }
}

/// Error raised while validating a task graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Entry point '{entry}' references unknown task '{task}'")]
    UnknownTask { entry: String, task: String },
    #[error("Entry point '{entry}' references unknown entry point '@{target}'")]
    UnknownEntryPoint { entry: String, target: String },
    #[error("Circular entry point reference: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("Task '{task}' appears in more than one branch of a parallel group in '{entry}'")]
    ParallelConflict { entry: String, task: String },
}

/// Validated mapping of entry-point names to trees.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    entries: BTreeMap<String, Node>,
}

impl TaskGraph {
    /// Validate and build a graph against the registered tasks.
    pub fn new(entries: BTreeMap<String, Node>, registry: &TaskRegistry) -> Result<Self, GraphError> {
        let graph = Self { entries };

        for (entry, node) in &graph.entries {
            graph.check_names(entry, node, registry)?;
        }

        let mut visited = HashSet::new();
        for entry in graph.entries.keys() {
            let mut path = Vec::new();
            graph.visit_entry(entry, &mut visited, &mut path)?;
        }

        for (entry, node) in &graph.entries {
            graph.check_parallel(entry, node)?;
        }

        Ok(graph)
    }

    /// Build the graph declared in `[entry_points]`.
    pub fn from_config(config: &FlowConfig, registry: &TaskRegistry) -> Result<Self, GraphError> {
        let entries = config
            .entry_points
            .iter()
            .map(|(name, node)| (name.clone(), Node::from_config(node)))
            .collect();
        Self::new(entries, registry)
    }

    pub fn get(&self, entry: &str) -> Option<&Node> {
        self.entries.get(entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Every task an entry point runs, in first-appearance order.
    pub fn tasks_for(&self, entry: &str) -> Vec<String> {
        match self.entries.get(entry) {
            Some(node) => self.node_tasks(node),
            None => Vec::new(),
        }
    }

    /// Every task below a node, with entry references expanded.
    pub fn node_tasks(&self, node: &Node) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_tasks(node, &mut out);
        let mut seen = HashSet::new();
        out.retain(|t| seen.insert(t.clone()));
        out
    }

    fn collect_tasks(&self, node: &Node, out: &mut Vec<String>) {
        match node {
            Node::Task(name) => out.push(name.clone()),
            Node::Parallel(children) | Node::Sequential(children) => {
                for child in children {
                    self.collect_tasks(child, out);
                }
            }
            Node::EntryRef(target) => {
                if let Some(node) = self.entries.get(target) {
                    self.collect_tasks(node, out);
                }
            }
        }
    }

    fn check_names(&self, entry: &str, node: &Node, registry: &TaskRegistry) -> Result<(), GraphError> {
        match node {
            Node::Task(task) if !registry.contains(task) => {
                Err(GraphError::UnknownTask { entry: entry.to_string(), task: task.clone() })
            }
            Node::EntryRef(target) if !self.entries.contains_key(target) => {
                Err(GraphError::UnknownEntryPoint { entry: entry.to_string(), target: target.clone() })
            }
            Node::Parallel(children) | Node::Sequential(children) => {
                children.iter().try_for_each(|c| self.check_names(entry, c, registry))
            }
            _ => Ok(()),
        }
    }

    /// Depth-first walk over entry references; `path` holds the entries
    /// currently being visited.
    fn visit_entry(
        &self,
        entry: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(entry) {
            return Ok(());
        }

        if let Some(start) = path.iter().position(|e| e == entry) {
            let mut cycle = path[start..].to_vec();
            cycle.push(entry.to_string());
            return Err(GraphError::Cycle(cycle));
        }

        path.push(entry.to_string());

        let mut refs = Vec::new();
        if let Some(node) = self.entries.get(entry) {
            entry_refs(node, &mut refs);
        }
        for target in refs {
            self.visit_entry(&target, visited, path)?;
        }

        path.pop();
        visited.insert(entry.to_string());
        Ok(())
    }

    fn check_parallel(&self, entry: &str, node: &Node) -> Result<(), GraphError> {
        match node {
            Node::Parallel(children) => {
                let mut claimed: HashSet<String> = HashSet::new();
                for child in children {
                    for task in self.node_tasks(child) {
                        if !claimed.insert(task.clone()) {
                            return Err(GraphError::ParallelConflict { entry: entry.to_string(), task });
                        }
                    }
                    self.check_parallel(entry, child)?;
                }
                Ok(())
            }
            Node::Sequential(children) => {
                children.iter().try_for_each(|c| self.check_parallel(entry, c))
            }
            Node::Task(_) | Node::EntryRef(_) => Ok(()),
        }
    }
}

fn entry_refs(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::EntryRef(target) => out.push(target.clone()),
        Node::Parallel(children) | Node::Sequential(children) => {
            for child in children {
                entry_refs(child, out);
            }
        }
        Node::Task(_) => {}
    }
}
