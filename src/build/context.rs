//! Build context containing the configuration, tasks and entry points of a project.

use crate::build::{GraphError, RegistryError, Reporter, Scheduler, TaskGraph, TaskRegistry};
use crate::config::{ConfigError, Environment, FlowConfig};
use std::path::{Path, PathBuf};

/// Error assembling a build context.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Everything needed to run a project's entry points.
///
/// The registry and graph are validated once here, so a context that
/// exists can always be scheduled.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: FlowConfig,
    /// Project root directory (where assetflow.toml is located)
    project_root: PathBuf,
    /// Credentials read at startup
    env: Environment,
    registry: TaskRegistry,
    graph: TaskGraph,
}

impl BuildContext {
    /// Create a new build context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    /// - `env` - Environment-provided credentials
    pub fn new(config: FlowConfig, project_root: PathBuf, env: Environment) -> Result<Self, BuildError> {
        let registry = TaskRegistry::from_config(&config, &project_root, &env)?;
        let graph = TaskGraph::from_config(&config, &registry)?;
        Ok(Self { config, project_root, env, registry, graph })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// A scheduler over this context's tasks.
    pub fn scheduler<'a>(&'a self, reporter: &'a dyn Reporter) -> Scheduler<'a> {
        Scheduler::new(&self.registry, &self.graph, self.project_root.clone(), reporter)
    }

    /// Task names selected by entry points or task names, entry points expanded.
    pub fn selected_tasks(&self, names: &[String]) -> Vec<String> {
        let mut tasks = Vec::new();
        for name in names {
            if self.graph.contains(name) {
                tasks.extend(self.graph.tasks_for(name));
            } else if self.registry.contains(name) {
                tasks.push(name.clone());
            }
        }
        let mut seen = std::collections::HashSet::new();
        tasks.retain(|t| seen.insert(t.clone()));
        tasks
    }

    /// Whether any selected task calls the image optimization service.
    pub fn needs_image_service(&self, names: &[String]) -> bool {
        self.selected_tasks(names)
            .iter()
            .filter_map(|t| self.config.tasks.get(t))
            .any(|t| t.kind.needs_image_service())
    }

    /// Fail with [`ConfigError::MissingEnv`] unless every credential the
    /// selection needs is set.
    pub fn require_env(&self, names: &[String], deploying: bool) -> Result<(), ConfigError> {
        self.env.require(self.needs_image_service(names), deploying)
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::loader::resolve_path(&self.project_root, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::config::NodeConfig;

    fn context() -> BuildContext {
        BuildContext::new(default_config(), PathBuf::from("/project"), Environment::default()).unwrap()
    }

    #[test]
    fn test_build_context_new() {
        let ctx = context();
        assert_eq!(ctx.project_root(), Path::new("/project"));
        assert_eq!(ctx.registry().len(), 5);
        assert!(ctx.graph().contains("default"));
        assert!(ctx.graph().contains("build"));
    }

    #[test]
    fn test_selected_tasks_expands_entries() {
        let ctx = context();
        assert_eq!(ctx.selected_tasks(&["default".into()]), vec!["css", "js", "vendor"]);
        assert_eq!(ctx.selected_tasks(&["default".into(), "css".into(), "webp".into()]), vec!["css", "js", "vendor", "webp"]);
    }

    #[test]
    fn test_require_env_only_for_selected_tasks() {
        let ctx = context();
        assert!(ctx.require_env(&["default".into()], false).is_ok());
        match ctx.require_env(&["build".into()], false) {
            Err(ConfigError::MissingEnv(vars)) => assert_eq!(vars, vec!["TINYPNG_API_KEY"]),
            other => panic!("expected missing env, got {:?}", other),
        }
    }

    #[test]
    fn test_graph_error_surfaces() {
        let mut config = default_config();
        config.entry_points.insert("broken".into(), NodeConfig::Name("sass".into()));
        let err = BuildContext::new(config, PathBuf::from("/project"), Environment::default()).unwrap_err();
        assert!(matches!(err, BuildError::Graph(GraphError::UnknownTask { .. })));
    }

    #[test]
    fn test_build_context_resolve_path() {
        let ctx = context();
        assert_eq!(ctx.resolve_path(Path::new("/other/path")), PathBuf::from("/other/path"));
        assert_eq!(ctx.resolve_path(Path::new("css")), PathBuf::from("/project/css"));
    }
}
