//! Configuration schema types for `assetflow.toml`
//!
//! Defines the structure and validation rules for a site's asset pipeline:
//! the task table, the entry-point graphs, watch bindings, the preview server
//! and the deploy file selection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
}

/// Browser versions used as lightningcss targets.
///
/// Versions are written as `"major"` or `"major.minor"` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firefox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safari: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_saf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opera: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samsung: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android: Option<String>,
}

impl Default for BrowsersConfig {
    /// Roughly "last 2 versions" of the evergreen browsers.
    fn default() -> Self {
        Self {
            chrome: Some("120".to_string()),
            edge: Some("120".to_string()),
            firefox: Some("121".to_string()),
            safari: Some("16.6".to_string()),
            ios_saf: Some("16.6".to_string()),
            opera: None,
            samsung: None,
            android: None,
        }
    }
}

impl BrowsersConfig {
    /// Iterate over `(browser, version)` pairs that are set.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("chrome", &self.chrome),
            ("edge", &self.edge),
            ("firefox", &self.firefox),
            ("safari", &self.safari),
            ("ios_saf", &self.ios_saf),
            ("opera", &self.opera),
            ("samsung", &self.samsung),
            ("android", &self.android),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.as_deref().map(|v| (name, v)))
    }
}

/// Parse a `"major[.minor[.patch]]"` version into the lightningcss encoding
/// (`major << 16 | minor << 8 | patch`).
pub fn parse_browser_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    let patch: u32 = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || minor > 255 || patch > 255 {
        return None;
    }
    Some((major << 16) | (minor << 8) | patch)
}

/// Per-kind task settings, selected by the `kind` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskKindConfig {
    /// Stylesheet compilation (optional preprocessor command + lightningcss)
    Styles {
        /// Preprocessor invoked with the source on stdin, CSS on stdout
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<Vec<String>>,
        /// Print minified CSS
        #[serde(default = "default_true")]
        minify: bool,
        /// Browser targets for vendor prefixing
        #[serde(default)]
        browsers: BrowsersConfig,
        /// Write `<name>.css.map` next to each stylesheet
        #[serde(default)]
        sourcemaps: bool,
    },
    /// Script transformation (transpile/minify command chain)
    Scripts {
        /// Commands applied in order, each stdin -> stdout
        #[serde(default)]
        commands: Vec<Vec<String>>,
        /// Concatenate all sources into this single file
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bundle: Option<String>,
        /// Move inline maps emitted by the commands into `<name>.map` files
        #[serde(default)]
        sourcemaps: bool,
    },
    /// Flat copy of vendor files
    Copy,
    /// Lossy compression through the image optimization service
    OptimizeImages {
        /// Signature file recording already-compressed images
        #[serde(default = "default_signatures")]
        signatures: PathBuf,
    },
    /// Lossless WebP conversion
    Webp,
}

fn default_true() -> bool {
    true
}

fn default_signatures() -> PathBuf {
    PathBuf::from(".tinypng-sigs")
}

impl TaskKindConfig {
    /// Short kind name as written in the config file.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskKindConfig::Styles { .. } => "styles",
            TaskKindConfig::Scripts { .. } => "scripts",
            TaskKindConfig::Copy => "copy",
            TaskKindConfig::OptimizeImages { .. } => "optimize-images",
            TaskKindConfig::Webp => "webp",
        }
    }

    /// Whether this task needs the image optimization service key.
    pub fn needs_image_service(&self) -> bool {
        matches!(self, TaskKindConfig::OptimizeImages { .. })
    }
}

/// A single task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Glob patterns (relative to the project root) for source files
    pub sources: Vec<String>,
    /// Destination directory (relative to the project root)
    pub dest: PathBuf,
    /// Kind-specific settings
    #[serde(flatten)]
    pub kind: TaskKindConfig,
}

/// A node of an entry-point graph.
///
/// A bare string names a task, or another entry point when prefixed with `@`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeConfig {
    Name(String),
    Parallel { parallel: Vec<NodeConfig> },
    Series { series: Vec<NodeConfig> },
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Globs that only trigger a browser reload (e.g. HTML pages)
    #[serde(default = "default_reload_globs")]
    pub reload: Vec<String>,
    /// Task name -> globs that re-run it. Defaults to each task's own sources.
    #[serde(default)]
    pub bindings: BTreeMap<String, Vec<String>>,
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_reload_globs() -> Vec<String> {
    vec!["*.html".to_string()]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reload: default_reload_globs(),
            bindings: BTreeMap::new(),
        }
    }
}

/// Preview server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory to serve (defaults to the project root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), root: None }
    }
}

/// Which files the deploy step uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Globs selecting files to upload
    #[serde(default = "default_deploy_include")]
    pub include: Vec<String>,
    /// Globs removed from the selection
    #[serde(default = "default_deploy_exclude")]
    pub exclude: Vec<String>,
}

fn default_deploy_include() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_deploy_exclude() -> Vec<String> {
    vec![
        "node_modules/**".to_string(),
        "**/.env".to_string(),
        ".git/**".to_string(),
        "**/.gitignore".to_string(),
        "**/README.md".to_string(),
    ]
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self { include: default_deploy_include(), exclude: default_deploy_exclude() }
    }
}

/// Complete assetflow.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    /// Task definitions by name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    /// Entry-point graphs by name
    #[serde(default)]
    pub entry_points: BTreeMap<String, NodeConfig>,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
    /// Preview server settings
    #[serde(default)]
    pub serve: ServeConfig,
    /// Deploy file selection
    #[serde(default)]
    pub deploy: DeployConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Field path (e.g., "tasks.css.sources")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl FlowConfig {
    /// Validate the configuration and return all errors found.
    ///
    /// Graph-level checks (unknown names, cycles, overlapping destinations)
    /// happen when the registry and graph are built.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.is_empty() {
            errors.push(ConfigValidationError {
                field: "project.name".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        for (name, task) in &self.tasks {
            if name.is_empty() || name.starts_with('@') {
                errors.push(ConfigValidationError {
                    field: format!("tasks.{}", name),
                    message: "task names must be non-empty and must not start with '@'"
                        .to_string(),
                });
            }

            if task.sources.is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("tasks.{}.sources", name),
                    message: "must contain at least one glob pattern".to_string(),
                });
            }

            if task.dest.as_os_str().is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("tasks.{}.dest", name),
                    message: "must be a non-empty path".to_string(),
                });
            }

            match &task.kind {
                TaskKindConfig::Styles { command, browsers, .. } => {
                    if matches!(command, Some(c) if c.is_empty()) {
                        errors.push(ConfigValidationError {
                            field: format!("tasks.{}.command", name),
                            message: "must name a program".to_string(),
                        });
                    }
                    for (browser, version) in browsers.entries() {
                        if parse_browser_version(version).is_none() {
                            errors.push(ConfigValidationError {
                                field: format!("tasks.{}.browsers.{}", name, browser),
                                message: format!("invalid version '{}'", version),
                            });
                        }
                    }
                }
                TaskKindConfig::Scripts { commands, bundle, .. } => {
                    if commands.iter().any(|c| c.is_empty()) {
                        errors.push(ConfigValidationError {
                            field: format!("tasks.{}.commands", name),
                            message: "every command must name a program".to_string(),
                        });
                    }
                    if matches!(bundle, Some(b) if b.is_empty()) {
                        errors.push(ConfigValidationError {
                            field: format!("tasks.{}.bundle", name),
                            message: "must be a non-empty file name".to_string(),
                        });
                    }
                }
                TaskKindConfig::Copy
                | TaskKindConfig::OptimizeImages { .. }
                | TaskKindConfig::Webp => {}
            }
        }

        if self.watch.debounce_ms == 0 {
            errors.push(ConfigValidationError {
                field: "watch.debounce_ms".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        if self.serve.port == 0 {
            errors.push(ConfigValidationError {
                field: "serve.port".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        if self.deploy.include.is_empty() {
            errors.push(ConfigValidationError {
                field: "deploy.include".to_string(),
                message: "must contain at least one glob pattern".to_string(),
            });
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parse() {
        let toml = r#"
[project]
name = "site"
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "site");
        assert!(config.tasks.is_empty());
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.serve.port, 3000);
        assert!(config.deploy.exclude.contains(&"node_modules/**".to_string()));
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
name = "landing"

[tasks.css]
kind = "styles"
sources = ["assets/css/*.scss"]
dest = "css"
command = ["sass", "--stdin"]
minify = false

[tasks.css.browsers]
chrome = "109"
safari = "15.6"

[tasks.js]
kind = "scripts"
sources = ["assets/js/*.js"]
dest = "js"
commands = [["npx", "esbuild", "--minify"]]
bundle = "app.js"

[tasks.vendor]
kind = "copy"
sources = ["node_modules/jquery/dist/jquery.min.js"]
dest = "vendor/js"

[tasks.images]
kind = "optimize-images"
sources = ["assets/img/**/*.png"]
dest = "img"

[tasks.webp]
kind = "webp"
sources = ["assets/img/**/*.jpg"]
dest = "webp"

[entry_points]
default = { series = [{ parallel = ["css", "js"] }, "vendor"] }
build = { parallel = ["@default", "images", "webp"] }

[watch]
debounce_ms = 250
reload = ["*.html", "pages/*.html"]

[watch.bindings]
css = ["assets/css/**/*.scss"]

[serve]
port = 8080
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert!(config.is_valid(), "{:?}", config.validate());

        let css = config.tasks.get("css").unwrap();
        match &css.kind {
            TaskKindConfig::Styles { command, minify, browsers, .. } => {
                assert_eq!(command.as_deref(), Some(&["sass".to_string(), "--stdin".to_string()][..]));
                assert!(!minify);
                assert_eq!(browsers.chrome.as_deref(), Some("109"));
                assert_eq!(browsers.firefox, None);
            }
            other => panic!("unexpected kind: {:?}", other),
        }

        let js = config.tasks.get("js").unwrap();
        assert_eq!(js.kind.kind_name(), "scripts");
        assert_eq!(config.tasks.get("vendor").unwrap().kind, TaskKindConfig::Copy);
        assert!(config.tasks.get("images").unwrap().kind.needs_image_service());

        assert_eq!(
            config.entry_points.get("default").unwrap(),
            &NodeConfig::Series {
                series: vec![
                    NodeConfig::Parallel {
                        parallel: vec![
                            NodeConfig::Name("css".to_string()),
                            NodeConfig::Name("js".to_string())
                        ]
                    },
                    NodeConfig::Name("vendor".to_string()),
                ]
            }
        );

        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.watch.reload.len(), 2);
        assert_eq!(config.watch.bindings.get("css").unwrap().len(), 1);
        assert_eq!(config.serve.port, 8080);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = r#"
[project]
name = "site"

[tasks.x]
kind = "teleport"
sources = ["a"]
dest = "b"
"#;
        assert!(toml::from_str::<FlowConfig>(toml).is_err());
    }

    #[test]
    fn test_validation_empty_name() {
        let toml = r#"
[project]
name = ""
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "project.name"));
    }

    #[test]
    fn test_validation_empty_sources() {
        let toml = r#"
[project]
name = "site"

[tasks.vendor]
kind = "copy"
sources = []
dest = "vendor"
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "tasks.vendor.sources"));
    }

    #[test]
    fn test_validation_bad_browser_version() {
        let toml = r#"
[project]
name = "site"

[tasks.css]
kind = "styles"
sources = ["a.css"]
dest = "css"

[tasks.css.browsers]
chrome = "latest"
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "tasks.css.browsers.chrome"));
    }

    #[test]
    fn test_validation_zero_debounce() {
        let toml = r#"
[project]
name = "site"

[watch]
debounce_ms = 0
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().iter().any(|e| e.field == "watch.debounce_ms"));
    }

    #[test]
    fn test_parse_browser_version() {
        assert_eq!(parse_browser_version("109"), Some(109 << 16));
        assert_eq!(parse_browser_version("15.6"), Some((15 << 16) | (6 << 8)));
        assert_eq!(parse_browser_version("15.6.1"), Some((15 << 16) | (6 << 8) | 1));
        assert_eq!(parse_browser_version("latest"), None);
        assert_eq!(parse_browser_version("1.2.3.4"), None);
    }
}
