//! Configuration loading and discovery for `assetflow.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{
    BrowsersConfig, DeployConfig, FlowConfig, NodeConfig, ProjectConfig, ServeConfig, TaskConfig,
    TaskKindConfig, WatchConfig,
};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "assetflow.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse assetflow.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// Required environment variables are not set
    #[error("Missing required environment configuration: {}", .0.join(", "))]
    MissingEnv(Vec<String>),
    /// An environment variable is set but unusable
    #[error("Invalid value for {0}: {1}")]
    InvalidEnv(String, String),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override preview server host
    pub host: Option<String>,
    /// Override preview server port
    pub port: Option<u16>,
    /// Override watch debounce delay
    pub debounce_ms: Option<u32>,
}

/// Find assetflow.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    find_config_from(cwd)
}

/// Find assetflow.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from an assetflow.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns the built-in
/// default configuration.
pub fn load_config(path: Option<&Path>) -> Result<FlowConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(default_config()),
    }
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<FlowConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<FlowConfig, ConfigError> {
    let config: FlowConfig = toml::from_str(contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Starter configuration written by `assetflow init`.
///
/// Mirrors [`default_config`], spelled out so it can be edited.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"[project]
name = "{name}"

# Sass -> CSS, then vendor prefixes and minification
[tasks.css]
kind = "styles"
sources = ["assets/css/*.scss"]
dest = "css"
command = ["sass", "--stdin", "--embed-source-map"]
sourcemaps = true

# Transpile and minify each script
[tasks.js]
kind = "scripts"
sources = ["assets/js/*.js"]
dest = "js"
commands = [
    ["npx", "babel", "--presets", "@babel/preset-env", "--source-maps", "inline"],
    ["npx", "uglifyjs", "--compress", "--mangle", "--source-map", "content=inline,url=inline"],
]
sourcemaps = true

# Vendor libraries, copied as-is
[tasks.vendor]
kind = "copy"
sources = [
    "node_modules/jquery/dist/jquery.min.js",
    "node_modules/bootstrap/dist/js/bootstrap.bundle.min.js",
    "node_modules/jquery-mask-plugin/dist/jquery.mask.min.js",
    "node_modules/@fancyapps/ui/dist/fancybox/fancybox.umd.js",
    "node_modules/swiper/swiper-bundle.min.js",
    "node_modules/jquery-validation/dist/jquery.validate.min.js",
]
dest = "vendor/js"

# Requires TINYPNG_API_KEY
[tasks.images]
kind = "optimize-images"
sources = [
    "assets/img/**/*.png",
    "assets/img/**/*.jpg",
    "assets/img/**/*.jpeg",
    "assets/img/**/*.gif",
    "assets/img/**/*.svg",
]
dest = "img"
signatures = ".tinypng-sigs"

[tasks.webp]
kind = "webp"
sources = ["assets/img/**/*.jpg", "assets/img/**/*.jpeg", "assets/img/**/*.png"]
dest = "webp"

[entry_points]
default = { series = [{ parallel = ["css", "js"] }, "vendor"] }
build = { parallel = ["css", "js", "images", "webp"] }

[watch]
debounce_ms = 100
reload = ["*.html"]

[watch.bindings]
css = ["assets/css/**/*.scss"]
js = ["assets/js/*.js"]

[serve]
host = "127.0.0.1"
port = 3000

# Requires FTP_HOST, FTP_USER, FTP_PASSWORD, FTP_PATH (FTP_PARALLEL optional)
[deploy]
include = ["**/*"]
exclude = ["node_modules/**", "**/.env", ".git/**", "**/.gitignore", "**/README.md"]
"#;

/// Render the starter configuration for a project name.
pub fn config_template(name: &str) -> String {
    DEFAULT_CONFIG_TEMPLATE.replace("{name}", name)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Create the default configuration used when no assetflow.toml is found.
///
/// The project name is set to the current directory name.
pub fn default_config() -> FlowConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    let mut tasks = BTreeMap::new();
    tasks.insert(
        "css".to_string(),
        TaskConfig {
            sources: strings(&["assets/css/*.scss"]),
            dest: PathBuf::from("css"),
            kind: TaskKindConfig::Styles {
                command: Some(strings(&["sass", "--stdin", "--embed-source-map"])),
                minify: true,
                browsers: BrowsersConfig::default(),
                sourcemaps: true,
            },
        },
    );
    tasks.insert(
        "js".to_string(),
        TaskConfig {
            sources: strings(&["assets/js/*.js"]),
            dest: PathBuf::from("js"),
            kind: TaskKindConfig::Scripts {
                commands: vec![
                    strings(&["npx", "babel", "--presets", "@babel/preset-env", "--source-maps", "inline"]),
                    strings(&["npx", "uglifyjs", "--compress", "--mangle", "--source-map", "content=inline,url=inline"]),
                ],
                bundle: None,
                sourcemaps: true,
            },
        },
    );
    tasks.insert(
        "vendor".to_string(),
        TaskConfig {
            sources: strings(&[
                "node_modules/jquery/dist/jquery.min.js",
                "node_modules/bootstrap/dist/js/bootstrap.bundle.min.js",
                "node_modules/jquery-mask-plugin/dist/jquery.mask.min.js",
                "node_modules/@fancyapps/ui/dist/fancybox/fancybox.umd.js",
                "node_modules/swiper/swiper-bundle.min.js",
                "node_modules/jquery-validation/dist/jquery.validate.min.js",
            ]),
            dest: PathBuf::from("vendor/js"),
            kind: TaskKindConfig::Copy,
        },
    );
    tasks.insert(
        "images".to_string(),
        TaskConfig {
            sources: strings(&[
                "assets/img/**/*.png",
                "assets/img/**/*.jpg",
                "assets/img/**/*.jpeg",
                "assets/img/**/*.gif",
                "assets/img/**/*.svg",
            ]),
            dest: PathBuf::from("img"),
            kind: TaskKindConfig::OptimizeImages { signatures: PathBuf::from(".tinypng-sigs") },
        },
    );
    tasks.insert(
        "webp".to_string(),
        TaskConfig {
            sources: strings(&[
                "assets/img/**/*.jpg",
                "assets/img/**/*.jpeg",
                "assets/img/**/*.png",
            ]),
            dest: PathBuf::from("webp"),
            kind: TaskKindConfig::Webp,
        },
    );

    let name = |n: &str| NodeConfig::Name(n.to_string());
    let mut entry_points = BTreeMap::new();
    entry_points.insert(
        "default".to_string(),
        NodeConfig::Series {
            series: vec![NodeConfig::Parallel { parallel: vec![name("css"), name("js")] }, name("vendor")],
        },
    );
    entry_points.insert(
        "build".to_string(),
        NodeConfig::Parallel {
            parallel: vec![name("css"), name("js"), name("images"), name("webp")],
        },
    );

    let mut bindings = BTreeMap::new();
    bindings.insert("css".to_string(), strings(&["assets/css/**/*.scss"]));
    bindings.insert("js".to_string(), strings(&["assets/js/*.js"]));

    FlowConfig {
        project: ProjectConfig { name: project_name },
        tasks,
        entry_points,
        watch: WatchConfig { bindings, ..WatchConfig::default() },
        serve: ServeConfig::default(),
        deploy: DeployConfig::default(),
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut FlowConfig, overrides: &CliOverrides) {
    if let Some(ref host) = overrides.host {
        config.serve.host = host.clone();
    }

    if let Some(port) = overrides.port {
        config.serve.port = port;
    }

    if let Some(debounce_ms) = overrides.debounce_ms {
        config.watch.debounce_ms = debounce_ms;
    }
}

/// Get the project root directory from a config file path.
///
/// Returns the parent directory of the assetflow.toml file.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}
