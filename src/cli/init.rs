//! Project initialization
//!
//! Writes a starter `assetflow.toml` and the source directories it expects.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::config::loader::{config_template, CONFIG_FILENAME};

/// Error during project initialization
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Config already exists and `--force` was not given
    #[error("{} already exists (use --force to overwrite)", .0.display())]
    ConfigExists(PathBuf),
    /// Failed to create directory
    #[error("Failed to create directory {}: {1}", .0.display())]
    CreateDir(PathBuf, std::io::Error),
    /// Failed to write file
    #[error("Failed to write {}: {1}", .0.display())]
    WriteFile(PathBuf, std::io::Error),
}

/// Source directories of the starter layout.
const SOURCE_DIRS: &[&str] = &["assets/css", "assets/js", "assets/img"];

const GITIGNORE: &str = "node_modules/\n.env\n";

/// Initialize a project in `path`, returning the config file written.
pub fn init_project(path: &Path, name: &str, force: bool) -> Result<PathBuf, InitError> {
    let config_path = path.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        return Err(InitError::ConfigExists(config_path));
    }

    create_dir(path)?;
    for dir in SOURCE_DIRS {
        create_dir(&path.join(dir))?;
    }
    write_file(&config_path, &config_template(name))?;

    // Never clobber an existing ignore file
    let gitignore = path.join(".gitignore");
    if !gitignore.exists() {
        write_file(&gitignore, GITIGNORE)?;
    }

    Ok(config_path)
}

fn create_dir(path: &Path) -> Result<(), InitError> {
    fs::create_dir_all(path).map_err(|e| InitError::CreateDir(path.to_path_buf(), e))
}

fn write_file(path: &Path, content: &str) -> Result<(), InitError> {
    fs::write(path, content).map_err(|e| InitError::WriteFile(path.to_path_buf(), e))
}

/// Default project name: the directory's name.
fn project_name(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "/")
        .unwrap_or_else(|| "site".to_string())
}

/// Run the init command
pub fn run_init(path: Option<&Path>, name: Option<&str>, force: bool) -> ExitCode {
    let path = path.unwrap_or(Path::new("."));
    let name = name.map(str::to_string).unwrap_or_else(|| project_name(path));

    match init_project(path, &name, force) {
        Ok(config_path) => {
            tracing::info!("Created {}", config_path.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e @ InitError::ConfigExists(_)) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_INVALID_ARGS)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
